/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A remote procedure call runtime in which both sides may act on guesses.
//!
//! A caller may predict the result of a call and run its continuation on the prediction before the result
//! arrives. A callee may send an early, speculative result before its definitive one. Either kind of guess
//! is later confirmed or refuted, and every piece of work that ran on a refuted guess is failed, running
//! the compensating action it registered.
//!
//! The entry points are [ClientSpec](client::ClientSpec) for issuing calls, and
//! [ServerSpec](server::ServerSpec) together with a [MethodTable](server::executor::MethodTable) for
//! hosting methods. Code running under speculation interacts with the runtime through its
//! [Facade](facade::Facade).

pub mod client;

pub mod config;

pub mod events;

pub mod facade;

pub mod logging;

pub mod messages;

pub mod networking;

pub mod pool;

pub mod registry;

pub mod rollback;

pub mod server;

pub mod stats;

pub mod types;

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that are shared by the client and server halves of the runtime.

pub mod basic;

pub mod errors;

pub mod prediction;

pub mod signature;

pub mod status;

pub use basic::{CallId, Fingerprint, Location};
pub use errors::{CallError, FailureCause};
pub use prediction::{Equivalence, PredictionSet, Reconciliation};
pub use signature::{Arguments, RpcSignature};
pub use status::{ContextKind, SpeculationAxis, Status, StatusCell};

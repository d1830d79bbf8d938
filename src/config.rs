/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! User-defined parameters of clients and servers.
//!
//! Both configurations are constructed with the builder pattern, for example:
//!
//! ```ignore
//! let configuration =
//!     ServerConfiguration::builder()
//!     .identity(String::from("calculator"))
//!     .listening_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
//!     .listening_port(0)
//!     .thread_pool_size(8)
//!     .log_events(true)
//!     .build()
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use typed_builder::TypedBuilder;

/// Server configuration defaults.
pub const DEFAULT_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const DEFAULT_PORT: u16 = 0;
pub const DEFAULT_THREAD_POOL_SIZE: usize = 0;
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Stores the user-defined parameters required to start a [Server](crate::server::Server).
///
/// ## Identity
///
/// Clients find a server's methods in the [Directory](crate::registry::Directory) by the server's identity
/// together with a method signature. Two servers hosting methods with the same signature must use
/// different identities.
///
/// ## Thread pool size
///
/// Method bodies run on the server's worker pool. A size of zero (the default) starts a thread per job.
/// With a fixed size, requests beyond it wait for a free worker. Continuations of the nested calls a
/// method makes run on threads of their own, so a method never waits on work queued behind itself.
#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ServerConfiguration]. On the builder call the following methods to construct a valid [ServerConfiguration].

    Required:
    - `.identity(...)`
    - `.log_events(...)`

    Optional:
    - `.listening_ip(...)`
    - `.listening_port(...)`
    - `.thread_pool_size(...)`
    - `.max_connections(...)`
    - `.signature_file(...)`
    - `.accept_poll_interval(...)`
"))]
pub struct ServerConfiguration {
    #[builder(setter(doc = "Set the name under which the server registers its methods. Required."))]
    pub identity: String,
    #[builder(default = DEFAULT_IP, setter(doc = "Set the IP address to listen on. Defaults to localhost."))]
    pub listening_ip: IpAddr,
    #[builder(default = DEFAULT_PORT, setter(doc = "Set the port to listen on. Zero (the default) picks a free port."))]
    pub listening_port: u16,
    #[builder(default = DEFAULT_THREAD_POOL_SIZE, setter(doc = "Set the number of method workers. Zero (the default) starts a thread per request."))]
    pub thread_pool_size: usize,
    #[builder(default = DEFAULT_MAX_CONNECTIONS, setter(doc = "Set the maximum number of requests served at the same time. Connections over the limit are refused. Defaults to 1024."))]
    pub max_connections: usize,
    #[builder(default, setter(strip_option, doc = "Set the file the server persists its registrations into. Optional."))]
    pub signature_file: Option<PathBuf>,
    #[builder(default = Duration::from_millis(5), setter(doc = "Set how often the listener checks for shutdown while no connection is pending. Defaults to 5ms."))]
    pub accept_poll_interval: Duration,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

/// Stores the user-defined parameters required to start a [Client](crate::client::Client).
///
/// ## Thread pool size
///
/// The client's worker pool runs continuation branches. Each call's control loop and connection reader
/// run on threads of their own, so any fixed size makes progress. Zero (the default) starts a thread per
/// job.
#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ClientConfiguration]. On the builder call the following methods to construct a valid [ClientConfiguration].

    Required:
    - `.log_events(...)`

    Optional:
    - `.thread_pool_size(...)`
    - `.connect_timeout(...)`
    - `.statistics(...)`
"))]
pub struct ClientConfiguration {
    #[builder(default = DEFAULT_THREAD_POOL_SIZE, setter(doc = "Set the number of client workers. Zero (the default) starts a thread per job."))]
    pub thread_pool_size: usize,
    #[builder(default, setter(strip_option, doc = "Set the timeout for establishing connections to servers. Optional."))]
    pub connect_timeout: Option<Duration>,
    #[builder(default = false, setter(doc = "Enable prediction statistics? Defaults to false."))]
    pub statistics: bool,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

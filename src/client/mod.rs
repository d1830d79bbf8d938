/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The calling side of the runtime.
//!
//! A [Client] is the per-process context that outbound calls run in: it owns the worker pool that
//! runs continuations, and holds the [Directory] used to locate servers. Clients are
//! started from a [ClientSpec]:
//!
//! ```ignore
//! let client =
//!     ClientSpec::builder()
//!     .configuration(configuration)
//!     .directory(directory)
//!     .build()
//!     .start();
//!
//! let add = client.bind::<(i32, i32), i32>("calculator", "Calculator", "add")?;
//! let future = add.call(PredictionSet::single(3), |_, sum| Ok(sum * 2), (1, 2))?;
//! assert_eq!(future.get_result()?, 6);
//! ```
//!
//! ## Call lifecycle
//!
//! 1. [Stub::call](stub::Stub::call) starts one continuation branch per consumed prediction right away,
//!    then hands the call to a control loop on a thread of its own.
//! 2. The control loop sends the request, and starts a branch for every speculative value the server
//!    sends that no running branch already covers.
//! 3. When the definitive value arrives, the branch that ran on an equivalent value is confirmed and all
//!    others fail (running their rollbacks). If no branch matches, one is started on the definitive value.
//! 4. Once the context that issued the call is also confirmed, the confirmed branch's output becomes the
//!    [future's](future::CallFuture) result.

pub(crate) mod callbacks;

pub(crate) mod control;

pub mod future;

pub mod stub;

use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};
use typed_builder::TypedBuilder;

use crate::config::ClientConfiguration;
use crate::events::{Event, EventHandlers, HandlerPtr};
use crate::networking::tcp::TcpConnector;
use crate::networking::Connector;
use crate::pool::{PoolHandle, WorkerPool};
use crate::registry::Directory;
use crate::stats::{Statistics, StatisticsSnapshot};
use crate::types::basic::Location;
use crate::types::errors::CallError;
use crate::types::signature::{Arguments, RpcSignature};
use crate::types::status::StatusCell;

use self::stub::Stub;

/// Everything a call needs from the process it runs in. Shared by every stub, branch and facade.
pub(crate) struct ClientContext {
    pub(crate) pool: PoolHandle,
    pub(crate) directory: Arc<Directory>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) statistics: Arc<Statistics>,
    pub(crate) events: Arc<EventHandlers>,
}

/// Stores the configuration and collaborators required to start a [Client].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ClientSpec]. On the builder call the following methods to construct a valid [ClientSpec].

    Required:
    - `.configuration(...)`
    - `.directory(...)`

    Optional:
    - `.connector(...)`
    - `.on_event(...)`
"))]
pub struct ClientSpec {
    #[builder(setter(doc = "Set the [configuration](ClientConfiguration) of the client. Required."))]
    configuration: ClientConfiguration,
    #[builder(setter(doc = "Set the [Directory] that servers are looked up in. Required."))]
    directory: Arc<Directory>,
    #[builder(default, setter(strip_option, doc = "Set the transport used to reach servers. Defaults to TCP."))]
    connector: Option<Arc<dyn Connector>>,
    #[builder(default, setter(transform = |handler: impl Fn(&Event) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<Event>),
    doc = "Register a handler closure to be invoked on every event of the client. Optional."))]
    on_event: Option<HandlerPtr<Event>>,
}

impl ClientSpec {
    /// Start the client's worker pool and return the running [Client].
    pub fn start(self) -> Client {
        let pool = WorkerPool::new("specrpc-client", self.configuration.thread_pool_size);
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TcpConnector::new(self.configuration.connect_timeout)) as Arc<dyn Connector>);

        let context = Arc::new(ClientContext {
            pool: pool.handle(),
            directory: self.directory,
            connector,
            statistics: Arc::new(Statistics::new(self.configuration.statistics)),
            events: Arc::new(EventHandlers::new(self.configuration.log_events, self.on_event)),
        });

        Client {
            context,
            _pool: pool,
        }
    }
}

/// A running client. Dropping it releases its worker pool: calls and continuations already running are
/// carried to completion.
pub struct Client {
    context: Arc<ClientContext>,
    _pool: WorkerPool,
}

impl Client {
    /// Bind a stub for calling `host_type::method`, taking the argument tuple `A` and returning `R`, on the
    /// server registered as `identity`. Calls through the stub are issued from outside any speculative
    /// context.
    pub fn bind<A, R>(&self, identity: &str, host_type: &str, method: &str) -> Result<Stub<A, R>, CallError>
    where
        A: Arguments + BorshSerialize,
        R: BorshSerialize + BorshDeserialize + Clone + Send + 'static,
    {
        Stub::bind(
            self.context.clone(),
            identity,
            host_type,
            method,
            StatusCell::root(),
            None,
        )
    }

    pub fn lookup(&self, identity: &str, signature: &RpcSignature) -> Result<Location, CallError> {
        Ok(self.context.directory.lookup(identity, signature)?)
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.context.directory
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.context.statistics.snapshot()
    }

    pub fn reset_statistics(&self) {
        self.context.statistics.reset()
    }

    /// Release the client. Equivalent to dropping it.
    pub fn shutdown(self) {}
}

impl ClientContext {
    /// A context for the nested calls made by a server's host methods.
    pub(crate) fn for_server(
        pool: PoolHandle,
        directory: Arc<Directory>,
        connector: Arc<dyn Connector>,
        events: Arc<EventHandlers>,
    ) -> ClientContext {
        ClientContext {
            pool,
            directory,
            connector,
            statistics: Arc::new(Statistics::new(false)),
            events,
        }
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The serving side of the runtime.
//!
//! A [Server] hosts the methods of one [MethodTable] under one identity. Starting it binds a TCP listener,
//! registers every method's signature in the [Directory] (and, if configured, in a signature file), and
//! starts a listener thread that serves each accepted connection on a thread of its own:
//!
//! ```ignore
//! let mut methods = MethodTable::new();
//! methods.register(HostMethod::new("Calculator", "add", || Calculator, |_, _, (a, b): (i32, i32)| Ok(a + b)));
//!
//! let server =
//!     ServerSpec::builder()
//!     .configuration(configuration)
//!     .directory(directory)
//!     .methods(methods)
//!     .build()
//!     .start()?;
//! ```
//!
//! Host methods that make nested calls do so through their [Facade](crate::facade::Facade), which uses the
//! server's worker pool and directory. Dropping the server stops the listener; requests already accepted
//! are served to completion.

pub mod executor;

pub(crate) mod handler;

use std::fmt::{self, Display, Formatter};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::client::ClientContext;
use crate::config::ServerConfiguration;
use crate::events::{Event, EventHandlers, HandlerPtr};
use crate::networking::tcp::{TcpConnection, TcpConnector};
use crate::networking::{Connection, Connector};
use crate::pool::WorkerPool;
use crate::registry::{Directory, RegistryError};
use crate::types::basic::Location;

use self::executor::MethodTable;

/// Stores the configuration, methods and collaborators required to start a [Server].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ServerSpec]. On the builder call the following methods to construct a valid [ServerSpec].

    Required:
    - `.configuration(...)`
    - `.directory(...)`
    - `.methods(...)`

    Optional:
    - `.connector(...)`
    - `.on_event(...)`
"))]
pub struct ServerSpec {
    #[builder(setter(doc = "Set the [configuration](ServerConfiguration) of the server. Required."))]
    configuration: ServerConfiguration,
    #[builder(setter(doc = "Set the [Directory] the server registers its methods in, and looks up the targets of nested calls in. Required."))]
    directory: Arc<Directory>,
    #[builder(setter(doc = "Set the [methods](MethodTable) the server hosts. Required."))]
    methods: MethodTable,
    #[builder(default, setter(strip_option, doc = "Set the transport used for nested calls. Defaults to TCP."))]
    connector: Option<Arc<dyn Connector>>,
    #[builder(default, setter(transform = |handler: impl Fn(&Event) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<Event>),
    doc = "Register a handler closure to be invoked on every event of the server. Optional."))]
    on_event: Option<HandlerPtr<Event>>,
}

impl ServerSpec {
    /// Bind the listener, register the server's methods, and start serving.
    pub fn start(self) -> Result<Server, ServerError> {
        let configuration = self.configuration;
        let listener = TcpListener::bind(SocketAddr::new(
            configuration.listening_ip,
            configuration.listening_port,
        ))
        .map_err(ServerError::Bind)?;
        listener.set_nonblocking(true).map_err(ServerError::Bind)?;
        let location = Location::from(listener.local_addr().map_err(ServerError::Bind)?);

        for signature in self.methods.signatures() {
            self.directory
                .register(&configuration.identity, signature, location.clone());
        }
        if let Some(path) = &configuration.signature_file {
            let on_file = Directory::load(path)?;
            for signature in self.methods.signatures() {
                on_file.register(&configuration.identity, signature, location.clone());
            }
            on_file.persist()?;
        }
        log::info!(
            "Server {} serving {} methods at {}.",
            configuration.identity,
            self.methods.len(),
            location
        );

        let pool = WorkerPool::new(
            &format!("specrpc-{}", configuration.identity),
            configuration.thread_pool_size,
        );
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TcpConnector::new(None)) as Arc<dyn Connector>);
        let context = Arc::new(ClientContext::for_server(
            pool.handle(),
            self.directory,
            connector,
            Arc::new(EventHandlers::new(configuration.log_events, self.on_event)),
        ));

        let shared = Arc::new(Shared {
            identity: configuration.identity.clone(),
            methods: Arc::new(self.methods),
            context,
            active: AtomicUsize::new(0),
            max_connections: configuration.max_connections,
        });

        let (shutdown, shutdown_receiver) = mpsc::channel();
        let listener = start_listener(
            listener,
            shared.clone(),
            configuration.accept_poll_interval,
            shutdown_receiver,
        );

        Ok(Server {
            location,
            shared,
            listener: Some(listener),
            shutdown,
            _pool: pool,
        })
    }
}

/// A handle to a running server. When this value is dropped, the listener thread is shut down.
pub struct Server {
    location: Location,
    shared: Arc<Shared>,
    listener: Option<JoinHandle<()>>,
    shutdown: Sender<()>,
    _pool: WorkerPool,
}

impl Server {
    /// The address the server is listening on, as registered in the directory.
    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn identity(&self) -> &str {
        &self.shared.identity
    }

    /// Number of requests being served right now.
    pub fn active_connections(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Serve the call carried by a connection that did not come through the server's own listener, on
    /// a new thread.
    pub fn serve_connection(&self, connection: Arc<dyn Connection>) {
        dispatch(&self.shared, connection)
    }

    /// Stop the server. Equivalent to dropping it.
    pub fn shutdown(self) {}
}

impl Drop for Server {
    fn drop(&mut self) {
        // The listener may have already exited on an unrecoverable error.
        let _ = self.shutdown.send(());
        if let Some(listener) = self.listener.take() {
            if listener.join().is_err() {
                log::warn!("Listener of server {} panicked.", self.shared.identity);
            }
        }
        log::info!("Server {} at {} shut down.", self.shared.identity, self.location);
    }
}

struct Shared {
    identity: String,
    methods: Arc<executor::MethodTable>,
    context: Arc<ClientContext>,
    active: AtomicUsize,
    max_connections: usize,
}

fn start_listener(
    listener: TcpListener,
    shared: Arc<Shared>,
    poll_interval: Duration,
    shutdown: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => {}
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                let connection = stream
                    .set_nonblocking(false)
                    .map_err(Into::into)
                    .and_then(|()| TcpConnection::new(stream));
                match connection {
                    Ok(connection) => dispatch(&shared, Arc::new(connection)),
                    Err(error) => log::warn!("Could not set up connection from {}: {}", peer, error),
                }
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => thread::sleep(poll_interval),
            Err(error) => log::warn!("Server {} failed to accept: {}", shared.identity, error),
        }
    })
}

// Serve `connection` on a thread of its own, unless the server is at its connection limit.
fn dispatch(shared: &Arc<Shared>, connection: Arc<dyn Connection>) {
    if shared.active.fetch_add(1, Ordering::SeqCst) >= shared.max_connections {
        shared.active.fetch_sub(1, Ordering::SeqCst);
        log::warn!(
            "Server {} refused {}: {} connections already active.",
            shared.identity,
            connection.peer(),
            shared.max_connections
        );
        connection.close();
        return;
    }

    let guard = ActiveGuard(shared.clone());
    let methods = shared.methods.clone();
    let context = shared.context.clone();
    let spawned = thread::Builder::new()
        .name(format!("specrpc-{}-conn", shared.identity))
        .spawn(move || {
            let _guard = guard;
            handler::handle(connection, methods, context);
        });
    if let Err(error) = spawned {
        log::warn!("Server {} could not spawn a connection thread: {}", shared.identity, error);
    }
}

struct ActiveGuard(Arc<Shared>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub enum ServerError {
    /// The listener could not be bound or configured.
    Bind(io::Error),
    Registry(RegistryError),
}

impl From<RegistryError> for ServerError {
    fn from(error: RegistryError) -> Self {
        ServerError::Registry(error)
    }
}

impl Display for ServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Bind(error) => write!(f, "could not bind listener: {}", error),
            ServerError::Registry(error) => write!(f, "could not register methods: {}", error),
        }
    }
}

impl std::error::Error for ServerError {}

use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
};

use specrpc_rs::{
    messages::Message,
    networking::{tcp::TcpConnector, Connection, Connector, TransportError},
    server::Server,
    types::Location,
};

/// One end of an in-memory connection. Messages travel over channels. `None` marks the connection closed.
pub(crate) struct MemoryConnection {
    name: String,
    outbox: Mutex<Option<Sender<Option<Message>>>>,
    // Sender into this end's own inbox, used to unblock a pending `recv` on close.
    waker: Mutex<Sender<Option<Message>>>,
    inbox: Mutex<Receiver<Option<Message>>>,
}

impl Connection for MemoryConnection {
    fn send(&self, message: &Message) -> Result<(), TransportError> {
        match &*self.outbox.lock().unwrap() {
            Some(outbox) => outbox
                .send(Some(message.clone()))
                .map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    fn recv(&self) -> Result<Message, TransportError> {
        match self.inbox.lock().unwrap().recv() {
            Ok(Some(message)) => Ok(message),
            Ok(None) | Err(_) => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        if let Some(outbox) = self.outbox.lock().unwrap().take() {
            let _ = outbox.send(None);
        }
        let _ = self.waker.lock().unwrap().send(None);
    }

    fn peer(&self) -> String {
        self.name.clone()
    }
}

/// A pair of connected in-memory connections: `(client end, server end)`.
pub(crate) fn memory_pair() -> (Arc<MemoryConnection>, Arc<MemoryConnection>) {
    let (to_server, server_inbox) = mpsc::channel();
    let (to_client, client_inbox) = mpsc::channel();
    let client = MemoryConnection {
        name: String::from("memory-server"),
        outbox: Mutex::new(Some(to_server.clone())),
        waker: Mutex::new(to_client.clone()),
        inbox: Mutex::new(client_inbox),
    };
    let server = MemoryConnection {
        name: String::from("memory-client"),
        outbox: Mutex::new(Some(to_client)),
        waker: Mutex::new(to_server),
        inbox: Mutex::new(server_inbox),
    };
    (Arc::new(client), Arc::new(server))
}

/// A connector that reaches servers in the same process through [memory_pair]s instead of TCP.
#[derive(Default)]
pub(crate) struct MemoryConnector {
    servers: Mutex<HashMap<Location, Arc<Server>>>,
}

impl MemoryConnector {
    pub(crate) fn attach(&self, server: Arc<Server>) {
        self.servers
            .lock()
            .unwrap()
            .insert(server.location().clone(), server);
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, location: &Location) -> Result<Arc<dyn Connection>, TransportError> {
        let server = self
            .servers
            .lock()
            .unwrap()
            .get(location)
            .cloned()
            .ok_or(TransportError::Closed)?;
        let (client, server_end) = memory_pair();
        server.serve_connection(server_end);
        Ok(client)
    }
}

/// A TCP connector that keeps a handle to every connection it opens, so that tests can cut them.
pub(crate) struct SeveringConnector {
    inner: TcpConnector,
    opened: Mutex<Vec<Arc<dyn Connection>>>,
}

impl SeveringConnector {
    pub(crate) fn new() -> Arc<SeveringConnector> {
        Arc::new(SeveringConnector {
            inner: TcpConnector::default(),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    /// Close every connection opened so far.
    pub(crate) fn sever_all(&self) {
        for connection in self.opened.lock().unwrap().drain(..) {
            connection.close();
        }
    }
}

impl Connector for SeveringConnector {
    fn connect(&self, location: &Location) -> Result<Arc<dyn Connection>, TransportError> {
        let connection = self.inner.connect(location)?;
        self.opened.lock().unwrap().push(connection.clone());
        Ok(connection)
    }
}

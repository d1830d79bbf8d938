/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests of a server's behavior towards a peer that speaks the wire protocol directly, of its connection
//! limit, of serving calls over a transport other than TCP, and of servers persisting their registrations
//! in a signature file.

use std::{
    env, fs,
    io::Write,
    net::TcpStream,
    sync::Arc,
    thread,
    time::Duration,
};

use borsh::{BorshDeserialize, BorshSerialize};
use log::LevelFilter;

use specrpc_rs::{
    config::ServerConfiguration,
    logging::*,
    messages::{ExceptionKind, Message, Resolution, Response},
    networking::{
        tcp::{TcpConnection, TcpConnector},
        Connection, Connector,
    },
    registry::Directory,
    server::ServerSpec,
    types::{CallId, Location, PredictionSet, RpcSignature, SpeculationAxis},
};

mod common;

use common::{
    logging::setup_logger,
    network::{memory_pair, MemoryConnector},
    services::{
        eventually, ledger_methods, oracle_methods, start_client_with_connector, start_server,
        start_server_with_configuration, Effects, EventRecorder,
    },
};

const SETTLE: Duration = Duration::from_secs(5);

fn record_signature() -> RpcSignature {
    RpcSignature::of::<(String,), String>("Ledger", "record")
}

fn connect(location: &Location) -> Arc<dyn Connection> {
    TcpConnector::default().connect(location).unwrap()
}

fn request(signature: RpcSignature, entry: &str, axis: SpeculationAxis) -> Message {
    let args = (String::from(entry),).try_to_vec().unwrap();
    Message::request(CallId::random(), signature, args, axis)
}

#[test]
fn speculative_request_is_rolled_back_on_abort() {
    setup_logger(LevelFilter::Debug);

    let directory = Arc::new(Directory::new());
    let effects = Effects::default();
    let events = EventRecorder::default();
    let server = start_server("ledger", &directory, ledger_methods(&effects), &events);

    // 1. Send a speculative request, and read the value.
    let connection = connect(server.location());
    connection
        .send(&request(record_signature(), "guess", SpeculationAxis::Speculative))
        .unwrap();
    match connection.recv().unwrap() {
        Message::Response(Response::Value(bytes)) => {
            assert_eq!(String::try_from_slice(&bytes).unwrap(), "guess")
        }
        _ => panic!("expected a value"),
    }
    assert_eq!(effects.ledger(), vec![String::from("guess")]);

    // 2. Abort. The server rolls the entry back and closes the connection.
    connection.send(&Message::resolution(Resolution::Abort)).unwrap();
    assert!(eventually(SETTLE, || effects.ledger().is_empty()));
    assert!(eventually(SETTLE, || events.count(EXECUTE_ROLLBACK) == 1));
    assert!(connection.recv().is_err());
}

#[test]
fn speculative_request_is_kept_on_commit() {
    setup_logger(LevelFilter::Debug);

    let directory = Arc::new(Directory::new());
    let effects = Effects::default();
    let events = EventRecorder::default();
    let server = start_server("ledger", &directory, ledger_methods(&effects), &events);

    let connection = connect(server.location());
    connection
        .send(&request(record_signature(), "guess", SpeculationAxis::Speculative))
        .unwrap();
    assert!(matches!(connection.recv(), Ok(Message::Response(Response::Value(_)))));
    connection.send(&Message::resolution(Resolution::Commit)).unwrap();

    assert!(eventually(SETTLE, || events.count(RECEIVE_RESOLUTION) == 1));
    assert!(connection.recv().is_err());
    assert_eq!(events.count(EXECUTE_ROLLBACK), 0);
    assert_eq!(effects.ledger(), vec![String::from("guess")]);
}

#[test]
fn caller_disconnect_counts_as_abort() {
    setup_logger(LevelFilter::Debug);

    let directory = Arc::new(Directory::new());
    let effects = Effects::default();
    let events = EventRecorder::default();
    let server = start_server("ledger", &directory, ledger_methods(&effects), &events);

    let connection = connect(server.location());
    connection
        .send(&request(record_signature(), "guess", SpeculationAxis::Speculative))
        .unwrap();
    assert!(matches!(connection.recv(), Ok(Message::Response(Response::Value(_)))));
    connection.close();

    assert!(eventually(SETTLE, || effects.ledger().is_empty()));
}

#[test]
fn malformed_requests_are_rejected() {
    setup_logger(LevelFilter::Debug);

    let directory = Arc::new(Directory::new());
    let events = EventRecorder::default();
    let server = start_server("oracle", &directory, oracle_methods(&Effects::default()), &events);

    // 1. A request issued from a context that has already failed.
    let connection = connect(server.location());
    connection
        .send(&request(
            RpcSignature::of::<(String,), String>("Greeter", "echo"),
            "late",
            SpeculationAxis::Failed,
        ))
        .unwrap();
    assert!(matches!(
        connection.recv(),
        Ok(Message::Response(Response::Exception(ExceptionKind::Internal, _)))
    ));

    // 2. A connection that opens with something other than a request.
    let connection = connect(server.location());
    connection.send(&Message::resolution(Resolution::Commit)).unwrap();
    assert!(matches!(
        connection.recv(),
        Ok(Message::Response(Response::Exception(ExceptionKind::Internal, _)))
    ));

    // 3. A request for a method the server does not host.
    let connection = connect(server.location());
    connection
        .send(&request(record_signature(), "entry", SpeculationAxis::Succeeded))
        .unwrap();
    assert!(matches!(
        connection.recv(),
        Ok(Message::Response(Response::Exception(ExceptionKind::MethodNotRegistered, _)))
    ));

    // 4. A well-framed body that does not decode into a message.
    let location = server.location();
    let mut stream = TcpStream::connect((location.host.as_str(), location.port)).unwrap();
    let mut frame = 5u32.to_le_bytes().to_vec();
    frame.extend_from_slice(&[0xFF; 5]);
    stream.write_all(&frame).unwrap();
    let connection = TcpConnection::new(stream).unwrap();
    assert!(matches!(
        connection.recv(),
        Ok(Message::Response(Response::Exception(ExceptionKind::Internal, _)))
    ));
    assert_eq!(events.count(RECEIVE_REQUEST), 2);
}

#[test]
fn speculative_request_waits_for_commit_before_recording() {
    setup_logger(LevelFilter::Debug);

    let directory = Arc::new(Directory::new());
    let effects = Effects::default();
    let events = EventRecorder::default();
    let server = start_server("ledger", &directory, ledger_methods(&effects), &events);
    let settled = RpcSignature::of::<(String,), String>("Ledger", "record_when_settled");

    // 1. Send a speculative request. The method blocks until the request is resolved.
    let connection = connect(server.location());
    connection
        .send(&request(settled, "entry", SpeculationAxis::Speculative))
        .unwrap();
    assert!(eventually(SETTLE, || events.count(RECEIVE_REQUEST) == 1));
    thread::sleep(Duration::from_millis(200));
    assert!(effects.ledger().is_empty());
    assert_eq!(events.count(SEND_VALUE), 0);

    // 2. Commit. The method proceeds, records the entry and returns it.
    connection.send(&Message::resolution(Resolution::Commit)).unwrap();
    match connection.recv().unwrap() {
        Message::Response(Response::Value(bytes)) => {
            assert_eq!(String::try_from_slice(&bytes).unwrap(), "entry")
        }
        _ => panic!("expected a value"),
    }
    assert_eq!(effects.ledger(), vec![String::from("entry")]);
    assert!(eventually(SETTLE, || events.count(RECEIVE_RESOLUTION) == 1));
    assert_eq!(events.count(EXECUTE_ROLLBACK), 0);
}

#[test]
fn connections_over_the_limit_are_refused() {
    setup_logger(LevelFilter::Debug);

    let directory = Arc::new(Directory::new());
    let events = EventRecorder::default();
    let configuration = ServerConfiguration::builder()
        .identity(String::from("oracle"))
        .max_connections(1)
        .log_events(true)
        .build();
    let server = start_server_with_configuration(
        configuration,
        &directory,
        oracle_methods(&Effects::default()),
        &events,
    );
    let echo = || {
        request(
            RpcSignature::of::<(String,), String>("Greeter", "echo"),
            "hello",
            SpeculationAxis::Succeeded,
        )
    };

    // 1. Occupy the only slot with a connection that has not sent its request yet.
    let first = connect(server.location());
    assert!(eventually(SETTLE, || server.active_connections() == 1));

    // 2. A second connection is closed without being served.
    let second = connect(server.location());
    let _ = second.send(&echo());
    assert!(second.recv().is_err());
    assert_eq!(server.active_connections(), 1);

    // 3. Once the first connection is served, the slot frees up again.
    first.send(&echo()).unwrap();
    assert!(matches!(first.recv(), Ok(Message::Response(Response::Value(_)))));
    assert!(eventually(SETTLE, || server.active_connections() == 0));
    let third = connect(server.location());
    third.send(&echo()).unwrap();
    assert!(matches!(third.recv(), Ok(Message::Response(Response::Value(_)))));
    assert_eq!(events.count(RECEIVE_REQUEST), 2);
}

#[test]
fn server_serves_in_memory_connections() {
    setup_logger(LevelFilter::Debug);

    let directory = Arc::new(Directory::new());
    let effects = Effects::default();
    let (server_events, client_events) = (EventRecorder::default(), EventRecorder::default());
    let server = Arc::new(start_server("oracle", &directory, oracle_methods(&effects), &server_events));

    // 1. Speak the protocol over one end of an in-memory pair.
    let (client_end, server_end) = memory_pair();
    server.serve_connection(server_end);
    client_end
        .send(&request(
            RpcSignature::of::<(String,), String>("Greeter", "echo"),
            "hello",
            SpeculationAxis::Succeeded,
        ))
        .unwrap();
    match client_end.recv().unwrap() {
        Message::Response(Response::Value(bytes)) => {
            assert_eq!(String::try_from_slice(&bytes).unwrap(), "hello")
        }
        _ => panic!("expected a value"),
    }
    assert!(client_end.recv().is_err());

    // 2. Run a whole speculative call through a client that only reaches the server in memory.
    let connector = Arc::new(MemoryConnector::default());
    connector.attach(server.clone());
    let client = start_client_with_connector(&directory, connector, &client_events);
    let spec_then = client
        .bind::<(String, String), String>("oracle", "Oracle", "spec_then")
        .unwrap();
    let future = spec_then
        .call(
            PredictionSet::none(),
            |_, value: String| Ok(value),
            (String::from("A"), String::from("B")),
        )
        .unwrap();
    assert_eq!(future.get_result(), Ok(String::from("B")));
    assert!(eventually(SETTLE, || effects.spec_rollbacks() == 1));
    assert_eq!(server_events.count(RECEIVE_REQUEST), 2);
}

#[test]
fn server_persists_registrations_to_signature_file() {
    setup_logger(LevelFilter::Debug);

    let suffix = u64::from_le_bytes(CallId::random().bytes());
    let path = env::temp_dir().join(format!("specrpc-signatures-{:x}.bin", suffix));
    let _ = fs::remove_file(&path);

    // 1. Start a server that persists its registrations.
    let configuration = ServerConfiguration::builder()
        .identity(String::from("ledger"))
        .signature_file(path.clone())
        .log_events(false)
        .build();
    let server = ServerSpec::builder()
        .configuration(configuration)
        .directory(Arc::new(Directory::new()))
        .methods(ledger_methods(&Effects::default()))
        .build()
        .start()
        .unwrap();

    // 2. A directory loaded from the file, in what could be another process, finds the server.
    let loaded = Directory::load(&path).unwrap();
    assert_eq!(
        loaded.lookup("ledger", &record_signature()).unwrap(),
        server.location().clone()
    );
    assert!(loaded.lookup("oracle", &record_signature()).is_err());

    drop(server);
    let _ = fs::remove_file(&path);
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests of speculation that spans more than one call.
//!
//! 1. [nested_call_commits_with_confirmed_continuation] and [nested_call_aborts_with_failed_continuation]:
//!    a continuation running on a prediction makes a nested call to a "ledger" server, which records an
//!    entry eagerly and registers a rollback. The nested call carries the continuation's speculative
//!    status, so the ledger keeps the entry only if the prediction is confirmed.
//! 2. [continuation_forwards_speculative_return]: a host method's continuation sends a speculative return
//!    on behalf of the host method, which the host method's real return then confirms.

use std::{sync::Arc, time::Duration};

use log::LevelFilter;

use specrpc_rs::{
    facade::Facade,
    logging::*,
    registry::Directory,
    types::{CallError, FailureCause, PredictionSet},
};

mod common;

use common::{
    logging::{log_with_context, setup_logger},
    services::{
        eventually, ledger_methods, oracle_methods, relay_methods, start_client, start_server, Effects,
        EventRecorder,
    },
};

const SETTLE: Duration = Duration::from_secs(5);

// The continuation of every call in this file: record the value in the ledger through a nested call.
fn record(facade: &Facade, value: String) -> Result<String, CallError> {
    let record = facade.bind::<(String,), String>("ledger", "Ledger", "record")?;
    record.invoke((value,))
}

#[test]
fn nested_call_commits_with_confirmed_continuation() {
    setup_logger(LevelFilter::Debug);

    // 1. Start the oracle and ledger servers, and a client.
    let directory = Arc::new(Directory::new());
    let effects = Effects::default();
    let (oracle_events, ledger_events, client_events) =
        (EventRecorder::default(), EventRecorder::default(), EventRecorder::default());
    let _oracle = start_server("oracle", &directory, oracle_methods(&effects), &oracle_events);
    let _ledger = start_server("ledger", &directory, ledger_methods(&effects), &ledger_events);
    let client = start_client(&directory, &client_events);

    // 2. Predict the oracle's result correctly, and record it in the ledger from the continuation.
    log_with_context(Some("client"), "Calling slow(200) predicting \"done\".");
    let slow = client.bind::<(u64,), String>("oracle", "Oracle", "slow").unwrap();
    let future = slow
        .call(PredictionSet::single(String::from("done")), record, (200,))
        .unwrap();
    assert_eq!(future.get_result(), Ok(String::from("done")));

    // 3. The nested call was issued speculatively and then committed.
    assert!(eventually(SETTLE, || ledger_events.count(RECEIVE_RESOLUTION) == 1));
    assert_eq!(client_events.count(SEND_RESOLUTION), 1);
    assert_eq!(ledger_events.count(EXECUTE_ROLLBACK), 0);
    assert_eq!(effects.ledger(), vec![String::from("done")]);
}

#[test]
fn nested_call_aborts_with_failed_continuation() {
    setup_logger(LevelFilter::Debug);

    // 1. Start the oracle and ledger servers, and a client.
    let directory = Arc::new(Directory::new());
    let effects = Effects::default();
    let (oracle_events, ledger_events, client_events) =
        (EventRecorder::default(), EventRecorder::default(), EventRecorder::default());
    let _oracle = start_server("oracle", &directory, oracle_methods(&effects), &oracle_events);
    let _ledger = start_server("ledger", &directory, ledger_methods(&effects), &ledger_events);
    let client = start_client(&directory, &client_events);

    // 2. Predict the oracle's result wrongly. The continuation on the prediction records "early" in the
    // ledger before the real value arrives.
    log_with_context(Some("client"), "Calling slow(300) predicting \"early\".");
    let slow = client.bind::<(u64,), String>("oracle", "Oracle", "slow").unwrap();
    let future = slow
        .call(PredictionSet::single(String::from("early")), record, (300,))
        .unwrap();
    assert!(eventually(SETTLE, || effects.ledger().contains(&String::from("early"))));

    // 3. The continuation on the real value records "done", and the ledger rolls back "early".
    assert_eq!(future.get_result(), Ok(String::from("done")));
    assert!(eventually(SETTLE, || ledger_events.count(EXECUTE_ROLLBACK) == 1));
    assert!(eventually(SETTLE, || effects.ledger() == vec![String::from("done")]));
    assert_eq!(ledger_events.count(RECEIVE_RESOLUTION), 1);
}

#[test]
fn failed_context_refuses_nested_calls() {
    setup_logger(LevelFilter::Debug);

    let directory = Arc::new(Directory::new());
    let effects = Effects::default();
    let (oracle_events, ledger_events, client_events) =
        (EventRecorder::default(), EventRecorder::default(), EventRecorder::default());
    let _oracle = start_server("oracle", &directory, oracle_methods(&effects), &oracle_events);
    let _ledger = start_server("ledger", &directory, ledger_methods(&effects), &ledger_events);
    let client = start_client(&directory, &client_events);

    // The continuation on the wrong prediction blocks until its status resolves, then tries to record.
    let echo = client.bind::<(String,), String>("oracle", "Greeter", "echo").unwrap();
    let future = echo
        .call(
            PredictionSet::single(String::from("wrong")),
            |facade: &Facade, value: String| {
                if value == "wrong" {
                    let blocked = facade.spec_block();
                    assert_eq!(blocked, Err(CallError::SpeculationFailed(FailureCause::Misprediction)));
                    assert!(facade.bind::<(String,), String>("ledger", "Ledger", "record").is_err());
                    return Err(blocked.unwrap_err());
                }
                record(facade, value)
            },
            (String::from("right"),),
        )
        .unwrap();

    assert_eq!(future.get_result(), Ok(String::from("right")));
    assert_eq!(effects.ledger(), vec![String::from("right")]);
}

#[test]
fn continuation_forwards_speculative_return() {
    setup_logger(LevelFilter::Debug);

    let directory = Arc::new(Directory::new());
    let effects = Effects::default();
    let (oracle_events, relay_events, client_events) =
        (EventRecorder::default(), EventRecorder::default(), EventRecorder::default());
    let _oracle = start_server("oracle", &directory, oracle_methods(&effects), &oracle_events);
    let _relay = start_server("relay", &directory, relay_methods(), &relay_events);
    let client = start_client(&directory, &client_events);

    let relay = client.bind::<(String,), String>("relay", "Relay", "relay").unwrap();
    assert_eq!(relay.invoke((String::from("hi"),)), Ok(String::from("hi")));

    // The relay sent "hi" early from its continuation, then confirmed it with its own return value.
    assert_eq!(client_events.count(RECEIVE_SPECULATIVE_VALUE), 1);
    assert_eq!(client_events.count(RECEIVE_CONFIRM), 1);
    assert!(eventually(SETTLE, || relay_events.count(SEND_CONFIRM) == 1));
    assert_eq!(relay_events.count(SPEC_RETURN), 1);
}

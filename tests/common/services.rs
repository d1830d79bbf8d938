use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use specrpc_rs::{
    client::{Client, ClientSpec},
    config::{ClientConfiguration, ServerConfiguration},
    events::Event,
    facade::Facade,
    networking::Connector,
    registry::Directory,
    server::{
        executor::{HostMethod, MethodTable},
        Server, ServerSpec,
    },
    types::{CallError, PredictionSet},
};

pub(crate) struct Oracle;

pub(crate) struct Greeter;

pub(crate) struct Ledger {
    entries: Arc<Mutex<Vec<String>>>,
}

pub(crate) struct Relay;

pub(crate) struct Gauge;

/// Side effects of the oracle and ledger methods that tests observe.
#[derive(Clone, Default)]
pub(crate) struct Effects {
    /// Rollbacks executed by `Oracle::spec_then`.
    pub(crate) spec_rollbacks: Arc<AtomicUsize>,
    /// Entries recorded by `Ledger::record` and not yet rolled back.
    pub(crate) ledger: Arc<Mutex<Vec<String>>>,
}

impl Effects {
    pub(crate) fn spec_rollbacks(&self) -> usize {
        self.spec_rollbacks.load(Ordering::SeqCst)
    }

    pub(crate) fn ledger(&self) -> Vec<String> {
        self.ledger.lock().unwrap().clone()
    }
}

/// Methods of the "oracle" server:
/// - `Oracle::answer() -> i32` returns 42.
/// - `Oracle::spec_then(guess, real) -> String` sends `guess` speculatively, registers a rollback, then
///   returns `real`.
/// - `Oracle::slow(millis) -> String` sleeps for `millis`, then returns "done".
/// - `Oracle::raise(message) -> String` fails with a user exception.
/// - `Greeter::echo(word) -> String` returns `word`.
pub(crate) fn oracle_methods(effects: &Effects) -> MethodTable {
    let mut methods = MethodTable::new();
    methods.register(HostMethod::new(
        "Oracle",
        "answer",
        || Oracle,
        |_: &mut Oracle, _: &Facade, (): ()| Ok(42i32),
    ));

    let spec_rollbacks = effects.spec_rollbacks.clone();
    methods.register(HostMethod::new(
        "Oracle",
        "spec_then",
        || Oracle,
        move |_: &mut Oracle, facade: &Facade, (guess, real): (String, String)| {
            facade.spec_return(&guess)?;
            let spec_rollbacks = spec_rollbacks.clone();
            facade.register_rollback(move || {
                spec_rollbacks.fetch_add(1, Ordering::SeqCst);
            });
            thread::sleep(Duration::from_millis(50));
            Ok(real)
        },
    ));

    methods.register(HostMethod::new(
        "Oracle",
        "slow",
        || Oracle,
        |_: &mut Oracle, _: &Facade, (millis,): (u64,)| {
            thread::sleep(Duration::from_millis(millis));
            Ok(String::from("done"))
        },
    ));

    methods.register(HostMethod::new(
        "Oracle",
        "raise",
        || Oracle,
        |_: &mut Oracle, _: &Facade, (message,): (String,)| -> Result<String, CallError> {
            Err(CallError::User(message))
        },
    ));

    methods.register(HostMethod::new(
        "Greeter",
        "echo",
        || Greeter,
        |_: &mut Greeter, _: &Facade, (word,): (String,)| Ok(word),
    ));
    methods
}

/// Methods of the "ledger" server:
/// - `Ledger::record(entry) -> String` appends `entry` to the ledger eagerly, and registers a rollback that
///   removes it again.
/// - `Ledger::record_when_settled(entry) -> String` waits until its caller is no longer speculative, then
///   appends `entry`.
pub(crate) fn ledger_methods(effects: &Effects) -> MethodTable {
    let entries = effects.ledger.clone();
    let mut methods = MethodTable::new();
    methods.register(HostMethod::new(
        "Ledger",
        "record",
        move || Ledger {
            entries: entries.clone(),
        },
        |ledger: &mut Ledger, facade: &Facade, (entry,): (String,)| {
            ledger.entries.lock().unwrap().push(entry.clone());
            let entries = ledger.entries.clone();
            let recorded = entry.clone();
            facade.register_rollback(move || {
                entries.lock().unwrap().retain(|entry| entry != &recorded);
            });
            Ok(entry)
        },
    ));

    let entries = effects.ledger.clone();
    methods.register(HostMethod::new(
        "Ledger",
        "record_when_settled",
        move || Ledger {
            entries: entries.clone(),
        },
        |ledger: &mut Ledger, facade: &Facade, (entry,): (String,)| {
            facade.spec_block()?;
            ledger.entries.lock().unwrap().push(entry.clone());
            Ok(entry)
        },
    ));
    methods
}

/// Methods of the "gauge" server: `Gauge::approximate(estimate, actual) -> f64` sends `estimate`
/// speculatively and returns `actual`. Readings within 0.5 of each other count as the same result.
pub(crate) fn gauge_methods(effects: &Effects) -> MethodTable {
    let spec_rollbacks = effects.spec_rollbacks.clone();
    let mut methods = MethodTable::new();
    methods.register(
        HostMethod::new(
            "Gauge",
            "approximate",
            || Gauge,
            move |_: &mut Gauge, facade: &Facade, (estimate, actual): (f64, f64)| {
                facade.spec_return(&estimate)?;
                let spec_rollbacks = spec_rollbacks.clone();
                assert!(facade.register_rollback(move || {
                    spec_rollbacks.fetch_add(1, Ordering::SeqCst);
                }));
                assert!(facade.is_rollback_registered());
                Ok(actual)
            },
        )
        .with_equivalence(close_readings),
    );
    methods
}

pub(crate) fn close_readings(a: &f64, b: &f64) -> bool {
    (a - b).abs() < 0.5
}

/// Methods of the "relay" server: `Relay::relay(word) -> String` calls `Greeter::echo` on the "oracle"
/// server predicting `word`, and forwards the value its continuation runs on as a speculative return.
pub(crate) fn relay_methods() -> MethodTable {
    let mut methods = MethodTable::new();
    methods.register(HostMethod::new(
        "Relay",
        "relay",
        || Relay,
        |_: &mut Relay, facade: &Facade, (word,): (String,)| {
            let echo = facade.bind::<(String,), String>("oracle", "Greeter", "echo")?;
            echo.call(
                PredictionSet::single(word.clone()),
                |facade: &Facade, value: String| {
                    facade.spec_return(&value)?;
                    Ok(value)
                },
                (word,),
            )?
            .get_result()
        },
    ));
    methods
}

/// Records the names of the events a client or server emits.
#[derive(Clone, Default)]
pub(crate) struct EventRecorder(Arc<Mutex<Vec<&'static str>>>);

impl EventRecorder {
    pub(crate) fn handler(&self) -> impl Fn(&Event) + Send + Sync + 'static {
        let names = self.0.clone();
        move |event: &Event| names.lock().unwrap().push(event.name())
    }

    pub(crate) fn count(&self, name: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|recorded| **recorded == name).count()
    }
}

/// Poll `condition` until it holds or `timeout` elapses. Returns whether it held.
pub(crate) fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

pub(crate) fn start_server(
    identity: &str,
    directory: &Arc<Directory>,
    methods: MethodTable,
    recorder: &EventRecorder,
) -> Server {
    let configuration = ServerConfiguration::builder()
        .identity(String::from(identity))
        .log_events(true)
        .build();
    start_server_with_configuration(configuration, directory, methods, recorder)
}

pub(crate) fn start_server_with_configuration(
    configuration: ServerConfiguration,
    directory: &Arc<Directory>,
    methods: MethodTable,
    recorder: &EventRecorder,
) -> Server {
    ServerSpec::builder()
        .configuration(configuration)
        .directory(directory.clone())
        .methods(methods)
        .on_event(recorder.handler())
        .build()
        .start()
        .unwrap()
}

pub(crate) fn start_client(directory: &Arc<Directory>, recorder: &EventRecorder) -> Client {
    let configuration = ClientConfiguration::builder()
        .statistics(true)
        .log_events(true)
        .build();
    start_client_with_configuration(configuration, directory, recorder)
}

pub(crate) fn start_client_with_configuration(
    configuration: ClientConfiguration,
    directory: &Arc<Directory>,
    recorder: &EventRecorder,
) -> Client {
    ClientSpec::builder()
        .configuration(configuration)
        .directory(directory.clone())
        .on_event(recorder.handler())
        .build()
        .start()
}

pub(crate) fn start_client_with_connector(
    directory: &Arc<Directory>,
    connector: Arc<dyn Connector>,
    recorder: &EventRecorder,
) -> Client {
    let configuration = ClientConfiguration::builder()
        .statistics(true)
        .log_events(true)
        .build();
    ClientSpec::builder()
        .configuration(configuration)
        .directory(directory.clone())
        .connector(connector)
        .on_event(recorder.handler())
        .build()
        .start()
}

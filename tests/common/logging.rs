use std::{io, sync::Once, thread};

use log::LevelFilter;

static LOGGER_INIT: Once = Once::new();

// Set up a logger that logs all log messages with level `level` and above.
pub(crate) fn setup_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{:?}][{}] {}",
                    thread::current().id(),
                    record.level(),
                    message
                ))
            })
            .level(level)
            .chain(io::stdout())
            .apply()
            .unwrap();
    })
}

/// Log `message` at Info level, prefixed with the name of the party (client or server) it concerns.
pub(crate) fn log_with_context(context: Option<&str>, message: &str) {
    match context {
        Some(context) => log::info!("[{}] {}", context, message),
        None => log::info!("{}", message),
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the `log_events` flag of the
//! [client](crate::config::ClientConfiguration) or [server](crate::config::ServerConfiguration)
//! configuration.
//!
//! SpecRPC logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages printed onto
//! a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least three values. The first three values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//! 3. The first seven characters of the Base64 encoding of the id of the call the event belongs to.
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet is
//! how a [SendRequest](crate::events::SendRequestEvent) is printed:
//!
//! ```text
//! SendRequest, 1701329264, Id5u7f6, fNGCJyk, 127.0.0.1:7000, Speculative
//! ```
//!
//! In the snippet:
//! - The fourth value is the first seven characters of the Base64 encoding of the
//!   [fingerprint](crate::types::signature::RpcSignature::fingerprint) of the called method's signature.
//! - The fifth value is the location of the server.
//! - The sixth value is the speculation state the caller declared in the request.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;
use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const SEND_REQUEST: &str = "SendRequest";
pub const RECEIVE_SPECULATIVE_VALUE: &str = "ReceiveSpeculativeValue";
pub const RECEIVE_VALUE: &str = "ReceiveValue";
pub const RECEIVE_CONFIRM: &str = "ReceiveConfirm";
pub const RECEIVE_EXCEPTION: &str = "ReceiveException";
pub const SEND_RESOLUTION: &str = "SendResolution";
pub const START_BRANCH: &str = "StartBranch";
pub const CONFIRM_BRANCH: &str = "ConfirmBranch";
pub const FAIL_BRANCH: &str = "FailBranch";

pub const RECEIVE_REQUEST: &str = "ReceiveRequest";
pub const SPEC_RETURN: &str = "SpecReturn";
pub const SEND_VALUE: &str = "SendValue";
pub const SEND_CONFIRM: &str = "SendConfirm";
pub const SEND_EXCEPTION: &str = "SendException";
pub const RECEIVE_RESOLUTION: &str = "ReceiveResolution";

pub const EXECUTE_ROLLBACK: &str = "ExecuteRollback";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync>;
}

impl Logger for Event {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let send_request = SendRequestEvent::get_logger();
        let receive_speculative_value = ReceiveSpeculativeValueEvent::get_logger();
        let receive_value = ReceiveValueEvent::get_logger();
        let receive_confirm = ReceiveConfirmEvent::get_logger();
        let receive_exception = ReceiveExceptionEvent::get_logger();
        let send_resolution = SendResolutionEvent::get_logger();
        let start_branch = StartBranchEvent::get_logger();
        let confirm_branch = ConfirmBranchEvent::get_logger();
        let fail_branch = FailBranchEvent::get_logger();
        let receive_request = ReceiveRequestEvent::get_logger();
        let spec_return = SpecReturnEvent::get_logger();
        let send_value = SendValueEvent::get_logger();
        let send_confirm = SendConfirmEvent::get_logger();
        let send_exception = SendExceptionEvent::get_logger();
        let receive_resolution = ReceiveResolutionEvent::get_logger();
        let execute_rollback = ExecuteRollbackEvent::get_logger();

        let logger = move |event: &Event| match event {
            Event::SendRequest(event) => send_request(event),
            Event::ReceiveSpeculativeValue(event) => receive_speculative_value(event),
            Event::ReceiveValue(event) => receive_value(event),
            Event::ReceiveConfirm(event) => receive_confirm(event),
            Event::ReceiveException(event) => receive_exception(event),
            Event::SendResolution(event) => send_resolution(event),
            Event::StartBranch(event) => start_branch(event),
            Event::ConfirmBranch(event) => confirm_branch(event),
            Event::FailBranch(event) => fail_branch(event),
            Event::ReceiveRequest(event) => receive_request(event),
            Event::SpecReturn(event) => spec_return(event),
            Event::SendValue(event) => send_value(event),
            Event::SendConfirm(event) => send_confirm(event),
            Event::SendException(event) => send_exception(event),
            Event::ReceiveResolution(event) => receive_resolution(event),
            Event::ExecuteRollback(event) => execute_rollback(event),
        };
        Box::new(logger)
    }
}

impl Logger for SendRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |send_request_event: &SendRequestEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                SEND_REQUEST,
                secs_since_unix_epoch(send_request_event.timestamp),
                first_seven_base64_chars(&send_request_event.call_id.bytes()),
                first_seven_base64_chars(&send_request_event.signature.fingerprint().bytes()),
                send_request_event.location,
                send_request_event.caller_axis
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveSpeculativeValueEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |receive_speculative_value_event: &ReceiveSpeculativeValueEvent| {
            log::info!(
                "{}, {}, {}",
                RECEIVE_SPECULATIVE_VALUE,
                secs_since_unix_epoch(receive_speculative_value_event.timestamp),
                first_seven_base64_chars(&receive_speculative_value_event.call_id.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveValueEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |receive_value_event: &ReceiveValueEvent| {
            log::info!(
                "{}, {}, {}",
                RECEIVE_VALUE,
                secs_since_unix_epoch(receive_value_event.timestamp),
                first_seven_base64_chars(&receive_value_event.call_id.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveConfirmEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |receive_confirm_event: &ReceiveConfirmEvent| {
            log::info!(
                "{}, {}, {}",
                RECEIVE_CONFIRM,
                secs_since_unix_epoch(receive_confirm_event.timestamp),
                first_seven_base64_chars(&receive_confirm_event.call_id.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveExceptionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |receive_exception_event: &ReceiveExceptionEvent| {
            log::info!(
                "{}, {}, {}, {:?}, {}",
                RECEIVE_EXCEPTION,
                secs_since_unix_epoch(receive_exception_event.timestamp),
                first_seven_base64_chars(&receive_exception_event.call_id.bytes()),
                receive_exception_event.kind,
                receive_exception_event.message
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendResolutionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |send_resolution_event: &SendResolutionEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                SEND_RESOLUTION,
                secs_since_unix_epoch(send_resolution_event.timestamp),
                first_seven_base64_chars(&send_resolution_event.call_id.bytes()),
                send_resolution_event.resolution
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartBranchEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |start_branch_event: &StartBranchEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_BRANCH,
                secs_since_unix_epoch(start_branch_event.timestamp),
                first_seven_base64_chars(&start_branch_event.call_id.bytes()),
                start_branch_event.guessed
            )
        };
        Box::new(logger)
    }
}

impl Logger for ConfirmBranchEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |confirm_branch_event: &ConfirmBranchEvent| {
            log::info!(
                "{}, {}, {}",
                CONFIRM_BRANCH,
                secs_since_unix_epoch(confirm_branch_event.timestamp),
                first_seven_base64_chars(&confirm_branch_event.call_id.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for FailBranchEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |fail_branch_event: &FailBranchEvent| {
            log::info!(
                "{}, {}, {}",
                FAIL_BRANCH,
                secs_since_unix_epoch(fail_branch_event.timestamp),
                first_seven_base64_chars(&fail_branch_event.call_id.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |receive_request_event: &ReceiveRequestEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_REQUEST,
                secs_since_unix_epoch(receive_request_event.timestamp),
                first_seven_base64_chars(&receive_request_event.call_id.bytes()),
                first_seven_base64_chars(&receive_request_event.signature.fingerprint().bytes()),
                receive_request_event.peer,
                receive_request_event.caller_axis
            )
        };
        Box::new(logger)
    }
}

impl Logger for SpecReturnEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |spec_return_event: &SpecReturnEvent| {
            log::info!(
                "{}, {}, {}",
                SPEC_RETURN,
                secs_since_unix_epoch(spec_return_event.timestamp),
                first_seven_base64_chars(&spec_return_event.call_id.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendValueEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |send_value_event: &SendValueEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SEND_VALUE,
                secs_since_unix_epoch(send_value_event.timestamp),
                first_seven_base64_chars(&send_value_event.call_id.bytes()),
                send_value_event.corrected
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendConfirmEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |send_confirm_event: &SendConfirmEvent| {
            log::info!(
                "{}, {}, {}",
                SEND_CONFIRM,
                secs_since_unix_epoch(send_confirm_event.timestamp),
                first_seven_base64_chars(&send_confirm_event.call_id.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendExceptionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |send_exception_event: &SendExceptionEvent| {
            log::info!(
                "{}, {}, {}, {:?}, {}",
                SEND_EXCEPTION,
                secs_since_unix_epoch(send_exception_event.timestamp),
                first_seven_base64_chars(&send_exception_event.call_id.bytes()),
                send_exception_event.kind,
                send_exception_event.message
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveResolutionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |receive_resolution_event: &ReceiveResolutionEvent| {
            let resolution = match receive_resolution_event.resolution {
                Some(resolution) => format!("{:?}", resolution),
                None => String::from("Closed"),
            };
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_RESOLUTION,
                secs_since_unix_epoch(receive_resolution_event.timestamp),
                first_seven_base64_chars(&receive_resolution_event.call_id.bytes()),
                resolution
            )
        };
        Box::new(logger)
    }
}

impl Logger for ExecuteRollbackEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |execute_rollback_event: &ExecuteRollbackEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                EXECUTE_ROLLBACK,
                secs_since_unix_epoch(execute_rollback_event.timestamp),
                first_seven_base64_chars(&execute_rollback_event.call_id.bytes()),
                execute_rollback_event.context
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

pub(crate) fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events emitted while calls are issued, served, and reconciled.
//!
//! Every event is emitted after the action it describes has happened. Events are delivered synchronously,
//! on the thread that performed the action, to the handlers registered through
//! [ClientSpec](crate::client::ClientSpec) and [ServerSpec](crate::server::ServerSpec), and to the
//! [logger](crate::logging) if `log_events` is set in the configuration.

use std::time::SystemTime;

use crate::logging::{self, Logger};
use crate::messages::{ExceptionKind, Resolution};
use crate::types::basic::{CallId, Location};
use crate::types::signature::RpcSignature;
use crate::types::status::{ContextKind, SpeculationAxis};

pub enum Event {
    // Events on the calling side.
    SendRequest(SendRequestEvent),
    ReceiveSpeculativeValue(ReceiveSpeculativeValueEvent),
    ReceiveValue(ReceiveValueEvent),
    ReceiveConfirm(ReceiveConfirmEvent),
    ReceiveException(ReceiveExceptionEvent),
    SendResolution(SendResolutionEvent),
    StartBranch(StartBranchEvent),
    ConfirmBranch(ConfirmBranchEvent),
    FailBranch(FailBranchEvent),
    // Events on the serving side.
    ReceiveRequest(ReceiveRequestEvent),
    SpecReturn(SpecReturnEvent),
    SendValue(SendValueEvent),
    SendConfirm(SendConfirmEvent),
    SendException(SendExceptionEvent),
    ReceiveResolution(ReceiveResolutionEvent),
    // Events on either side.
    ExecuteRollback(ExecuteRollbackEvent),
}

impl Event {
    /// The event's name in PascalCase, as printed in the first column of its log line.
    pub fn name(&self) -> &'static str {
        match self {
            Event::SendRequest(_) => logging::SEND_REQUEST,
            Event::ReceiveSpeculativeValue(_) => logging::RECEIVE_SPECULATIVE_VALUE,
            Event::ReceiveValue(_) => logging::RECEIVE_VALUE,
            Event::ReceiveConfirm(_) => logging::RECEIVE_CONFIRM,
            Event::ReceiveException(_) => logging::RECEIVE_EXCEPTION,
            Event::SendResolution(_) => logging::SEND_RESOLUTION,
            Event::StartBranch(_) => logging::START_BRANCH,
            Event::ConfirmBranch(_) => logging::CONFIRM_BRANCH,
            Event::FailBranch(_) => logging::FAIL_BRANCH,
            Event::ReceiveRequest(_) => logging::RECEIVE_REQUEST,
            Event::SpecReturn(_) => logging::SPEC_RETURN,
            Event::SendValue(_) => logging::SEND_VALUE,
            Event::SendConfirm(_) => logging::SEND_CONFIRM,
            Event::SendException(_) => logging::SEND_EXCEPTION,
            Event::ReceiveResolution(_) => logging::RECEIVE_RESOLUTION,
            Event::ExecuteRollback(_) => logging::EXECUTE_ROLLBACK,
        }
    }
}

/// A request was sent to the server at `location`.
pub struct SendRequestEvent {
    pub timestamp: SystemTime,
    pub call_id: CallId,
    pub signature: RpcSignature,
    pub location: Location,
    pub caller_axis: SpeculationAxis,
}

pub struct ReceiveSpeculativeValueEvent {
    pub timestamp: SystemTime,
    pub call_id: CallId,
}

pub struct ReceiveValueEvent {
    pub timestamp: SystemTime,
    pub call_id: CallId,
}

/// The server confirmed that its last speculative value is its definitive value.
pub struct ReceiveConfirmEvent {
    pub timestamp: SystemTime,
    pub call_id: CallId,
}

pub struct ReceiveExceptionEvent {
    pub timestamp: SystemTime,
    pub call_id: CallId,
    pub kind: ExceptionKind,
    pub message: String,
}

pub struct SendResolutionEvent {
    pub timestamp: SystemTime,
    pub call_id: CallId,
    pub resolution: Resolution,
}

/// A continuation started running on a value. `guessed` is false only for branches started on the
/// definitive value.
pub struct StartBranchEvent {
    pub timestamp: SystemTime,
    pub call_id: CallId,
    pub guessed: bool,
}

/// The value a continuation branch ran on turned out to be the real one.
pub struct ConfirmBranchEvent {
    pub timestamp: SystemTime,
    pub call_id: CallId,
}

/// The value a continuation branch ran on turned out to be wrong.
pub struct FailBranchEvent {
    pub timestamp: SystemTime,
    pub call_id: CallId,
}

pub struct ReceiveRequestEvent {
    pub timestamp: SystemTime,
    pub call_id: CallId,
    pub signature: RpcSignature,
    pub caller_axis: SpeculationAxis,
    pub peer: String,
}

pub struct SpecReturnEvent {
    pub timestamp: SystemTime,
    pub call_id: CallId,
}

/// The definitive value was sent. `corrected` is set if it replaces a different speculative value.
pub struct SendValueEvent {
    pub timestamp: SystemTime,
    pub call_id: CallId,
    pub corrected: bool,
}

pub struct SendConfirmEvent {
    pub timestamp: SystemTime,
    pub call_id: CallId,
}

pub struct SendExceptionEvent {
    pub timestamp: SystemTime,
    pub call_id: CallId,
    pub kind: ExceptionKind,
    pub message: String,
}

/// The caller's resolution arrived. `None` means the connection closed first, which counts as an abort.
pub struct ReceiveResolutionEvent {
    pub timestamp: SystemTime,
    pub call_id: CallId,
    pub resolution: Option<Resolution>,
}

pub struct ExecuteRollbackEvent {
    pub timestamp: SystemTime,
    pub call_id: CallId,
    pub context: ContextKind,
}

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send + Sync>;

/// The handlers that every [Event] of one client or server is delivered to.
pub(crate) struct EventHandlers {
    handlers: Vec<HandlerPtr<Event>>,
}

impl EventHandlers {
    pub(crate) fn new(log_events: bool, on_event: Option<HandlerPtr<Event>>) -> EventHandlers {
        let mut handlers = Vec::new();
        if log_events {
            handlers.push(Event::get_logger());
        }
        if let Some(on_event) = on_event {
            handlers.push(on_event);
        }
        EventHandlers { handlers }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Deliver the event built by `event` to every handler. The event is not built if there are none.
    pub(crate) fn emit(&self, event: impl FnOnce() -> Event) {
        if self.is_empty() {
            return;
        }
        let event = event();
        self.handlers.iter().for_each(|handler| handler(&event));
    }
}

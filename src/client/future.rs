/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The blocking handle to the reconciled result of one call.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::client::control::Settlement;
use crate::types::basic::CallId;
use crate::types::errors::CallError;
use crate::types::status::{Status, StatusCell};

pub struct CallFuture<T> {
    call_id: CallId,
    status: Arc<StatusCell>,
    settlement: Receiver<Settlement<T>>,
}

impl<T> CallFuture<T> {
    pub(crate) fn new(call_id: CallId, status: Arc<StatusCell>, settlement: Receiver<Settlement<T>>) -> CallFuture<T> {
        CallFuture {
            call_id,
            status,
            settlement,
        }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// The call-level status. Its caller axis is speculative while the call's own predictions are
    /// unconfirmed, and its callee axis while a speculative value from the server is unconfirmed.
    pub fn status(&self) -> Status {
        self.status.status()
    }

    /// Block until the call is confirmed, then return the output of the continuation that ran on the real
    /// value.
    ///
    /// Fails with [CallError::SpeculationFailed] if the context the call was issued from failed or the
    /// connection was lost, and with the callee's error if it raised one.
    pub fn get_result(self) -> Result<T, CallError> {
        let branch = self.settlement.recv().map_err(|_| abandoned("call control"))??;
        let output = branch
            .take_result()
            .ok_or_else(|| abandoned("continuation"))?;
        output.recv().map_err(|_| abandoned("continuation"))?
    }

    /// Like [get_result](Self::get_result), but gives up with [CallError::Timeout] once `timeout` has
    /// elapsed. The call itself carries on in the background.
    pub fn get_result_timeout(self, timeout: Duration) -> Result<T, CallError> {
        let deadline = Instant::now() + timeout;
        let branch = self
            .settlement
            .recv_timeout(timeout)
            .map_err(|error| timed_out_or_abandoned(error, "call control"))??;
        let output = branch
            .take_result()
            .ok_or_else(|| abandoned("continuation"))?;
        output
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .map_err(|error| timed_out_or_abandoned(error, "continuation"))?
    }
}

fn abandoned(what: &str) -> CallError {
    CallError::Abandoned(String::from(what))
}

fn timed_out_or_abandoned(error: RecvTimeoutError, what: &str) -> CallError {
    match error {
        RecvTimeoutError::Timeout => CallError::Timeout,
        RecvTimeoutError::Disconnected => abandoned(what),
    }
}

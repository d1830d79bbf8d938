/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The status-aware handle given to code that runs under speculation.
//!
//! Host methods on a server and continuations on a client both receive a [Facade]. Through it they can:
//! - Inspect the [Status] of the execution they run under.
//! - [Block](Facade::spec_block) until that execution's speculation is resolved, before performing a side
//!   effect that cannot be undone.
//! - [Register](Facade::register_rollback) one compensating action instead, and perform side effects
//!   eagerly.
//! - Send early guesses of their result to their caller with [spec_return](Facade::spec_return).
//! - [Bind](Facade::bind) stubs for nested calls. Nested calls inherit this execution's status as their
//!   upstream, so the failure of this execution propagates down the chain.
//!
//! A host method's execution is speculative while its *caller's* guess is open. A continuation's execution
//! is speculative while either its caller's guess or the value it runs on is unconfirmed.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::client::stub::Stub;
use crate::client::ClientContext;
use crate::events::{Event, ExecuteRollbackEvent};
use crate::rollback::RollbackSlot;
use crate::types::basic::CallId;
use crate::types::errors::{CallError, FailureCause};
use crate::types::signature::Arguments;
use crate::types::status::{SpeculationAxis, Status, StatusCell};

/// Sink for the values and exceptions an execution sends to its caller.
pub(crate) trait Respond: Send + Sync {
    fn spec_return(&self, value: Vec<u8>) -> Result<(), CallError>;

    fn throw_exception(&self, message: String) -> Result<(), CallError>;
}

pub struct Facade {
    call_id: CallId,
    status: Arc<StatusCell>,
    rollback: Arc<RollbackSlot>,
    upstream: Option<Arc<dyn Respond>>,
    context: Arc<ClientContext>,
}

impl Facade {
    pub(crate) fn new(
        call_id: CallId,
        status: Arc<StatusCell>,
        upstream: Option<Arc<dyn Respond>>,
        context: Arc<ClientContext>,
    ) -> Facade {
        Facade {
            call_id,
            status,
            rollback: Arc::new(RollbackSlot::new()),
            upstream,
            context,
        }
    }

    /// Id of the call this execution belongs to.
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn status(&self) -> Status {
        self.status.status()
    }

    /// The axis that decides whether this execution as a whole is confirmed: the caller axis for a host
    /// method, the composite for a continuation.
    pub fn current_status(&self) -> SpeculationAxis {
        self.status.context_axis()
    }

    pub fn caller_status(&self) -> SpeculationAxis {
        self.status.caller()
    }

    pub fn callee_status(&self) -> SpeculationAxis {
        self.status.callee()
    }

    /// Block until this execution is no longer speculative. Returns an error if it failed, in which case
    /// the caller must abandon the work it is doing.
    pub fn spec_block(&self) -> Result<(), CallError> {
        match self.status.wait_resolved() {
            SpeculationAxis::Failed => Err(self.failure()),
            _ => Ok(()),
        }
    }

    /// Like [spec_block](Self::spec_block), but gives up with [CallError::Timeout] after `timeout`.
    pub fn spec_block_timeout(&self, timeout: Duration) -> Result<(), CallError> {
        match self.status.wait_resolved_timeout(timeout) {
            Some(SpeculationAxis::Failed) => Err(self.failure()),
            Some(_) => Ok(()),
            None => Err(CallError::Timeout),
        }
    }

    /// Register the action that undoes this execution's side effects if it fails. Only the first
    /// registration counts. Returns whether `action` was registered.
    pub fn register_rollback(&self, action: impl FnOnce() + Send + 'static) -> bool {
        self.rollback.register(action)
    }

    pub fn is_rollback_registered(&self) -> bool {
        self.rollback.is_registered()
    }

    /// Send `value` to the caller as an early guess of this execution's result.
    ///
    /// From a continuation, the guess is forwarded to the caller of the host method that issued the
    /// continuation's call. It fails with [CallError::NoUpstream] if there is no such caller, and with
    /// [CallError::SpeculationFailed] if this execution has already failed.
    pub fn spec_return<V: BorshSerialize>(&self, value: &V) -> Result<(), CallError> {
        let upstream = self.upstream.as_ref().ok_or(CallError::NoUpstream)?;
        let bytes = value
            .try_to_vec()
            .map_err(|error| CallError::Decode(error.to_string()))?;
        upstream.spec_return(bytes)
    }

    /// End the call with a domain error. A host method's own later return value is then never sent.
    /// From a continuation, this first waits until the continuation is confirmed.
    pub fn throw_exception(&self, message: impl Into<String>) -> Result<(), CallError> {
        let upstream = self.upstream.as_ref().ok_or(CallError::NoUpstream)?;
        upstream.throw_exception(message.into())
    }

    /// Bind a stub for calling `host_type::method` on the server registered as `identity`. Calls made
    /// through the stub carry this execution's status.
    pub fn bind<A, R>(&self, identity: &str, host_type: &str, method: &str) -> Result<Stub<A, R>, CallError>
    where
        A: Arguments + BorshSerialize,
        R: BorshSerialize + BorshDeserialize + Clone + Send + 'static,
    {
        if self.status.context_axis() == SpeculationAxis::Failed {
            return Err(self.failure());
        }
        Stub::bind(
            self.context.clone(),
            identity,
            host_type,
            method,
            self.status.clone(),
            self.upstream.clone(),
        )
    }

    /// Run the rollback action once this execution has finished and its status resolves to `Failed`.
    /// If it already has, the rollback is dispatched right away.
    pub(crate) fn arm_rollback(&self) {
        if !self.rollback.is_registered() {
            return;
        }
        let rollback = self.rollback.clone();
        let context = self.context.clone();
        let call_id = self.call_id;
        let kind = self.status.kind();
        self.status.subscribe(move |axis| {
            if axis == SpeculationAxis::Failed {
                let events = context.events.clone();
                context.pool.execute(move || {
                    if rollback.execute() {
                        events.emit(|| {
                            Event::ExecuteRollback(ExecuteRollbackEvent {
                                timestamp: SystemTime::now(),
                                call_id,
                                context: kind,
                            })
                        });
                    }
                });
            }
        });
    }

    /// Run the rollback action now, if there is one that has not run yet.
    pub(crate) fn execute_rollback(&self) -> bool {
        let executed = self.rollback.execute();
        if executed {
            self.context.events.emit(|| {
                Event::ExecuteRollback(ExecuteRollbackEvent {
                    timestamp: SystemTime::now(),
                    call_id: self.call_id,
                    context: self.status.kind(),
                })
            });
        }
        executed
    }

    fn failure(&self) -> CallError {
        failure_of(&self.status)
    }
}

/// The error describing why `status` failed: its caller failing first, or its own guess being wrong.
pub(crate) fn failure_of(status: &StatusCell) -> CallError {
    if status.caller() == SpeculationAxis::Failed {
        CallError::SpeculationFailed(FailureCause::UpstreamFailed)
    } else {
        CallError::SpeculationFailed(FailureCause::Misprediction)
    }
}

/// Forwards what a continuation sends to its caller to the caller of the host method that issued the
/// continuation's call, as long as the continuation has not failed.
pub(crate) struct ChainedResponder {
    upstream: Arc<dyn Respond>,
    status: Arc<StatusCell>,
}

impl ChainedResponder {
    pub(crate) fn new(upstream: Arc<dyn Respond>, status: Arc<StatusCell>) -> ChainedResponder {
        ChainedResponder { upstream, status }
    }
}

impl Respond for ChainedResponder {
    fn spec_return(&self, value: Vec<u8>) -> Result<(), CallError> {
        if self.status.context_axis() == SpeculationAxis::Failed {
            return Err(failure_of(&self.status));
        }
        self.upstream.spec_return(value)
    }

    fn throw_exception(&self, message: String) -> Result<(), CallError> {
        if self.status.wait_resolved() == SpeculationAxis::Failed {
            return Err(failure_of(&self.status));
        }
        self.upstream.throw_exception(message)
    }
}

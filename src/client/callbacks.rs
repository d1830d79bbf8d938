/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Continuation branches of one call.
//!
//! A call's continuation may run more than once: on each consumed prediction, on each distinct speculative
//! value the server sends, and on the definitive value if none of those matched it. Each run is a
//! [Branch] with a status of its own. The branch's caller axis follows the context that issued the call,
//! and its callee axis records whether the value it runs on has been confirmed.

use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::client::ClientContext;
use crate::events::{ConfirmBranchEvent, Event, FailBranchEvent, StartBranchEvent};
use crate::facade::{ChainedResponder, Facade, Respond};
use crate::logging::first_seven_base64_chars;
use crate::pool;
use crate::types::basic::CallId;
use crate::types::errors::CallError;
use crate::types::prediction::Equivalence;
use crate::types::status::{ContextKind, SpeculationAxis, Status, StatusCell};

pub(crate) type Continuation<R, T> = Arc<dyn Fn(&Facade, R) -> Result<T, CallError> + Send + Sync>;

pub(crate) struct Branch<T> {
    pub(crate) status: Arc<StatusCell>,
    guessed: bool,
    result: Mutex<Option<Receiver<Result<T, CallError>>>>,
}

impl<T> Branch<T> {
    /// The receiver of the continuation's output. Returns `None` after the first call.
    pub(crate) fn take_result(&self) -> Option<Receiver<Result<T, CallError>>> {
        self.result
            .lock()
            .expect("Programming error: branch result lock poisoned.")
            .take()
    }
}

pub(crate) struct CallbackManager<R, T> {
    call_id: CallId,
    context: Arc<ClientContext>,
    continuation: Continuation<R, T>,
    equivalence: Equivalence<R>,
    upstream: Option<Arc<dyn Respond>>,
    // The axis new branches start their caller axis with.
    caller_axis: SpeculationAxis,
    // Set if the call was issued from a worker of the pool, which then blocks on its branches.
    nested: bool,
    branches: Vec<(R, Arc<Branch<T>>)>,
}

impl<R, T> CallbackManager<R, T>
where
    R: Clone + Send + 'static,
    T: Send + 'static,
{
    pub(crate) fn new(
        call_id: CallId,
        context: Arc<ClientContext>,
        continuation: Continuation<R, T>,
        equivalence: Equivalence<R>,
        caller_axis: SpeculationAxis,
        upstream: Option<Arc<dyn Respond>>,
    ) -> CallbackManager<R, T> {
        CallbackManager {
            call_id,
            nested: context.pool.is_own_worker(),
            context,
            continuation,
            equivalence,
            upstream,
            caller_axis,
            branches: Vec::new(),
        }
    }

    /// Start a branch on a guessed value, unless a running branch already covers an equivalent value.
    /// Returns whether a branch was started.
    pub(crate) fn start_guess(&mut self, value: R) -> bool {
        if self
            .branches
            .iter()
            .any(|(running, _)| (self.equivalence)(running, &value))
        {
            return false;
        }
        self.context.statistics.record_prediction();
        self.start(value, SpeculationAxis::Speculative, true);
        true
    }

    /// Apply the resolution of the context that issued the call to every live branch.
    pub(crate) fn caller_resolved(&mut self, axis: SpeculationAxis) {
        self.caller_axis = axis;
        for (_, branch) in &self.branches {
            branch.status.resolve_caller(axis);
        }
    }

    /// Settle every branch against the definitive `value`: the first equivalent branch is confirmed and
    /// all others fail. Returns the confirmed branch, starting it on `value` if there was none.
    pub(crate) fn resolve(&mut self, value: &R) -> Arc<Branch<T>> {
        let mut confirmed = None;
        for (candidate, branch) in std::mem::take(&mut self.branches) {
            if confirmed.is_none() && (self.equivalence)(&candidate, value) {
                branch.status.resolve_callee(SpeculationAxis::Succeeded);
                if branch.guessed {
                    self.context.statistics.record_outcome(true);
                }
                self.context.events.emit(|| {
                    Event::ConfirmBranch(ConfirmBranchEvent {
                        timestamp: SystemTime::now(),
                        call_id: self.call_id,
                    })
                });
                confirmed = Some((candidate, branch));
            } else {
                branch.status.resolve_callee(SpeculationAxis::Failed);
                if branch.guessed {
                    self.context.statistics.record_outcome(false);
                }
                self.context.events.emit(|| {
                    Event::FailBranch(FailBranchEvent {
                        timestamp: SystemTime::now(),
                        call_id: self.call_id,
                    })
                });
            }
        }

        match confirmed {
            Some((candidate, branch)) => {
                self.branches.push((candidate, branch.clone()));
                branch
            }
            None => self.start(value.clone(), SpeculationAxis::Succeeded, false),
        }
    }

    /// Fail every branch that is still speculative. Used when the call ends without a definitive value.
    pub(crate) fn invalidate_all(&mut self) {
        for (_, branch) in self.branches.drain(..) {
            branch.status.fail_open_axes();
        }
    }

    fn start(&mut self, value: R, callee: SpeculationAxis, guessed: bool) -> Arc<Branch<T>> {
        let status = StatusCell::new(ContextKind::Callback, Status::new(self.caller_axis, callee));
        let responder = self.upstream.as_ref().map(|upstream| {
            Arc::new(ChainedResponder::new(upstream.clone(), status.clone())) as Arc<dyn Respond>
        });
        let facade = Facade::new(self.call_id, status.clone(), responder, self.context.clone());

        let (sender, receiver) = mpsc::channel();
        let branch = Arc::new(Branch {
            status,
            guessed,
            result: Mutex::new(Some(receiver)),
        });

        self.context.events.emit(|| {
            Event::StartBranch(StartBranchEvent {
                timestamp: SystemTime::now(),
                call_id: self.call_id,
                guessed,
            })
        });

        let continuation = self.continuation.clone();
        let input = value.clone();
        let run = move || {
            let result = continuation(&facade, input);
            facade.arm_rollback();
            let _ = sender.send(result);
        };
        if self.nested {
            pool::spawn_dedicated(
                format!("specrpc-branch-{}", first_seven_base64_chars(&self.call_id.bytes())),
                run,
            );
        } else {
            self.context.pool.execute(run);
        }

        self.branches.push((value, branch.clone()));
        branch
    }
}

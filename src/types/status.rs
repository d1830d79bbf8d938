/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The two-axis speculation state of an execution context.
//!
//! Every RPC method execution, every continuation ("callback") execution, and every outbound call tracks
//! a [Status], a pair of [SpeculationAxis] values:
//! 1. The caller axis tracks whether the guess the *issuer* of a call made about its outcome is still open.
//! 2. The callee axis tracks whether an early guess the *implementation* of a call sent back is still open.
//!
//! Both axes resolve monotonically: `Speculative` is the only value an axis can leave. The one exception
//! is the callee axis of a server method, which starts as `Succeeded` (nothing guessed yet) and is
//! [opened](StatusCell::open_callee) exactly once, when the method emits its first speculative return.
//!
//! A [StatusCell] is the shared, lockable holder of a Status. It is jointly owned by the components that
//! drive one execution (for example, the request handler and the method's facade), lets threads
//! [block](StatusCell::wait_resolved) until the context resolves, and fires one-shot listeners when it
//! does.

use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use borsh::{BorshDeserialize, BorshSerialize};

/// The speculation state of one axis of a [Status].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum SpeculationAxis {
    Speculative,
    Succeeded,
    Failed,
}

impl SpeculationAxis {
    /// Whether the axis has reached one of its terminal values.
    pub const fn is_resolved(&self) -> bool {
        !matches!(self, SpeculationAxis::Speculative)
    }
}

impl Display for SpeculationAxis {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SpeculationAxis::Speculative => write!(f, "Speculative"),
            SpeculationAxis::Succeeded => write!(f, "Succeeded"),
            SpeculationAxis::Failed => write!(f, "Failed"),
        }
    }
}

/// A snapshot of the `(caller, callee)` axes of one execution context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Status {
    pub caller: SpeculationAxis,
    pub callee: SpeculationAxis,
}

impl Status {
    /// The status of a call that involves no speculation at all.
    pub const CONFIRMED: Status = Status {
        caller: SpeculationAxis::Succeeded,
        callee: SpeculationAxis::Succeeded,
    };

    pub const fn new(caller: SpeculationAxis, callee: SpeculationAxis) -> Status {
        Status { caller, callee }
    }

    /// Conjunction of both axes: `Failed` if either axis failed, `Succeeded` only if both succeeded.
    pub const fn composite(&self) -> SpeculationAxis {
        match (self.caller, self.callee) {
            (SpeculationAxis::Failed, _) | (_, SpeculationAxis::Failed) => SpeculationAxis::Failed,
            (SpeculationAxis::Succeeded, SpeculationAxis::Succeeded) => SpeculationAxis::Succeeded,
            _ => SpeculationAxis::Speculative,
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.caller, self.callee)
    }
}

/// What kind of execution a [StatusCell] belongs to. This decides which axis is the "context axis", the
/// one that `spec_block` waits on and that listeners are notified about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextKind {
    /// The body of a host method running on a server. The context axis is the caller axis: the method's
    /// own speculative returns do not make the method's execution speculative.
    RpcMethod,
    /// A continuation running on one candidate value of a call. The context axis is the composite.
    Callback,
    /// The bookkeeping status of one outbound call, as observed through its future. The context axis
    /// is the composite.
    Call,
}

/// One-shot closure invoked with the resolved context axis.
pub type StatusListener = Box<dyn FnOnce(SpeculationAxis) + Send>;

/// A [Status] shared between threads, with blocking waits and one-shot resolution listeners.
///
/// All transitions are applied under the cell's lock. Writing to an axis that is already terminal is a
/// no-op, so a real value and a resolution message racing each other cannot make conflicting transitions.
pub struct StatusCell {
    kind: ContextKind,
    state: Mutex<StatusState>,
    changed: Condvar,
}

struct StatusState {
    status: Status,
    callee_opened: bool,
    listeners: Vec<StatusListener>,
}

impl StatusCell {
    pub fn new(kind: ContextKind, status: Status) -> Arc<StatusCell> {
        Arc::new(StatusCell {
            kind,
            state: Mutex::new(StatusState {
                status,
                callee_opened: false,
                listeners: Vec::new(),
            }),
            changed: Condvar::new(),
        })
    }

    /// A resolved cell with both axes `Succeeded`, used as the upstream of calls issued from outside any
    /// speculative context.
    pub fn root() -> Arc<StatusCell> {
        StatusCell::new(ContextKind::Callback, Status::CONFIRMED)
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn status(&self) -> Status {
        self.lock().status
    }

    pub fn caller(&self) -> SpeculationAxis {
        self.status().caller
    }

    pub fn callee(&self) -> SpeculationAxis {
        self.status().callee
    }

    pub fn context_axis(&self) -> SpeculationAxis {
        self.context_axis_of(&self.status())
    }

    /// Resolve the caller axis. Returns whether the axis changed.
    pub fn resolve_caller(&self, axis: SpeculationAxis) -> bool {
        self.transition(|state| {
            if state.status.caller.is_resolved() || !axis.is_resolved() {
                return false;
            }
            state.status.caller = axis;
            true
        })
    }

    /// Resolve the callee axis. Returns whether the axis changed.
    pub fn resolve_callee(&self, axis: SpeculationAxis) -> bool {
        self.transition(|state| {
            if state.status.callee.is_resolved() || !axis.is_resolved() {
                return false;
            }
            state.status.callee = axis;
            true
        })
    }

    /// Move a callee axis that has never been speculative from `Succeeded` to `Speculative`. Idempotent:
    /// returns `false` if the axis is already speculative, has been opened before, or has failed.
    ///
    /// Continuations never open their callee axis: which value they run on is fixed when they start.
    pub fn open_callee(&self) -> bool {
        if self.kind == ContextKind::Callback {
            return false;
        }
        self.transition(|state| {
            if state.callee_opened || state.status.callee != SpeculationAxis::Succeeded {
                return false;
            }
            state.callee_opened = true;
            state.status.callee = SpeculationAxis::Speculative;
            true
        })
    }

    /// Fail every axis that is still speculative. Used when the owning connection or context terminates
    /// before resolution.
    pub fn fail_open_axes(&self) -> bool {
        self.transition(|state| {
            let mut changed = false;
            if !state.status.caller.is_resolved() {
                state.status.caller = SpeculationAxis::Failed;
                changed = true;
            }
            if !state.status.callee.is_resolved() {
                state.status.callee = SpeculationAxis::Failed;
                changed = true;
            }
            changed
        })
    }

    /// Register a listener to be called once, with the resolved context axis, when the context axis
    /// becomes terminal. If it already is, the listener is called immediately on this thread.
    pub fn subscribe(&self, listener: impl FnOnce(SpeculationAxis) + Send + 'static) {
        let mut state = self.lock();
        let axis = self.context_axis_of(&state.status);
        if axis.is_resolved() {
            drop(state);
            listener(axis);
        } else {
            state.listeners.push(Box::new(listener));
        }
    }

    /// Block until the context axis is terminal, and return it.
    pub fn wait_resolved(&self) -> SpeculationAxis {
        let mut state = self.lock();
        loop {
            let axis = self.context_axis_of(&state.status);
            if axis.is_resolved() {
                return axis;
            }
            state = self
                .changed
                .wait(state)
                .expect("Programming error: status lock poisoned.");
        }
    }

    /// Like [wait_resolved](Self::wait_resolved), but gives up after `timeout`, returning `None`.
    pub fn wait_resolved_timeout(&self, timeout: Duration) -> Option<SpeculationAxis> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            let axis = self.context_axis_of(&state.status);
            if axis.is_resolved() {
                return Some(axis);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .expect("Programming error: status lock poisoned.")
                .0;
        }
    }

    fn context_axis_of(&self, status: &Status) -> SpeculationAxis {
        match self.kind {
            ContextKind::RpcMethod => status.caller,
            ContextKind::Callback | ContextKind::Call => status.composite(),
        }
    }

    // Apply `change` under the lock. If it changed the status, wake every waiter, and if the change
    // resolved the context axis, fire the listeners after releasing the lock.
    fn transition(&self, change: impl FnOnce(&mut StatusState) -> bool) -> bool {
        let mut state = self.lock();
        let before = self.context_axis_of(&state.status);
        if !change(&mut state) {
            return false;
        }
        let after = self.context_axis_of(&state.status);
        let listeners = if !before.is_resolved() && after.is_resolved() {
            std::mem::take(&mut state.listeners)
        } else {
            Vec::new()
        };
        drop(state);
        self.changed.notify_all();

        for listener in listeners {
            listener(after);
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatusState> {
        self.state
            .lock()
            .expect("Programming error: status lock poisoned.")
    }
}

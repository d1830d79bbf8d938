/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-context slot for a compensating action.
//!
//! An execution context that performs side effects under an unresolved guess can register one
//! [RollbackAction] to undo them. The runtime executes the action at most once, and only if the context
//! resolves to `Failed`.
//!
//! The first registration wins. Registering a second action in the same context is almost certainly an
//! application bug, so it is logged and the second action is dropped.

use std::sync::Mutex;

pub type RollbackAction = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct RollbackSlot {
    state: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    action: Option<RollbackAction>,
    registered: bool,
    executed: bool,
}

impl RollbackSlot {
    pub fn new() -> RollbackSlot {
        RollbackSlot::default()
    }

    /// Store `action`. Returns `false`, leaving the slot unchanged, if an action was registered before.
    pub fn register(&self, action: impl FnOnce() + Send + 'static) -> bool {
        let mut state = self.lock();
        if state.registered {
            log::warn!("A rollback action is already registered for this context, ignoring the new one.");
            return false;
        }
        state.registered = true;
        state.action = Some(Box::new(action));
        true
    }

    pub fn is_registered(&self) -> bool {
        self.lock().registered
    }

    pub fn is_executed(&self) -> bool {
        self.lock().executed
    }

    /// Run the registered action if there is one and it has not run yet. Returns whether it ran.
    pub fn execute(&self) -> bool {
        let action = {
            let mut state = self.lock();
            match state.action.take() {
                Some(action) => {
                    state.executed = true;
                    action
                }
                None => return false,
            }
        };
        action();
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        self.state
            .lock()
            .expect("Programming error: rollback slot lock poisoned.")
    }
}

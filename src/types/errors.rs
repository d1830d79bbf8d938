/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The outcome of blocking speculative operations.
//!
//! Speculation failure is an ordinary, expected outcome of speculative execution, not a defect, so it is
//! reported as a [CallError::SpeculationFailed] value that callers match on. Domain errors raised by the
//! callee arrive as [CallError::User].

use std::fmt::{self, Display, Formatter};

/// Why a speculative context failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureCause {
    /// A guessed value did not match the real value.
    Misprediction,
    /// The connection carrying the call terminated before the context resolved.
    ConnectionLost(String),
    /// The context that issued this work failed.
    UpstreamFailed,
}

impl Display for FailureCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Misprediction => write!(f, "misprediction"),
            FailureCause::ConnectionLost(reason) => write!(f, "connection lost: {}", reason),
            FailureCause::UpstreamFailed => write!(f, "upstream context failed"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallError {
    /// The context this operation runs under resolved to `Failed`. Work done under it must be abandoned.
    SpeculationFailed(FailureCause),
    /// The callee does not know the requested signature, or the directory has no location for it.
    MethodNotRegistered(String),
    /// The callee's method raised a domain error.
    User(String),
    /// The callee failed for a reason other than a domain error.
    Remote(String),
    /// A value could not be decoded as the expected type.
    Decode(String),
    /// `spec_return` was called in a context with no caller to send values to.
    NoUpstream,
    /// A bounded wait elapsed.
    Timeout,
    /// The worker producing a result terminated without producing it.
    Abandoned(String),
}

impl CallError {
    pub fn is_speculation_failure(&self) -> bool {
        matches!(self, CallError::SpeculationFailed(_))
    }
}

impl Display for CallError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CallError::SpeculationFailed(cause) => write!(f, "speculation failed ({})", cause),
            CallError::MethodNotRegistered(signature) => write!(f, "method not registered: {}", signature),
            CallError::User(message) => write!(f, "user exception: {}", message),
            CallError::Remote(message) => write!(f, "remote failure: {}", message),
            CallError::Decode(message) => write!(f, "cannot decode value: {}", message),
            CallError::NoUpstream => write!(f, "no upstream caller to return to"),
            CallError::Timeout => write!(f, "timed out"),
            CallError::Abandoned(what) => write!(f, "{} terminated without a result", what),
        }
    }
}

impl std::error::Error for CallError {}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the structured messages exchanged over one call's connection.
//!
//! A call's connection carries exactly one [Request] from caller to callee, followed by any number of
//! [Response]s from callee to caller (zero or more [Response::SpeculativeValue]s, then one definitive
//! response), and, if the request declared itself speculative, one [Resolution] from caller to callee.
//!
//! Arguments and return values travel as borsh-encoded bytes. Only the endpoint that knows the concrete
//! types decodes them.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::basic::CallId;
use crate::types::signature::RpcSignature;
use crate::types::status::SpeculationAxis;

#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    Request(Request),
    Response(Response),
    Resolution(Resolution),
}

/// Invoke a method, declaring the caller's own speculation state.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Request {
    /// Correlates the caller's and the callee's logs of the same call.
    pub call_id: CallId,
    pub signature: RpcSignature,
    pub args: Vec<u8>,
    /// Never [SpeculationAxis::Failed]: a failed caller does not issue new work.
    pub caller_axis: SpeculationAxis,
}

#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum Response {
    /// An early guess of the eventual result. May be sent more than once.
    SpeculativeValue(Vec<u8>),
    /// The definitive result.
    Value(Vec<u8>),
    /// The definitive result is equal to the last speculative value sent.
    Confirm,
    /// Terminal failure of the call.
    Exception(ExceptionKind, String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ExceptionKind {
    /// The server has no method with the requested signature.
    MethodNotRegistered,
    /// The method raised a domain error.
    User,
    /// The request could not be served, for example because the arguments could not be decoded or the
    /// method panicked.
    Internal,
}

/// Tells the callee whether the caller's own speculation turned out correct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Resolution {
    Commit,
    Abort,
}

impl Resolution {
    pub fn axis(&self) -> SpeculationAxis {
        match self {
            Resolution::Commit => SpeculationAxis::Succeeded,
            Resolution::Abort => SpeculationAxis::Failed,
        }
    }
}

impl Message {
    pub fn request(
        call_id: CallId,
        signature: RpcSignature,
        args: Vec<u8>,
        caller_axis: SpeculationAxis,
    ) -> Message {
        Message::Request(Request {
            call_id,
            signature,
            args,
            caller_axis,
        })
    }

    pub fn speculative_value(value: Vec<u8>) -> Message {
        Message::Response(Response::SpeculativeValue(value))
    }

    pub fn value(value: Vec<u8>) -> Message {
        Message::Response(Response::Value(value))
    }

    pub fn confirm() -> Message {
        Message::Response(Response::Confirm)
    }

    pub fn exception(kind: ExceptionKind, message: impl Into<String>) -> Message {
        Message::Response(Response::Exception(kind, message.into()))
    }

    pub fn resolution(resolution: Resolution) -> Message {
        Message::Resolution(resolution)
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed handles for calling one remote method.

use std::marker::PhantomData;
use std::sync::mpsc;
use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::client::callbacks::CallbackManager;
use crate::client::control::{CallControl, ControlEvent};
use crate::client::future::CallFuture;
use crate::client::ClientContext;
use crate::facade::{Facade, Respond};
use crate::logging::first_seven_base64_chars;
use crate::pool;
use crate::types::basic::{CallId, Location};
use crate::types::errors::{CallError, FailureCause};
use crate::types::prediction::PredictionSet;
use crate::types::signature::{Arguments, RpcSignature};
use crate::types::status::{ContextKind, SpeculationAxis, Status, StatusCell};

/// A stub for `host_type::method` on one server, taking the argument tuple `A` and returning `R`.
///
/// A stub is bound either by a [Client](crate::client::Client), or by a [Facade] to make nested calls from
/// a host method or a continuation. In the latter case, every call carries the status of the execution
/// that bound the stub, and is aborted if that execution fails.
pub struct Stub<A, R> {
    identity: String,
    signature: RpcSignature,
    location: Location,
    context: Arc<ClientContext>,
    upstream: Arc<StatusCell>,
    upstream_responder: Option<Arc<dyn Respond>>,
    _types: PhantomData<fn(A) -> R>,
}

impl<A, R> Stub<A, R>
where
    A: Arguments + BorshSerialize,
    R: BorshSerialize + BorshDeserialize + Clone + Send + 'static,
{
    pub(crate) fn bind(
        context: Arc<ClientContext>,
        identity: &str,
        host_type: &str,
        method: &str,
        upstream: Arc<StatusCell>,
        upstream_responder: Option<Arc<dyn Respond>>,
    ) -> Result<Stub<A, R>, CallError> {
        let signature = RpcSignature::of::<A, R>(host_type, method);
        let location = context.directory.lookup(identity, &signature)?;
        Ok(Stub {
            identity: identity.to_string(),
            signature,
            location,
            context,
            upstream,
            upstream_responder,
            _types: PhantomData,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn signature(&self) -> &RpcSignature {
        &self.signature
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Call the method with `args`, and run `continuation` on the value believed to be its result.
    ///
    /// Every consumed candidate of `predictions` starts a run of `continuation` immediately, without
    /// waiting for the network. Further runs start on speculative values from the server, and on the
    /// definitive value if no earlier run used an equivalent value. Runs on values that turn out wrong
    /// fail: their [Facade] reports `Failed` and their registered rollbacks execute.
    ///
    /// Fails right away if the execution that bound this stub has already failed.
    pub fn call<T, C>(&self, predictions: PredictionSet<R>, continuation: C, args: A) -> Result<CallFuture<T>, CallError>
    where
        T: Send + 'static,
        C: Fn(&Facade, R) -> Result<T, CallError> + Send + Sync + 'static,
    {
        let request_axis = self.upstream.context_axis();
        if request_axis == SpeculationAxis::Failed {
            return Err(CallError::SpeculationFailed(FailureCause::UpstreamFailed));
        }
        let args = args
            .try_to_vec()
            .map_err(|error| CallError::Decode(error.to_string()))?;
        let call_id = CallId::random();

        let consumed: Vec<R> = predictions.consumed().into_iter().cloned().collect();
        let call_status = StatusCell::new(
            ContextKind::Call,
            Status::new(
                if consumed.is_empty() {
                    SpeculationAxis::Succeeded
                } else {
                    SpeculationAxis::Speculative
                },
                SpeculationAxis::Succeeded,
            ),
        );

        let mut callbacks = CallbackManager::new(
            call_id,
            self.context.clone(),
            Arc::new(continuation),
            predictions.equivalence().clone(),
            request_axis,
            self.upstream_responder.clone(),
        );
        for candidate in consumed {
            callbacks.start_guess(candidate);
        }

        let (settle, settlement) = mpsc::channel();
        let (events_sender, events) = mpsc::channel();
        if request_axis == SpeculationAxis::Speculative {
            let upstream_events = events_sender.clone();
            self.upstream.subscribe(move |axis| {
                let _ = upstream_events.send(ControlEvent::Upstream(axis));
            });
        }

        let control = CallControl {
            call_id,
            signature: self.signature.clone(),
            location: self.location.clone(),
            args,
            request_axis,
            context: self.context.clone(),
            call_status: call_status.clone(),
            predictions: predictions.candidates().to_vec(),
            equivalence: predictions.equivalence().clone(),
            callbacks,
            events_sender,
            events,
            settle,
        };
        let name = format!("specrpc-call-{}", first_seven_base64_chars(&call_id.bytes()));
        pool::spawn_dedicated(name, move || control.run());

        Ok(CallFuture::new(call_id, call_status, settlement))
    }
}

impl<A, R> Stub<A, R>
where
    A: Arguments + BorshSerialize,
    R: BorshSerialize + BorshDeserialize + Clone + PartialEq + Send + 'static,
{
    /// Call the method without predictions and block for its confirmed result.
    pub fn invoke(&self, args: A) -> Result<R, CallError> {
        self.call(PredictionSet::none(), |_, value| Ok(value), args)?
            .get_result()
    }
}

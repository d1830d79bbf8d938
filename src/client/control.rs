/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The control loop of one outbound call.
//!
//! The loop owns the call's connection and serializes everything that can happen to the call through a
//! single channel of [ControlEvent]s: responses read from the connection by a reader thread, resolutions of
//! the context that issued the call, and the connection terminating. It never waits on a continuation;
//! once the call is settled it hands the confirmed branch (or an error) to the [future](super::future).

use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::time::SystemTime;

use borsh::BorshDeserialize;

use crate::client::callbacks::{Branch, CallbackManager};
use crate::client::ClientContext;
use crate::events::*;
use crate::logging::first_seven_base64_chars;
use crate::messages::{ExceptionKind, Message, Resolution, Response};
use crate::networking::Connection;
use crate::pool;
use crate::types::basic::{CallId, Location};
use crate::types::errors::{CallError, FailureCause};
use crate::types::prediction::Equivalence;
use crate::types::signature::RpcSignature;
use crate::types::status::{SpeculationAxis, StatusCell};

pub(crate) enum ControlEvent {
    /// The context that issued the call resolved.
    Upstream(SpeculationAxis),
    Response(Response),
    /// The connection terminated, for the given reason.
    Disconnected(String),
}

/// What the control loop hands to the future: the confirmed branch, or why the call failed.
pub(crate) type Settlement<T> = Result<Arc<Branch<T>>, CallError>;

pub(crate) struct CallControl<R, T> {
    pub(crate) call_id: CallId,
    pub(crate) signature: RpcSignature,
    pub(crate) location: Location,
    pub(crate) args: Vec<u8>,
    pub(crate) request_axis: SpeculationAxis,
    pub(crate) context: Arc<ClientContext>,
    pub(crate) call_status: Arc<StatusCell>,
    pub(crate) predictions: Vec<R>,
    pub(crate) equivalence: Equivalence<R>,
    pub(crate) callbacks: CallbackManager<R, T>,
    pub(crate) events_sender: Sender<ControlEvent>,
    pub(crate) events: Receiver<ControlEvent>,
    pub(crate) settle: Sender<Settlement<T>>,
}

impl<R, T> CallControl<R, T>
where
    R: BorshDeserialize + Clone + Send + 'static,
    T: Send + 'static,
{
    pub(crate) fn run(mut self) {
        let connection = match self.context.connector.connect(&self.location) {
            Ok(connection) => connection,
            Err(error) => {
                log::debug!("Call to {} could not connect: {}", self.location, error);
                self.terminate(CallError::SpeculationFailed(FailureCause::ConnectionLost(
                    error.to_string(),
                )));
                return;
            }
        };

        let request = Message::request(
            self.call_id,
            self.signature.clone(),
            std::mem::take(&mut self.args),
            self.request_axis,
        );
        if let Err(error) = connection.send(&request) {
            connection.close();
            self.terminate(CallError::SpeculationFailed(FailureCause::ConnectionLost(
                error.to_string(),
            )));
            return;
        }
        self.context.events.emit(|| {
            Event::SendRequest(SendRequestEvent {
                timestamp: SystemTime::now(),
                call_id: self.call_id,
                signature: self.signature.clone(),
                location: self.location.clone(),
                caller_axis: self.request_axis,
            })
        });

        self.start_reader(connection.clone());
        self.control(&*connection);
        connection.close();
    }

    fn control(&mut self, connection: &dyn Connection) {
        let mut upstream_axis = self.request_axis;
        let mut last_speculative: Option<R> = None;
        let mut confirmed: Option<Arc<Branch<T>>> = None;

        while let Ok(event) = self.events.recv() {
            match event {
                ControlEvent::Upstream(axis) => {
                    if upstream_axis.is_resolved() || !axis.is_resolved() {
                        continue;
                    }
                    upstream_axis = axis;
                    self.callbacks.caller_resolved(axis);
                    self.send_resolution(connection, axis);

                    if axis == SpeculationAxis::Failed {
                        self.call_status.fail_open_axes();
                        self.callbacks.invalidate_all();
                        self.settle(Err(CallError::SpeculationFailed(FailureCause::UpstreamFailed)));
                        return;
                    }
                    if let Some(branch) = confirmed.take() {
                        self.settle(Ok(branch));
                        return;
                    }
                }

                ControlEvent::Response(Response::SpeculativeValue(bytes)) => {
                    if confirmed.is_some() {
                        continue;
                    }
                    let value = match R::try_from_slice(&bytes) {
                        Ok(value) => value,
                        Err(error) => {
                            self.fail(CallError::Decode(error.to_string()));
                            return;
                        }
                    };
                    self.context.events.emit(|| {
                        Event::ReceiveSpeculativeValue(ReceiveSpeculativeValueEvent {
                            timestamp: SystemTime::now(),
                            call_id: self.call_id,
                        })
                    });
                    self.call_status.open_callee();
                    self.callbacks.start_guess(value.clone());
                    last_speculative = Some(value);
                }

                ControlEvent::Response(Response::Value(bytes)) => {
                    if confirmed.is_some() {
                        continue;
                    }
                    let value = match R::try_from_slice(&bytes) {
                        Ok(value) => value,
                        Err(error) => {
                            self.fail(CallError::Decode(error.to_string()));
                            return;
                        }
                    };
                    self.context.events.emit(|| {
                        Event::ReceiveValue(ReceiveValueEvent {
                            timestamp: SystemTime::now(),
                            call_id: self.call_id,
                        })
                    });
                    let branch = self.reconcile(&value, last_speculative.as_ref());
                    if upstream_axis == SpeculationAxis::Succeeded {
                        self.settle(Ok(branch));
                        return;
                    }
                    confirmed = Some(branch);
                }

                ControlEvent::Response(Response::Confirm) => {
                    if confirmed.is_some() {
                        continue;
                    }
                    let value = match last_speculative.clone() {
                        Some(value) => value,
                        None => {
                            self.fail(CallError::Remote(String::from(
                                "server confirmed a speculative value it never sent",
                            )));
                            return;
                        }
                    };
                    self.context.events.emit(|| {
                        Event::ReceiveConfirm(ReceiveConfirmEvent {
                            timestamp: SystemTime::now(),
                            call_id: self.call_id,
                        })
                    });
                    let branch = self.reconcile(&value, Some(&value));
                    if upstream_axis == SpeculationAxis::Succeeded {
                        self.settle(Ok(branch));
                        return;
                    }
                    confirmed = Some(branch);
                }

                ControlEvent::Response(Response::Exception(kind, message)) => {
                    self.context.events.emit(|| {
                        Event::ReceiveException(ReceiveExceptionEvent {
                            timestamp: SystemTime::now(),
                            call_id: self.call_id,
                            kind,
                            message: message.clone(),
                        })
                    });
                    let error = match kind {
                        ExceptionKind::MethodNotRegistered => CallError::MethodNotRegistered(message),
                        ExceptionKind::User => CallError::User(message),
                        ExceptionKind::Internal => CallError::Remote(message),
                    };
                    self.fail(error);
                    return;
                }

                ControlEvent::Disconnected(reason) => {
                    // The definitive value is already in; only the upstream resolution is outstanding.
                    if confirmed.is_some() {
                        continue;
                    }
                    log::debug!("Call to {} lost its connection: {}", self.location, reason);
                    self.fail(CallError::SpeculationFailed(FailureCause::ConnectionLost(reason)));
                    return;
                }
            }
        }
    }

    // Resolve the call-level axes and the branches against the definitive value.
    fn reconcile(&mut self, value: &R, last_speculative: Option<&R>) -> Arc<Branch<T>> {
        if !self.predictions.is_empty() {
            let predicted = self
                .predictions
                .iter()
                .any(|candidate| (self.equivalence)(candidate, value));
            self.call_status.resolve_caller(if predicted {
                SpeculationAxis::Succeeded
            } else {
                SpeculationAxis::Failed
            });
        }
        if let Some(speculative) = last_speculative {
            self.call_status.resolve_callee(if (self.equivalence)(speculative, value) {
                SpeculationAxis::Succeeded
            } else {
                SpeculationAxis::Failed
            });
        }
        self.callbacks.resolve(value)
    }

    fn send_resolution(&self, connection: &dyn Connection, axis: SpeculationAxis) {
        if self.request_axis != SpeculationAxis::Speculative {
            return;
        }
        let resolution = match axis {
            SpeculationAxis::Failed => Resolution::Abort,
            _ => Resolution::Commit,
        };
        if let Err(error) = connection.send(&Message::resolution(resolution)) {
            log::debug!("Could not send {:?} to {}: {}", resolution, self.location, error);
            return;
        }
        self.context.events.emit(|| {
            Event::SendResolution(SendResolutionEvent {
                timestamp: SystemTime::now(),
                call_id: self.call_id,
                resolution,
            })
        });
    }

    // Read responses off the connection until it terminates.
    fn start_reader(&self, connection: Arc<dyn Connection>) {
        let events = self.events_sender.clone();
        let name = format!("specrpc-reader-{}", first_seven_base64_chars(&self.call_id.bytes()));
        pool::spawn_dedicated(name, move || loop {
            match connection.recv() {
                Ok(Message::Response(response)) => {
                    if events.send(ControlEvent::Response(response)).is_err() {
                        return;
                    }
                }
                Ok(_) => log::warn!("Ignoring a non-response message from {}.", connection.peer()),
                Err(error) => {
                    let _ = events.send(ControlEvent::Disconnected(error.to_string()));
                    return;
                }
            }
        });
    }

    // End the call without a definitive value.
    fn fail(&mut self, error: CallError) {
        self.call_status.fail_open_axes();
        self.callbacks.invalidate_all();
        self.settle(Err(error));
    }

    // End the call before the request could be sent.
    fn terminate(mut self, error: CallError) {
        self.fail(error);
    }

    fn settle(&self, settlement: Settlement<T>) {
        // The future may have been dropped, in which case nobody waits for the result.
        let _ = self.settle.send(settlement);
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-request lifecycle on the serving side.
//!
//! Each accepted connection carries exactly one call. The handler:
//! 1. Reads the [Request] and looks up the method it names.
//! 2. Runs the method on the worker pool, under a [Facade] whose status starts with the caller axis the
//!    request carried.
//! 3. If that axis is `Speculative`, reads the caller's [Resolution](crate::messages::Resolution)
//!    concurrently with the method's execution. A connection that closes first counts as an abort.
//! 4. Once the method has finished, runs its rollback if either axis of its status failed.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::client::ClientContext;
use crate::events::*;
use crate::facade::{Facade, Respond};
use crate::messages::{ExceptionKind, Message, Request};
use crate::networking::{Connection, TransportError};
use crate::server::executor::{self, MethodTable};
use crate::types::basic::CallId;
use crate::types::errors::{CallError, FailureCause};
use crate::types::status::{ContextKind, SpeculationAxis, Status, StatusCell};

/// Sends the responses of one method execution to its caller.
pub(crate) struct Responder {
    call_id: CallId,
    connection: Arc<dyn Connection>,
    status: Arc<StatusCell>,
    context: Arc<ClientContext>,
    state: Mutex<ResponderState>,
}

struct ResponderState {
    last_speculative: Option<Vec<u8>>,
    // Set once a definitive value or an exception is sent. Nothing is sent afterwards.
    finished: bool,
}

impl Responder {
    pub(crate) fn new(
        call_id: CallId,
        connection: Arc<dyn Connection>,
        status: Arc<StatusCell>,
        context: Arc<ClientContext>,
    ) -> Responder {
        Responder {
            call_id,
            connection,
            status,
            context,
            state: Mutex::new(ResponderState {
                last_speculative: None,
                finished: false,
            }),
        }
    }

    /// Send the method's definitive return value. If the method sent speculative values, the last one is
    /// either confirmed or replaced by `value`, and the callee axis resolves accordingly.
    pub(crate) fn finish(&self, value: Vec<u8>, equivalent: impl Fn(&[u8], &[u8]) -> bool) {
        let mut state = self.lock();
        if state.finished {
            return;
        }
        state.finished = true;

        match state.last_speculative.take() {
            Some(speculative) if equivalent(&speculative, &value) => {
                self.status.resolve_callee(SpeculationAxis::Succeeded);
                self.send(&Message::confirm());
                self.context.events.emit(|| {
                    Event::SendConfirm(SendConfirmEvent {
                        timestamp: SystemTime::now(),
                        call_id: self.call_id,
                    })
                });
            }
            speculative => {
                let corrected = speculative.is_some();
                if corrected {
                    self.status.resolve_callee(SpeculationAxis::Failed);
                }
                self.send(&Message::value(value));
                self.context.events.emit(|| {
                    Event::SendValue(SendValueEvent {
                        timestamp: SystemTime::now(),
                        call_id: self.call_id,
                        corrected,
                    })
                });
            }
        }
    }

    /// Send an exception and end the call. A speculative value sent earlier is thereby withdrawn.
    pub(crate) fn send_exception(&self, kind: ExceptionKind, message: String) {
        let mut state = self.lock();
        if state.finished {
            return;
        }
        state.finished = true;
        if state.last_speculative.take().is_some() {
            self.status.resolve_callee(SpeculationAxis::Failed);
        }

        self.send(&Message::exception(kind, message.clone()));
        self.context.events.emit(|| {
            Event::SendException(SendExceptionEvent {
                timestamp: SystemTime::now(),
                call_id: self.call_id,
                kind,
                message,
            })
        });
    }

    fn send(&self, message: &Message) {
        if let Err(error) = self.connection.send(message) {
            log::debug!("Could not respond to {}: {}", self.connection.peer(), error);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ResponderState> {
        self.state
            .lock()
            .expect("Programming error: responder lock poisoned.")
    }
}

impl Respond for Responder {
    fn spec_return(&self, value: Vec<u8>) -> Result<(), CallError> {
        let mut state = self.lock();
        if state.finished {
            log::debug!("Ignoring a speculative return sent after the call ended.");
            return Ok(());
        }
        if self.status.caller() == SpeculationAxis::Failed {
            return Err(CallError::SpeculationFailed(FailureCause::UpstreamFailed));
        }

        if let Err(error) = self.connection.send(&Message::speculative_value(value.clone())) {
            self.status.resolve_caller(SpeculationAxis::Failed);
            return Err(CallError::SpeculationFailed(FailureCause::ConnectionLost(
                error.to_string(),
            )));
        }
        self.status.open_callee();
        state.last_speculative = Some(value);
        drop(state);

        self.context.events.emit(|| {
            Event::SpecReturn(SpecReturnEvent {
                timestamp: SystemTime::now(),
                call_id: self.call_id,
            })
        });
        Ok(())
    }

    fn throw_exception(&self, message: String) -> Result<(), CallError> {
        self.send_exception(ExceptionKind::User, message);
        Ok(())
    }
}

/// Serve the one call carried by `connection`, then close it.
pub(crate) fn handle(connection: Arc<dyn Connection>, methods: Arc<MethodTable>, context: Arc<ClientContext>) {
    serve(&connection, &methods, &context);
    connection.close();
}

fn serve(connection: &Arc<dyn Connection>, methods: &MethodTable, context: &Arc<ClientContext>) {
    let request = match connection.recv() {
        Ok(Message::Request(request)) => request,
        Ok(_) => {
            reject(connection, ExceptionKind::Internal, "expected a request");
            return;
        }
        Err(error @ (TransportError::Decode(_) | TransportError::FrameTooLarge(_))) => {
            reject(connection, ExceptionKind::Internal, &error.to_string());
            return;
        }
        Err(error) => {
            log::debug!("No request from {}: {}", connection.peer(), error);
            return;
        }
    };
    let Request {
        call_id,
        signature,
        args,
        caller_axis,
    } = request;

    context.events.emit(|| {
        Event::ReceiveRequest(ReceiveRequestEvent {
            timestamp: SystemTime::now(),
            call_id,
            signature: signature.clone(),
            caller_axis,
            peer: connection.peer(),
        })
    });

    if caller_axis == SpeculationAxis::Failed {
        reject(connection, ExceptionKind::Internal, "request issued from a failed context");
        return;
    }
    let method = match methods.get(&signature) {
        Some(method) => method,
        None => {
            reject(
                connection,
                ExceptionKind::MethodNotRegistered,
                &format!("{} is not registered", signature),
            );
            return;
        }
    };

    let status = StatusCell::new(
        ContextKind::RpcMethod,
        Status::new(caller_axis, SpeculationAxis::Succeeded),
    );
    let responder = Arc::new(Responder::new(
        call_id,
        connection.clone(),
        status.clone(),
        context.clone(),
    ));
    let facade = Arc::new(Facade::new(
        call_id,
        status.clone(),
        Some(responder.clone() as Arc<dyn Respond>),
        context.clone(),
    ));

    let (done, finished) = mpsc::channel();
    {
        let facade = facade.clone();
        let status = status.clone();
        context.pool.execute(move || {
            executor::execute(&*method, &facade, &status, &responder, &args);
            let _ = done.send(());
        });
    }

    if caller_axis == SpeculationAxis::Speculative {
        let resolution = match connection.recv() {
            Ok(Message::Resolution(resolution)) => Some(resolution),
            Ok(_) => {
                log::warn!("Expected a resolution from {}.", connection.peer());
                None
            }
            Err(error) => {
                log::debug!("Caller {} went away before resolving: {}", connection.peer(), error);
                None
            }
        };
        context.events.emit(|| {
            Event::ReceiveResolution(ReceiveResolutionEvent {
                timestamp: SystemTime::now(),
                call_id,
                resolution,
            })
        });
        status.resolve_caller(resolution.map_or(SpeculationAxis::Failed, |resolution| resolution.axis()));
    }

    // The method's job always signals, including when the method panics.
    let _ = finished.recv();

    let Status { caller, callee } = status.status();
    if caller == SpeculationAxis::Failed || callee == SpeculationAxis::Failed {
        facade.execute_rollback();
    }
}

fn reject(connection: &Arc<dyn Connection>, kind: ExceptionKind, message: &str) {
    log::debug!("Rejecting request from {}: {}", connection.peer(), message);
    if let Err(error) = connection.send(&Message::exception(kind, message)) {
        log::debug!("Could not respond to {}: {}", connection.peer(), error);
    }
}


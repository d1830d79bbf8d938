/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Registration and invocation of host methods.
//!
//! Servers do not dispatch by reflection. Every remotely invocable method is registered up front in a
//! [MethodTable] as a [HostMethod]: a typed closure together with the factory of the host object it runs
//! on. The table erases the types behind the [Invoke] trait so that the request handler can decode
//! arguments, run the method and encode its result knowing only the [RpcSignature].

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::facade::Facade;
use crate::messages::ExceptionKind;
use crate::server::handler::Responder;
use crate::types::errors::CallError;
use crate::types::prediction::Equivalence;
use crate::types::signature::{Arguments, RpcSignature};
use crate::types::status::{SpeculationAxis, StatusCell};

/// A method that can be invoked on encoded arguments.
pub trait Invoke: Send + Sync {
    fn signature(&self) -> &RpcSignature;

    /// Decode `args`, run the method under `facade`, and encode its return value.
    fn invoke(&self, facade: &Facade, args: &[u8]) -> Result<Vec<u8>, CallError>;

    /// Whether two encoded return values are equivalent under the method's equivalence.
    fn equivalent(&self, a: &[u8], b: &[u8]) -> bool;
}

/// The method `host_type::method` on host objects of type `H`, taking the argument tuple `A` and
/// returning `R`.
///
/// A fresh host object is made by the factory for every request, so speculative and definitive executions
/// of the same logical call never share state through it.
pub struct HostMethod<H, A, R> {
    signature: RpcSignature,
    factory: Box<dyn Fn() -> H + Send + Sync>,
    body: Box<dyn Fn(&mut H, &Facade, A) -> Result<R, CallError> + Send + Sync>,
    equivalence: Equivalence<R>,
}

impl<H, A, R> HostMethod<H, A, R>
where
    H: 'static,
    A: Arguments + BorshDeserialize + 'static,
    R: BorshSerialize + BorshDeserialize + PartialEq + 'static,
{
    pub fn new(
        host_type: &str,
        method: &str,
        factory: impl Fn() -> H + Send + Sync + 'static,
        body: impl Fn(&mut H, &Facade, A) -> Result<R, CallError> + Send + Sync + 'static,
    ) -> HostMethod<H, A, R> {
        HostMethod {
            signature: RpcSignature::of::<A, R>(host_type, method),
            factory: Box::new(factory),
            body: Box::new(body),
            equivalence: Arc::new(|a: &R, b: &R| a == b),
        }
    }

    /// Replace the default [PartialEq] comparison used to decide whether the real return value confirms
    /// the last speculative return.
    pub fn with_equivalence(mut self, equivalence: impl Fn(&R, &R) -> bool + Send + Sync + 'static) -> Self {
        self.equivalence = Arc::new(equivalence);
        self
    }
}

impl<H, A, R> Invoke for HostMethod<H, A, R>
where
    H: 'static,
    A: Arguments + BorshDeserialize + 'static,
    R: BorshSerialize + BorshDeserialize + 'static,
{
    fn signature(&self) -> &RpcSignature {
        &self.signature
    }

    fn invoke(&self, facade: &Facade, args: &[u8]) -> Result<Vec<u8>, CallError> {
        let args = A::try_from_slice(args).map_err(|error| CallError::Decode(error.to_string()))?;
        let mut host = (self.factory)();
        let value = (self.body)(&mut host, facade, args)?;
        value
            .try_to_vec()
            .map_err(|error| CallError::Decode(error.to_string()))
    }

    fn equivalent(&self, a: &[u8], b: &[u8]) -> bool {
        match (R::try_from_slice(a), R::try_from_slice(b)) {
            (Ok(a), Ok(b)) => (self.equivalence)(&a, &b),
            _ => a == b,
        }
    }
}

/// The methods a server hosts, by signature.
#[derive(Default)]
pub struct MethodTable {
    methods: HashMap<RpcSignature, Arc<dyn Invoke>>,
}

impl MethodTable {
    pub fn new() -> MethodTable {
        MethodTable::default()
    }

    /// Add `method` to the table, replacing any method with the same signature.
    pub fn register(&mut self, method: impl Invoke + 'static) -> &mut MethodTable {
        let signature = method.signature().clone();
        if self.methods.insert(signature.clone(), Arc::new(method)).is_some() {
            log::warn!("Replacing the registered implementation of {}.", signature);
        }
        self
    }

    pub fn get(&self, signature: &RpcSignature) -> Option<Arc<dyn Invoke>> {
        self.methods.get(signature).cloned()
    }

    pub fn signatures(&self) -> impl Iterator<Item = &RpcSignature> {
        self.methods.keys()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Run `method` on `args` and send its outcome through `responder`.
pub(crate) fn execute(
    method: &dyn Invoke,
    facade: &Facade,
    status: &StatusCell,
    responder: &Responder,
    args: &[u8],
) {
    match panic::catch_unwind(AssertUnwindSafe(|| method.invoke(facade, args))) {
        Ok(Ok(value)) => responder.finish(value, |a, b| method.equivalent(a, b)),
        Ok(Err(CallError::SpeculationFailed(cause))) if status.caller() == SpeculationAxis::Failed => {
            log::debug!("{} abandoned after its caller failed ({}).", method.signature(), cause);
        }
        Ok(Err(CallError::User(message))) => responder.send_exception(ExceptionKind::User, message),
        // Internal failures fail a caller axis that is still speculative.
        Ok(Err(error)) => {
            status.resolve_caller(SpeculationAxis::Failed);
            responder.send_exception(ExceptionKind::Internal, error.to_string());
        }
        Err(_) => {
            log::warn!("{} panicked.", method.signature());
            status.resolve_caller(SpeculationAxis::Failed);
            responder.send_exception(ExceptionKind::Internal, String::from("method panicked"));
        }
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Identification of remotely invocable methods.
//!
//! An [RpcSignature] names a host type, a method, and the method's return and argument types. It routes
//! requests on the server and, together with the server's identity, forms the key that clients look up
//! in the [Directory](crate::registry::Directory).
//!
//! Type names are taken from [std::any::type_name], so clients and servers that exchange signatures must
//! be built with the same toolchain and from the same type definitions.

use std::any;
use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

use super::basic::Fingerprint;

#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct RpcSignature {
    pub host_type: String,
    pub method: String,
    pub return_type: String,
    pub argument_types: Vec<String>,
}

impl RpcSignature {
    pub fn new(
        host_type: impl Into<String>,
        method: impl Into<String>,
        return_type: impl Into<String>,
        argument_types: Vec<String>,
    ) -> Self {
        Self {
            host_type: host_type.into(),
            method: method.into(),
            return_type: return_type.into(),
            argument_types,
        }
    }

    /// The signature of `host_type::method`, taking the argument tuple `A` and returning `R`.
    pub fn of<A: Arguments, R>(host_type: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(host_type, method, any::type_name::<R>(), A::type_names())
    }

    /// `returnType;hostType;method;argType...`, the form used in registry keys.
    pub fn identity_string(&self) -> String {
        let mut parts = vec![
            self.return_type.as_str(),
            self.host_type.as_str(),
            self.method.as_str(),
        ];
        parts.extend(self.argument_types.iter().map(String::as_str));
        parts.join(";")
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.identity_string().as_bytes());
        Fingerprint::new(hasher.finalize().into())
    }
}

impl Display for RpcSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}::{}({})",
            self.return_type,
            self.host_type,
            self.method,
            self.argument_types.join(", ")
        )
    }
}

/// Implemented by the argument tuples of remote methods, to name their element types.
pub trait Arguments {
    fn type_names() -> Vec<String>;
}

macro_rules! impl_arguments {
    ($($arg:ident),*) => {
        impl<$($arg),*> Arguments for ($($arg,)*) {
            fn type_names() -> Vec<String> {
                vec![$(any::type_name::<$arg>().to_string()),*]
            }
        }
    };
}

impl_arguments!();
impl_arguments!(A0);
impl_arguments!(A0, A1);
impl_arguments!(A0, A1, A2);
impl_arguments!(A0, A1, A2, A3);
impl_arguments!(A0, A1, A2, A3, A4);
impl_arguments!(A0, A1, A2, A3, A4, A5);

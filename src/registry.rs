/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The directory that maps a method signature to the network location of the server that hosts it.
//!
//! Entries are keyed by `"<server identity>;<signature identity string>"`, so that several servers can
//! host methods with the same signature under different identities.
//!
//! A directory is shared by reference between the servers and clients of one process. Processes that do
//! not share memory share a signature file instead: servers [persist](Directory::persist) their
//! registrations into it, and a client's [lookup](Directory::lookup) that misses re-reads it. The file
//! holds the borsh encoding of a list of `(key, location)` pairs.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::basic::Location;
use crate::types::errors::CallError;
use crate::types::signature::RpcSignature;

pub struct Directory {
    signature_file: Option<PathBuf>,
    entries: RwLock<HashMap<String, Location>>,
}

impl Directory {
    /// An empty, memory-only directory.
    pub fn new() -> Directory {
        Directory {
            signature_file: None,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// A directory backed by `signature_file`, pre-populated with the file's entries if it exists.
    pub fn load(signature_file: impl AsRef<Path>) -> Result<Directory, RegistryError> {
        let signature_file = signature_file.as_ref().to_path_buf();
        let entries = read_signature_file(&signature_file)?;
        Ok(Directory {
            signature_file: Some(signature_file),
            entries: RwLock::new(entries),
        })
    }

    pub fn signature_file(&self) -> Option<&Path> {
        self.signature_file.as_deref()
    }

    /// Register `signature` as hosted by `identity` at `location`, in memory only. A previous location for
    /// the same key is replaced.
    pub fn register(&self, identity: &str, signature: &RpcSignature, location: Location) {
        log::debug!("Registering {} of {} at {}.", signature, identity, location);
        self.entries
            .write()
            .expect("Programming error: directory lock poisoned.")
            .insert(key(identity, signature), location);
    }

    /// [Register](Self::register), then [persist](Self::persist).
    pub fn register_and_persist(
        &self,
        identity: &str,
        signature: &RpcSignature,
        location: Location,
    ) -> Result<(), RegistryError> {
        self.register(identity, signature, location);
        self.persist()
    }

    /// Merge this directory's entries into its signature file. Entries in the file that this directory
    /// does not know about are kept.
    pub fn persist(&self) -> Result<(), RegistryError> {
        let path = self
            .signature_file
            .as_ref()
            .ok_or(RegistryError::NoSignatureFile)?;

        let mut merged = read_signature_file(path)?;
        merged.extend(
            self.entries
                .read()
                .expect("Programming error: directory lock poisoned.")
                .iter()
                .map(|(key, location)| (key.clone(), location.clone())),
        );

        let mut pairs: Vec<(String, Location)> = merged.into_iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let bytes = pairs.try_to_vec()?;

        let staging = path.with_extension("staging");
        fs::write(&staging, bytes)?;
        fs::rename(&staging, path)?;
        Ok(())
    }

    /// Find the location of `signature` as hosted by `identity`. On a miss, a file-backed directory
    /// re-reads its signature file once before giving up.
    pub fn lookup(&self, identity: &str, signature: &RpcSignature) -> Result<Location, RegistryError> {
        let key = key(identity, signature);
        if let Some(location) = self.get(&key) {
            return Ok(location);
        }

        if let Some(path) = &self.signature_file {
            let on_file = read_signature_file(path)?;
            let mut entries = self
                .entries
                .write()
                .expect("Programming error: directory lock poisoned.");
            for (key, location) in on_file {
                entries.entry(key).or_insert(location);
            }
            if let Some(location) = entries.get(&key) {
                return Ok(location.clone());
            }
        }

        Err(RegistryError::NotRegistered(key))
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("Programming error: directory lock poisoned.")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, key: &str) -> Option<Location> {
        self.entries
            .read()
            .expect("Programming error: directory lock poisoned.")
            .get(key)
            .cloned()
    }
}

impl Default for Directory {
    fn default() -> Self {
        Directory::new()
    }
}

fn key(identity: &str, signature: &RpcSignature) -> String {
    format!("{};{}", identity, signature.identity_string())
}

fn read_signature_file(path: &Path) -> Result<HashMap<String, Location>, RegistryError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(error) => return Err(error.into()),
    };
    let pairs = Vec::<(String, Location)>::try_from_slice(&bytes)
        .map_err(|error| RegistryError::Corrupted(error.to_string()))?;
    Ok(pairs.into_iter().collect())
}

#[derive(Debug)]
pub enum RegistryError {
    /// No location is known for the key.
    NotRegistered(String),
    /// Persistence was requested from a memory-only directory.
    NoSignatureFile,
    /// The signature file exists but does not decode.
    Corrupted(String),
    Io(io::Error),
}

impl From<io::Error> for RegistryError {
    fn from(error: io::Error) -> Self {
        RegistryError::Io(error)
    }
}

impl From<RegistryError> for CallError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::NotRegistered(key) => CallError::MethodNotRegistered(key),
            other => CallError::MethodNotRegistered(other.to_string()),
        }
    }
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NotRegistered(key) => write!(f, "nothing registered under {}", key),
            RegistryError::NoSignatureFile => write!(f, "directory has no signature file"),
            RegistryError::Corrupted(message) => write!(f, "corrupted signature file: {}", message),
            RegistryError::Io(error) => write!(f, "signature file i/o error: {}", error),
        }
    }
}

impl std::error::Error for RegistryError {}

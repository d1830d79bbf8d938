/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Caller-supplied guesses about the return value of a call.

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

/// Application-defined equivalence between two return values. Predictions and speculative values count
/// as correct when they are equivalent to the real value, which lets approximate guesses (for example,
/// numbers within a tolerance) still be confirmed.
pub type Equivalence<R> = Arc<dyn Fn(&R, &R) -> bool + Send + Sync>;

/// How the candidates of a [PredictionSet] with more than one element start continuations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Reconciliation {
    /// Run the continuation once for every distinct candidate.
    #[default]
    EachCandidate,
    /// Run the continuation only on the first candidate.
    FirstCandidate,
}

/// An ordered, possibly empty collection of candidate return values for one call.
///
/// An empty set means "no local prediction": the call's continuation runs only once a value arrives from
/// the callee. A non-empty set starts the continuation immediately, without waiting for the network.
/// Whichever candidates started a continuation, the whole set takes part in deciding whether the caller's
/// guess was right.
pub struct PredictionSet<R> {
    candidates: Vec<R>,
    equivalence: Equivalence<R>,
    reconciliation: Reconciliation,
}

impl<R: PartialEq + 'static> PredictionSet<R> {
    pub fn new(candidates: Vec<R>) -> Self {
        Self {
            candidates,
            equivalence: Arc::new(|a: &R, b: &R| a == b),
            reconciliation: Reconciliation::default(),
        }
    }

    /// The empty prediction set.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    pub fn single(candidate: R) -> Self {
        Self::new(vec![candidate])
    }
}

impl<R> PredictionSet<R> {
    /// Replace the default [PartialEq] comparison with `equivalence`.
    pub fn with_equivalence(mut self, equivalence: impl Fn(&R, &R) -> bool + Send + Sync + 'static) -> Self {
        self.equivalence = Arc::new(equivalence);
        self
    }

    pub fn with_reconciliation(mut self, reconciliation: Reconciliation) -> Self {
        self.reconciliation = reconciliation;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn candidates(&self) -> &[R] {
        &self.candidates
    }

    pub fn equivalence(&self) -> &Equivalence<R> {
        &self.equivalence
    }

    pub fn reconciliation(&self) -> Reconciliation {
        self.reconciliation
    }

    /// Whether any candidate is equivalent to `value`.
    pub fn contains(&self, value: &R) -> bool {
        self.candidates.iter().any(|candidate| (self.equivalence)(candidate, value))
    }

    /// The candidates that start a continuation, in order, with equivalent duplicates removed.
    pub(crate) fn consumed(&self) -> Vec<&R> {
        let mut consumed: Vec<&R> = Vec::new();
        for candidate in &self.candidates {
            if !consumed.iter().any(|seen| (self.equivalence)(seen, candidate)) {
                consumed.push(candidate);
            }
            if self.reconciliation == Reconciliation::FirstCandidate {
                break;
            }
        }
        consumed
    }
}

impl<R: Debug> Debug for PredictionSet<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredictionSet")
            .field("candidates", &self.candidates)
            .field("reconciliation", &self.reconciliation)
            .finish()
    }
}

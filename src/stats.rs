/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Counters of how well guesses turn out, kept per [Client](crate::client::Client).
//!
//! A "prediction" is a continuation branch started on a guessed value, either a caller-side candidate or
//! a speculative value sent by the callee. It is counted as correct or incorrect once the real value
//! arrives.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Statistics {
    enabled: bool,
    predictions: AtomicU64,
    correct: AtomicU64,
    incorrect: AtomicU64,
}

/// A point-in-time copy of [Statistics].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub predictions: u64,
    pub correct: u64,
    pub incorrect: u64,
}

impl Statistics {
    pub fn new(enabled: bool) -> Statistics {
        Statistics {
            enabled,
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn record_prediction(&self) {
        if self.enabled {
            self.predictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_outcome(&self, correct: bool) {
        if !self.enabled {
            return;
        }
        if correct {
            self.correct.fetch_add(1, Ordering::Relaxed);
        } else {
            self.incorrect.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            predictions: self.predictions.load(Ordering::Relaxed),
            correct: self.correct.load(Ordering::Relaxed),
            incorrect: self.incorrect.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.predictions.store(0, Ordering::Relaxed);
        self.correct.store(0, Ordering::Relaxed);
        self.incorrect.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_statistics_stay_zero() {
        let statistics = Statistics::new(false);
        statistics.record_prediction();
        statistics.record_outcome(true);
        assert_eq!(statistics.snapshot(), StatisticsSnapshot::default());
    }

    #[test]
    fn enabled_statistics_count_outcomes() {
        let statistics = Statistics::new(true);
        statistics.record_prediction();
        statistics.record_prediction();
        statistics.record_outcome(true);
        statistics.record_outcome(false);
        assert_eq!(
            statistics.snapshot(),
            StatisticsSnapshot {
                predictions: 2,
                correct: 1,
                incorrect: 1
            }
        );

        statistics.reset();
        assert_eq!(statistics.snapshot(), StatisticsSnapshot::default());
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;
use std::sync::{Mutex, OnceLock};

use serde::Serialize;

/// One labelled counter value as exposed by [`Metrics::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterSample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: u64,
}

/// In-process labelled counters.
///
/// Counter increments sit on best-effort paths (run accounting, ack
/// failures, decode errors) and must never fail or block for long; the map
/// is tiny and the lock is held only for the insert.
#[derive(Default)]
pub struct Metrics {
    counters: Mutex<BTreeMap<(String, Vec<(String, String)>), u64>>,
}

impl Metrics {
    pub fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        self.increment_by(name, labels, 1);
    }

    pub fn increment_by(&self, name: &str, labels: &[(&str, &str)], amount: u64) {
        let mut key_labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        key_labels.sort();
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *counters.entry((name.to_string(), key_labels)).or_insert(0) += amount;
    }

    /// Current value of one counter, 0 when never incremented.
    pub fn value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let mut key_labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        key_labels.sort();
        let counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        counters
            .get(&(name.to_string(), key_labels))
            .copied()
            .unwrap_or(0)
    }

    /// All counters in name order.
    pub fn snapshot(&self) -> Vec<CounterSample> {
        let counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        counters
            .iter()
            .map(|((name, labels), value)| CounterSample {
                name: name.clone(),
                labels: labels.iter().cloned().collect(),
                value: *value,
            })
            .collect()
    }

    /// Drop all counters. Test hook.
    pub fn reset(&self) {
        match self.counters.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

/// The process-wide counter registry, created on first use.
pub fn metrics() -> &'static Metrics {
    static METRICS: OnceLock<Metrics> = OnceLock::new();
    METRICS.get_or_init(Metrics::default)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

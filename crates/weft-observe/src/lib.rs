// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod context;
mod metrics;
mod redact;

pub use context::{current_run_context, with_run_context, RunContext};
pub use metrics::{metrics, CounterSample, Metrics};
pub use redact::{redact_map, redact_value, SENSITIVE_KEYS};

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The tool surface agents call during a run.
//!
//! Everything here goes through the process-wide signal hub (and its bus),
//! so a runner integration can expose these as function tools without any
//! per-call wiring. Operations read the task-local run context for
//! conversation binding, exactly like the signal layer.

pub mod chat;
pub mod orchestrate;
pub mod signals;
pub mod steps;

use std::sync::Arc;

use weft_signals::SignalHub;

/// The installed hub, or a clear error for callers outside a wired
/// process.
pub(crate) fn require_hub() -> anyhow::Result<Arc<SignalHub>> {
    weft_signals::global_hub()
        .ok_or_else(|| anyhow::anyhow!("signal hub not initialized; tools are unavailable"))
}

/// Clip `text` to `limit` characters, appending an ellipsis when cut.
pub(crate) fn clip(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit.saturating_sub(1)).collect();
    out.push('\u{2026}');
    out
}

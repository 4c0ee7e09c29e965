// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Process-wide signal hub.
//!
//! The binary installs one hub at startup; tool helpers reach it without
//! plumbing. Tests install a hub over the in-memory bus and reset it
//! afterwards.

use std::sync::{Arc, Mutex, OnceLock};

use crate::hub::SignalHub;

fn slot() -> &'static Mutex<Option<Arc<SignalHub>>> {
    static HUB: OnceLock<Mutex<Option<Arc<SignalHub>>>> = OnceLock::new();
    HUB.get_or_init(|| Mutex::new(None))
}

/// Install the process-wide hub, replacing any previous one.
pub fn install_hub(hub: Arc<SignalHub>) {
    match slot().lock() {
        Ok(mut guard) => *guard = Some(hub),
        Err(poisoned) => *poisoned.into_inner() = Some(hub),
    }
}

/// The installed hub, if any.
pub fn global_hub() -> Option<Arc<SignalHub>> {
    match slot().lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Remove the installed hub. Test hook.
pub fn reset_hub() {
    match slot().lock() {
        Ok(mut guard) => *guard = None,
        Err(poisoned) => *poisoned.into_inner() = None,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

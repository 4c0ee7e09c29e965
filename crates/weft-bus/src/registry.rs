// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Process-wide shared bus.
//!
//! Tool helpers and the signal layer need a bus without threading one
//! through every call site. The registry holds a single connected client,
//! created on first use; tests replace it with an in-memory fake through
//! [`set_bus_for_testing`] and restore with [`reset_shared_bus`].

use std::sync::{Arc, Mutex, OnceLock};

use weft_config::RedisConfig;

use crate::interface::{Bus, BusError};
use crate::redis_adapter::{RedisBus, RedisBusOptions};

#[derive(Default)]
struct SharedBus {
    test_override: Option<Arc<dyn Bus>>,
    cached: Option<Arc<dyn Bus>>,
}

fn registry() -> &'static Mutex<SharedBus> {
    static REGISTRY: OnceLock<Mutex<SharedBus>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(SharedBus::default()))
}

fn lock() -> std::sync::MutexGuard<'static, SharedBus> {
    match registry().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Replace the shared bus for the lifetime of a test. Passing `None`
/// clears both the override and any cached client.
pub fn set_bus_for_testing(bus: Option<Arc<dyn Bus>>) {
    let mut shared = lock();
    if bus.is_none() {
        shared.cached = None;
    }
    shared.test_override = bus;
}

/// Drop the override and the cached client; the next call reconnects.
pub fn reset_shared_bus() {
    let mut shared = lock();
    shared.test_override = None;
    shared.cached = None;
}

/// The process-wide bus: the test override when set, otherwise a cached
/// Redis client created on first use from `config`.
pub async fn shared_bus(config: &RedisConfig) -> Result<Arc<dyn Bus>, BusError> {
    if let Some(bus) = {
        let shared = lock();
        shared
            .test_override
            .as_ref()
            .or(shared.cached.as_ref())
            .cloned()
    } {
        return Ok(bus);
    }

    let bus: Arc<dyn Bus> = Arc::new(
        RedisBus::connect(
            &config.url,
            RedisBusOptions {
                stream_maxlen: config.stream_maxlen,
                ..RedisBusOptions::default()
            },
        )
        .await?,
    );

    let mut shared = lock();
    // Another task may have connected while this one was; keep the first.
    if let Some(existing) = shared.test_override.as_ref().or(shared.cached.as_ref()) {
        return Ok(Arc::clone(existing));
    }
    shared.cached = Some(Arc::clone(&bus));
    Ok(bus)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

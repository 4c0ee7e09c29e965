// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Minimal pluggable bus interface.
//!
//! Kept tiny and stable so transports can be swapped without changing
//! callers: a topic is a named append-only log, a message is a JSON object
//! with a caller-supplied canonical id. Two read disciplines exist:
//!
//! - **Tail reads** (no group): `read` returns the most recent entries, or
//!   entries strictly after a cursor.
//! - **Consumer-group reads**: a bus constructed with group/consumer names
//!   delivers each entry to the group at most once and acknowledges after
//!   conversion (at-least-once).

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    /// The transport rejected or could not complete the operation.
    #[error("bus transport error: {0}")]
    Transport(String),
}

/// One stored bus entry.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Map<String, Value>,
    /// Canonical id. When the publisher supplies a uuid it remains the id
    /// across transports; the transport's native entry id stays internal.
    pub id: String,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

#[async_trait]
pub trait Bus: Send + Sync {
    /// Append one message to a topic. Returns the canonical message id.
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<String, BusError>;

    /// Read messages after `last_id`, or the most recent `limit` when the
    /// cursor is absent. Never blocks; may return empty.
    async fn read(
        &self,
        topic: &str,
        last_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<BusMessage>, BusError>;

    /// Block up to `block_ms` waiting for messages after `last_id`.
    /// Returns empty on timeout.
    async fn read_blocking(
        &self,
        topic: &str,
        last_id: Option<&str>,
        limit: usize,
        block_ms: u64,
    ) -> Result<Vec<BusMessage>, BusError>;

    /// Whether the transport has a native blocking primitive. When false
    /// the signal layer falls back to short-interval polling.
    fn supports_blocking(&self) -> bool {
        false
    }

    /// Block up to `block_ms` for a single message after `last_id`.
    /// `Ok(None)` means timeout (or no native support, for the default).
    async fn read_blocking_one(
        &self,
        _topic: &str,
        _last_id: Option<&str>,
        _block_ms: u64,
    ) -> Result<Option<BusMessage>, BusError> {
        Ok(None)
    }

    /// Block up to `block_ms` for the first message on any of `topics`,
    /// each resuming after its cursor. Ties break in argument order.
    async fn read_any_blocking(
        &self,
        _topics: &[String],
        _cursors: &HashMap<String, Option<String>>,
        _block_ms: u64,
    ) -> Result<Option<(String, BusMessage)>, BusError> {
        Ok(None)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("envelope field `{0}` must be non-empty")]
    EmptyField(&'static str),
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Transport-agnostic message envelope shared across components.
///
/// Defines the canonical fields for any message sent to an agent or a
/// conversation. The delivery transport (Redis, in-memory, HTTP) is
/// intentionally not encoded here. An envelope is immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Globally unique id (uuid v4); also the bus-canonical message id.
    #[serde(default = "new_id")]
    pub id: String,
    /// Partition key for all routing and ordering.
    pub conversation_id: String,
    /// `user:<name>`, `agent:<name>` or `chat:<conversation_id>`.
    pub sender: String,
    /// Same address forms as `sender`.
    pub recipient: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// RFC3339, UTC.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Message,
    Control,
}

impl Envelope {
    /// Construct a chat message envelope with a fresh id and timestamp.
    pub fn message(
        conversation_id: impl Into<String>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            conversation_id: conversation_id.into(),
            sender: sender.into(),
            recipient: recipient.into(),
            kind: MessageKind::Message,
            content: Some(content.into()),
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach free-form metadata, replacing any existing map.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Required fields must be present and non-empty.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.id.trim().is_empty() {
            return Err(ModelError::EmptyField("id"));
        }
        if self.conversation_id.trim().is_empty() {
            return Err(ModelError::EmptyField("conversation_id"));
        }
        if self.sender.trim().is_empty() {
            return Err(ModelError::EmptyField("sender"));
        }
        if self.recipient.trim().is_empty() {
            return Err(ModelError::EmptyField("recipient"));
        }
        Ok(())
    }

    /// Serialize to the JSON object shape carried as a bus payload.
    pub fn to_payload(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            // Envelope always serializes to an object; this arm is unreachable
            // but kept total so callers never see a panic.
            _ => Map::new(),
        }
    }

    /// Decode and validate an envelope from a bus payload.
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(payload.clone()))
    }

    /// The `metadata.orchestrate.done_topic` string, when present and
    /// non-empty. Parent orchestrators set this so the worker can signal
    /// child-subtask completion.
    pub fn done_topic(&self) -> Option<&str> {
        self.metadata
            .get("orchestrate")?
            .get("done_topic")?
            .as_str()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

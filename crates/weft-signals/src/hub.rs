// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Synchronous-feeling rendezvous over the bus.
//!
//! A signal is one bus entry of the shape
//! `{"event": "signal", "payload": {...}}` on an application-chosen topic.
//! `send` publishes one; the `wait` family resolves the next entry after a
//! cursor, blocking up to a deadline.
//!
//! # Wait algorithm
//!
//! 1. Resolve the starting cursor: explicit `last_id`, else the cursor
//!    persisted for the bound conversation, else none.
//! 2. Non-blocking read of one entry after the cursor.
//! 3. One native blocking read for the remaining time, when the transport
//!    has one.
//! 4. Fall back to polling every ~50 ms until the deadline, then return
//!    the timeout shape (never an error).
//!
//! # Conversation binding
//!
//! When a run context is bound on the task, successful waits persist their
//! cursor per `(conversation, topic)` so repeated waits advance through
//! the log, and both `send` and successful waits mirror
//! `signal_send`/`signal_recv` events onto the conversation's stream
//! topic. Mirroring and cursor bookkeeping are best-effort; they never
//! fail a signal operation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use weft_bus::{Bus, BusError, BusMessage};
use weft_config::SignalsConfig;
use weft_model::{stream_topic, EventMeta, StreamEvent};
use weft_observe::{current_run_context, redact_map};

/// Serialized payload cap applied when none is configured.
pub const DEFAULT_PAYLOAD_CAP: usize = 64 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("topic must be non-empty")]
    EmptyTopic,
    #[error("topic not allowed by prefix policy")]
    TopicNotAllowed,
    #[error("payload too large for configured cap ({size} > {cap} bytes)")]
    PayloadTooLarge { size: usize, cap: usize },
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Topic and payload constraints for one hub.
#[derive(Debug, Clone, Default)]
pub struct SignalPolicy {
    /// When set, every operation's topic must start with this prefix.
    pub topic_prefix: Option<String>,
    /// Serialized payload cap; `None` uses [`DEFAULT_PAYLOAD_CAP`].
    pub payload_cap: Option<usize>,
}

impl SignalPolicy {
    pub fn from_config(config: &SignalsConfig) -> Self {
        Self {
            topic_prefix: config
                .topic_prefix
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            payload_cap: config.payload_max_bytes,
        }
    }

    fn cap(&self) -> usize {
        self.payload_cap.unwrap_or(DEFAULT_PAYLOAD_CAP)
    }
}

/// Successful `send` result.
#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    pub ok: bool,
    pub topic: String,
    pub message_id: String,
}

/// Result shape shared by the wait family. A delivered reply carries
/// `topic`, `message` and `message_id`; a timeout carries `timeout_ms`
/// plus the cursor (`last_id`) or topic list it was watching.
#[derive(Debug, Clone, Serialize)]
pub struct WaitReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_id: Option<String>,
}

impl WaitReply {
    fn delivered(topic: String, message: Map<String, Value>, message_id: String) -> Self {
        Self {
            ok: true,
            topic: Some(topic),
            topics: None,
            message: Some(message),
            message_id: Some(message_id),
            timeout_ms: None,
            last_id: None,
        }
    }

    fn timed_out(topic: String, timeout_ms: u64, cursor: Option<String>) -> Self {
        Self {
            ok: false,
            topic: Some(topic),
            topics: None,
            message: None,
            message_id: None,
            timeout_ms: Some(timeout_ms),
            last_id: Some(cursor.unwrap_or_default()),
        }
    }

    fn timed_out_many(topics: Vec<String>, timeout_ms: u64) -> Self {
        Self {
            ok: false,
            topic: None,
            topics: Some(topics),
            message: None,
            message_id: None,
            timeout_ms: Some(timeout_ms),
            last_id: None,
        }
    }
}

/// `wait_all` result: one entry per topic that produced a message.
#[derive(Debug, Clone, Serialize)]
pub struct WaitAllReply {
    pub ok: bool,
    pub messages: BTreeMap<String, WaitReply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

pub struct SignalHub {
    bus: Arc<dyn Bus>,
    policy: SignalPolicy,
    /// `(conversation_id, topic) -> last observed message id`. Process-bound
    /// by design: a new process has no cursors.
    cursors: Mutex<HashMap<(String, String), String>>,
}

impl SignalHub {
    pub fn new(bus: Arc<dyn Bus>, policy: SignalPolicy) -> Self {
        Self {
            bus,
            policy,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    // ── Operations ────────────────────────────────────────────────────────────

    pub async fn send(
        &self,
        topic: &str,
        payload: Map<String, Value>,
    ) -> Result<SendReceipt, SignalError> {
        let name = self.checked_topic(topic)?;
        let payload_len = self.ensure_within_cap(&payload)?;

        let mut body = Map::new();
        body.insert("event".into(), Value::String("signal".into()));
        body.insert("payload".into(), Value::Object(payload));
        let message = BusMessage::new(name.clone(), body);
        let message_id = self.bus.publish(&name, message).await?;

        self.mirror(|meta| StreamEvent::SignalSend {
            meta,
            topic: name.clone(),
            message_id: message_id.clone(),
            payload_len: payload_len as u64,
        })
        .await;

        Ok(SendReceipt {
            ok: true,
            topic: name,
            message_id,
        })
    }

    pub async fn wait(
        &self,
        topic: &str,
        last_id: Option<&str>,
        timeout_ms: u64,
    ) -> Result<WaitReply, SignalError> {
        let name = self.checked_topic(topic)?;
        let timeout_ms = timeout_ms.max(1);
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let cursor = match last_id {
            Some(id) => Some(id.to_string()),
            None => self.persisted_cursor(&name),
        };

        // Fast path: the signal may already be there.
        if let Some(message) = self.read_one(&name, cursor.as_deref()).await? {
            return Ok(self.process_message(&name, message).await);
        }

        // Native blocking read for the remaining time, when available.
        if self.bus.supports_blocking() {
            let remaining = remaining_ms(deadline);
            if remaining > 0 {
                if let Some(message) = self
                    .bus
                    .read_blocking_one(&name, cursor.as_deref(), remaining)
                    .await?
                {
                    return Ok(self.process_message(&name, message).await);
                }
            }
            if Instant::now() >= deadline {
                return Ok(WaitReply::timed_out(name, timeout_ms, cursor));
            }
        }

        // Polling fallback.
        loop {
            if Instant::now() >= deadline {
                return Ok(WaitReply::timed_out(name, timeout_ms, cursor));
            }
            if let Some(message) = self.read_one(&name, cursor.as_deref()).await? {
                return Ok(self.process_message(&name, message).await);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn wait_any(
        &self,
        topics: &[String],
        last_ids: Option<&HashMap<String, String>>,
        timeout_ms: u64,
    ) -> Result<WaitReply, SignalError> {
        let names = self.checked_topics(topics)?;
        let timeout_ms = timeout_ms.max(1);
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let cursors = self.build_cursors(&names, last_ids);

        // Non-blocking sweep in argument order.
        for name in &names {
            let cursor = cursors.get(name).and_then(|c| c.as_deref());
            if let Some(message) = self.read_one(name, cursor).await? {
                return Ok(self.process_message(name, message).await);
            }
        }

        if self.bus.supports_blocking() {
            let remaining = remaining_ms(deadline);
            if remaining > 0 {
                if let Some((name, message)) =
                    self.bus.read_any_blocking(&names, &cursors, remaining).await?
                {
                    return Ok(self.process_message(&name, message).await);
                }
            }
            return Ok(WaitReply::timed_out_many(names, timeout_ms));
        }

        loop {
            for name in &names {
                let cursor = cursors.get(name).and_then(|c| c.as_deref());
                if let Some(message) = self.read_one(name, cursor).await? {
                    return Ok(self.process_message(name, message).await);
                }
            }
            if Instant::now() >= deadline {
                return Ok(WaitReply::timed_out_many(names, timeout_ms));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn wait_all(
        &self,
        topics: &[String],
        last_ids: Option<&HashMap<String, String>>,
        timeout_ms: u64,
    ) -> Result<WaitAllReply, SignalError> {
        let names = self.checked_topics(topics)?;
        let timeout_ms = timeout_ms.max(1);
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let cursors = self.build_cursors(&names, last_ids);

        // Initial non-blocking sweep.
        let mut results: BTreeMap<String, WaitReply> = BTreeMap::new();
        for name in &names {
            let cursor = cursors.get(name).and_then(|c| c.as_deref());
            if let Some(message) = self.read_one(name, cursor).await? {
                results.insert(name.clone(), self.process_message(name, message).await);
            }
        }
        if results.len() == names.len() {
            return Ok(WaitAllReply {
                ok: true,
                messages: results,
                timeout_ms: None,
            });
        }

        // Accumulate the rest until the deadline.
        while Instant::now() < deadline && results.len() < names.len() {
            let remaining: Vec<String> = names
                .iter()
                .filter(|n| !results.contains_key(*n))
                .cloned()
                .collect();

            let mut progressed = false;
            for name in &remaining {
                let cursor = cursors.get(name).and_then(|c| c.as_deref());
                if let Some(message) = self.read_one(name, cursor).await? {
                    results.insert(name.clone(), self.process_message(name, message).await);
                    progressed = true;
                    break;
                }
            }
            if progressed {
                continue;
            }

            if self.bus.supports_blocking() {
                let block = remaining_ms(deadline);
                if block > 0 {
                    if let Some((name, message)) = self
                        .bus
                        .read_any_blocking(&remaining, &cursors, block)
                        .await?
                    {
                        results.insert(name.clone(), self.process_message(&name, message).await);
                    }
                    continue;
                }
            }
            if Instant::now() < deadline {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        Ok(WaitAllReply {
            ok: results.len() == names.len(),
            messages: results,
            timeout_ms: Some(timeout_ms),
        })
    }

    // ── Policy ────────────────────────────────────────────────────────────────

    fn checked_topic(&self, topic: &str) -> Result<String, SignalError> {
        let name = topic.trim();
        if name.is_empty() {
            return Err(SignalError::EmptyTopic);
        }
        if let Some(prefix) = &self.policy.topic_prefix {
            if !name.starts_with(prefix.as_str()) {
                return Err(SignalError::TopicNotAllowed);
            }
        }
        Ok(name.to_string())
    }

    fn checked_topics(&self, topics: &[String]) -> Result<Vec<String>, SignalError> {
        let mut names = Vec::with_capacity(topics.len());
        for topic in topics {
            let trimmed = topic.trim();
            if trimmed.is_empty() {
                continue;
            }
            names.push(self.checked_topic(trimmed)?);
        }
        if names.is_empty() {
            return Err(SignalError::EmptyTopic);
        }
        Ok(names)
    }

    fn ensure_within_cap(&self, payload: &Map<String, Value>) -> Result<usize, SignalError> {
        let size = serialized_len(payload);
        let cap = self.policy.cap();
        if size > cap {
            return Err(SignalError::PayloadTooLarge { size, cap });
        }
        Ok(size)
    }

    // ── Message processing ────────────────────────────────────────────────────

    async fn read_one(
        &self,
        topic: &str,
        cursor: Option<&str>,
    ) -> Result<Option<BusMessage>, SignalError> {
        let mut batch = self.bus.read(topic, cursor, 1).await?;
        Ok(if batch.is_empty() {
            None
        } else {
            Some(batch.remove(0))
        })
    }

    /// Redact the inner payload, persist the cursor, mirror the receive and
    /// build the delivered reply.
    async fn process_message(&self, topic: &str, message: BusMessage) -> WaitReply {
        let payload_len = serialized_len(&message.payload);

        let mut redacted = message.payload.clone();
        if let Some(Value::Object(inner)) = message.payload.get("payload") {
            redacted.insert("payload".into(), Value::Object(redact_map(inner)));
        }

        self.persist_cursor(topic, &message.id);
        self.mirror(|meta| StreamEvent::SignalRecv {
            meta,
            topic: topic.to_string(),
            message_id: message.id.clone(),
            payload_len: payload_len as u64,
        })
        .await;

        WaitReply::delivered(topic.to_string(), redacted, message.id)
    }

    // ── Cursor table ──────────────────────────────────────────────────────────

    fn build_cursors(
        &self,
        names: &[String],
        last_ids: Option<&HashMap<String, String>>,
    ) -> HashMap<String, Option<String>> {
        names
            .iter()
            .map(|name| {
                let explicit = last_ids.and_then(|ids| ids.get(name)).cloned();
                let cursor = explicit.or_else(|| self.persisted_cursor(name));
                (name.clone(), cursor)
            })
            .collect()
    }

    fn persisted_cursor(&self, topic: &str) -> Option<String> {
        let conversation = current_run_context()?.conversation_id;
        let cursors = match self.cursors.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cursors.get(&(conversation, topic.to_string())).cloned()
    }

    fn persist_cursor(&self, topic: &str, message_id: &str) {
        let Some(ctx) = current_run_context() else {
            return;
        };
        let mut cursors = match self.cursors.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cursors.insert(
            (ctx.conversation_id, topic.to_string()),
            message_id.to_string(),
        );
    }

    // ── Stream mirroring ──────────────────────────────────────────────────────

    /// Publish a diagnostic event onto the bound conversation's stream.
    /// Best effort: no context means no mirror, and publish failures are
    /// logged and dropped. Also used by tool helpers for `tool_step`
    /// visibility.
    pub async fn emit_stream_event<F>(&self, build: F)
    where
        F: FnOnce(EventMeta) -> StreamEvent,
    {
        self.mirror(build).await;
    }

    async fn mirror<F>(&self, build: F)
    where
        F: FnOnce(EventMeta) -> StreamEvent,
    {
        let Some(ctx) = current_run_context() else {
            return;
        };
        let topic = stream_topic(&ctx.conversation_id);
        let event = build(EventMeta::new(&ctx.conversation_id));
        let message = BusMessage::new(topic.clone(), event.to_payload());
        if let Err(err) = self.bus.publish(&topic, message).await {
            debug!(error = %err, topic, "signal stream mirror failed");
        }
    }
}

fn serialized_len(payload: &Map<String, Value>) -> usize {
    serde_json::to_string(&Value::Object(payload.clone()))
        .map(|s| s.len())
        .unwrap_or(0)
}

fn remaining_ms(deadline: Instant) -> u64 {
    deadline
        .saturating_duration_since(Instant::now())
        .as_millis() as u64
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use weft_bus::MemoryBus;
    use weft_observe::{with_run_context, RunContext};

    fn hub() -> SignalHub {
        SignalHub::new(Arc::new(MemoryBus::new()), SignalPolicy::default())
    }

    fn hub_with(policy: SignalPolicy) -> SignalHub {
        SignalHub::new(Arc::new(MemoryBus::new()), policy)
    }

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn ctx(conversation: &str) -> RunContext {
        RunContext::new("run-1", conversation, Some("dev".into()))
    }

    #[tokio::test]
    async fn send_then_wait_returns_the_message() {
        let hub = hub();
        hub.send("signal:s", payload(json!({ "n": 1 }))).await.unwrap();
        let reply = hub.wait("signal:s", None, 10).await.unwrap();
        assert!(reply.ok);
        assert_eq!(reply.topic.as_deref(), Some("signal:s"));
        let message = reply.message.unwrap();
        assert_eq!(message["event"], "signal");
        assert_eq!(message["payload"]["n"], 1);
    }

    #[tokio::test]
    async fn second_wait_advances_past_persisted_cursor() {
        let hub = hub();
        with_run_context(ctx("c1"), async {
            hub.send("signal:s", payload(json!({ "n": 1 }))).await.unwrap();
            let first = hub.wait("signal:s", None, 10).await.unwrap();
            assert_eq!(first.message.unwrap()["payload"]["n"], 1);

            hub.send("signal:s", payload(json!({ "n": 2 }))).await.unwrap();
            let second = hub.wait("signal:s", None, 10).await.unwrap();
            assert_eq!(
                second.message.unwrap()["payload"]["n"],
                2,
                "wait must resume after the persisted cursor"
            );
        })
        .await;
    }

    #[tokio::test]
    async fn wait_timeout_returns_shape_not_error() {
        let hub = hub();
        let reply = hub.wait("signal:nothing", None, 30).await.unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.timeout_ms, Some(30));
        assert_eq!(reply.last_id.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn prefix_policy_rejects_other_topics() {
        let hub = hub_with(SignalPolicy {
            topic_prefix: Some("signal:teamA/".into()),
            payload_cap: None,
        });
        let denied = hub.send("signal:teamB/x", Map::new()).await;
        assert!(matches!(denied, Err(SignalError::TopicNotAllowed)));
        assert!(hub.send("signal:teamA/x", Map::new()).await.is_ok());
    }

    #[tokio::test]
    async fn payload_cap_is_enforced() {
        let capped_hub = hub_with(SignalPolicy {
            topic_prefix: None,
            payload_cap: Some(16),
        });
        let big = payload(json!({ "a": "x".repeat(100) }));
        match capped_hub.send("t", big).await {
            Err(SignalError::PayloadTooLarge { cap: 16, .. }) => {}
            other => panic!("expected PayloadTooLarge, got {other:?}"),
        }
        // The default cap comfortably accepts the same payload.
        let hub = hub();
        assert!(hub.send("t", payload(json!({ "a": "x".repeat(100) }))).await.is_ok());
    }

    #[tokio::test]
    async fn wait_redacts_sensitive_keys_but_bus_keeps_original() {
        let bus = Arc::new(MemoryBus::new());
        let hub = SignalHub::new(Arc::clone(&bus) as Arc<dyn Bus>, SignalPolicy::default());

        hub.send("signal:s", payload(json!({ "token": "abc", "n": 1 })))
            .await
            .unwrap();
        let reply = hub.wait("signal:s", None, 10).await.unwrap();
        let message = reply.message.unwrap();
        assert_eq!(message["payload"]["token"], "[REDACTED]");
        assert_eq!(message["payload"]["n"], 1);

        // Redaction applies on the return path only.
        let raw = bus.read("signal:s", None, 1).await.unwrap();
        assert_eq!(raw[0].payload["payload"]["token"], "abc");
    }

    #[tokio::test]
    async fn wait_any_resolves_the_topic_with_a_message() {
        let hub = hub();
        hub.send("a", payload(json!({ "n": 1 }))).await.unwrap();
        let reply = hub
            .wait_any(&["a".to_string(), "b".to_string()], None, 100)
            .await
            .unwrap();
        assert!(reply.ok);
        assert_eq!(reply.topic.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn wait_any_timeout_lists_watched_topics() {
        let hub = hub();
        let reply = hub
            .wait_any(&["a".to_string(), "b".to_string()], None, 30)
            .await
            .unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.topics.as_deref(), Some(&["a".to_string(), "b".to_string()][..]));
        assert_eq!(reply.timeout_ms, Some(30));
    }

    #[tokio::test]
    async fn wait_all_collects_every_topic() {
        let hub = hub();
        hub.send("signal:a/a", payload(json!({ "a": 1 }))).await.unwrap();
        hub.send("signal:a/b", payload(json!({ "b": 2 }))).await.unwrap();
        let reply = hub
            .wait_all(
                &["signal:a/a".to_string(), "signal:a/b".to_string()],
                None,
                100,
            )
            .await
            .unwrap();
        assert!(reply.ok);
        assert_eq!(reply.messages.len(), 2);
        assert_eq!(
            reply.messages["signal:a/a"].message.as_ref().unwrap()["payload"]["a"],
            1
        );
        assert_eq!(
            reply.messages["signal:a/b"].message.as_ref().unwrap()["payload"]["b"],
            2
        );
    }

    #[tokio::test]
    async fn wait_all_partial_result_is_not_ok() {
        let hub = hub();
        hub.send("signal:a/a", payload(json!({ "a": 1 }))).await.unwrap();
        let reply = hub
            .wait_all(
                &["signal:a/a".to_string(), "signal:a/missing".to_string()],
                None,
                60,
            )
            .await
            .unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.messages.len(), 1);
        assert_eq!(reply.timeout_ms, Some(60));
    }

    #[tokio::test]
    async fn empty_topic_list_is_invalid() {
        let hub = hub();
        let err = hub.wait_any(&[], None, 10).await;
        assert!(matches!(err, Err(SignalError::EmptyTopic)));
        let err = hub.wait_any(&["  ".to_string()], None, 10).await;
        assert!(matches!(err, Err(SignalError::EmptyTopic)));
    }

    #[tokio::test]
    async fn bound_conversation_mirrors_send_and_recv() {
        let bus = Arc::new(MemoryBus::new());
        let hub = SignalHub::new(Arc::clone(&bus) as Arc<dyn Bus>, SignalPolicy::default());

        with_run_context(ctx("c9"), async {
            hub.send("signal:s", payload(json!({ "n": 1 }))).await.unwrap();
            hub.wait("signal:s", None, 10).await.unwrap();
        })
        .await;

        let mirrored = bus.read("stream:c9", None, 10).await.unwrap();
        let kinds: Vec<_> = mirrored
            .iter()
            .map(|m| m.payload["event"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["signal_send", "signal_recv"]);
        assert_eq!(mirrored[0].payload["topic"], "signal:s");
        assert!(mirrored[0].payload["payload_len"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn unbound_operations_do_not_mirror() {
        let bus = Arc::new(MemoryBus::new());
        let hub = SignalHub::new(Arc::clone(&bus) as Arc<dyn Bus>, SignalPolicy::default());
        hub.send("signal:s", payload(json!({ "n": 1 }))).await.unwrap();
        let reply = hub.wait("signal:s", None, 10).await.unwrap();
        assert!(reply.ok);
        // No conversation bound: the signal topic is the only one written.
        assert_eq!(bus.topic_len("signal:s"), 1);
    }

    #[tokio::test]
    async fn wait_resolves_signal_sent_shortly_after() {
        let bus = Arc::new(MemoryBus::new());
        let hub = Arc::new(SignalHub::new(
            Arc::clone(&bus) as Arc<dyn Bus>,
            SignalPolicy::default(),
        ));

        let waiter = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { hub.wait("signal:later", None, 1000).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        hub.send("signal:later", payload(json!({ "go": true }))).await.unwrap();

        let reply = waiter.await.unwrap();
        assert!(reply.ok);
        assert_eq!(reply.message.unwrap()["payload"]["go"], true);
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Redis Streams-backed bus adapter.
//!
//! - publish: XADD to the stream named by the topic (canonical uuid stored
//!   in the `id` field, compact JSON in `payload`)
//! - read (no group): tail via XREVRANGE; uuid or entry-id cursors via
//!   chunked XRANGE scans
//! - read (group set): XREADGROUP with lazy group creation at offset 0 and
//!   XACK after conversion (at-least-once)
//!
//! The stream's own `<ms>-<seq>` entry ids are used internally for
//! cursoring but never exposed to callers.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamMaxlen, StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde_json::{Map, Value};
use tracing::warn;

use weft_observe::metrics;

use crate::interface::{Bus, BusError, BusMessage};

/// Group/consumer identity and retention hints for a [`RedisBus`].
#[derive(Debug, Clone, Default)]
pub struct RedisBusOptions {
    /// Consumer-group name; tail reads when unset.
    pub group_name: Option<String>,
    /// Consumer name within the group; defaults to `consumer-<uuid>`.
    pub consumer_name: Option<String>,
    /// Approximate per-topic retention cap (XADD MAXLEN ~).
    pub stream_maxlen: Option<usize>,
}

pub struct RedisBus {
    conn: ConnectionManager,
    group: Option<String>,
    consumer: String,
    stream_maxlen: Option<usize>,
}

impl RedisBus {
    /// Connect to `url` and build a bus with the given options.
    pub async fn connect(url: &str, options: RedisBusOptions) -> Result<Self, BusError> {
        let client = redis::Client::open(url).map_err(to_bus_error)?;
        let conn = ConnectionManager::new(client).await.map_err(to_bus_error)?;
        Ok(Self::with_connection(conn, options))
    }

    /// Build a bus over an existing managed connection.
    pub fn with_connection(conn: ConnectionManager, options: RedisBusOptions) -> Self {
        Self {
            conn,
            group: options.group_name,
            consumer: options
                .consumer_name
                .unwrap_or_else(|| format!("consumer-{}", uuid::Uuid::new_v4())),
            stream_maxlen: options.stream_maxlen,
        }
    }

    /// Clone of the underlying connection.
    ///
    /// Exposed for collaborators that share the transport but sit outside
    /// the publish/read contract, such as the observer index.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    /// Stream entry ids have the shape `<milliseconds>-<sequence>`.
    fn is_entry_id(value: &str) -> bool {
        match value.split_once('-') {
            Some((left, right)) => {
                !left.is_empty()
                    && !right.is_empty()
                    && left.bytes().all(|b| b.is_ascii_digit())
                    && right.bytes().all(|b| b.is_ascii_digit())
            }
            None => false,
        }
    }

    /// Resolve a canonical uuid to its native entry id by scanning the
    /// stream oldest-first in chunks. Returns `None` when no entry matches.
    async fn scan_for_uuid(
        &self,
        topic: &str,
        last_uuid: &str,
        chunk_size: usize,
    ) -> Result<Option<String>, BusError> {
        let mut conn = self.conn.clone();
        let mut cursor = "-".to_string();
        loop {
            let start = if cursor == "-" {
                cursor.clone()
            } else {
                format!("({cursor}")
            };
            let reply: StreamRangeReply = conn
                .xrange_count(topic, &start, "+", chunk_size)
                .await
                .map_err(to_bus_error)?;
            if reply.ids.is_empty() {
                return Ok(None);
            }
            for entry in &reply.ids {
                if field_string(entry, "id").as_deref() == Some(last_uuid) {
                    return Ok(Some(entry.id.clone()));
                }
            }
            cursor = reply.ids.last().map(|e| e.id.clone()).unwrap_or(cursor);
        }
    }

    /// Collect up to `limit` entries strictly after `cursor_id`.
    async fn collect_after_cursor(
        &self,
        topic: &str,
        cursor_id: &str,
        limit: usize,
    ) -> Result<Vec<BusMessage>, BusError> {
        let mut conn = self.conn.clone();
        let mut messages = Vec::new();
        let mut next_id = cursor_id.to_string();
        while messages.len() < limit {
            let start = format!("({next_id}");
            let remaining = limit - messages.len();
            let reply: StreamRangeReply = conn
                .xrange_count(topic, &start, "+", remaining)
                .await
                .map_err(to_bus_error)?;
            if reply.ids.is_empty() {
                break;
            }
            for entry in &reply.ids {
                next_id = entry.id.clone();
                messages.push(self.to_bus_message(topic, entry));
                if messages.len() >= limit {
                    break;
                }
            }
        }
        Ok(messages)
    }

    async fn tail_messages(&self, topic: &str, limit: usize) -> Result<Vec<BusMessage>, BusError> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn
            .xrevrange_count(topic, "+", "-", limit)
            .await
            .map_err(to_bus_error)?;
        let mut entries = reply.ids;
        entries.reverse();
        Ok(entries.iter().map(|e| self.to_bus_message(topic, e)).collect())
    }

    async fn read_without_group(
        &self,
        topic: &str,
        last_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<BusMessage>, BusError> {
        let Some(last_id) = last_id else {
            return self.tail_messages(topic, limit).await;
        };

        // Fast path: a native entry id seeks directly.
        if Self::is_entry_id(last_id) {
            return self.collect_after_cursor(topic, last_id, limit).await;
        }

        // Otherwise scan for the uuid in the `id` field, then collect.
        let chunk_size = (limit * 2).max(100);
        match self.scan_for_uuid(topic, last_id, chunk_size).await? {
            Some(cursor_id) => self.collect_after_cursor(topic, &cursor_id, limit).await,
            None => Ok(Vec::new()),
        }
    }

    /// Resolve the XREAD start id for a blocking tail read. Unresolvable
    /// uuids tail from the current end (`$`).
    async fn blocking_start_id(
        &self,
        topic: &str,
        last_id: Option<&str>,
        limit: usize,
    ) -> Result<String, BusError> {
        match last_id {
            None => Ok("$".into()),
            Some(id) if Self::is_entry_id(id) => Ok(id.to_string()),
            Some(id) => {
                let resolved = self.scan_for_uuid(topic, id, (limit * 2).max(100)).await?;
                Ok(resolved.unwrap_or_else(|| "$".into()))
            }
        }
    }

    async fn read_blocking_without_group(
        &self,
        topic: &str,
        last_id: Option<&str>,
        limit: usize,
        block_ms: u64,
    ) -> Result<Vec<BusMessage>, BusError> {
        let start_id = self.blocking_start_id(topic, last_id, limit).await?;
        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default()
            .count(limit)
            .block(block_ms as usize);
        let reply: StreamReadReply = conn
            .xread_options(&[topic], &[start_id.as_str()], &options)
            .await
            .map_err(to_bus_error)?;
        Ok(self.flatten_read_reply(topic, reply))
    }

    async fn read_with_group(
        &self,
        topic: &str,
        limit: usize,
        block_ms: Option<u64>,
    ) -> Result<Vec<BusMessage>, BusError> {
        let group = self.group.as_deref().unwrap_or_default().to_string();
        self.ensure_group(topic, &group).await?;

        let mut options = StreamReadOptions::default()
            .group(&group, &self.consumer)
            .count(limit);
        if let Some(ms) = block_ms {
            options = options.block(ms as usize);
        }

        // Only entries never delivered to the group (`>`), not pending ones.
        let mut conn = self.conn.clone();
        let reply: StreamReadReply = match conn
            .xread_options::<_, _, StreamReadReply>(&[topic], &[">"], &options)
            .await
        {
            Ok(reply) => reply,
            // The group can vanish between creation and read (flush,
            // failover). Recreate once and retry.
            Err(err) if err.to_string().contains("NOGROUP") => {
                self.ensure_group(topic, &group).await?;
                conn.xread_options(&[topic], &[">"], &options)
                    .await
                    .map_err(to_bus_error)?
            }
            Err(err) => return Err(to_bus_error(err)),
        };

        let mut messages = Vec::new();
        for key in &reply.keys {
            for entry in &key.ids {
                messages.push(self.to_bus_message(topic, entry));
                // Acknowledge after conversion; at-least-once on failure.
                let ack: Result<i64, _> = conn.xack(topic, &group, &[&entry.id]).await;
                if let Err(err) = ack {
                    warn!(
                        event = "redis_xack_failed",
                        topic,
                        group = %group,
                        entry_id = %entry.id,
                        error = %err,
                        "redis xack failed"
                    );
                    metrics().increment("bus_ack_failures", &[("topic", topic)]);
                }
            }
        }
        Ok(messages)
    }

    /// Create the consumer group at offset 0 so pre-existing entries are
    /// delivered. Racing creators treat "already exists" as success.
    async fn ensure_group(&self, topic: &str, group: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let created: Result<(), redis::RedisError> =
            conn.xgroup_create_mkstream(topic, group, "0").await;
        match created {
            Ok(()) => Ok(()),
            Err(err) if is_busygroup(&err) => Ok(()),
            Err(err) => Err(to_bus_error(err)),
        }
    }

    fn flatten_read_reply(&self, topic: &str, reply: StreamReadReply) -> Vec<BusMessage> {
        reply
            .keys
            .iter()
            .flat_map(|key| key.ids.iter())
            .map(|entry| self.to_bus_message(topic, entry))
            .collect()
    }

    fn to_bus_message(&self, topic: &str, entry: &StreamId) -> BusMessage {
        let payload_raw = field_string(entry, "payload").unwrap_or_else(|| "{}".into());
        let payload: Map<String, Value> = match serde_json::from_str(&payload_raw) {
            Ok(Value::Object(map)) => map,
            _ => {
                warn!(
                    event = "bus_payload_invalid_json",
                    topic,
                    entry_id = %entry.id,
                    "invalid bus payload json"
                );
                metrics().increment("bus_payload_decode_errors", &[("topic", topic)]);
                Map::new()
            }
        };
        let id = field_string(entry, "id").unwrap_or_else(|| entry.id.clone());
        BusMessage {
            topic: topic.to_string(),
            payload,
            id,
        }
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<String, BusError> {
        let payload = serde_json::to_string(&Value::Object(message.payload.clone()))
            .map_err(|e| BusError::Transport(e.to_string()))?;
        let fields: [(&str, &str); 2] = [("id", message.id.as_str()), ("payload", &payload)];
        let mut conn = self.conn.clone();
        // The returned entry id is ignored; the canonical uuid is the bus id.
        let _entry_id: String = match self.stream_maxlen {
            Some(maxlen) => conn
                .xadd_maxlen(topic, StreamMaxlen::Approx(maxlen), "*", &fields)
                .await
                .map_err(to_bus_error)?,
            None => conn.xadd(topic, "*", &fields).await.map_err(to_bus_error)?,
        };
        Ok(message.id)
    }

    async fn read(
        &self,
        topic: &str,
        last_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<BusMessage>, BusError> {
        if self.group.is_some() {
            return self.read_with_group(topic, limit, None).await;
        }
        self.read_without_group(topic, last_id, limit).await
    }

    async fn read_blocking(
        &self,
        topic: &str,
        last_id: Option<&str>,
        limit: usize,
        block_ms: u64,
    ) -> Result<Vec<BusMessage>, BusError> {
        if self.group.is_some() {
            return self.read_with_group(topic, limit, Some(block_ms)).await;
        }
        self.read_blocking_without_group(topic, last_id, limit, block_ms)
            .await
    }

    fn supports_blocking(&self) -> bool {
        true
    }

    async fn read_blocking_one(
        &self,
        topic: &str,
        last_id: Option<&str>,
        block_ms: u64,
    ) -> Result<Option<BusMessage>, BusError> {
        let batch = self.read_blocking(topic, last_id, 1, block_ms).await?;
        Ok(batch.into_iter().next())
    }

    async fn read_any_blocking(
        &self,
        topics: &[String],
        cursors: &HashMap<String, Option<String>>,
        block_ms: u64,
    ) -> Result<Option<(String, BusMessage)>, BusError> {
        if topics.is_empty() {
            return Ok(None);
        }
        let mut start_ids = Vec::with_capacity(topics.len());
        for topic in topics {
            let cursor = cursors.get(topic).and_then(|c| c.as_deref());
            start_ids.push(self.blocking_start_id(topic, cursor, 1).await?);
        }

        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default().count(1).block(block_ms as usize);
        let keys: Vec<&str> = topics.iter().map(String::as_str).collect();
        let ids: Vec<&str> = start_ids.iter().map(String::as_str).collect();
        let reply: StreamReadReply = conn
            .xread_options(&keys, &ids, &options)
            .await
            .map_err(to_bus_error)?;

        // XREAD may report several streams at once; take the first in
        // argument order to keep the tie-break deterministic.
        for topic in topics {
            if let Some(key) = reply.keys.iter().find(|k| &k.key == topic) {
                if let Some(entry) = key.ids.first() {
                    return Ok(Some((topic.clone(), self.to_bus_message(topic, entry))));
                }
            }
        }
        Ok(None)
    }
}

fn to_bus_error(err: redis::RedisError) -> BusError {
    BusError::Transport(err.to_string())
}

/// BUSYGROUP means another creator won the race; that is success.
fn is_busygroup(err: &redis::RedisError) -> bool {
    err.code() == Some("BUSYGROUP") || err.to_string().contains("already exists")
}

fn field_string(entry: &StreamId, key: &str) -> Option<String> {
    entry
        .map
        .get(key)
        .and_then(|v| redis::from_redis_value::<String>(v).ok())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

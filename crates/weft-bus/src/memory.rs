// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::interface::{Bus, BusError, BusMessage};

/// In-memory bus backend.
///
/// First-class implementation of the bus contract for tests and local
/// development: append-order topics, uuid cursors, and blocking reads with
/// the same "only entries newer than the call" semantics the streams
/// backend gets from `$`. Topics are never trimmed.
#[derive(Default)]
pub struct MemoryBus {
    topics: Mutex<HashMap<String, Vec<BusMessage>>>,
    notify: Notify,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently stored on `topic`. Test helper.
    pub fn topic_len(&self, topic: &str) -> usize {
        self.lock().get(topic).map(Vec::len).unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<BusMessage>>> {
        match self.topics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Index of the first entry to deliver for `cursor`, or `None` when the
    /// cursor is a uuid that matches no entry.
    fn start_index(items: &[BusMessage], cursor: Option<&str>) -> Option<usize> {
        match cursor {
            None => None,
            Some(id) => items.iter().position(|m| m.id == id).map(|pos| pos + 1),
        }
    }

    /// Start index for blocking reads: unresolvable cursors (and absent
    /// ones) tail from the current end instead of returning everything.
    fn blocking_start_index(items: &[BusMessage], cursor: Option<&str>) -> usize {
        match cursor {
            Some(id) => items
                .iter()
                .position(|m| m.id == id)
                .map(|pos| pos + 1)
                .unwrap_or(items.len()),
            None => items.len(),
        }
    }

    fn collect_from(&self, topic: &str, start: usize, limit: usize) -> Vec<BusMessage> {
        let topics = self.lock();
        let Some(items) = topics.get(topic) else {
            return Vec::new();
        };
        items.iter().skip(start).take(limit).cloned().collect()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, topic: &str, mut message: BusMessage) -> Result<String, BusError> {
        message.topic = topic.to_string();
        let id = message.id.clone();
        self.lock().entry(topic.to_string()).or_default().push(message);
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn read(
        &self,
        topic: &str,
        last_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<BusMessage>, BusError> {
        let topics = self.lock();
        let Some(items) = topics.get(topic) else {
            return Ok(Vec::new());
        };
        let batch = match Self::start_index(items, last_id) {
            // No cursor: the most recent `limit` entries, append order.
            None if last_id.is_none() => {
                let skip = items.len().saturating_sub(limit);
                items.iter().skip(skip).cloned().collect()
            }
            // A uuid cursor that matches nothing yields an empty read.
            None => Vec::new(),
            Some(start) => items.iter().skip(start).take(limit).cloned().collect(),
        };
        Ok(batch)
    }

    async fn read_blocking(
        &self,
        topic: &str,
        last_id: Option<&str>,
        limit: usize,
        block_ms: u64,
    ) -> Result<Vec<BusMessage>, BusError> {
        let deadline = Instant::now() + Duration::from_millis(block_ms);
        let start = {
            let topics = self.lock();
            let items = topics.get(topic).map(Vec::as_slice).unwrap_or(&[]);
            Self::blocking_start_index(items, last_id)
        };

        loop {
            let notified = self.notify.notified();
            let batch = self.collect_from(topic, start, limit);
            if !batch.is_empty() {
                return Ok(batch);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
            }
        }
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
        let deadline = Instant::now() + Duration::from_millis(block_ms);
        let starts: Vec<(String, usize)> = {
            let guard = self.lock();
            topics
                .iter()
                .map(|topic| {
                    let items = guard.get(topic).map(Vec::as_slice).unwrap_or(&[]);
                    let cursor = cursors.get(topic).and_then(|c| c.as_deref());
                    (topic.clone(), Self::blocking_start_index(items, cursor))
                })
                .collect()
        };

        loop {
            let notified = self.notify.notified();
            for (topic, start) in &starts {
                if let Some(message) = self.collect_from(topic, *start, 1).into_iter().next() {
                    return Ok(Some((topic.clone(), message)));
                }
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Map, Value};

    use super::*;

    fn payload(n: i64) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("n".into(), json!(n));
        map
    }

    async fn publish_n(bus: &MemoryBus, topic: &str, count: i64) -> Vec<String> {
        let mut ids = Vec::new();
        for n in 0..count {
            let id = bus
                .publish(topic, BusMessage::new(topic, payload(n)))
                .await
                .unwrap();
            ids.push(id);
        }
        ids
    }

    #[tokio::test]
    async fn tail_read_returns_last_entries_in_order() {
        let bus = MemoryBus::new();
        publish_n(&bus, "t", 5).await;
        let tail = bus.read("t", None, 3).await.unwrap();
        let ns: Vec<_> = tail.iter().map(|m| m.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn read_after_cursor_is_strictly_after() {
        let bus = MemoryBus::new();
        let ids = publish_n(&bus, "t", 4).await;
        let after = bus.read("t", Some(&ids[1]), 10).await.unwrap();
        let ns: Vec<_> = after.iter().map(|m| m.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![2, 3]);
    }

    #[tokio::test]
    async fn unknown_cursor_yields_empty_read() {
        let bus = MemoryBus::new();
        publish_n(&bus, "t", 3).await;
        let got = bus.read("t", Some("not-a-real-id"), 10).await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn read_on_missing_topic_is_empty() {
        let bus = MemoryBus::new();
        assert!(bus.read("nope", None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blocking_read_times_out_within_window() {
        let bus = MemoryBus::new();
        let started = std::time::Instant::now();
        let got = bus.read_blocking("t", None, 10, 50).await.unwrap();
        assert!(got.is_empty());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(45), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "overslept: {elapsed:?}");
    }

    #[tokio::test]
    async fn blocking_read_sees_only_entries_after_the_call() {
        let bus = Arc::new(MemoryBus::new());
        publish_n(&bus, "t", 2).await;

        let reader = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.read_blocking("t", None, 10, 1000).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish("t", BusMessage::new("t", payload(99))).await.unwrap();

        let got = reader.await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].payload["n"], json!(99));
    }

    #[tokio::test]
    async fn blocking_read_resumes_after_known_cursor_immediately() {
        let bus = MemoryBus::new();
        let ids = publish_n(&bus, "t", 3).await;
        let got = bus.read_blocking("t", Some(&ids[0]), 10, 1000).await.unwrap();
        assert_eq!(got.len(), 2);
    }

    #[tokio::test]
    async fn read_any_blocking_prefers_argument_order() {
        let bus = MemoryBus::new();
        let a0 = publish_n(&bus, "a", 1).await.remove(0);
        let b0 = publish_n(&bus, "b", 1).await.remove(0);

        // Both topics have one entry pending past their cursors.
        bus.publish("b", BusMessage::new("b", payload(2))).await.unwrap();
        bus.publish("a", BusMessage::new("a", payload(1))).await.unwrap();

        let topics = vec!["a".to_string(), "b".to_string()];
        let cursors = HashMap::from([
            ("a".to_string(), Some(a0)),
            ("b".to_string(), Some(b0)),
        ]);
        let (topic, message) = bus
            .read_any_blocking(&topics, &cursors, 200)
            .await
            .unwrap()
            .expect("one message");
        // Both have fresh entries; "a" wins the tie by argument order.
        assert_eq!(topic, "a");
        assert_eq!(message.payload["n"], json!(1));
    }

    #[tokio::test]
    async fn read_any_blocking_wakes_on_new_publish() {
        let bus = Arc::new(MemoryBus::new());
        let topics = vec!["a".to_string(), "b".to_string()];
        let cursors =
            HashMap::from([("a".to_string(), None), ("b".to_string(), None)]);

        let reader = {
            let bus = Arc::clone(&bus);
            let topics = topics.clone();
            tokio::spawn(async move { bus.read_any_blocking(&topics, &cursors, 1000).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish("b", BusMessage::new("b", payload(7))).await.unwrap();

        let (topic, message) = reader.await.unwrap().unwrap().expect("one message");
        assert_eq!(topic, "b");
        assert_eq!(message.payload["n"], json!(7));
    }

    #[tokio::test]
    async fn read_any_blocking_times_out_to_none() {
        let bus = MemoryBus::new();
        let topics = vec!["a".to_string()];
        let cursors = HashMap::from([("a".to_string(), None)]);
        let got = bus.read_any_blocking(&topics, &cursors, 40).await.unwrap();
        assert!(got.is_none());
    }
}

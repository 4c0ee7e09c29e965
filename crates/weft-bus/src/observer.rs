// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Best-effort activity index over the shared Redis transport.
//!
//! Feeds the gateway's read-only observer endpoints: recently active
//! conversations, agents with run counts, and per-conversation participant
//! graphs. Every write and read is best-effort: an index failure must
//! never disturb the send/stream/run paths, so errors are swallowed after
//! a debug log. When built without a client (in-memory bus) the index is
//! inactive: writes no-op and reads return empty structures.

use std::collections::HashMap;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use tracing::debug;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Keep each agent's recent-conversation set roughly this large.
const RECENT_CONVERSATIONS_CAP: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub last_activity_ms: i64,
    pub participants_count: i64,
    pub msg_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub name: String,
    pub last_seen_ms: i64,
    pub active_runs: i64,
    pub recent_conversations: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub count: i64,
}

#[derive(Clone)]
pub struct ObserverIndex {
    client: Option<ConnectionManager>,
    ttl_secs: i64,
}

impl ObserverIndex {
    pub fn new(client: ConnectionManager, ttl_days: u64) -> Self {
        Self {
            client: Some(client),
            ttl_secs: (ttl_days.max(1) * 24 * 60 * 60) as i64,
        }
    }

    /// An index that records nothing and answers everything with empties.
    pub fn inactive() -> Self {
        Self {
            client: None,
            ttl_secs: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.client.is_some()
    }

    // ── Writes ────────────────────────────────────────────────────────────────

    pub async fn record_user_message(
        &self,
        conversation_id: &str,
        sender: &str,
        recipient: &str,
        ts_ms: Option<i64>,
    ) {
        let Some(mut c) = self.client.clone() else {
            return;
        };
        let ts = ts_ms.unwrap_or_else(now_ms);
        let hkey = format!("obs:conv:{conversation_id}:h");
        let pkey = format!("obs:conv:{conversation_id}:participants");
        let ekey = format!("obs:conv:{conversation_id}:edges");

        let result: redis::RedisResult<()> = async {
            let _: i64 = c.zadd("obs:conv:z", conversation_id, ts).await?;
            let _: () = c
                .hset_multiple(
                    &hkey,
                    &[
                        ("last_activity_ms", ts.to_string()),
                        ("last_sender", sender.to_string()),
                        ("last_recipient", recipient.to_string()),
                    ],
                )
                .await?;
            let _: i64 = c.hincr(&hkey, "msg_count", 1).await?;
            let _: i64 = c.sadd(&pkey, sender).await?;
            let _: i64 = c.sadd(&pkey, recipient).await?;
            let _: i64 = c.hincr(&ekey, format!("{sender}|{recipient}"), 1).await?;
            for key in [&hkey, &pkey, &ekey] {
                let _: bool = c.expire(key, self.ttl_secs).await?;
            }
            Ok(())
        }
        .await;
        if let Err(err) = result {
            debug!(error = %err, conversation = conversation_id, "observer index write failed");
        }
    }

    pub async fn record_run_started(&self, agent_name: &str, conversation_id: &str) {
        let Some(mut c) = self.client.clone() else {
            return;
        };
        let ts = now_ms();
        let hkey = format!("obs:agent:{agent_name}:h");
        let skey = format!("obs:agent:{agent_name}:convs");

        let result: redis::RedisResult<()> = async {
            let _: i64 = c.zadd("obs:agents:z", agent_name, ts).await?;
            let _: () = c
                .hset_multiple(
                    &hkey,
                    &[
                        ("last_seen_ms", ts.to_string()),
                        ("last_started_ms", ts.to_string()),
                    ],
                )
                .await?;
            let _: i64 = c.hincr(&hkey, "active_runs", 1).await?;
            let _: i64 = c.sadd(&skey, conversation_id).await?;
            let _: bool = c.expire(&hkey, self.ttl_secs).await?;
            let _: bool = c.expire(&skey, self.ttl_secs).await?;
            Ok(())
        }
        .await;
        if let Err(err) = result {
            debug!(error = %err, agent = agent_name, "observer index write failed");
        }
        self.cap_recent_set(&skey).await;
    }

    pub async fn record_run_completed(&self, agent_name: &str, conversation_id: &str) {
        let Some(mut c) = self.client.clone() else {
            return;
        };
        let ts = now_ms();
        let hkey = format!("obs:agent:{agent_name}:h");
        let skey = format!("obs:agent:{agent_name}:convs");

        let result: redis::RedisResult<()> = async {
            let _: i64 = c.zadd("obs:agents:z", agent_name, ts).await?;
            let _: () = c
                .hset_multiple(
                    &hkey,
                    &[
                        ("last_seen_ms", ts.to_string()),
                        ("last_completed_ms", ts.to_string()),
                    ],
                )
                .await?;
            // Decrement active_runs, clamped at zero.
            let active: Option<String> = c.hget(&hkey, "active_runs").await?;
            let active = active.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);
            let _: () = c
                .hset(&hkey, "active_runs", (active - 1).max(0).to_string())
                .await?;
            let _: i64 = c.sadd(&skey, conversation_id).await?;
            let _: bool = c.expire(&hkey, self.ttl_secs).await?;
            let _: bool = c.expire(&skey, self.ttl_secs).await?;
            Ok(())
        }
        .await;
        if let Err(err) = result {
            debug!(error = %err, agent = agent_name, "observer index write failed");
        }
        self.cap_recent_set(&skey).await;
    }

    /// Remove arbitrary members when the set outgrows its cap.
    async fn cap_recent_set(&self, key: &str) {
        let Some(mut c) = self.client.clone() else {
            return;
        };
        let result: redis::RedisResult<()> = async {
            let size: i64 = c.scard(key).await?;
            let excess = size - RECENT_CONVERSATIONS_CAP as i64;
            if excess > 0 {
                let members: Vec<String> = c.srandmember_multiple(key, excess as usize).await?;
                if !members.is_empty() {
                    let _: i64 = c.srem(key, members).await?;
                }
            }
            Ok(())
        }
        .await;
        if let Err(err) = result {
            debug!(error = %err, key, "observer index cap failed");
        }
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub async fn list_conversations(
        &self,
        limit: usize,
        since_ms: Option<i64>,
    ) -> Vec<ConversationSummary> {
        let Some(mut c) = self.client.clone() else {
            return Vec::new();
        };
        let result: redis::RedisResult<Vec<ConversationSummary>> = async {
            let ids: Vec<String> = match since_ms {
                Some(since) => {
                    c.zrevrangebyscore_limit("obs:conv:z", "+inf", since, 0, limit as isize)
                        .await?
                }
                None => c.zrevrange("obs:conv:z", 0, limit as isize - 1).await?,
            };
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                let fields: HashMap<String, String> =
                    c.hgetall(format!("obs:conv:{id}:h")).await?;
                let participants: i64 =
                    c.scard(format!("obs:conv:{id}:participants")).await?;
                out.push(ConversationSummary {
                    id,
                    last_activity_ms: parse_field(&fields, "last_activity_ms"),
                    participants_count: participants,
                    msg_count: parse_field(&fields, "msg_count"),
                });
            }
            Ok(out)
        }
        .await;
        result.unwrap_or_default()
    }

    pub async fn list_agents(&self, limit: usize) -> Vec<AgentSummary> {
        let Some(mut c) = self.client.clone() else {
            return Vec::new();
        };
        let result: redis::RedisResult<Vec<AgentSummary>> = async {
            let names: Vec<String> = c.zrevrange("obs:agents:z", 0, limit as isize - 1).await?;
            let mut out = Vec::with_capacity(names.len());
            for name in names {
                let fields: HashMap<String, String> =
                    c.hgetall(format!("obs:agent:{name}:h")).await?;
                let convs: Vec<String> = c.smembers(format!("obs:agent:{name}:convs")).await?;
                out.push(AgentSummary {
                    last_seen_ms: parse_field(&fields, "last_seen_ms"),
                    active_runs: parse_field(&fields, "active_runs"),
                    recent_conversations: convs
                        .into_iter()
                        .take(RECENT_CONVERSATIONS_CAP)
                        .collect(),
                    name,
                });
            }
            Ok(out)
        }
        .await;
        result.unwrap_or_default()
    }

    pub async fn graph(&self, conversation_id: &str) -> ConversationGraph {
        let Some(mut c) = self.client.clone() else {
            return ConversationGraph::default();
        };
        let result: redis::RedisResult<ConversationGraph> = async {
            let participants: Vec<String> = c
                .smembers(format!("obs:conv:{conversation_id}:participants"))
                .await?;
            let nodes = participants
                .into_iter()
                .map(|id| {
                    let kind = if id.starts_with("agent:") {
                        "agent"
                    } else if id.starts_with("user:") {
                        "user"
                    } else {
                        "other"
                    };
                    GraphNode {
                        id,
                        kind: kind.into(),
                    }
                })
                .collect();

            let raw_edges: HashMap<String, String> = c
                .hgetall(format!("obs:conv:{conversation_id}:edges"))
                .await?;
            let mut edges = Vec::with_capacity(raw_edges.len());
            for (pair, count) in raw_edges {
                if let Some((from, to)) = pair.split_once('|') {
                    edges.push(GraphEdge {
                        from: from.to_string(),
                        to: to.to_string(),
                        count: count.parse().unwrap_or(0),
                    });
                }
            }
            Ok(ConversationGraph { nodes, edges })
        }
        .await;
        result.unwrap_or_default()
    }
}

fn parse_field(fields: &HashMap<String, String>, key: &str) -> i64 {
    fields
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Parent-side orchestration: fan one task out to N child conversations
//! and rendezvous on their done signals.
//!
//! Each child gets a fresh `conv-child-<hex8>` conversation and an
//! envelope whose `metadata.orchestrate.done_topic` names the signal the
//! worker emits after the child's run completes. With `wait` set, the
//! call blocks on `wait_all` across the done topics until `timeout_ms`.

use serde::Serialize;
use serde_json::{json, Map, Value};

use weft_signals::WaitAllReply;

use crate::{chat, signals};

#[derive(Debug, Clone)]
pub struct SplitOptions {
    pub responsibilities: Vec<String>,
    pub allowed_paths: Vec<String>,
    /// Block on the children's done signals.
    pub wait: bool,
    /// Agent the subtasks are dispatched to; defaults to
    /// `ORCHESTRATE_TARGET_AGENT`, then `AGENT_NAME`, then `DevAgent`.
    pub target_agent: Option<String>,
    pub timeout_ms: u64,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            responsibilities: Vec::new(),
            allowed_paths: Vec::new(),
            wait: false,
            target_agent: None,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitReceipt {
    pub ok: bool,
    pub children: Vec<String>,
    pub topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait: Option<WaitAllReply>,
}

/// Split `task` across `num_children` child agents and return the child
/// conversation ids and done topics.
pub async fn split(
    task: &str,
    num_children: usize,
    options: SplitOptions,
) -> anyhow::Result<SplitReceipt> {
    let target = resolve_target_agent(options.target_agent.as_deref());
    let mut children = Vec::with_capacity(num_children);
    let mut topics = Vec::with_capacity(num_children);

    for _ in 0..num_children {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let conversation = format!("conv-child-{}", &suffix[..8]);
        let done_topic = format!("signal:{conversation}:done");

        let metadata = build_metadata(&done_topic, &options);
        chat::send_message(
            &format!("agent:{target}"),
            &format!("Subtask for: {task}"),
            Some(&conversation),
            Some(metadata),
        )
        .await?;

        children.push(conversation);
        topics.push(done_topic);
    }

    if options.wait && !topics.is_empty() {
        // Best-effort rendezvous on the children's done signals.
        let summary = signals::signal_wait_all(&topics, None, options.timeout_ms).await?;
        return Ok(SplitReceipt {
            ok: true,
            children,
            topics,
            wait: Some(summary),
        });
    }

    Ok(SplitReceipt {
        ok: true,
        children,
        topics,
        wait: None,
    })
}

fn resolve_target_agent(explicit: Option<&str>) -> String {
    if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    for var in ["ORCHESTRATE_TARGET_AGENT", "AGENT_NAME"] {
        if let Ok(name) = std::env::var(var) {
            let name = name.trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }
    "DevAgent".into()
}

fn build_metadata(done_topic: &str, options: &SplitOptions) -> Map<String, Value> {
    json!({
        "orchestrate": {
            "responsibilities": options.responsibilities,
            "allowed_paths": options.allowed_paths,
            "done_topic": done_topic,
        }
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Logged fronts over the signal hub, shaped for exposure as agent
//! function tools. Each wrapper records a `tool_call` line and counters;
//! failures log a clipped `tool_error` before surfacing.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{error, info};

use weft_observe::{current_run_context, metrics};
use weft_signals::{SendReceipt, WaitAllReply, WaitReply};

use crate::{clip, require_hub};

fn context_labels() -> (String, String) {
    match current_run_context() {
        Some(ctx) => (ctx.conversation_id, ctx.run_id),
        None => (String::new(), String::new()),
    }
}

fn log_call(tool: &str, topic_hint: &str) {
    let (conversation, run) = context_labels();
    info!(event = "tool_call", tool, topic = topic_hint, "tool call");
    metrics().increment(
        "tool_calls",
        &[("tool", "signals"), ("conversation_id", &conversation), ("run_id", &run)],
    );
}

fn log_error(tool: &str, err: &anyhow::Error) {
    let (conversation, run) = context_labels();
    error!(event = "tool_error", tool, error = %clip(&err.to_string(), 200), "tool error");
    metrics().increment(
        "tool_errors",
        &[("tool", "signals"), ("conversation_id", &conversation), ("run_id", &run)],
    );
}

pub async fn signal_send(
    topic: &str,
    payload: Option<Map<String, Value>>,
) -> anyhow::Result<SendReceipt> {
    log_call("signals.send", topic);
    let hub = require_hub()?;
    match hub.send(topic, payload.unwrap_or_default()).await {
        Ok(receipt) => {
            info!(event = "tool_success", tool = "signals.send", topic, "tool success");
            Ok(receipt)
        }
        Err(err) => {
            let err = anyhow::Error::from(err);
            log_error("signals.send", &err);
            Err(err)
        }
    }
}

pub async fn signal_wait(
    topic: &str,
    last_id: Option<&str>,
    timeout_ms: u64,
) -> anyhow::Result<WaitReply> {
    log_call("signals.wait", topic);
    let hub = require_hub()?;
    match hub.wait(topic, last_id, timeout_ms).await {
        Ok(reply) => {
            info!(event = "tool_success", tool = "signals.wait", topic, "tool success");
            Ok(reply)
        }
        Err(err) => {
            let err = anyhow::Error::from(err);
            log_error("signals.wait", &err);
            Err(err)
        }
    }
}

pub async fn signal_wait_any(
    topics: &[String],
    last_ids: Option<&HashMap<String, String>>,
    timeout_ms: u64,
) -> anyhow::Result<WaitReply> {
    let hub = require_hub()?;
    Ok(hub.wait_any(topics, last_ids, timeout_ms).await?)
}

pub async fn signal_wait_all(
    topics: &[String],
    last_ids: Option<&HashMap<String, String>>,
    timeout_ms: u64,
) -> anyhow::Result<WaitAllReply> {
    let hub = require_hub()?;
    Ok(hub.wait_all(topics, last_ids, timeout_ms).await?)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

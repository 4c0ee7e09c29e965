// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info};

use weft_bus::routing;
use weft_model::Envelope;
use weft_observe::{current_run_context, metrics};

use crate::{clip, require_hub};

#[derive(Debug, Clone, Serialize)]
pub struct SendMessageReceipt {
    pub ok: bool,
    pub envelope_id: String,
    pub published_to: Vec<String>,
}

/// Send a chat message to another agent or conversation.
///
/// `recipient` must be `chat:<conversation_id>` or `agent:<Name>`. The
/// conversation id resolves from the recipient itself (chat form), then
/// the explicit argument, the bound run context, and
/// `CHAT_TOOL_CONVERSATION_ID`. The sender is `agent:<AGENT_NAME>` when
/// configured.
pub async fn send_message(
    recipient: &str,
    content: &str,
    conversation_id: Option<&str>,
    metadata: Option<Map<String, Value>>,
) -> anyhow::Result<SendMessageReceipt> {
    let recipient = recipient.trim();
    if recipient.is_empty() || !(recipient.starts_with("chat:") || recipient.starts_with("agent:"))
    {
        anyhow::bail!("recipient must be 'chat:<conversation_id>' or 'agent:<Name>'");
    }
    let content = content.trim();
    if content.is_empty() {
        anyhow::bail!("content must be non-empty");
    }

    let conversation = resolve_conversation_id(recipient, conversation_id)?;
    let sender = resolve_sender();
    let envelope = Envelope::message(&conversation, sender, recipient, content)
        .with_metadata(metadata.unwrap_or_default());

    let hub = require_hub()?;
    info!(
        event = "tool_call",
        tool = "chat.send",
        recipient,
        conversation = %conversation,
        "tool call"
    );
    metrics().increment("tool_calls", &[("tool", "chat"), ("conversation_id", &conversation)]);

    match routing::publish_to_topics(
        hub.bus().as_ref(),
        recipient,
        &conversation,
        &envelope.id,
        &envelope.to_payload(),
    )
    .await
    {
        Ok(published_to) => Ok(SendMessageReceipt {
            ok: true,
            envelope_id: envelope.id,
            published_to,
        }),
        Err(err) => {
            error!(
                event = "tool_error",
                tool = "chat.send",
                error = %clip(&err.to_string(), 200),
                "tool error"
            );
            metrics().increment(
                "tool_errors",
                &[("tool", "chat"), ("conversation_id", &conversation)],
            );
            Err(err.into())
        }
    }
}

fn resolve_conversation_id(
    recipient: &str,
    explicit: Option<&str>,
) -> anyhow::Result<String> {
    if let Some(id) = recipient.strip_prefix("chat:") {
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }
    // Agent recipients: explicit argument, then bound context, then env.
    if let Some(id) = explicit.map(str::trim).filter(|id| !id.is_empty()) {
        return Ok(id.to_string());
    }
    if let Some(ctx) = current_run_context() {
        let id = ctx.conversation_id.trim().to_string();
        if !id.is_empty() {
            return Ok(id);
        }
    }
    if let Ok(id) = std::env::var("CHAT_TOOL_CONVERSATION_ID") {
        let id = id.trim().to_string();
        if !id.is_empty() {
            return Ok(id);
        }
    }
    anyhow::bail!("conversation_id not available for agent recipient")
}

fn resolve_sender() -> String {
    match std::env::var("AGENT_NAME") {
        Ok(name) if !name.trim().is_empty() => format!("agent:{}", name.trim()),
        _ => "agent:unknown".into(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Bounded bridge between an asynchronous SDK reader and the worker's
//! stream consumer.
//!
//! The reader task pushes mapped events into a bounded channel. Token
//! frames are droppable under backpressure (`try_send`); structural frames
//! (tool steps, outputs, errors) wait for capacity. Whatever gets dropped,
//! the bridge guarantees exactly one final `output` event: an explicit SDK
//! final is forwarded as-is, otherwise one is synthesized from the
//! accumulated deltas.

use futures::StreamExt;
use serde_json::{Map, Value};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use weft_model::{EventMeta, StreamEvent, ToolStatus};
use weft_observe::metrics;

use crate::{clip, EventStream, RunnerItem};

/// Events produced by a streaming SDK, already freed of wire-format noise.
#[derive(Debug, Clone)]
pub(crate) enum SdkEvent {
    TextDelta(String),
    ToolCall {
        id: String,
        name: String,
        arguments: Map<String, Value>,
    },
    ToolResult {
        name: String,
        summary: String,
    },
    Output {
        text: String,
        usage: Option<Map<String, Value>>,
    },
    Usage(Map<String, Value>),
    Done,
}

pub(crate) type SdkStream = Pin<Box<dyn futures::Stream<Item = anyhow::Result<SdkEvent>> + Send>>;

/// Spawn the reader task and return the consumer-side stream.
pub(crate) fn bridge(conversation_id: String, sdk: SdkStream, capacity: usize) -> EventStream {
    let (tx, rx) = mpsc::channel::<anyhow::Result<RunnerItem>>(capacity.max(1));

    tokio::spawn(async move {
        let mut sdk = sdk;
        let mut token_index: u64 = 0;
        let mut accumulated = String::new();
        let mut usage: Option<Map<String, Value>> = None;
        let mut saw_output = false;
        let mut dropped: u64 = 0;

        while let Some(item) = sdk.next().await {
            match item {
                Ok(SdkEvent::TextDelta(text)) => {
                    if text.is_empty() {
                        continue;
                    }
                    accumulated.push_str(&text);
                    let event = StreamEvent::token(&conversation_id, text, token_index);
                    token_index += 1;
                    // Droppable: the synthesized output still carries the
                    // full text.
                    if tx.try_send(Ok(RunnerItem::Event(event))).is_err() {
                        dropped += 1;
                    }
                }
                Ok(SdkEvent::ToolCall { id, name, arguments }) => {
                    let event = StreamEvent::ToolStep {
                        meta: EventMeta::new(&conversation_id),
                        name,
                        args: arguments,
                        result_summary: None,
                        status: Some(ToolStatus::Start),
                        tool_call_id: Some(id),
                        duration_ms: None,
                        error: None,
                    };
                    if tx.send(Ok(RunnerItem::Event(event))).await.is_err() {
                        return;
                    }
                }
                Ok(SdkEvent::ToolResult { name, summary }) => {
                    let event = StreamEvent::ToolStep {
                        meta: EventMeta::new(&conversation_id),
                        name,
                        args: Map::new(),
                        result_summary: Some(clip(&summary, 200)),
                        status: Some(ToolStatus::Success),
                        tool_call_id: None,
                        duration_ms: None,
                        error: None,
                    };
                    if tx.send(Ok(RunnerItem::Event(event))).await.is_err() {
                        return;
                    }
                }
                Ok(SdkEvent::Output { text, usage: explicit }) => {
                    saw_output = true;
                    let event = StreamEvent::Output {
                        meta: EventMeta::new(&conversation_id),
                        text,
                        usage: explicit.or_else(|| usage.take()),
                    };
                    if tx.send(Ok(RunnerItem::Event(event))).await.is_err() {
                        return;
                    }
                }
                Ok(SdkEvent::Usage(map)) => {
                    usage = Some(map);
                }
                Ok(SdkEvent::Done) => break,
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
        }

        if !saw_output {
            let event = StreamEvent::Output {
                meta: EventMeta::new(&conversation_id),
                text: accumulated,
                usage,
            };
            let _ = tx.send(Ok(RunnerItem::Event(event))).await;
        }
        if dropped > 0 {
            metrics().increment_by("runner_tokens_dropped", &[], dropped);
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

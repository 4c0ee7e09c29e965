// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Streaming chat-completions adapter.
//!
//! Bridges an OpenAI-compatible streaming endpoint to the worker's runner
//! protocol: text deltas become `token` events, tool-call deltas become
//! `tool_step` events, and the run always ends in exactly one `output`
//! (synthesized from the accumulated deltas when the endpoint sends none).
//!
//! Per-conversation history lives in a capacity-bounded LRU; evicting a
//! conversation simply means its next run starts from a fresh context.
//! SSE events can be split across TCP packets, so a line buffer is kept
//! across chunks and only complete lines are parsed.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use lru::LruCache;
use serde_json::{json, Value};
use tracing::debug;

use weft_config::RunnerConfig;
use weft_model::Envelope;

use crate::bridge::{bridge, SdkEvent, SdkStream};
use crate::{EventStream, Runner};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

type Sessions = Arc<Mutex<LruCache<String, Vec<Value>>>>;

pub struct OpenAiRunner {
    client: reqwest::Client,
    chat_url: String,
    api_key: Option<String>,
    model: String,
    instructions: String,
    sessions: Sessions,
    bridge_capacity: usize,
}

impl OpenAiRunner {
    pub fn from_config(config: &RunnerConfig) -> Self {
        let base = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.into());
        let capacity = NonZeroUsize::new(config.session_limit.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            client: reqwest::Client::new(),
            chat_url: format!("{}/chat/completions", base.trim_end_matches('/')),
            api_key: config.resolve_api_key(),
            model: config.model.clone(),
            instructions: config.resolve_instructions(),
            sessions: Arc::new(Mutex::new(LruCache::new(capacity))),
            bridge_capacity: config.bridge_capacity.max(1),
        }
    }

    /// Append the user turn to the conversation's session and return the
    /// full message list for the request, system prompt first.
    fn record_user_turn(&self, conversation_id: &str, content: &str) -> Vec<Value> {
        let mut sessions = lock(&self.sessions);
        let history = sessions.get_or_insert_mut(conversation_id.to_string(), Vec::new);
        history.push(json!({ "role": "user", "content": content }));

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(json!({ "role": "system", "content": self.instructions }));
        messages.extend(history.iter().cloned());
        messages
    }

    fn record_assistant_turn(sessions: &Sessions, conversation_id: &str, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut sessions = lock(sessions);
        if let Some(history) = sessions.get_mut(conversation_id) {
            history.push(json!({ "role": "assistant", "content": text }));
        }
    }

    #[cfg(test)]
    fn session_len(&self, conversation_id: &str) -> Option<usize> {
        lock(&self.sessions).peek(conversation_id).map(Vec::len)
    }
}

fn lock(sessions: &Sessions) -> std::sync::MutexGuard<'_, LruCache<String, Vec<Value>>> {
    match sessions.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl Runner for OpenAiRunner {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream_run(&self, envelope: &Envelope) -> anyhow::Result<EventStream> {
        let conversation_id = envelope.conversation_id.clone();
        let content = envelope.content.clone().unwrap_or_default();
        let messages = self.record_user_turn(&conversation_id, &content);

        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        debug!(
            model = %self.model,
            conversation = %conversation_id,
            message_count = messages.len(),
            "sending completion request"
        );

        let mut request = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.context("chat completions request failed")?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("chat completions error {status}: {text}");
        }

        // SSE events can be split across TCP packets; keep a line buffer
        // across chunks and emit only complete lines.
        let byte_stream = response.bytes_stream();
        let sdk_events = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<anyhow::Result<SdkEvent>> = match chunk {
                    Ok(bytes) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        drain_complete_sse_lines(buf)
                    }
                    Err(err) => vec![Err(anyhow::anyhow!(err))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        // Accumulate the assistant's text into the session once the stream
        // finishes, so the next turn carries the full exchange.
        let sessions = Arc::clone(&self.sessions);
        let session_conversation = conversation_id.clone();
        let tracked = async_stream::stream! {
            let mut assistant_text = String::new();
            let mut inner = std::pin::pin!(sdk_events);
            while let Some(item) = inner.next().await {
                if let Ok(SdkEvent::TextDelta(text)) = &item {
                    assistant_text.push_str(text);
                }
                let done = matches!(&item, Ok(SdkEvent::Done));
                yield item;
                if done {
                    break;
                }
            }
            OpenAiRunner::record_assistant_turn(&sessions, &session_conversation, &assistant_text);
        };

        let sdk: SdkStream = Box::pin(tracked);
        Ok(bridge(conversation_id, sdk, self.bridge_capacity))
    }
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line is left in `buf` so the next TCP chunk can
/// extend it.
fn drain_complete_sse_lines(buf: &mut String) -> Vec<anyhow::Result<SdkEvent>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(event) = parse_sse_data_line(&line) {
            events.push(Ok(event));
        }
    }
    events
}

/// Parse a single complete SSE `data:` line. Returns `None` for empty
/// lines, comments, and unparseable data; malformed frames are skipped
/// without killing the stream.
fn parse_sse_data_line(line: &str) -> Option<SdkEvent> {
    let data = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SdkEvent::Done);
    }
    let value: Value = serde_json::from_str(data).ok()?;
    parse_sse_chunk(&value)
}

fn parse_sse_chunk(value: &Value) -> Option<SdkEvent> {
    // Usage-only chunk (stream_options.include_usage).
    if let Some(usage) = value.get("usage").filter(|u| u.is_object()) {
        return Some(SdkEvent::Usage(usage.as_object().cloned().unwrap_or_default()));
    }

    let delta = &value["choices"][0]["delta"];

    // Tool-call delta: emit when the function name arrives (first frame of
    // a call); argument continuation frames carry no name and are skipped.
    if let Some(tool_call) = delta.get("tool_calls").and_then(|tc| tc.get(0)) {
        let name = tool_call["function"]["name"].as_str().unwrap_or_default();
        if !name.is_empty() {
            let id = tool_call["id"].as_str().unwrap_or_default().to_string();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default();
            return Some(SdkEvent::ToolCall {
                id,
                name: name.to_string(),
                arguments,
            });
        }
        return None;
    }

    if let Some(text) = delta.get("content").and_then(Value::as_str) {
        return Some(SdkEvent::TextDelta(text.to_string()));
    }
    None
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn runner_with_limit(limit: usize) -> OpenAiRunner {
        OpenAiRunner::from_config(&RunnerConfig {
            api_key: Some("sk-test".into()),
            session_limit: limit,
            ..RunnerConfig::default()
        })
    }

    // ── Sessions ──────────────────────────────────────────────────────────────

    #[test]
    fn first_turn_has_system_then_user() {
        let runner = runner_with_limit(4);
        let messages = runner.record_user_turn("c1", "hello");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "hello");
    }

    #[test]
    fn history_accumulates_across_turns() {
        let runner = runner_with_limit(4);
        runner.record_user_turn("c1", "first");
        OpenAiRunner::record_assistant_turn(&runner.sessions, "c1", "reply");
        let messages = runner.record_user_turn("c1", "second");
        // system + user + assistant + user
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["content"], "second");
    }

    #[test]
    fn sessions_are_evicted_least_recently_used() {
        let runner = runner_with_limit(2);
        runner.record_user_turn("c1", "a");
        runner.record_user_turn("c2", "b");
        runner.record_user_turn("c3", "c");
        assert!(runner.session_len("c1").is_none(), "oldest session evicted");
        assert!(runner.session_len("c2").is_some());
        assert!(runner.session_len("c3").is_some());
    }

    #[test]
    fn assistant_turn_for_evicted_session_is_dropped() {
        let runner = runner_with_limit(1);
        runner.record_user_turn("c1", "a");
        runner.record_user_turn("c2", "b");
        OpenAiRunner::record_assistant_turn(&runner.sessions, "c1", "late reply");
        assert!(runner.session_len("c1").is_none());
    }

    // ── SSE parsing ───────────────────────────────────────────────────────────

    #[test]
    fn parse_text_delta() {
        let v: Value =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap();
        match parse_sse_chunk(&v) {
            Some(SdkEvent::TextDelta(t)) => assert_eq!(t, "Hi"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parse_tool_call_start() {
        let v: Value = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"id":"call_1",
                "function":{"name":"search","arguments":"{\"q\":\"x\"}"}}]}}]}"#,
        )
        .unwrap();
        match parse_sse_chunk(&v) {
            Some(SdkEvent::ToolCall { id, name, arguments }) => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "search");
                assert_eq!(arguments["q"], "x");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parse_tool_call_argument_continuation_is_skipped() {
        let v: Value = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"function":{"arguments":"\"}"}}]}}]}"#,
        )
        .unwrap();
        assert!(parse_sse_chunk(&v).is_none());
    }

    #[test]
    fn parse_usage_chunk() {
        let v: Value =
            serde_json::from_str(r#"{"choices":[],"usage":{"prompt_tokens":7}}"#).unwrap();
        match parse_sse_chunk(&v) {
            Some(SdkEvent::Usage(u)) => assert_eq!(u["prompt_tokens"], 7),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn done_sentinel_ends_the_stream() {
        assert!(matches!(
            parse_sse_data_line("data: [DONE]"),
            Some(SdkEvent::Done)
        ));
    }

    #[test]
    fn comment_and_blank_lines_are_skipped() {
        assert!(parse_sse_data_line("").is_none());
        assert!(parse_sse_data_line(": keep-alive").is_none());
        assert!(parse_sse_data_line("data:").is_none());
    }

    #[test]
    fn malformed_json_is_skipped_without_error() {
        assert!(parse_sse_data_line("data: {not json").is_none());
    }

    #[test]
    fn split_lines_are_buffered_across_chunks() {
        let mut buf = String::new();
        buf.push_str("data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\ndata: {\"choi");
        let first = drain_complete_sse_lines(&mut buf);
        assert_eq!(first.len(), 1);
        assert_eq!(buf, "data: {\"choi");

        buf.push_str("ces\":[{\"delta\":{\"content\":\"llo\"}}]}\n");
        let second = drain_complete_sse_lines(&mut buf);
        assert_eq!(second.len(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn crlf_lines_are_tolerated() {
        let mut buf = "data: [DONE]\r\n".to_string();
        let events = drain_complete_sse_lines(&mut buf);
        assert_eq!(events.len(), 1);
    }
}

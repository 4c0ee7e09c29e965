use async_trait::async_trait;
use futures::stream;
use serde_json::{json, Map};

use weft_model::{Envelope, EventMeta, StreamEvent, ToolStatus};

use crate::{clip, EventStream, Runner, RunnerItem};

/// Minimal runner: one token, then the envelope content echoed back.
pub struct EchoRunner;

#[async_trait]
impl Runner for EchoRunner {
    fn name(&self) -> &str {
        "echo"
    }

    async fn stream_run(&self, envelope: &Envelope) -> anyhow::Result<EventStream> {
        let conversation = envelope.conversation_id.clone();
        let content = envelope.content.clone().unwrap_or_default();
        let events = vec![
            Ok(RunnerItem::Event(StreamEvent::token(&conversation, "echo", 0))),
            Ok(RunnerItem::Event(StreamEvent::output(&conversation, content))),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// Deterministic runner for local demos without external API calls.
///
/// Protocol: content starting with `run:` is treated as a command request
/// and answered with a simulated tool step (start then success) followed
/// by a final output. Commands are never executed; the sandbox lives
/// outside this crate. The event shapes match a real tool loop.
/// Anything else is echoed as the output.
pub struct DemoRunner;

#[async_trait]
impl Runner for DemoRunner {
    fn name(&self) -> &str {
        "demo"
    }

    async fn stream_run(&self, envelope: &Envelope) -> anyhow::Result<EventStream> {
        let conversation = envelope.conversation_id.clone();
        let text = envelope.content.clone().unwrap_or_default().trim().to_string();

        let Some(command) = text
            .strip_prefix("run:")
            .or_else(|| text.strip_prefix("RUN:"))
            .map(str::trim)
            .filter(|c| !c.is_empty())
        else {
            let events = vec![Ok(RunnerItem::Event(StreamEvent::output(&conversation, text)))];
            return Ok(Box::pin(stream::iter(events)));
        };

        let tool_call_id = format!("tc_{}", uuid::Uuid::new_v4().simple());
        let result = format!("[dry-run] {command}");
        let mut args = Map::new();
        args.insert("command".into(), json!(command));

        let events = vec![
            Ok(RunnerItem::Event(StreamEvent::ToolStep {
                meta: EventMeta::new(&conversation),
                name: "terminal.run".into(),
                args,
                result_summary: None,
                status: Some(ToolStatus::Start),
                tool_call_id: Some(tool_call_id.clone()),
                duration_ms: None,
                error: None,
            })),
            Ok(RunnerItem::Event(StreamEvent::ToolStep {
                meta: EventMeta::new(&conversation),
                name: "terminal.run".into(),
                args: Map::new(),
                result_summary: Some(clip(&result, 200)),
                status: Some(ToolStatus::Success),
                tool_call_id: Some(tool_call_id),
                duration_ms: Some(0),
                error: None,
            })),
            Ok(RunnerItem::Event(StreamEvent::output(&conversation, result))),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Fields shared by every typed stream event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMeta {
    #[serde(default = "new_id")]
    pub id: String,
    pub conversation_id: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            conversation_id: conversation_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Tool-step lifecycle marker carried on [`StreamEvent::ToolStep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Start,
    Success,
    Error,
}

/// A single event streamed during an agent run, carried on
/// `stream:<conversation_id>`.
///
/// The set is closed but forward-compatible: payloads whose `event`
/// discriminator is unknown deserialize into [`StreamEvent::Other`] and
/// re-serialize byte-for-byte, so relays never drop kinds they do not
/// understand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// An incremental text chunk. `index` is monotonically non-decreasing
    /// within one run.
    Token {
        #[serde(flatten)]
        meta: EventMeta,
        text: String,
        index: u64,
    },
    /// A tool invocation or its completion.
    ToolStep {
        #[serde(flatten)]
        meta: EventMeta,
        name: String,
        #[serde(default)]
        args: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_summary: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<ToolStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The run's final answer. At most one per run is considered final.
    Output {
        #[serde(flatten)]
        meta: EventMeta,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Map<String, Value>>,
    },
    /// Synthesized by the gateway so subscribers can render inbound user
    /// messages in-stream.
    UserMessage {
        #[serde(flatten)]
        meta: EventMeta,
        sender: String,
        text: String,
    },
    /// Diagnostic line surfaced to stream subscribers.
    Log {
        #[serde(flatten)]
        meta: EventMeta,
        message: String,
    },
    /// Mirror of a signal publish issued within this conversation.
    SignalSend {
        #[serde(flatten)]
        meta: EventMeta,
        topic: String,
        message_id: String,
        payload_len: u64,
    },
    /// Mirror of a signal received by a wait within this conversation.
    SignalRecv {
        #[serde(flatten)]
        meta: EventMeta,
        topic: String,
        message_id: String,
        payload_len: u64,
    },
    /// Any event kind this version does not know about; relayed unchanged.
    #[serde(untagged)]
    Other(Map<String, Value>),
}

impl StreamEvent {
    pub fn token(conversation_id: impl Into<String>, text: impl Into<String>, index: u64) -> Self {
        Self::Token {
            meta: EventMeta::new(conversation_id),
            text: text.into(),
            index,
        }
    }

    pub fn output(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Output {
            meta: EventMeta::new(conversation_id),
            text: text.into(),
            usage: None,
        }
    }

    pub fn user_message(
        conversation_id: impl Into<String>,
        sender: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::UserMessage {
            meta: EventMeta::new(conversation_id),
            sender: sender.into(),
            text: text.into(),
        }
    }

    /// The `event` discriminator, or the embedded one for unknown kinds.
    pub fn kind(&self) -> &str {
        match self {
            Self::Token { .. } => "token",
            Self::ToolStep { .. } => "tool_step",
            Self::Output { .. } => "output",
            Self::UserMessage { .. } => "user_message",
            Self::Log { .. } => "log",
            Self::SignalSend { .. } => "signal_send",
            Self::SignalRecv { .. } => "signal_recv",
            Self::Other(map) => map
                .get("event")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
        }
    }

    /// Serialize to the JSON object shape carried as a bus payload.
    pub fn to_payload(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        serde_json::from_value(Value::Object(payload.clone()))
            .unwrap_or_else(|_| Self::Other(payload.clone()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_serializes_with_event_tag_and_meta() {
        let ev = StreamEvent::token("c1", "he", 0);
        let payload = ev.to_payload();
        assert_eq!(payload.get("event"), Some(&json!("token")));
        assert_eq!(payload.get("text"), Some(&json!("he")));
        assert_eq!(payload.get("index"), Some(&json!(0)));
        assert_eq!(payload.get("conversation_id"), Some(&json!("c1")));
        assert!(payload.contains_key("id"));
        assert!(payload.contains_key("created_at"));
    }

    #[test]
    fn tool_step_omits_absent_optionals() {
        let ev = StreamEvent::ToolStep {
            meta: EventMeta::new("c1"),
            name: "terminal.run".into(),
            args: Map::new(),
            result_summary: None,
            status: Some(ToolStatus::Start),
            tool_call_id: Some("tc_1".into()),
            duration_ms: None,
            error: None,
        };
        let payload = ev.to_payload();
        assert_eq!(payload.get("status"), Some(&json!("start")));
        assert!(!payload.contains_key("result_summary"));
        assert!(!payload.contains_key("duration_ms"));
        assert!(!payload.contains_key("error"));
    }

    #[test]
    fn known_kind_round_trips() {
        let ev = StreamEvent::output("c1", "done");
        let back = StreamEvent::from_payload(&ev.to_payload());
        match back {
            StreamEvent::Output { meta, text, .. } => {
                assert_eq!(meta.conversation_id, "c1");
                assert_eq!(text, "done");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_preserved_as_other() {
        let payload = json!({
            "event": "reasoning_trace",
            "conversation_id": "c1",
            "depth": 3,
        })
        .as_object()
        .cloned()
        .unwrap();
        let ev = StreamEvent::from_payload(&payload);
        assert!(matches!(ev, StreamEvent::Other(_)));
        assert_eq!(ev.kind(), "reasoning_trace");
        // Re-serialization carries the payload through unchanged.
        assert_eq!(ev.to_payload(), payload);
    }

    #[test]
    fn missing_meta_fields_fall_back_to_other() {
        // A token without a conversation_id cannot be a typed event.
        let payload = json!({ "event": "token", "text": "x", "index": 1 })
            .as_object()
            .cloned()
            .unwrap();
        let ev = StreamEvent::from_payload(&payload);
        assert!(matches!(ev, StreamEvent::Other(_)));
    }

    #[test]
    fn kind_names_match_wire_tags() {
        assert_eq!(StreamEvent::token("c", "t", 0).kind(), "token");
        assert_eq!(StreamEvent::output("c", "t").kind(), "output");
        assert_eq!(StreamEvent::user_message("c", "user:a", "t").kind(), "user_message");
    }

    #[test]
    fn signal_events_carry_topic_and_length() {
        let ev = StreamEvent::SignalSend {
            meta: EventMeta::new("c1"),
            topic: "signal:x".into(),
            message_id: "m1".into(),
            payload_len: 12,
        };
        let payload = ev.to_payload();
        assert_eq!(payload.get("event"), Some(&json!("signal_send")));
        assert_eq!(payload.get("payload_len"), Some(&json!(12)));
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Topic fan-out for chat messages.
//!
//! Every send lands on the conversation topic; sends addressed to an agent
//! additionally land on that agent's inbox so its worker picks them up.

use crate::interface::{Bus, BusError, BusMessage};

/// Topics a chat message must be published to.
///
/// Always includes `chat:<conversation_id>`. A recipient of the form
/// `agent:<name>` with a non-empty name adds `chat:<name>`.
pub fn publish_topics(recipient: &str, conversation_id: &str) -> Vec<String> {
    let mut topics = vec![format!("chat:{conversation_id}")];
    let recipient = recipient.trim();
    if let Some(name) = recipient.strip_prefix("agent:") {
        if !name.is_empty() {
            topics.push(format!("chat:{name}"));
        }
    }
    topics
}

/// Publish one payload to every topic the recipient routes to, in the
/// deterministic order of [`publish_topics`]. Any failed publication fails
/// the whole send.
pub async fn publish_to_topics(
    bus: &dyn Bus,
    recipient: &str,
    conversation_id: &str,
    message_id: &str,
    payload: &serde_json::Map<String, serde_json::Value>,
) -> Result<Vec<String>, BusError> {
    let topics = publish_topics(recipient, conversation_id);
    for topic in &topics {
        bus.publish(
            topic,
            BusMessage::new(topic.clone(), payload.clone()).with_id(message_id),
        )
        .await?;
    }
    Ok(topics)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::*;
    use crate::MemoryBus;

    #[test]
    fn chat_recipient_routes_to_conversation_only() {
        assert_eq!(publish_topics("chat:c1", "c1"), vec!["chat:c1"]);
    }

    #[test]
    fn agent_recipient_adds_agent_inbox() {
        assert_eq!(
            publish_topics("agent:dev", "c1"),
            vec!["chat:c1", "chat:dev"]
        );
    }

    #[test]
    fn empty_agent_name_is_not_routed() {
        assert_eq!(publish_topics("agent:", "c1"), vec!["chat:c1"]);
    }

    #[test]
    fn whitespace_recipient_is_tolerated() {
        assert_eq!(
            publish_topics("  agent:dev  ", "c1"),
            vec!["chat:c1", "chat:dev"]
        );
    }

    #[test]
    fn user_recipient_routes_to_conversation_only() {
        assert_eq!(publish_topics("user:anna", "c1"), vec!["chat:c1"]);
    }

    #[tokio::test]
    async fn publish_to_topics_lands_identical_payloads() {
        let bus = MemoryBus::new();
        let mut payload = Map::new();
        payload.insert("content".into(), json!("hi"));

        let topics = publish_to_topics(&bus, "agent:dev", "c1", "m-1", &payload)
            .await
            .unwrap();
        assert_eq!(topics, vec!["chat:c1", "chat:dev"]);

        let conv = bus.read("chat:c1", None, 10).await.unwrap();
        let agent = bus.read("chat:dev", None, 10).await.unwrap();
        assert_eq!(conv.len(), 1);
        assert_eq!(agent.len(), 1);
        assert_eq!(conv[0].id, "m-1");
        assert_eq!(agent[0].id, "m-1");
        assert_eq!(conv[0].payload, agent[0].payload);
    }
}

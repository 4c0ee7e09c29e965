// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! End-to-end scenarios over the in-memory bus: gateway send → worker
//! drain → stream subscription, plus signal rendezvous and orchestration
//! coupling. These wire the crates together exactly as the binary does,
//! with the echo runner standing in for a model.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use weft_bus::{Bus, MemoryBus, ObserverIndex};
use weft_gateway::{app, GatewayState};
use weft_model::Envelope;
use weft_runner::EchoRunner;
use weft_signals::{SignalHub, SignalPolicy};
use weft_worker::Worker;

fn gateway(bus: Arc<MemoryBus>) -> axum::Router {
    app(GatewayState::new(bus, ObserverIndex::inactive(), 64 * 1024))
}

fn worker(bus: &Arc<MemoryBus>, agent: &str) -> Worker {
    let hub = Arc::new(SignalHub::new(
        Arc::clone(bus) as Arc<dyn Bus>,
        SignalPolicy::default(),
    ));
    Worker::new(agent, Arc::clone(bus) as Arc<dyn Bus>, Arc::new(EchoRunner)).with_signals(hub)
}

async fn post_send(router: &axum::Router, body: Value) -> axum::http::StatusCode {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/send")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    response.status()
}

/// Collect the `data:` payloads of an SSE response body.
async fn stream_frames(router: &axum::Router, uri: &str) -> Vec<Value> {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.status().is_success(), "stream failed: {}", response.status());
    let text = String::from_utf8_lossy(
        &response.into_body().collect().await.unwrap().to_bytes(),
    )
    .to_string();
    text.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|data| serde_json::from_str(data).ok())
        .collect()
}

#[tokio::test]
async fn conversation_roundtrip_send_run_stream() {
    let bus = Arc::new(MemoryBus::new());
    let router = gateway(Arc::clone(&bus));
    let mut worker = worker(&bus, "Dev");

    let status = post_send(
        &router,
        json!({
            "conversation_id": "c1",
            "sender": "user:a",
            "recipient": "agent:Dev",
            "type": "message",
            "content": "hi",
        }),
    )
    .await;
    assert_eq!(status, 200);

    assert_eq!(worker.process_available(100).await.unwrap(), 1);

    let frames = stream_frames(&router, "/stream/c1?max_events=3").await;
    let kinds: Vec<&str> = frames.iter().map(|f| f["event"].as_str().unwrap()).collect();
    assert_eq!(kinds, vec!["user_message", "token", "output"]);
    assert_eq!(frames[0]["text"], "hi");
    assert_eq!(frames[2]["text"], "hi", "echo runner returns the content");
}

#[tokio::test]
async fn single_flight_two_envelopes_one_conversation() {
    let bus = Arc::new(MemoryBus::new());
    let router = gateway(Arc::clone(&bus));
    let mut worker = worker(&bus, "Dev");

    for content in ["first", "second"] {
        let status = post_send(
            &router,
            json!({
                "conversation_id": "c",
                "sender": "user:a",
                "recipient": "agent:Dev",
                "content": content,
            }),
        )
        .await;
        assert_eq!(status, 200);
    }

    // One run per drain for a single conversation.
    assert_eq!(worker.process_available(100).await.unwrap(), 1);
    assert_eq!(worker.process_available(100).await.unwrap(), 1);
    assert_eq!(worker.process_available(100).await.unwrap(), 0);

    // The stream carries both runs' events concatenated after the two
    // user_message frames.
    let outputs: Vec<String> = bus
        .read("stream:c", None, 100)
        .await
        .unwrap()
        .iter()
        .filter(|m| m.payload["event"] == "output")
        .map(|m| m.payload["text"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(outputs, vec!["first", "second"]);
}

#[tokio::test]
async fn signal_rendezvous_and_wait_all() {
    let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
    let hub = SignalHub::new(bus, SignalPolicy::default());

    // Scenario: send then wait resolves with the signal payload.
    hub.send("signal:s", json!({ "n": 1 }).as_object().cloned().unwrap())
        .await
        .unwrap();
    let reply = hub.wait("signal:s", None, 10).await.unwrap();
    assert!(reply.ok);
    let message = reply.message.unwrap();
    assert_eq!(message["event"], "signal");
    assert_eq!(message["payload"]["n"], 1);

    // Scenario: wait_all across two topics with pending signals.
    hub.send("signal:a/a", json!({ "a": 1 }).as_object().cloned().unwrap())
        .await
        .unwrap();
    hub.send("signal:a/b", json!({ "b": 2 }).as_object().cloned().unwrap())
        .await
        .unwrap();
    let all = hub
        .wait_all(
            &["signal:a/a".to_string(), "signal:a/b".to_string()],
            None,
            100,
        )
        .await
        .unwrap();
    assert!(all.ok);
    assert_eq!(all.messages.len(), 2);
}

#[tokio::test]
async fn orchestrated_child_signals_done_after_run() {
    let bus = Arc::new(MemoryBus::new());
    let router = gateway(Arc::clone(&bus));
    let hub = Arc::new(SignalHub::new(
        Arc::clone(&bus) as Arc<dyn Bus>,
        SignalPolicy::default(),
    ));
    let mut worker = Worker::new("Dev", Arc::clone(&bus) as Arc<dyn Bus>, Arc::new(EchoRunner))
        .with_signals(Arc::clone(&hub));

    let status = post_send(
        &router,
        json!({
            "conversation_id": "conv-child",
            "sender": "agent:root",
            "recipient": "agent:Dev",
            "content": "subtask",
            "metadata": { "orchestrate": { "done_topic": "signal:conv-child/done" } },
        }),
    )
    .await;
    assert_eq!(status, 200);

    assert_eq!(worker.process_available(100).await.unwrap(), 1);

    let reply = hub.wait("signal:conv-child/done", None, 1000).await.unwrap();
    assert!(reply.ok, "child done signal must resolve: {reply:?}");
    assert_eq!(reply.message.unwrap()["event"], "signal");
}

#[tokio::test]
async fn gateway_send_validates_and_worker_skips_garbage() {
    let bus = Arc::new(MemoryBus::new());
    let router = gateway(Arc::clone(&bus));

    let status = post_send(
        &router,
        json!({
            "conversation_id": "",
            "sender": "user:a",
            "recipient": "agent:Dev",
            "content": "hi",
        }),
    )
    .await;
    assert_eq!(status, 422);

    // A foreign payload on the agent topic is skipped; a valid one runs.
    let mut worker = worker(&bus, "Dev");
    bus.publish(
        "chat:Dev",
        weft_bus::BusMessage::new(
            "chat:Dev",
            json!({ "garbage": true }).as_object().cloned().unwrap(),
        ),
    )
    .await
    .unwrap();
    let envelope = Envelope::message("c2", "user:a", "agent:Dev", "ok");
    bus.publish(
        "chat:Dev",
        weft_bus::BusMessage::new("chat:Dev", envelope.to_payload()).with_id(&envelope.id),
    )
    .await
    .unwrap();

    assert_eq!(worker.process_available(100).await.unwrap(), 1);
    let events = bus.read("stream:c2", None, 10).await.unwrap();
    assert_eq!(events.last().unwrap().payload["event"], "output");
}

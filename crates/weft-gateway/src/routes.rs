// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use weft_bus::routing;
use weft_model::{conversation_topic, stream_topic, Envelope, MessageKind, StreamEvent};
use weft_observe::metrics;

use crate::GatewayState;

/// Idle sleep between bus polls when a stream has no new events.
const STREAM_IDLE: Duration = Duration::from_millis(20);

pub(crate) enum ApiError {
    /// 422: the request body failed validation.
    Invalid(String),
    /// 503: the bus rejected an operation.
    Unavailable(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::Invalid(detail) => (StatusCode::UNPROCESSABLE_ENTITY, detail),
            Self::Unavailable(detail) => (StatusCode::SERVICE_UNAVAILABLE, detail.to_string()),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

// ── Liveness ──────────────────────────────────────────────────────────────────

pub(crate) async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// One-message probe read; 503 when the transport is unreachable.
pub(crate) async fn ready(State(state): State<GatewayState>) -> Result<Json<Value>, ApiError> {
    match state.bus.read("ready:probe", None, 1).await {
        Ok(_) => Ok(Json(json!({ "status": "ok" }))),
        Err(err) => {
            error!(event = "gateway_error", path = "ready", error = %err, "gateway not ready");
            Err(ApiError::Unavailable("bus not ready"))
        }
    }
}

// ── Send ──────────────────────────────────────────────────────────────────────

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Deserialize)]
pub(crate) struct SendRequest {
    #[serde(default = "new_id")]
    id: String,
    conversation_id: String,
    sender: String,
    recipient: String,
    #[serde(default = "SendRequest::default_kind", rename = "type")]
    kind: MessageKind,
    content: String,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl SendRequest {
    fn default_kind() -> MessageKind {
        MessageKind::Message
    }
}

pub(crate) async fn send(
    State(state): State<GatewayState>,
    Json(request): Json<SendRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.kind != MessageKind::Message {
        return Err(ApiError::Invalid("type must be \"message\"".into()));
    }
    let envelope = Envelope {
        id: request.id,
        conversation_id: request.conversation_id,
        sender: request.sender,
        recipient: request.recipient,
        kind: request.kind,
        content: Some(request.content.clone()),
        metadata: request.metadata,
        created_at: chrono::Utc::now(),
    };
    envelope
        .validate()
        .map_err(|err| ApiError::Invalid(err.to_string()))?;

    // Envelope fan-out: conversation topic, then the agent inbox when the
    // recipient names one. Any failed publication fails the send.
    if let Err(err) = routing::publish_to_topics(
        state.bus.as_ref(),
        &envelope.recipient,
        &envelope.conversation_id,
        &envelope.id,
        &envelope.to_payload(),
    )
    .await
    {
        error!(
            event = "gateway_error",
            path = "send",
            conversation = %envelope.conversation_id,
            error = %err,
            "gateway send error"
        );
        return Err(ApiError::Unavailable("bus publish failed"));
    }

    // Stream-visible user_message so subscribers can render inbound
    // messages in order with run output.
    let topic = stream_topic(&envelope.conversation_id);
    let event = StreamEvent::user_message(
        &envelope.conversation_id,
        &envelope.sender,
        &request.content,
    );
    if let Err(err) = state
        .bus
        .publish(&topic, weft_bus::BusMessage::new(topic.clone(), event.to_payload()))
        .await
    {
        error!(
            event = "gateway_error",
            path = "send",
            conversation = %envelope.conversation_id,
            stage = "stream_user_message",
            error = %err,
            "gateway send error"
        );
        return Err(ApiError::Unavailable("bus publish failed"));
    }

    state
        .index
        .record_user_message(
            &envelope.conversation_id,
            &envelope.sender,
            &envelope.recipient,
            Some(envelope.created_at.timestamp_millis()),
        )
        .await;

    info!(
        event = "gateway_send",
        conversation = %envelope.conversation_id,
        "gateway send"
    );
    metrics().increment(
        "gateway_sends",
        &[("conversation_id", &envelope.conversation_id)],
    );
    Ok(Json(json!({
        "status": "ok",
        "topic": conversation_topic(&envelope.conversation_id),
    })))
}

// ── Stream ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct StreamParams {
    max_events: Option<usize>,
}

/// SSE subscription to one conversation's stream topic.
///
/// Each frame's `id` is the bus message id, so the `Last-Event-ID` header
/// resumes after the last frame a reconnecting client saw. Only the first
/// `token` frame per subscription passes through; payloads above the
/// configured cap are rewritten to a `truncated` marker.
pub(crate) async fn stream(
    State(state): State<GatewayState>,
    Path(conversation_id): Path<String>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let topic = stream_topic(&conversation_id);
    let resume = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    info!(
        event = "gateway_stream",
        conversation = %conversation_id,
        resume = resume.as_deref().unwrap_or(""),
        "gateway stream start"
    );
    metrics().increment("gateway_streams", &[("conversation_id", &conversation_id)]);

    let bus = state.bus.clone();
    let max_events = params.max_events;
    let max_bytes = state.max_event_bytes;

    let events = async_stream::stream! {
        let mut last_id = resume;
        let mut sent = 0usize;
        let mut first_token_sent = false;
        loop {
            let items = match bus.read(&topic, last_id.as_deref(), 100).await {
                Ok(items) => items,
                Err(err) => {
                    warn!(event = "gateway_error", topic = %topic, error = %err, "stream read failed");
                    tokio::time::sleep(STREAM_IDLE).await;
                    continue;
                }
            };
            if items.is_empty() {
                tokio::time::sleep(STREAM_IDLE).await;
                continue;
            }
            for message in items {
                let kind = message
                    .payload
                    .get("event")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                // Pass the first token through, skip the rest; every other
                // kind is unfiltered.
                if kind == "token" {
                    if first_token_sent {
                        last_id = Some(message.id);
                        continue;
                    }
                    first_token_sent = true;
                }

                let mut data = serde_json::to_string(&message.payload)
                    .unwrap_or_else(|_| "{}".into());
                if data.len() > max_bytes {
                    data = r#"{"event":"truncated","truncated":true}"#.into();
                }
                yield Ok(Event::default().id(message.id.clone()).data(data));
                last_id = Some(message.id);
                sent += 1;
                if matches!(max_events, Some(max) if sent >= max) {
                    return;
                }
            }
        }
    };

    Sse::new(events).keep_alive(KeepAlive::default())
}

// ── Observer endpoints ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ConversationsParams {
    limit: Option<usize>,
    since_ms: Option<i64>,
}

pub(crate) async fn conversations(
    State(state): State<GatewayState>,
    Query(params): Query<ConversationsParams>,
) -> Json<Value> {
    let items = state
        .index
        .list_conversations(params.limit.unwrap_or(50), params.since_ms)
        .await;
    Json(json!({ "conversations": items }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct AgentsParams {
    limit: Option<usize>,
}

pub(crate) async fn agents(
    State(state): State<GatewayState>,
    Query(params): Query<AgentsParams>,
) -> Json<Value> {
    let items = state.index.list_agents(params.limit.unwrap_or(200)).await;
    Json(json!({ "agents": items }))
}

pub(crate) async fn graph(
    State(state): State<GatewayState>,
    Path(conversation_id): Path<String>,
) -> Json<Value> {
    let graph = state.index.graph(&conversation_id).await;
    Json(json!({ "nodes": graph.nodes, "edges": graph.edges }))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

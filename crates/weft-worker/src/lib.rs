// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Per-agent worker.
//!
//! Reads inbound envelopes from `chat:<agent_name>`, drives the runner,
//! and republishes the streamed events on `stream:<conversation_id>`.
//!
//! # Single flight
//!
//! One drain processes at most one envelope per conversation; envelopes
//! for a conversation that already ran this drain stay unconsumed (the
//! watermark only advances to the last *processed* id), so the next drain
//! picks them up. Within one process that bounds every conversation to one
//! concurrent run; across processes the bus-level consumer group extends
//! the guarantee by delivering each envelope to exactly one worker.
//!
//! # Failure handling
//!
//! Runner failures are caught, logged as `run_errored` and counted; they
//! never escape a drain. Stream publish failures are logged and skipped so
//! a degraded transport cannot wedge a run mid-stream.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Map;
use tracing::{info, warn};

use weft_bus::{Bus, BusMessage, ObserverIndex};
use weft_model::{agent_topic, stream_topic, Envelope};
use weft_observe::{metrics, with_run_context, RunContext};
use weft_runner::Runner;
use weft_signals::SignalHub;

pub struct Worker {
    agent_name: String,
    bus: Arc<dyn Bus>,
    runner: Arc<dyn Runner>,
    signals: Option<Arc<SignalHub>>,
    index: ObserverIndex,
    auto_child_signal_done: bool,
    last_inbound_id: Option<String>,
}

impl Worker {
    pub fn new(agent_name: impl Into<String>, bus: Arc<dyn Bus>, runner: Arc<dyn Runner>) -> Self {
        Self {
            agent_name: agent_name.into(),
            bus,
            runner,
            signals: None,
            index: ObserverIndex::inactive(),
            auto_child_signal_done: true,
            last_inbound_id: None,
        }
    }

    /// Hub used for the child done-signal after successful runs.
    pub fn with_signals(mut self, signals: Arc<SignalHub>) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Record run lifecycle in the observer index.
    pub fn with_observer_index(mut self, index: ObserverIndex) -> Self {
        self.index = index;
        self
    }

    pub fn with_auto_child_signal_done(mut self, enabled: bool) -> Self {
        self.auto_child_signal_done = enabled;
        self
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Process available inbound messages once; returns the number of runs
    /// executed. At most one envelope per conversation per invocation.
    pub async fn process_available(&mut self, limit: usize) -> Result<usize, anyhow::Error> {
        let inbound_topic = agent_topic(&self.agent_name);
        let messages = self
            .bus
            .read(&inbound_topic, self.last_inbound_id.as_deref(), limit)
            .await?;
        if messages.is_empty() {
            return Ok(0);
        }

        let mut processed = 0usize;
        let mut seen_conversations: HashSet<String> = HashSet::new();
        let mut last_processed_id = self.last_inbound_id.clone();

        for message in messages {
            let envelope = match Envelope::from_payload(&message.payload)
                .map_err(anyhow::Error::from)
                .and_then(|env| {
                    env.validate()?;
                    Ok(env)
                }) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(
                        event = "envelope_invalid",
                        agent = %self.agent_name,
                        message_id = %message.id,
                        error = %err,
                        "rejecting malformed inbound envelope"
                    );
                    metrics().increment("envelopes_rejected", &[("agent", &self.agent_name)]);
                    continue;
                }
            };

            // One run per conversation per drain; later envelopes for the
            // same conversation stay eligible for the next drain.
            if !seen_conversations.insert(envelope.conversation_id.clone()) {
                continue;
            }

            self.run_and_stream(&envelope).await;
            processed += 1;
            last_processed_id = Some(message.id);
        }

        self.last_inbound_id = last_processed_id;
        Ok(processed)
    }

    /// Execute one run: bind the run context, consume the runner's stream
    /// and republish every item on the conversation's stream topic.
    async fn run_and_stream(&self, envelope: &Envelope) {
        let run_id = uuid::Uuid::new_v4().to_string();
        let conversation_id = envelope.conversation_id.clone();
        let ctx = RunContext::new(
            run_id.clone(),
            conversation_id.clone(),
            Some(self.agent_name.clone()),
        );

        info!(
            event = "run_started",
            run = %run_id,
            conversation = %conversation_id,
            agent = %self.agent_name,
            "run started"
        );
        metrics().increment(
            "runs_started",
            &[("agent", &self.agent_name), ("conversation_id", &conversation_id)],
        );
        self.index.record_run_started(&self.agent_name, &conversation_id).await;

        // The child done-signal runs inside the same context so its stream
        // mirror lands on the conversation.
        let completed = with_run_context(ctx, async {
            let completed = self.drive_runner(envelope, &run_id).await;
            if completed {
                self.signal_child_done(envelope).await;
            }
            completed
        })
        .await;

        if completed {
            info!(
                event = "run_completed",
                run = %run_id,
                conversation = %conversation_id,
                agent = %self.agent_name,
                "run completed"
            );
            metrics().increment(
                "runs_completed",
                &[("agent", &self.agent_name), ("conversation_id", &conversation_id)],
            );
        } else {
            metrics().increment(
                "runs_errored",
                &[("agent", &self.agent_name), ("conversation_id", &conversation_id)],
            );
        }
        self.index
            .record_run_completed(&self.agent_name, &conversation_id)
            .await;
    }

    /// Returns `false` when the runner errored; the error never escapes.
    async fn drive_runner(&self, envelope: &Envelope, run_id: &str) -> bool {
        let topic = stream_topic(&envelope.conversation_id);
        let mut stream = match self.runner.stream_run(envelope).await {
            Ok(stream) => stream,
            Err(err) => {
                self.log_run_errored(envelope, run_id, &err);
                return false;
            }
        };

        while let Some(item) = stream.next().await {
            let payload: Map<_, _> = match item {
                Ok(item) => item.into_payload(),
                Err(err) => {
                    self.log_run_errored(envelope, run_id, &err);
                    return false;
                }
            };
            // Best-effort publish: a degraded transport must not abort the
            // run mid-stream.
            let message = BusMessage::new(topic.clone(), payload);
            if let Err(err) = self.bus.publish(&topic, message).await {
                warn!(
                    event = "stream_publish_failed",
                    run = %run_id,
                    topic = %topic,
                    error = %err,
                    "dropping stream event"
                );
                metrics().increment("stream_publish_failures", &[("agent", &self.agent_name)]);
            }
        }
        true
    }

    fn log_run_errored(&self, envelope: &Envelope, run_id: &str, err: &anyhow::Error) {
        info!(
            event = "run_errored",
            run = %run_id,
            conversation = %envelope.conversation_id,
            agent = %self.agent_name,
            error = %err,
            "run errored"
        );
    }

    /// Emit the parent-facing done signal named in the envelope metadata.
    async fn signal_child_done(&self, envelope: &Envelope) {
        if !self.auto_child_signal_done {
            return;
        }
        let Some(done_topic) = envelope.done_topic() else {
            return;
        };
        let Some(signals) = &self.signals else {
            return;
        };
        if let Err(err) = signals.send(done_topic, Map::new()).await {
            warn!(
                event = "child_done_signal_failed",
                agent = %self.agent_name,
                topic = done_topic,
                error = %err,
                "failed to emit child done signal"
            );
        }
    }
}

/// Poll `process_available` forever.
///
/// Empty drains back off exponentially (50 ms doubling to a 200 ms cap);
/// any progress resets the backoff. Read errors are logged and retried at
/// the capped interval, so a transport outage does not kill the loop.
pub async fn run_loop(mut worker: Worker, limit: usize) {
    const MIN_SLEEP: Duration = Duration::from_millis(50);
    const MAX_SLEEP: Duration = Duration::from_millis(200);

    let mut sleep = MIN_SLEEP;
    loop {
        match worker.process_available(limit).await {
            Ok(0) => {
                tokio::time::sleep(sleep).await;
                sleep = (sleep * 2).min(MAX_SLEEP);
            }
            Ok(_) => {
                sleep = MIN_SLEEP;
            }
            Err(err) => {
                warn!(
                    event = "drain_failed",
                    agent = %worker.agent_name,
                    error = %err,
                    "inbound drain failed; retrying"
                );
                tokio::time::sleep(MAX_SLEEP).await;
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

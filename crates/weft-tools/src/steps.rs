// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Tool-step lifecycle events.
//!
//! A [`ToolStep`] emits a `tool_step` start event on creation and exactly
//! one terminal event (`success` or `error`) when consumed. The terminal
//! methods take the guard by value, so double completion cannot compile.
//! A guard dropped without completion emits nothing; callers own the
//! terminal transition. Emission is best-effort and bound to the task's
//! run context, like all stream diagnostics.

use serde_json::{Map, Value};
use tokio::time::Instant;

use weft_model::{StreamEvent, ToolStatus};

use crate::clip;

const SUMMARY_LIMIT: usize = 160;

pub struct ToolStep {
    name: String,
    tool_call_id: String,
    started: Instant,
}

impl ToolStep {
    /// Emit the start event and return the guard.
    pub async fn begin(name: impl Into<String>, args: Map<String, Value>) -> Self {
        let name = name.into();
        let step = Self {
            tool_call_id: format!("tc_{}", uuid::Uuid::new_v4().simple()),
            started: Instant::now(),
            name,
        };
        step.emit(Some(args), ToolStatus::Start, None, None, None).await;
        step
    }

    /// Terminal success, with the measured duration and a clipped summary.
    pub async fn success(self, result_summary: Option<&str>) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        self.emit(
            None,
            ToolStatus::Success,
            result_summary.map(|s| clip(s, SUMMARY_LIMIT)),
            Some(duration_ms),
            None,
        )
        .await;
    }

    /// Terminal failure with a clipped error message.
    pub async fn error(self, error: &str) {
        self.emit(
            None,
            ToolStatus::Error,
            None,
            None,
            Some(clip(error, SUMMARY_LIMIT)),
        )
        .await;
    }

    pub fn tool_call_id(&self) -> &str {
        &self.tool_call_id
    }

    async fn emit(
        &self,
        args: Option<Map<String, Value>>,
        status: ToolStatus,
        result_summary: Option<String>,
        duration_ms: Option<u64>,
        error: Option<String>,
    ) {
        let Some(hub) = weft_signals::global_hub() else {
            return;
        };
        let name = self.name.clone();
        let tool_call_id = self.tool_call_id.clone();
        hub.emit_stream_event(move |meta| StreamEvent::ToolStep {
            meta,
            name,
            args: args.unwrap_or_default(),
            result_summary,
            status: Some(status),
            tool_call_id: Some(tool_call_id),
            duration_ms,
            error,
        })
        .await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Per-run context propagated task-locally.
//!
//! The worker binds a [`RunContext`] around each run; anything executing
//! inside that scope (signal operations, tool helpers) can read the active
//! conversation without threading it through every call. Code running
//! outside a run simply observes no context.

use std::future::Future;

use tokio::task_local;

/// Identity of the run currently executing on this task.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub conversation_id: String,
    pub agent: Option<String>,
}

impl RunContext {
    pub fn new(
        run_id: impl Into<String>,
        conversation_id: impl Into<String>,
        agent: Option<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            conversation_id: conversation_id.into(),
            agent,
        }
    }
}

task_local! {
    static RUN_CONTEXT: RunContext;
}

/// Run `fut` with `ctx` bound as the task-local run context.
pub async fn with_run_context<F>(ctx: RunContext, fut: F) -> F::Output
where
    F: Future,
{
    RUN_CONTEXT.scope(ctx, fut).await
}

/// The run context bound on this task, if any.
pub fn current_run_context() -> Option<RunContext> {
    RUN_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn context_is_visible_inside_scope() {
        let ctx = RunContext::new("r1", "c1", Some("dev".into()));
        with_run_context(ctx, async {
            let seen = current_run_context().unwrap();
            assert_eq!(seen.run_id, "r1");
            assert_eq!(seen.conversation_id, "c1");
            assert_eq!(seen.agent.as_deref(), Some("dev"));
        })
        .await;
    }

    #[tokio::test]
    async fn context_is_absent_outside_scope() {
        assert!(current_run_context().is_none());
        with_run_context(RunContext::new("r", "c", None), async {}).await;
        assert!(current_run_context().is_none());
    }

    #[tokio::test]
    async fn nested_scopes_shadow_and_restore() {
        with_run_context(RunContext::new("outer", "c1", None), async {
            with_run_context(RunContext::new("inner", "c2", None), async {
                assert_eq!(current_run_context().unwrap().run_id, "inner");
            })
            .await;
            assert_eq!(current_run_context().unwrap().run_id, "outer");
        })
        .await;
    }
}

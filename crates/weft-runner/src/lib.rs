// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod bridge;
mod demo;
mod openai;

pub use demo::{DemoRunner, EchoRunner};
pub use openai::OpenAiRunner;

use std::pin::Pin;
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};
use tracing::info;

use weft_config::{RunnerConfig, RunnerMode};
use weft_model::{Envelope, StreamEvent};

/// One item yielded by a runner: a typed stream event, or a raw JSON map
/// relayed without interpretation (forward compatibility).
#[derive(Debug, Clone)]
pub enum RunnerItem {
    Event(StreamEvent),
    Raw(Map<String, Value>),
}

impl RunnerItem {
    /// The bus payload for this item.
    pub fn into_payload(self) -> Map<String, Value> {
        match self {
            Self::Event(event) => event.to_payload(),
            Self::Raw(map) => map,
        }
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<RunnerItem>> + Send>>;

/// The capability a worker depends on: stream one run's events for an
/// inbound envelope. An `Err` item terminates the run as errored.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Short name for selection logs.
    fn name(&self) -> &str;

    async fn stream_run(&self, envelope: &Envelope) -> anyhow::Result<EventStream>;
}

/// Construct a boxed [`Runner`] from configuration.
///
/// `auto` picks the SDK adapter when an API key resolves and the echo
/// runner otherwise, so a bare deployment stays functional.
pub fn from_config(config: &RunnerConfig) -> anyhow::Result<Arc<dyn Runner>> {
    let runner: Arc<dyn Runner> = match config.mode {
        RunnerMode::Echo => Arc::new(EchoRunner),
        RunnerMode::Demo => Arc::new(DemoRunner),
        RunnerMode::Openai => {
            if config.resolve_api_key().is_none() {
                bail!(
                    "runner mode `openai` requires an API key; set runner.api_key or {}",
                    config.api_key_env
                );
            }
            Arc::new(OpenAiRunner::from_config(config))
        }
        RunnerMode::Auto => {
            if config.resolve_api_key().is_some() {
                Arc::new(OpenAiRunner::from_config(config))
            } else {
                Arc::new(EchoRunner)
            }
        }
    };
    info!(
        event = "runner_selected",
        runner = runner.name(),
        model = %config.model,
        "runner selected"
    );
    Ok(runner)
}

/// Clip `text` to `limit` characters, appending an ellipsis when cut.
pub(crate) fn clip(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit.saturating_sub(1)).collect();
    out.push('\u{2026}');
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_echo_mode() {
        let config = RunnerConfig {
            mode: RunnerMode::Echo,
            ..RunnerConfig::default()
        };
        assert_eq!(from_config(&config).unwrap().name(), "echo");
    }

    #[test]
    fn from_config_demo_mode() {
        let config = RunnerConfig {
            mode: RunnerMode::Demo,
            ..RunnerConfig::default()
        };
        assert_eq!(from_config(&config).unwrap().name(), "demo");
    }

    #[test]
    fn from_config_auto_without_key_is_echo() {
        let config = RunnerConfig {
            mode: RunnerMode::Auto,
            api_key: None,
            api_key_env: "WEFT_TEST_NO_SUCH_KEY".into(),
            ..RunnerConfig::default()
        };
        assert_eq!(from_config(&config).unwrap().name(), "echo");
    }

    #[test]
    fn from_config_auto_with_key_is_openai() {
        let config = RunnerConfig {
            mode: RunnerMode::Auto,
            api_key: Some("sk-test".into()),
            ..RunnerConfig::default()
        };
        assert_eq!(from_config(&config).unwrap().name(), "openai");
    }

    #[test]
    fn from_config_openai_without_key_errors() {
        let config = RunnerConfig {
            mode: RunnerMode::Openai,
            api_key: None,
            api_key_env: "WEFT_TEST_NO_SUCH_KEY".into(),
            ..RunnerConfig::default()
        };
        let msg = from_config(&config).err().unwrap().to_string();
        assert!(msg.contains("API key"));
    }

    #[test]
    fn clip_keeps_short_text() {
        assert_eq!(clip("short", 10), "short");
    }

    #[test]
    fn clip_cuts_long_text_with_ellipsis() {
        let out = clip(&"x".repeat(50), 10);
        assert_eq!(out.chars().count(), 10);
        assert!(out.ends_with('\u{2026}'));
    }
}

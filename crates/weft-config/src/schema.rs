// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be on unless explicitly disabled
/// need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub signals: SignalsConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Redis Streams transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL, `redis://host:port/db`.
    #[serde(default = "RedisConfig::default_url")]
    pub url: String,
    /// Approximate per-topic retention cap (XADD MAXLEN ~). Unset keeps
    /// topics unbounded.
    pub stream_maxlen: Option<usize>,
}

impl RedisConfig {
    fn default_url() -> String {
        "redis://127.0.0.1:6379/0".into()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            stream_maxlen: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "GatewayConfig::default_bind")]
    pub bind: String,
    /// SSE frames larger than this are rewritten to a `truncated` marker.
    #[serde(default = "GatewayConfig::default_max_event_bytes")]
    pub max_event_bytes: usize,
    /// Observer activity index toggle.
    #[serde(default = "default_true")]
    pub index_enabled: bool,
    /// TTL applied to observer index keys.
    #[serde(default = "GatewayConfig::default_index_ttl_days")]
    pub index_ttl_days: u64,
}

impl GatewayConfig {
    fn default_bind() -> String {
        "0.0.0.0:8000".into()
    }
    fn default_max_event_bytes() -> usize {
        64 * 1024
    }
    fn default_index_ttl_days() -> u64 {
        7
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
            max_event_bytes: Self::default_max_event_bytes(),
            index_enabled: true,
            index_ttl_days: Self::default_index_ttl_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Name of the agent this worker serves; the inbound topic is
    /// `chat:<agent_name>`.
    #[serde(default = "WorkerConfig::default_agent_name")]
    pub agent_name: String,
    /// Read the inbound topic through a consumer group so concurrent
    /// workers each receive an envelope at most once.
    #[serde(default = "default_true")]
    pub use_groups: bool,
    /// Consumer group name shared by all workers of one deployment.
    #[serde(default = "WorkerConfig::default_group")]
    pub group: String,
    /// Max envelopes fetched per drain.
    #[serde(default = "WorkerConfig::default_read_limit")]
    pub read_limit: usize,
    /// Emit the child done signal named by `metadata.orchestrate.done_topic`
    /// after a successful run.
    #[serde(default = "default_true")]
    pub auto_child_signal_done: bool,
}

impl WorkerConfig {
    fn default_agent_name() -> String {
        "DevAgent".into()
    }
    fn default_group() -> String {
        "weft".into()
    }
    fn default_read_limit() -> usize {
        100
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            agent_name: Self::default_agent_name(),
            use_groups: true,
            group: Self::default_group(),
            read_limit: Self::default_read_limit(),
            auto_child_signal_done: true,
        }
    }
}

/// Signal rendezvous policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalsConfig {
    /// When set, every signal topic must start with this prefix.
    pub topic_prefix: Option<String>,
    /// Serialized payload cap in bytes. Unset uses the built-in 64 KiB
    /// default.
    pub payload_max_bytes: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerMode {
    /// Pick the SDK adapter when an API key resolves, echo otherwise.
    #[default]
    Auto,
    Echo,
    Demo,
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub mode: RunnerMode,
    /// Model name forwarded to the SDK endpoint.
    #[serde(default = "RunnerConfig::default_model")]
    pub model: String,
    /// Explicit API key; prefer `api_key_env` in config files to avoid
    /// secrets in version-controlled files.
    pub api_key: Option<String>,
    /// Environment variable that holds the API key (read at runtime).
    #[serde(default = "RunnerConfig::default_api_key_env")]
    pub api_key_env: String,
    /// Endpoint override for OpenAI-compatible gateways and local models.
    pub base_url: Option<String>,
    #[serde(default = "RunnerConfig::default_instructions")]
    pub instructions: String,
    /// When set, the file contents replace `instructions`.
    pub instructions_file: Option<PathBuf>,
    /// Per-conversation session cache capacity (LRU).
    #[serde(default = "RunnerConfig::default_session_limit")]
    pub session_limit: usize,
    /// Bounded bridge capacity between the SDK reader and the worker's
    /// stream consumer.
    #[serde(default = "RunnerConfig::default_bridge_capacity")]
    pub bridge_capacity: usize,
}

impl RunnerConfig {
    fn default_model() -> String {
        "gpt-4o-mini".into()
    }
    fn default_api_key_env() -> String {
        "OPENAI_API_KEY".into()
    }
    fn default_instructions() -> String {
        "You are a helpful assistant.".into()
    }
    fn default_session_limit() -> usize {
        256
    }
    fn default_bridge_capacity() -> usize {
        1024
    }

    /// The API key, explicit value first, then the configured env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }

    /// Instruction text, preferring `instructions_file` when it is readable.
    pub fn resolve_instructions(&self) -> String {
        if let Some(path) = &self.instructions_file {
            if let Ok(text) = std::fs::read_to_string(path) {
                return text;
            }
        }
        self.instructions.clone()
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mode: RunnerMode::Auto,
            model: Self::default_model(),
            api_key: None,
            api_key_env: Self::default_api_key_env(),
            base_url: None,
            instructions: Self::default_instructions(),
            instructions_file: None,
            session_limit: Self::default_session_limit(),
            bridge_capacity: Self::default_bridge_capacity(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

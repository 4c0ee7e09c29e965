// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::{Config, RunnerMode};

/// Ordered list of config file locations searched from lowest to highest
/// priority. Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/weft/config.yaml"));
    paths.push(PathBuf::from("/etc/weft/config.yml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/weft/config.yaml"));
        paths.push(home.join(".config/weft/config.yml"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".weft.yaml"));
    paths.push(PathBuf::from(".weft.yml"));
    paths.push(PathBuf::from("weft.yaml"));
    paths.push(PathBuf::from("weft.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files, then applying
/// environment overrides. The `extra` argument may provide an explicit path
/// (e.g. a `--config` CLI flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let mut config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty())
    {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Apply environment overrides on top of file-derived configuration.
///
/// The variable names are the ones the deployment scripts already export;
/// `lookup` is injectable so tests can drive this without touching the
/// process environment.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(url) = get("REDIS_URL") {
        config.redis.url = url;
    }
    if let Some(name) = get("AGENT_NAME") {
        config.worker.agent_name = name;
    }
    if let Some(raw) = get("WORKER_USE_GROUPS") {
        config.worker.use_groups =
            !matches!(raw.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off");
    }
    if let Some(prefix) = get("SIGNAL_TOPIC_PREFIX") {
        config.signals.topic_prefix = Some(prefix);
    }
    if let Some(raw) = get("SIGNAL_PAYLOAD_MAX_BYTES") {
        // Unparsable or non-positive values keep the built-in default.
        match raw.parse::<usize>() {
            Ok(n) if n > 0 => config.signals.payload_max_bytes = Some(n),
            _ => config.signals.payload_max_bytes = None,
        }
    }
    if let Some(mode) = get("AGENT_RUNNER_MODE") {
        match mode.to_ascii_lowercase().as_str() {
            "echo" => config.runner.mode = RunnerMode::Echo,
            "demo" => config.runner.mode = RunnerMode::Demo,
            "openai" => config.runner.mode = RunnerMode::Openai,
            "auto" => config.runner.mode = RunnerMode::Auto,
            other => debug!(mode = other, "ignoring unknown AGENT_RUNNER_MODE"),
        }
    }
    if let Some(model) = get("AGENT_MODEL") {
        config.runner.model = model;
    }
    if let Some(text) = get("AGENT_INSTRUCTIONS") {
        config.runner.instructions = text;
    }
    if let Some(path) = get("AGENT_INSTRUCTIONS_FILE") {
        config.runner.instructions_file = Some(PathBuf::from(path));
    }
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "weft",
    version,
    about = "Multi-agent execution fabric: gateway, workers and signal rendezvous over a topic bus"
)]
pub struct Cli {
    /// Explicit config file, merged over the standard search paths.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level (overridden by WEFT_LOG).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP/SSE gateway.
    Gateway {
        /// Bind address, e.g. 0.0.0.0:8000 (overrides config).
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run one agent worker loop.
    Worker {
        /// Agent name; the worker reads chat:<agent> (overrides config).
        #[arg(long)]
        agent: Option<String>,
    },
    /// Publish one chat message directly onto the bus (local smoke test).
    Send {
        /// Message text.
        content: String,
        #[arg(long, default_value = "agent:DevAgent")]
        recipient: String,
        #[arg(long, default_value = "cli")]
        conversation: String,
        #[arg(long, default_value = "user:local")]
        sender: String,
    },
    /// Signal rendezvous helpers for scripting and debugging.
    Signal {
        #[command(subcommand)]
        command: SignalCommands,
    },
    /// Print the merged configuration as YAML.
    ShowConfig,
}

#[derive(Subcommand)]
pub enum SignalCommands {
    /// Publish a signal with a JSON object payload.
    Send {
        topic: String,
        /// JSON object, e.g. '{"n": 1}'.
        #[arg(default_value = "{}")]
        payload: String,
    },
    /// Wait for the next signal on a topic.
    Wait {
        topic: String,
        #[arg(long)]
        last_id: Option<String>,
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,
    },
}

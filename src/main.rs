// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, SignalCommands};
use weft_bus::{Bus, BusMessage, ObserverIndex, RedisBus, RedisBusOptions};
use weft_config::Config;
use weft_gateway::GatewayState;
use weft_model::{stream_topic, Envelope, StreamEvent};
use weft_signals::{install_hub, SignalHub, SignalPolicy};
use weft_worker::{run_loop, Worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = weft_config::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Gateway { bind } => run_gateway(config, bind).await,
        Commands::Worker { agent } => run_worker(config, agent).await,
        Commands::Send {
            content,
            recipient,
            conversation,
            sender,
        } => run_send(config, content, recipient, conversation, sender).await,
        Commands::Signal { command } => run_signal(config, command).await,
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
    }
}

async fn run_signal(config: Config, command: SignalCommands) -> anyhow::Result<()> {
    let bus = connect_plain(&config).await?;
    install_hub(Arc::new(SignalHub::new(
        Arc::new(bus),
        SignalPolicy::from_config(&config.signals),
    )));

    match command {
        SignalCommands::Send { topic, payload } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("payload must be a JSON object")?;
            let payload = payload
                .as_object()
                .cloned()
                .context("payload must be a JSON object")?;
            let receipt = weft_tools::signals::signal_send(&topic, Some(payload)).await?;
            println!("{}", serde_json::to_string(&receipt)?);
        }
        SignalCommands::Wait {
            topic,
            last_id,
            timeout_ms,
        } => {
            let reply =
                weft_tools::signals::signal_wait(&topic, last_id.as_deref(), timeout_ms).await?;
            println!("{}", serde_json::to_string(&reply)?);
        }
    }
    Ok(())
}

/// WEFT_LOG controls filtering when set; --verbose raises the default.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_env("WEFT_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn connect_plain(config: &Config) -> anyhow::Result<RedisBus> {
    RedisBus::connect(
        &config.redis.url,
        RedisBusOptions {
            stream_maxlen: config.redis.stream_maxlen,
            ..RedisBusOptions::default()
        },
    )
    .await
    .with_context(|| format!("connecting to {}", config.redis.url))
}

fn observer_index(config: &Config, bus: &RedisBus) -> ObserverIndex {
    if config.gateway.index_enabled {
        ObserverIndex::new(bus.connection(), config.gateway.index_ttl_days)
    } else {
        ObserverIndex::inactive()
    }
}

async fn run_gateway(config: Config, bind: Option<String>) -> anyhow::Result<()> {
    let bus = connect_plain(&config).await?;
    let index = observer_index(&config, &bus);
    let state = GatewayState::new(Arc::new(bus), index, config.gateway.max_event_bytes);
    let bind = bind.unwrap_or_else(|| config.gateway.bind.clone());
    weft_gateway::serve(&bind, state).await
}

async fn run_worker(config: Config, agent: Option<String>) -> anyhow::Result<()> {
    let agent_name = agent.unwrap_or_else(|| config.worker.agent_name.clone());

    // The inbound bus joins the consumer group so concurrent workers each
    // receive an envelope at most once; signal and stream traffic goes
    // through a plain (tail-read) client.
    let inbound: Arc<dyn Bus> = if config.worker.use_groups {
        Arc::new(
            RedisBus::connect(
                &config.redis.url,
                RedisBusOptions {
                    group_name: Some(config.worker.group.clone()),
                    consumer_name: Some(format!("worker-{}", uuid::Uuid::new_v4())),
                    stream_maxlen: config.redis.stream_maxlen,
                },
            )
            .await
            .with_context(|| format!("connecting to {}", config.redis.url))?,
        )
    } else {
        Arc::new(connect_plain(&config).await?)
    };

    let plain = connect_plain(&config).await?;
    let index = observer_index(&config, &plain);
    let hub = Arc::new(SignalHub::new(
        Arc::new(plain),
        SignalPolicy::from_config(&config.signals),
    ));
    install_hub(Arc::clone(&hub));

    let runner = weft_runner::from_config(&config.runner)?;
    info!(
        agent = %agent_name,
        groups = config.worker.use_groups,
        "starting worker"
    );

    let worker = Worker::new(agent_name, inbound, runner)
        .with_signals(hub)
        .with_observer_index(index)
        .with_auto_child_signal_done(config.worker.auto_child_signal_done);
    run_loop(worker, config.worker.read_limit).await;
    Ok(())
}

async fn run_send(
    config: Config,
    content: String,
    recipient: String,
    conversation: String,
    sender: String,
) -> anyhow::Result<()> {
    let bus = connect_plain(&config).await?;
    let envelope = Envelope::message(&conversation, &sender, &recipient, &content);

    let topics = weft_bus::routing::publish_to_topics(
        &bus,
        &recipient,
        &conversation,
        &envelope.id,
        &envelope.to_payload(),
    )
    .await?;

    // Mirror the gateway: make the inbound message stream-visible.
    let topic = stream_topic(&conversation);
    let event = StreamEvent::user_message(&conversation, &sender, &content);
    bus.publish(&topic, BusMessage::new(topic.clone(), event.to_payload()))
        .await?;

    println!(
        "{}",
        serde_json::json!({
            "status": "ok",
            "envelope_id": envelope.id,
            "published_to": topics,
        })
    );
    Ok(())
}

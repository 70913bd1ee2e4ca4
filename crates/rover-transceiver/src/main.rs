// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Rover Telemetry Transceiver CLI
//!
//! # Usage
//!
//! ```bash
//! # Defaults: rendezvous on localhost:7500, identity "car", LAN only
//! rover-transceiver
//!
//! # Override the rendezvous server and identity
//! rover-transceiver --rendezvous http://10.0.0.1:7500 --identity rover-2
//!
//! # Using configuration file
//! rover-transceiver --config transceiver.toml
//!
//! # Write a default configuration file
//! rover-transceiver gen-config --output transceiver.toml
//! ```

use bytes::Bytes;
use clap::{Parser, Subcommand};
use rover_transceiver::aggregator::services_from_list;
use rover_transceiver::connection::ConnectionManager;
use rover_transceiver::publisher::{drain_controller_queue, run_controller_publisher};
use rover_transceiver::stats::format_bytes;
use rover_transceiver::{
    ControlPlane, DispatchSettings, Dispatcher, InboundRouter, RelayStats, RelayStatsSnapshot,
    StreamAggregator, TransceiverConfig, TransceiverError, ZmqControlPlane, ZmqSocketFactory,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Rover Telemetry Transceiver
#[derive(Parser, Debug)]
#[command(name = "rover-transceiver")]
#[command(about = "Rover telemetry relay - on-board streams to the operator console over WebRTC")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rendezvous server base URL
    #[arg(long)]
    rendezvous: Option<String>,

    /// Connection identity announced to the rendezvous server
    #[arg(long)]
    identity: Option<String>,

    /// Use a public STUN server (WAN operation)
    #[arg(long)]
    external_relay: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "transceiver.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Handle subcommands
    if let Some(cmd) = args.command {
        init_logging(args.log_level.as_deref().unwrap_or("info"));
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;
    init_logging(&config.log_level);

    println!("Rover Telemetry Transceiver v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();
    println!("Identity:    {}", config.connection_identity);
    println!("Rendezvous:  {}", config.rendezvous_address);
    println!("Manager:     {}", config.control_plane_address);
    println!(
        "Channels:    {} / {} / {}",
        config.channels.meta, config.channels.control, config.channels.frame
    );
    println!();

    let stats = Arc::new(RelayStats::new());

    // Drive commands from the console
    let (controller_tx, controller_rx) = tokio::sync::mpsc::unbounded_channel();
    match config.controller_publish_address.clone() {
        Some(address) => {
            tokio::spawn(run_controller_publisher(address, controller_rx));
        }
        None => {
            tokio::spawn(drain_controller_queue(controller_rx));
        }
    }

    let control = Arc::new(ZmqControlPlane::new(
        config.control_plane_address.clone(),
        config.control_plane_timeout(),
    ));
    let aggregator = Arc::new(StreamAggregator::new(ZmqSocketFactory::new(
        tokio::runtime::Handle::current(),
    )));

    // Initial service list
    let services = control
        .get_all_services()
        .await
        .map_err(TransceiverError::ControlPlane)?;
    let initial = services_from_list(&services);
    for (service, endpoints) in &initial {
        println!("Service: {}", service);
        for endpoint in endpoints {
            println!("  {} -> {}", endpoint.name, endpoint.address);
        }
    }
    println!();
    aggregator.reconcile(&initial);

    let router = Arc::new(InboundRouter::new(controller_tx, control.clone(), stats.clone()));

    let mut manager = ConnectionManager::new(&config)?;
    {
        let router = router.clone();
        manager.on_channel_message(&config.channels.control, move |data: Bytes| {
            router.handle(&data)
        })?;
    }
    manager.on_channel_message(&config.channels.meta, |data: Bytes| {
        tracing::debug!("Meta channel message ({} bytes)", data.len());
    })?;
    manager.on_channel_message(&config.channels.frame, |data: Bytes| {
        tracing::debug!("Frame channel message ({} bytes)", data.len());
    })?;

    let session = Arc::new(manager.open().await?);
    println!("Session negotiated, waiting for connection...");

    if !session.wait_connected().await {
        tracing::warn!("Session ended before connecting ({})", session.state());
        session.close().await?;
        std::process::exit(0);
    }

    let dispatcher = Dispatcher::new(
        session.clone(),
        aggregator.clone(),
        control.clone(),
        stats.clone(),
        DispatchSettings::from(&config),
    );
    let handle = dispatcher.handle();
    let (outbound_task, refresh_task) = dispatcher.spawn();

    let tuning_task = config.tuning_input_address.clone().map(|address| {
        let router = router.clone();
        tokio::spawn(async move {
            if let Err(e) =
                rover_transceiver::tuning_input::serve_tuning_input(&address, router).await
            {
                tracing::error!("Tuning input harness on {} failed: {}", address, e);
            }
        })
    });

    // Stats reporting task
    let stats_interval = config.stats_interval_secs;
    if stats_interval > 0 {
        let stats = stats.clone();
        let stats_handle = handle.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                if !stats_handle.is_running() {
                    break;
                }
                print_stats(&stats.snapshot());
            }
        });
    }

    println!("Relaying. Press Ctrl+C to stop...");
    println!();

    tokio::select! {
        state = session.wait_terminal() => {
            tracing::warn!("Peer connection {}, shutting down", state);
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            println!("\nShutting down...");
        }
    }

    handle.stop();
    outbound_task.abort();
    refresh_task.abort();
    if let Some(task) = tuning_task {
        task.abort();
    }
    if let Err(e) = session.close().await {
        tracing::warn!("Error while closing session: {}", e);
    }
    aggregator.clear();

    println!("\nFinal Statistics:");
    print_stats(&stats.snapshot());

    std::process::exit(0);
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_config(args: &Args) -> Result<TransceiverConfig, TransceiverError> {
    let mut config = match args.config {
        Some(ref path) => TransceiverConfig::from_file(path)?,
        None => TransceiverConfig::default(),
    };

    // Command line overrides the file
    if let Some(ref rendezvous) = args.rendezvous {
        config.rendezvous_address = rendezvous.clone();
    }
    if let Some(ref identity) = args.identity {
        config.connection_identity = identity.clone();
    }
    if args.external_relay {
        config.use_external_relay = true;
    }
    if let Some(ref level) = args.log_level {
        config.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = TransceiverConfig {
        name: "example-rover".into(),
        controller_publish_address: Some("tcp://0.0.0.0:5600".into()),
        ..Default::default()
    };

    let toml_str = toml::to_string_pretty(&config)?;

    let content = format!(
        r#"# Rover Transceiver Configuration
# Generated by rover-transceiver gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match TransceiverConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Name:       {}", config.name);
            println!("Identity:   {}", config.connection_identity);
            println!("Rendezvous: {}", config.rendezvous_address);
            println!(
                "ICE:        {}",
                if config.use_external_relay {
                    config.ice_servers.join(", ")
                } else {
                    "LAN only".to_string()
                }
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(stats: &RelayStatsSnapshot) {
    println!("--- Relay Statistics ---");
    println!(
        "  Relayed: {} msgs ({:.1} msg/s), {} in {} segments, {} send errors",
        stats.messages_relayed,
        stats.messages_per_second(),
        format_bytes(stats.bytes_relayed),
        stats.segments_sent,
        stats.send_errors
    );
    println!(
        "  Control: {} refreshes, {} drive commands, {} tuning updates, {} unknown, {} manager errors, {} socket errors",
        stats.refreshes,
        stats.controller_commands,
        stats.tuning_updates,
        stats.unknown_inbound,
        stats.control_plane_errors,
        stats.socket_errors
    );
}

//! Interactive device simulator for the DRC gateway protocol.
//!
//! Runs a device session against an in-process loopback gateway and exposes
//! the original field-tool command set (`ping`, `stats`, `quit`).

mod config;
mod console;
mod gateway;

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::Map;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use drc_core::{DeviceIdentity, LinkState, Session};
use drc_transport::{Endpoint, MemoryBroker};

use config::{CliOverrides, Config};
use console::ConsoleHandler;

#[derive(Parser)]
#[command(name = "drc-device", version, about = "Device simulator for the DRC gateway")]
struct Cli {
    /// Device identifier
    #[arg(long)]
    device_id: Option<String>,

    /// Human-readable device name
    #[arg(long)]
    name: Option<String>,

    /// Device type: sensor, actuator, controller
    #[arg(long = "type")]
    device_type: Option<String>,

    /// Broker address
    #[arg(long)]
    broker: Option<String>,

    /// Broker port
    #[arg(long)]
    port: Option<u16>,

    /// Path to a config file (default: platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Info-level logging
    #[arg(short, long)]
    verbose: bool,

    /// Debug-level logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = Config::create_default_if_missing() {
        eprintln!("Warning: could not create default config: {e}");
    }
    let config = match Config::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: config error: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };
    let config = config.with_overrides(&CliOverrides {
        device_id: cli.device_id.clone(),
        name: cli.name.clone(),
        device_type: cli.device_type.clone(),
        broker: cli.broker.clone(),
        port: cli.port,
    });

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let identity = DeviceIdentity {
        device_id: config.identity.device_id.clone(),
        name: config.identity.name.clone(),
        device_type: config.identity.device_type.clone(),
    };
    let endpoint = Endpoint::new(config.broker.host.clone(), config.broker.port);

    // In-process broker plus a loopback gateway serving `ping`. The broker
    // endpoint from config is carried for parity with the real deployment.
    let broker = MemoryBroker::new();
    let gateway_task = gateway::spawn(&broker)
        .await
        .context("failed to start loopback gateway")?;

    let handler = Arc::new(ConsoleHandler::new(identity.device_id.clone()));
    let session = Arc::new(
        Session::new(identity, endpoint, Arc::new(broker.transport()), handler)
            .with_call_timeout(Duration::from_secs(config.calls.timeout_seconds)),
    );

    session.connect().await.context("connect failed")?;

    let driver = {
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(err) = session.drive().await {
                tracing::error!(%err, "event loop stopped");
            }
        })
    };
    let sweeper = {
        let session = session.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                session.sweep().await;
            }
        })
    };

    // Wait for the reply subscription before accepting commands.
    let mut state = session.watch_state();
    let connected = tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == LinkState::Connected),
    )
    .await;
    if connected.is_err() {
        eprintln!("Warning: not connected yet; calls will be rejected until the link is up.");
    }

    run_command_loop(&session).await?;

    sweeper.abort();
    session.disconnect().await.ok();
    driver.await.ok();
    gateway_task.abort();
    Ok(())
}

fn state_label(state: LinkState) -> &'static str {
    match state {
        LinkState::Disconnected => "disconnected",
        LinkState::Connecting => "connecting",
        LinkState::Connected => "connected",
    }
}

async fn run_command_loop(session: &Session) -> anyhow::Result<()> {
    println!();
    println!("+--- Commands ---------------------+");
    println!("|  ping     -- Ping gateway        |");
    println!("|  stats    -- Router statistics   |");
    println!("|  quit     -- Exit                |");
    println!("+----------------------------------+");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!(
            "[{}|{}] > ",
            session.identity().device_id,
            state_label(session.state())
        );
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(line) = line else { break }; // EOF

        match line.trim().to_lowercase().as_str() {
            "ping" => {
                println!("  Pinging gateway...");
                if let Err(err) = session.call("ping", Map::new()).await {
                    println!("  Call failed: {err}");
                }
            }
            "stats" => {
                let snap = session.stats();
                println!(
                    "  received={} results={} errors={} requests={} malformed={} orphaned={} pending={}",
                    snap.received,
                    snap.results,
                    snap.errors,
                    snap.requests,
                    snap.malformed,
                    snap.orphaned,
                    session.pending_calls()
                );
            }
            "quit" | "exit" | "q" => break,
            "" => continue,
            other => println!("  Unknown: '{other}'"),
        }
        // Give the reply a beat to land before the next prompt.
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    Ok(())
}

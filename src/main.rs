//! coherence-node daemon
//!
//! Loads configuration, builds the field service, keeps the field ticking,
//! accepts inbound bridges and dials the configured peers until ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use coherence_node::bridge::PeerListener;
use coherence_node::config::{sanitize_node_id, Config};
use coherence_node::{FieldEvent, FieldService};

#[derive(Parser)]
#[command(name = "coherence-node")]
#[command(about = "Field-coherence runtime for presence network nodes")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "coherence-node.toml")]
    config: String,

    /// Node ID (overrides config file)
    #[arg(long, env = "COHERENCE_NODE_ID")]
    node_id: Option<String>,

    /// Extra peer URL to bridge to, repeatable
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Listen for inbound bridges on this address
    #[arg(long, env = "COHERENCE_LISTEN")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("coherence_node=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting coherence-node");
    info!("Config file: {}", cli.config);

    let mut config = Config::load(std::path::Path::new(&cli.config))?;

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node.id = sanitize_node_id(&node_id);
    }
    if let Some(listen) = cli.listen {
        config.listener.enabled = true;
        config.listener.bind_addr = listen;
    }
    config.bridge.peers.extend(cli.peers);
    config.validate()?;

    info!("Node ID: {}", config.node.id);

    let service = Arc::new(FieldService::new(&config)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // --- Field ticker ---
    let ticker = {
        let service = service.clone();
        let mut shutdown = shutdown_rx.clone();
        let period = config.field.tick_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => { service.tick(); }
                    _ = shutdown.changed() => break,
                }
            }
        })
    };

    // --- Lease sweeper ---
    let sweeper = (config.lease.sweep_interval_secs > 0).then(|| {
        let service = service.clone();
        let mut shutdown = shutdown_rx.clone();
        let period = Duration::from_secs(config.lease.sweep_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => { service.leases().sweep(); }
                    _ = shutdown.changed() => break,
                }
            }
        })
    });

    // --- Field event log ---
    let mut events = service.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(FieldEvent::Breakthrough { coherence }) => info!(coherence, "Breakthrough"),
                Ok(FieldEvent::Warning { coherence }) => warn!(coherence, "Coherence warning"),
                Ok(FieldEvent::Crisis { coherence }) => warn!(coherence, "Coherence crisis"),
                Ok(FieldEvent::Updated { .. }) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Field event log lagged")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // --- Inbound bridges ---
    let listener = if config.listener.enabled {
        match PeerListener::bind(
            &config.listener.bind_addr,
            service.field().clone(),
            config.bridge.clone(),
        )
        .await
        {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!(addr = %config.listener.bind_addr, error = %e, "Listener failed to bind, running without it");
                None
            }
        }
    } else {
        info!("Peer listener is disabled");
        None
    };

    // --- Outbound bridges ---
    let bridges: Vec<_> = config
        .bridge
        .peers
        .iter()
        .map(|peer| service.start_bridge(peer, config.bridge.clone()))
        .collect();
    info!(peers = bridges.len(), "Bridges started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    let _ = shutdown_tx.send(true);
    for bridge in bridges {
        bridge.close().await;
    }
    if let Some(listener) = listener {
        listener.close().await;
    }
    ticker.await?;
    if let Some(sweeper) = sweeper {
        sweeper.await?;
    }
    event_log.abort();

    let state = service.get_field_state();
    info!(coherence = state.coherence, "Stopped");
    Ok(())
}

//! Solana Pair Monitor
//!
//! Streams activity for one (account, asset) pair over a `logsSubscribe`
//! feed, backfilling history since the last persisted cursor.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use solana_pair_monitor::{MonitoredPair, PairMonitor, StreamConfig};

/// Filter used when `RUST_LOG` is unset
const DEFAULT_LOG_FILTER: &str = "info,solana_pair_monitor=debug";

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(env_flag("LOG_JSON"));

    info!("🚀 Starting Solana pair monitor...");

    let config = StreamConfig::from_env()?;
    let pair = MonitoredPair::new(
        std::env::var("MONITOR_ACCOUNT").context("MONITOR_ACCOUNT not set")?,
        std::env::var("MONITOR_ASSET").context("MONITOR_ASSET not set")?,
    )?;

    info!("✅ Configuration loaded successfully");
    info!("📍 Account: {}", pair.account());
    info!("🪙 Asset: {}", pair.asset());
    info!("📡 RPC: {} | WS: {}", config.rpc_url, config.ws_url);
    info!("💾 Cursors: {}", config.cursor_dir.display());

    let (monitor, mut events) = PairMonitor::from_config(config)?;
    monitor.start(pair).await?;

    // One JSON line per activity event
    let printer = tokio::spawn(async move {
        let mut printed = 0u64;
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => {
                    printed += 1;
                    info!(target: "activity", "{}", line);
                }
                Err(e) => error!("Failed to serialize event {}: {:?}", event.identifier, e),
            }
        }
        printed
    });

    info!("🎯 Monitoring {}. Press Ctrl+C to stop.", monitor.current_pair().map(|p| p.short()).unwrap_or_default());
    let signal = shutdown_signal().await;
    info!("🛑 {} received, stopping monitor...", signal);

    // Dropping the monitor closes the event channel, which ends the printer
    monitor.stop();
    drop(monitor);
    match tokio::time::timeout(Duration::from_secs(5), printer).await {
        Ok(Ok(printed)) => info!("📊 {} events printed", printed),
        Ok(Err(e)) => error!("Event printer failed: {:?}", e),
        Err(_) => warn!("Event printer still draining, exiting anyway"),
    }

    info!("👋 Monitor stopped gracefully");
    Ok(())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Install the global subscriber: JSON lines for log shippers, or
/// human-readable output with targets for a terminal
fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json().flatten_event(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

/// Resolve on Ctrl+C or SIGTERM, naming the signal that arrived
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "Ctrl+C",
        _ = terminate => "SIGTERM",
    }
}

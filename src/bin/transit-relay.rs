//! Entry point for the `transit-relay` binary: parses configuration,
//! wires up usage sinks, and runs the TCP (and optionally WebSocket)
//! accept loops until the process is asked to stop.

use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use transit_relay::memory::MemoryUsageSink;
use transit_relay::net::tcp;
use transit_relay::{RelayConfig, TransitCore, UsageSink, UsageSinkKind, UsageTracker};

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn build_sinks(config: &RelayConfig) -> Vec<Box<dyn UsageSink>> {
    let mut sinks: Vec<Box<dyn UsageSink>> = Vec::new();
    for kind in &config.usage_sinks {
        match kind {
            UsageSinkKind::Memory => sinks.push(Box::new(MemoryUsageSink::new())),
            UsageSinkKind::LogFile => {
                match transit_relay::log_file::LogFileUsageSink::open(&config.usage_log_path) {
                    Ok(sink) => sinks.push(Box::new(sink)),
                    Err(err) => error!(error = %err, path = ?config.usage_log_path, "failed to open usage log"),
                }
            }
            #[cfg(feature = "database")]
            UsageSinkKind::Database => {
                match transit_relay::database::DatabaseUsageSink::open(&config.usage_db_path) {
                    Ok(sink) => sinks.push(Box::new(sink)),
                    Err(err) => error!(error = %err, path = ?config.usage_db_path, "failed to open usage database"),
                }
            }
            #[cfg(not(feature = "database"))]
            UsageSinkKind::Database => {
                error!("database usage sink requested but the `database` feature is disabled");
            }
        }
    }
    sinks
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RelayConfig::parse();
    let _guard = transit_relay::init(&config);

    let usage = UsageTracker::spawn(build_sinks(&config));
    let core = TransitCore::new(usage, config.blur_usage_seconds, now_unix);

    let stats_core = core.clone();
    let stats_interval = config.stats_interval_seconds;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(stats_interval.max(1)));
        loop {
            ticker.tick().await;
            let snapshot = stats_core.snapshot_stats();
            info!(pending = snapshot.pending, active = snapshot.active, "stats");
        }
    });

    let tcp_core = core.clone();
    let tcp_addr = config.tcp_listen.clone();
    let tcp_task = tokio::spawn(async move { tcp::serve(&tcp_addr, tcp_core).await });

    #[cfg(feature = "websocket")]
    let ws_task = config.ws_listen.clone().map(|addr| {
        let ws_core = core.clone();
        tokio::spawn(async move { transit_relay::net::ws::serve(&addr, ws_core).await })
    });

    #[cfg(not(feature = "websocket"))]
    if config.ws_listen.is_some() {
        error!("--ws-listen was given but the `websocket` feature is disabled");
    }

    tokio::select! {
        result = tcp_task => {
            if let Ok(Err(err)) = result {
                error!(error = %err, "tcp listener exited");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    #[cfg(feature = "websocket")]
    if let Some(task) = ws_task {
        task.abort();
    }

    Ok(())
}

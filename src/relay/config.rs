//! Runtime configuration, parsed from the command line by the
//! `transit-relay` binary and passed into `TransitCore`'s callers.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Which usage sink(s) to wire up. Repeatable: `--usage-sink memory
/// --usage-sink log-file` runs both.
#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
pub enum UsageSinkKind {
    Memory,
    LogFile,
    Database,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "transit-relay", about = "A magic-wormhole transit relay")]
pub struct RelayConfig {
    /// Address to accept line-framed TCP handshakes on.
    #[arg(long, default_value = "0.0.0.0:4001")]
    pub tcp_listen: String,

    /// Address to accept WebSocket handshakes on. Omit to disable the
    /// WebSocket listener entirely.
    #[arg(long)]
    pub ws_listen: Option<String>,

    /// Usage sinks to enable.
    #[arg(long = "usage-sink", value_enum)]
    pub usage_sinks: Vec<UsageSinkKind>,

    /// Path for the `log-file` usage sink.
    #[arg(long, default_value = "transit-usage.log")]
    pub usage_log_path: PathBuf,

    /// Path for the `database` usage sink.
    #[arg(long, default_value = "transit-usage.sqlite")]
    pub usage_db_path: PathBuf,

    /// Rounds usage timestamps down to this many seconds, so the usage
    /// log can't be correlated to the wall clock precisely. `0` disables
    /// blurring.
    #[arg(long, default_value_t = 3600)]
    pub blur_usage_seconds: u64,

    /// Attempted file-descriptor soft limit at startup. Best-effort: a
    /// failure to raise it is logged, not fatal.
    #[arg(long, default_value_t = 10_000)]
    pub desired_nofile: u64,

    /// Interval, in seconds, between periodic stats log lines.
    #[arg(long, default_value_t = 300)]
    pub stats_interval_seconds: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            tcp_listen: "0.0.0.0:4001".to_string(),
            ws_listen: None,
            usage_sinks: Vec::new(),
            usage_log_path: PathBuf::from("transit-usage.log"),
            usage_db_path: PathBuf::from("transit-usage.sqlite"),
            blur_usage_seconds: 3600,
            desired_nofile: 10_000,
            stats_interval_seconds: 300,
        }
    }
}

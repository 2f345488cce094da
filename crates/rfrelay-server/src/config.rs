//! Relay configuration.

use clap::{Parser, ValueEnum};
use rfrelay_core::FullDocument;
use std::path::PathBuf;
use std::time::Duration;

/// Default bind host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 4000;

/// Default store directory.
pub const DEFAULT_DATA_PATH: &str = "./data";

/// Default and maximum number of readings returned by `/getRF`.
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 50;

/// Default per-subscriber outbound queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default number of change log entries kept by the prune task.
pub const DEFAULT_CHANGELOG_RETENTION: usize = 100_000;

/// Default prune interval in seconds.
pub const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 300;

/// Default time allowed for one WebSocket frame write.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;

/// Command-line form of [`FullDocument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FullDocumentArg {
    /// Re-read the record after each change.
    Lookup,
    /// Use the post-image stored with the change.
    Recorded,
}

impl From<FullDocumentArg> for FullDocument {
    fn from(arg: FullDocumentArg) -> Self {
        match arg {
            FullDocumentArg::Lookup => FullDocument::UpdateLookup,
            FullDocumentArg::Recorded => FullDocument::Recorded,
        }
    }
}

/// Command-line arguments for the relay.
#[derive(Parser, Debug)]
#[command(name = "rfrelay")]
#[command(version, about = "Real-time RF reading relay", long_about = None)]
pub struct Args {
    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind to.
    #[arg(long, env = "RFRELAY_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Path to the reading store directory.
    #[arg(short, long, env = "RFRELAY_DATA", default_value = DEFAULT_DATA_PATH)]
    pub data_path: PathBuf,

    /// Maximum readings returned by the snapshot endpoint.
    #[arg(long, default_value_t = DEFAULT_SNAPSHOT_LIMIT)]
    pub snapshot_limit: usize,

    /// Outbound queue capacity per live subscriber.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// How the change feed resolves the changed document.
    #[arg(long, value_enum, default_value_t = FullDocumentArg::Lookup)]
    pub full_document: FullDocumentArg,

    /// Change log entries to keep.
    #[arg(long, default_value_t = DEFAULT_CHANGELOG_RETENTION)]
    pub changelog_retention: usize,

    /// Change log prune interval in seconds. Set to 0 to disable pruning.
    #[arg(long, default_value_t = DEFAULT_PRUNE_INTERVAL_SECS)]
    pub prune_interval: u64,

    /// WebSocket send timeout in milliseconds.
    #[arg(long, default_value_t = DEFAULT_SEND_TIMEOUT_MS)]
    pub send_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Host to bind to.
    pub host: String,

    /// Port to listen on.
    pub port: u16,

    /// Path to the reading store directory.
    pub data_path: PathBuf,

    /// Maximum readings returned by `/getRF`.
    pub snapshot_limit: usize,

    /// Outbound queue capacity per live subscriber.
    pub queue_capacity: usize,

    /// Full-document policy for the change feed.
    pub full_document: FullDocument,

    /// Change log entries kept by the prune task.
    pub changelog_retention: usize,

    /// Interval between prune runs. None disables pruning.
    pub prune_interval: Option<Duration>,

    /// Time allowed for one WebSocket frame write before the subscriber is dropped.
    pub send_timeout: Duration,
}

impl RelayConfig {
    /// Create a configuration storing readings under `data_path`.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            data_path: data_path.into(),
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            full_document: FullDocument::UpdateLookup,
            changelog_retention: DEFAULT_CHANGELOG_RETENTION,
            prune_interval: Some(Duration::from_secs(DEFAULT_PRUNE_INTERVAL_SECS)),
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
        }
    }

    /// Set the bind host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the snapshot limit.
    pub fn with_snapshot_limit(mut self, limit: usize) -> Self {
        self.snapshot_limit = limit;
        self
    }

    /// Set the per-subscriber queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the full-document policy.
    pub fn with_full_document(mut self, full_document: FullDocument) -> Self {
        self.full_document = full_document;
        self
    }

    /// Set the change log retention.
    pub fn with_changelog_retention(mut self, entries: usize) -> Self {
        self.changelog_retention = entries;
        self
    }

    /// Set the prune interval.
    pub fn with_prune_interval(mut self, interval: Duration) -> Self {
        self.prune_interval = Some(interval);
        self
    }

    /// Disable change log pruning.
    pub fn without_pruning(mut self) -> Self {
        self.prune_interval = None;
        self
    }

    /// Set the WebSocket send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Address to bind the HTTP listener to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_PATH)
    }
}

impl From<Args> for RelayConfig {
    fn from(args: Args) -> Self {
        let prune_interval = if args.prune_interval == 0 {
            None
        } else {
            Some(Duration::from_secs(args.prune_interval))
        };

        Self {
            host: args.host,
            port: args.port,
            data_path: args.data_path,
            snapshot_limit: args.snapshot_limit,
            queue_capacity: args.queue_capacity.max(1),
            full_document: args.full_document.into(),
            changelog_retention: args.changelog_retention,
            prune_interval,
            send_timeout: Duration::from_millis(args.send_timeout_ms),
        }
    }
}

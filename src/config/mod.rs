mod file_config;

pub use file_config::{EventQueueConfig, FileConfig};

use crate::events::BackoffStrategy;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub storage_dir: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub batch_size: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub max_concurrency: Option<usize>,
    pub enable_scheduled_events: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    /// Admin HTTP port, `None` keeps the server off
    pub metrics_port: Option<u16>,

    // Feature configs (with defaults)
    pub event_queue: EventQueueSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .unwrap_or_else(|| PathBuf::from("events.db"));

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let storage_dir = file
            .storage_dir
            .map(PathBuf::from)
            .or_else(|| cli.storage_dir.clone())
            .unwrap_or_else(|| PathBuf::from("storage"));

        let metrics_port = file.metrics_port.or(cli.metrics_port);

        // Event queue settings - merge file config with CLI and defaults
        let defaults = EventQueueSettings::default();
        let eq_file = file.event_queue.unwrap_or_default();

        let backoff_strategy = match eq_file.backoff_strategy {
            Some(s) => match parse_backoff_strategy(&s) {
                Some(strategy) => strategy,
                None => bail!(
                    "Invalid backoff_strategy '{}', expected 'exponential' or 'fixed'",
                    s
                ),
            },
            None => defaults.backoff_strategy,
        };

        let event_queue = EventQueueSettings {
            batch_size: eq_file
                .batch_size
                .or(cli.batch_size)
                .unwrap_or(defaults.batch_size),
            poll_interval_ms: eq_file
                .poll_interval_ms
                .or(cli.poll_interval_ms)
                .unwrap_or(defaults.poll_interval_ms),
            poll_jitter_ms: eq_file.poll_jitter_ms.unwrap_or(defaults.poll_jitter_ms),
            max_concurrency: eq_file
                .max_concurrency
                .or(cli.max_concurrency)
                .unwrap_or(defaults.max_concurrency),
            enable_scheduled_events: eq_file
                .enable_scheduled_events
                .or(cli.enable_scheduled_events)
                .unwrap_or(defaults.enable_scheduled_events),
            default_max_retries: eq_file
                .default_max_retries
                .unwrap_or(defaults.default_max_retries),
            default_timeout_ms: eq_file
                .default_timeout_ms
                .unwrap_or(defaults.default_timeout_ms),
            initial_backoff_ms: eq_file
                .initial_backoff_ms
                .unwrap_or(defaults.initial_backoff_ms),
            max_backoff_ms: eq_file.max_backoff_ms.unwrap_or(defaults.max_backoff_ms),
            backoff_multiplier: eq_file
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
            backoff_strategy,
            stale_processing_threshold_secs: eq_file
                .stale_processing_threshold_secs
                .unwrap_or(defaults.stale_processing_threshold_secs),
        };
        event_queue.validate()?;

        Ok(Self {
            db_path,
            storage_dir,
            metrics_port,
            event_queue,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EventQueueSettings {
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    pub poll_jitter_ms: u64,
    pub max_concurrency: usize,
    pub enable_scheduled_events: bool,
    pub default_max_retries: u32,
    pub default_timeout_ms: u64,
    // Backoff settings
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_strategy: BackoffStrategy,
    pub stale_processing_threshold_secs: u64,
}

impl EventQueueSettings {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("event_queue.batch_size must be greater than 0");
        }
        if self.max_concurrency == 0 {
            bail!("event_queue.max_concurrency must be greater than 0");
        }
        if self.poll_interval_ms == 0 {
            bail!("event_queue.poll_interval_ms must be greater than 0");
        }
        if self.default_max_retries == 0 {
            bail!("event_queue.default_max_retries must be greater than 0");
        }
        if self.default_timeout_ms == 0 {
            bail!("event_queue.default_timeout_ms must be greater than 0");
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            bail!(
                "event_queue.backoff_multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            );
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            bail!("event_queue.max_backoff_ms must not be lower than initial_backoff_ms");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_jitter(&self) -> Duration {
        Duration::from_millis(self.poll_jitter_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn stale_processing_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_processing_threshold_secs)
    }
}

impl Default for EventQueueSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval_ms: 5000,
            poll_jitter_ms: 250,
            max_concurrency: 5,
            enable_scheduled_events: true,
            default_max_retries: 3,
            default_timeout_ms: 30_000,
            initial_backoff_ms: 1000,
            max_backoff_ms: 3_600_000, // 1 hour
            backoff_multiplier: 2.0,
            backoff_strategy: BackoffStrategy::Exponential,
            stale_processing_threshold_secs: 3600,
        }
    }
}

/// Parses a backoff strategy name. Uses clap's ValueEnum trait for parsing.
fn parse_backoff_strategy(s: &str) -> Option<BackoffStrategy> {
    BackoffStrategy::from_str(s, true).ok()
}

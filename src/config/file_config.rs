use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub storage_dir: Option<String>,
    pub metrics_port: Option<u16>,

    // Feature configs
    pub event_queue: Option<EventQueueConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct EventQueueConfig {
    pub batch_size: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub poll_jitter_ms: Option<u64>,
    pub max_concurrency: Option<usize>,
    pub enable_scheduled_events: Option<bool>,
    pub default_max_retries: Option<u32>,
    pub default_timeout_ms: Option<u64>,
    // Backoff settings
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    /// "exponential" or "fixed"
    pub backoff_strategy: Option<String>,
    pub stale_processing_threshold_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
db_path = "/var/lib/events.db"

[event_queue]
batch_size = 25
backoff_strategy = "fixed"
"#
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.db_path.as_deref(), Some("/var/lib/events.db"));
        assert!(config.storage_dir.is_none());

        let queue = config.event_queue.unwrap();
        assert_eq!(queue.batch_size, Some(25));
        assert_eq!(queue.backoff_strategy.as_deref(), Some("fixed"));
        assert!(queue.poll_interval_ms.is_none());
    }

    #[test]
    fn test_load_invalid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "batch_size = [").unwrap();
        let err = FileConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = FileConfig::load(Path::new("/nonexistent/events.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}

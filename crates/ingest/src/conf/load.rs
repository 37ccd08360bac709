//! Load — config loading from file and environment variables.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::model::PipelineConfig;

impl PipelineConfig {
    /// Load configuration from file or environment variables
    /// Priority: Environment Variables > Config File > Defaults
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = std::env::var("INGEST_CONFIG_FILE")
            .unwrap_or_else(|_| "/etc/ingest/pipeline.toml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!("Loading configuration from: {}", config_path);
            Self::from_file(&config_path)?
        } else {
            tracing::info!(
                "Config file not found at {}, using environment variables",
                config_path
            );
            Self::from_env()
        };

        // Environment variables override file config for critical settings
        if let Some(value) = env_parse("INGEST_MAX_CONCURRENT") {
            config.max_concurrent = value;
        }
        if let Some(value) = env_parse("INGEST_TICK_INTERVAL_MS") {
            config.tick_interval_ms = value;
        }
        if let Some(value) = env_parse("INGEST_CHUNK_SIZE_BYTES") {
            config.chunk_size_bytes = value;
        }
        if let Some(value) = env_parse("INGEST_WORKER_COUNT") {
            config.worker_count = value;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config: PipelineConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = env_parse("INGEST_MAX_CONCURRENT") {
            config.max_concurrent = value;
        }
        if let Some(value) = env_parse("INGEST_TICK_INTERVAL_MS") {
            config.tick_interval_ms = value;
        }
        if let Some(value) = env_parse("INGEST_CHUNK_SIZE_BYTES") {
            config.chunk_size_bytes = value;
        }
        if let Some(value) = env_parse("INGEST_WORKER_COUNT") {
            config.worker_count = value;
        }
        if let Some(value) = env_parse("INGEST_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = value;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

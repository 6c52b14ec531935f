// rust/wds-core/src/config.rs

//! Configuration for shard readers and the threaded pipeline.
//!
//! Configuration is parsed from TOML, can be overridden through `WDS_*`
//! environment variables, and is validated before use.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, WdsError};

// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WdsConfig {
    pub reader: ReaderConfig,
    pub pipeline: PipelineConfig,
    pub opener: OpenerConfig,
}

/// Order in which pending shard descriptors are consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardOrder {
    /// Most recently added descriptor is opened first.
    #[default]
    Lifo,
    /// Descriptors are opened in the order they were added.
    Fifo,
}

impl FromStr for ShardOrder {
    type Err = WdsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "lifo" => Ok(Self::Lifo),
            "fifo" => Ok(Self::Fifo),
            other => Err(WdsError::config(format!(
                "shard order must be 'lifo' or 'fifo', got '{}'",
                other
            ))),
        }
    }
}

/// Sequential reader options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Consumption order of the pending shard list.
    pub shard_order: ShardOrder,
    /// Number of samples buffered ahead by the async reader.
    pub prefetch_samples: usize,
}

/// Threaded pipeline options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Threads that open shards and decode tar entries.
    pub reader_threads: usize,
    /// Threads that group entries into samples. Zero groups inside the readers.
    pub grouper_threads: usize,
    /// Capacity of the shard descriptor queue.
    pub shard_queue_capacity: usize,
    /// Capacity of each entry queue between readers and groupers.
    pub entry_queue_capacity: usize,
    /// Capacity of the output sample queue.
    pub sample_queue_capacity: usize,
    // Interval at which blocked workers re-check the running flag.
    pub poll_interval_ms: u64,
    // Default wait used by `ShardPipeline::next`.
    pub next_timeout_ms: u64,
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn next_timeout(&self) -> Duration {
        Duration::from_millis(self.next_timeout_ms)
    }
}

/// Shard opener options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenerConfig {
    // Read buffer size in bytes for local files.
    pub buffer_size: usize,
    // Shell used to run `pipe:` commands.
    pub shell: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            shard_order: ShardOrder::Lifo,
            prefetch_samples: 4,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reader_threads: 1,
            grouper_threads: 1,
            shard_queue_capacity: 10_000,
            entry_queue_capacity: 1000,
            sample_queue_capacity: 1000,
            poll_interval_ms: 10,
            next_timeout_ms: 2000,
        }
    }
}

impl Default for OpenerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024, // 64 KB
            shell: "sh".to_string(),
        }
    }
}

impl FromStr for WdsConfig {
    type Err = WdsError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| WdsError::config_with_source("failed to parse TOML config", e))
    }
}

impl WdsConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            WdsError::config_with_source(
                format!("failed to read config file '{}'", path.display()),
                e,
            )
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Variables are prefixed with `WDS_` followed by the section and field
    // name, e.g. `WDS_PIPELINE_READER_THREADS` or `WDS_READER_SHARD_ORDER`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Reader overrides
        if let Ok(val) = std::env::var("WDS_READER_SHARD_ORDER") {
            if let Ok(order) = val.parse() {
                self.reader.shard_order = order;
            }
        }
        if let Ok(val) = std::env::var("WDS_READER_PREFETCH_SAMPLES") {
            if let Ok(v) = val.parse() {
                self.reader.prefetch_samples = v;
            }
        }

        // Pipeline overrides
        if let Ok(val) = std::env::var("WDS_PIPELINE_READER_THREADS") {
            if let Ok(v) = val.parse() {
                self.pipeline.reader_threads = v;
            }
        }
        if let Ok(val) = std::env::var("WDS_PIPELINE_GROUPER_THREADS") {
            if let Ok(v) = val.parse() {
                self.pipeline.grouper_threads = v;
            }
        }
        if let Ok(val) = std::env::var("WDS_PIPELINE_SHARD_QUEUE_CAPACITY") {
            if let Ok(v) = val.parse() {
                self.pipeline.shard_queue_capacity = v;
            }
        }
        if let Ok(val) = std::env::var("WDS_PIPELINE_ENTRY_QUEUE_CAPACITY") {
            if let Ok(v) = val.parse() {
                self.pipeline.entry_queue_capacity = v;
            }
        }
        if let Ok(val) = std::env::var("WDS_PIPELINE_SAMPLE_QUEUE_CAPACITY") {
            if let Ok(v) = val.parse() {
                self.pipeline.sample_queue_capacity = v;
            }
        }
        if let Ok(val) = std::env::var("WDS_PIPELINE_POLL_INTERVAL_MS") {
            if let Ok(v) = val.parse() {
                self.pipeline.poll_interval_ms = v;
            }
        }
        if let Ok(val) = std::env::var("WDS_PIPELINE_NEXT_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.pipeline.next_timeout_ms = v;
            }
        }

        // Opener overrides
        if let Ok(val) = std::env::var("WDS_OPENER_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.opener.buffer_size = v;
            }
        }
        if let Ok(val) = std::env::var("WDS_OPENER_SHELL") {
            self.opener.shell = val;
        }

        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.reader.prefetch_samples == 0 {
            return Err(WdsError::config(
                "reader.prefetch_samples must be greater than 0",
            ));
        }

        let pipeline = &self.pipeline;
        if pipeline.reader_threads == 0 {
            return Err(WdsError::config(
                "pipeline.reader_threads must be greater than 0",
            ));
        }
        if pipeline.shard_queue_capacity == 0
            || pipeline.entry_queue_capacity == 0
            || pipeline.sample_queue_capacity == 0
        {
            return Err(WdsError::config(
                "pipeline queue capacities must be greater than 0",
            ));
        }
        if pipeline.poll_interval_ms == 0 {
            return Err(WdsError::config(
                "pipeline.poll_interval_ms must be greater than 0",
            ));
        }
        if pipeline.next_timeout_ms == 0 {
            return Err(WdsError::config(
                "pipeline.next_timeout_ms must be greater than 0",
            ));
        }

        if self.opener.buffer_size == 0 {
            return Err(WdsError::config(
                "opener.buffer_size must be greater than 0",
            ));
        }
        if self.opener.shell.trim().is_empty() {
            return Err(WdsError::config("opener.shell must not be empty"));
        }

        Ok(())
    }
}

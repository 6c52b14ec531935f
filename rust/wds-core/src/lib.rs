// rust/wds-core/src/lib.rs

//! WebDataset shard reading - Core Library
//!
//! This crate reads training samples out of tar shards. A shard is a plain
//! tar archive in which consecutive files sharing a basename form one
//! sample (`0001.jpg` + `0001.cls`). Shards are read sequentially with a
//! [`ShardSequencer`] or on worker threads with a [`ShardPipeline`].

pub mod config;
pub mod error;
pub mod opener;

// Re-export commonly used types for convenience
pub use config::{ShardOrder, WdsConfig};
pub use error::{Result, WdsError};
pub use opener::{LocalOpener, ShardOpener, ShardStream};

pub mod archive;
pub use archive::{ArchiveDemuxer, Entry};

pub mod dataset;
pub use dataset::{AsyncSampleReader, Sample, SampleGrouper, ShardSequencer};

pub mod pipeline;
pub use pipeline::{BoundedChannel, MapStage, ShardInput, ShardPipeline};

#[cfg(test)]
mod testutil;

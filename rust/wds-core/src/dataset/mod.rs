// rust/wds-core/src/dataset/mod.rs

//! Samples, grouping and shard sequencing.
//!
//! This module turns decoded tar entries into training samples and chains
//! many shards into one continuous sample stream. The shard list may grow
//! lazily through a refill callback, which allows effectively unbounded
//! datasets.
//!
//! # Example
//!
//! ```no_run
//! use wds_core::dataset::ShardSequencer;
//! use wds_core::opener::LocalOpener;
//! use std::sync::Arc;
//!
//! let mut sequencer = ShardSequencer::new(Arc::new(LocalOpener::default()));
//! sequencer.set_shards(["shard-000000.tar", "pipe:curl -s http://host/shard-000001.tar"]);
//!
//! while let Some(sample) = sequencer.next()? {
//!     let label = sample.get("cls");
//!     // Decode sample.get("jpg") ...
//! }
//! # Ok::<(), wds_core::WdsError>(())
//! ```

mod grouper;
mod prefetch;
mod sample;
mod sequencer;

pub(crate) use grouper::GroupBuilder;
pub use grouper::{split_key, SampleGrouper};
pub use prefetch::AsyncSampleReader;
pub use sample::{Sample, KEY_FIELD};
pub use sequencer::{RefillFn, ShardSequencer};
pub use crate::config::ShardOrder;

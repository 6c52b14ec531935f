// rust/wds-core/src/pipeline/mod.rs

//! Threaded stages connected by bounded queues.
//!
//! Every queue between stages is a [`BoundedChannel`], so a slow consumer
//! applies backpressure all the way back to [`ShardPipeline::add_shard`].
//! Workers check a shared running flag between bounded waits; closing a
//! stage clears the flag and joins the workers as they exit.

mod channel;
mod map;
mod stage;
mod threaded;

pub use channel::{BoundedChannel, Envelope};
pub use map::MapStage;
pub use stage::{StageControl, WorkerSet};
pub use threaded::{ShardInput, ShardPipeline};

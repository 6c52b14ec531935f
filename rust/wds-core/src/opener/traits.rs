// rust/wds-core/src/opener/traits.rs

use std::io::Read;

use crate::error::Result;

/// Descriptor prefix marking a shell command whose stdout is the shard.
pub const PIPE_PREFIX: &str = "pipe:";

/// A sequential byte-stream over one shard.
pub type ShardStream = Box<dyn Read + Send>;

/// Returns true if the descriptor names a shell command rather than a path.
pub fn is_pipe(descriptor: &str) -> bool {
    descriptor.starts_with(PIPE_PREFIX)
}

/// Turns a shard descriptor into a byte-stream.
///
/// # Object Safety
///
/// This trait is object-safe and is shared between threads as
/// `Arc<dyn ShardOpener>`.
pub trait ShardOpener: Send + Sync {
    /// Opens the shard named by `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns `WdsError::Open` if the stream cannot be obtained.
    fn open(&self, descriptor: &str) -> Result<ShardStream>;
}

// rust/wds-core/src/dataset/prefetch.rs

//! Async consumption of a shard sequence.
//!
//! Shard reads are blocking, so the sequencer runs on a tokio blocking task
//! and hands samples over through a bounded channel. The channel bound is the
//! number of samples decoded ahead of the consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::sample::Sample;
use super::sequencer::ShardSequencer;
use crate::error::Result;

type PrefetchItem = Result<Sample>;

/// Reads samples from a [`ShardSequencer`] in the background.
///
/// Shard errors are delivered in stream order as `Err` items; reading then
/// carries on with the next shard, as the sequencer itself does.
pub struct AsyncSampleReader {
    /// Receiver for prefetched samples.
    receiver: mpsc::Receiver<PrefetchItem>,
    /// Asks the background task to stop after its current sample.
    stop_flag: Arc<AtomicBool>,
    task_handle: Option<JoinHandle<()>>,
    exhausted: bool,
}

impl AsyncSampleReader {
    /// Starts reading `sequencer` ahead by up to `buffer_size` samples.
    ///
    /// Note: This must be called from within a tokio runtime.
    pub fn new(mut sequencer: ShardSequencer, buffer_size: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_clone = stop_flag.clone();

        let task_handle = tokio::task::spawn_blocking(move || {
            loop {
                if stop_flag_clone.load(Ordering::Relaxed) {
                    break;
                }

                let item = match sequencer.next() {
                    Ok(Some(sample)) => Ok(sample),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Shard failed during prefetch: {}", e);
                        Err(e)
                    }
                };
                if sender.blocking_send(item).is_err() {
                    break; // Receiver dropped
                }
            }
            tracing::debug!(
                "Prefetch finished after {} sample(s) from {} shard(s)",
                sequencer.samples_yielded(),
                sequencer.shards_opened()
            );
        });

        Self {
            receiver,
            stop_flag,
            task_handle: Some(task_handle),
            exhausted: false,
        }
    }

    /// Gets the next sample, or `Ok(None)` once every shard is read.
    pub async fn next(&mut self) -> Result<Option<Sample>> {
        if self.exhausted {
            return Ok(None);
        }

        match self.receiver.recv().await {
            Some(Ok(sample)) => Ok(Some(sample)),
            Some(Err(e)) => Err(e),
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Stops prefetching and waits for the background task to exit.
    pub async fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.receiver.close();
        self.exhausted = true;
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for AsyncSampleReader {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}

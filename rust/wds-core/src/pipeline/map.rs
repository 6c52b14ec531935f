// rust/wds-core/src/pipeline/map.rs

use std::sync::Arc;
use std::time::Duration;

use super::channel::BoundedChannel;
use super::stage::{StageControl, WorkerSet};
use crate::error::{Result, WdsError};

/// A pool of threads applying one function to every queued item.
///
/// Input and output queues are both bounded by `capacity`, so a slow
/// consumer eventually blocks [`add`](Self::add). Output order follows
/// completion order, not input order.
pub struct MapStage<IN, OUT> {
    control: StageControl,
    input: BoundedChannel<IN>,
    output: BoundedChannel<OUT>,
    workers: WorkerSet,
}

impl<IN, OUT> MapStage<IN, OUT>
where
    IN: Send + 'static,
    OUT: Send + 'static,
{
    pub fn start<F>(threads: usize, capacity: usize, poll_interval: Duration, f: F) -> Result<Self>
    where
        F: Fn(IN) -> OUT + Send + Sync + 'static,
    {
        if threads == 0 {
            return Err(WdsError::config("map stage needs at least one thread"));
        }

        let mut stage = Self {
            control: StageControl::new(poll_interval),
            input: BoundedChannel::new(capacity),
            output: BoundedChannel::new(capacity),
            workers: WorkerSet::new("wds-map"),
        };

        let f = Arc::new(f);
        for id in 0..threads {
            let f = f.clone();
            let control = stage.control.clone();
            let input = stage.input.clone();
            let output = stage.output.clone();
            stage.workers.spawn("worker", id, move || {
                while let Some(item) = control.recv(&input) {
                    if !control.send(&output, f(item)) {
                        break;
                    }
                }
            })?;
        }
        Ok(stage)
    }

    /// Queues an item, blocking while the input queue is full.
    pub fn add(&self, item: IN) -> Result<()> {
        if self.control.send(&self.input, item) {
            Ok(())
        } else {
            Err(WdsError::pipeline("map stage is finished"))
        }
    }

    /// Waits up to `timeout` for a result.
    pub fn get(&self, timeout: Duration) -> Option<OUT> {
        self.output.pop_timeout(timeout)
    }

    pub fn try_get(&self) -> Option<OUT> {
        self.output.try_pop()
    }

    /// Stops the workers and joins them. Pending items are dropped.
    pub fn finish(&mut self) {
        if !self.workers.is_empty() {
            self.workers.shutdown(&self.control);
        }
    }
}

impl<IN, OUT> Drop for MapStage<IN, OUT> {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.workers.shutdown(&self.control);
        }
    }
}

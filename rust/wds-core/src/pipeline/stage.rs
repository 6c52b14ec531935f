// rust/wds-core/src/pipeline/stage.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::channel::BoundedChannel;
use crate::error::{Result, WdsError};

/// Shared run state of a set of stage workers.
///
/// Workers never block indefinitely: every channel wait is bounded by the
/// poll interval, after which the running flag is re-checked. Clearing the
/// flag therefore stops every worker within roughly one interval.
#[derive(Debug, Clone)]
pub struct StageControl {
    running: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl StageControl {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Pushes `item`, waiting for room while the stage is running.
    ///
    /// Returns false if the stage stopped first; the item is dropped.
    pub fn send<T>(&self, channel: &BoundedChannel<T>, item: T) -> bool {
        let mut item = item;
        while self.is_running() {
            match channel.push_timeout(item, self.poll_interval) {
                Ok(()) => return true,
                Err(returned) => item = returned,
            }
        }
        false
    }

    /// Pops the next item, waiting while the stage is running.
    pub fn recv<T>(&self, channel: &BoundedChannel<T>) -> Option<T> {
        while self.is_running() {
            if let Some(item) = channel.pop_timeout(self.poll_interval) {
                return Some(item);
            }
        }
        None
    }
}

/// Named worker threads belonging to one stage.
#[derive(Debug)]
pub struct WorkerSet {
    name: String,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workers: Vec::new(),
        }
    }

    /// Spawns a worker thread named `<set>-<role>-<index>`.
    pub fn spawn<F>(&mut self, role: &str, index: usize, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let thread_name = format!("{}-{}-{}", self.name, role, index);
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(f)
            .map_err(|e| WdsError::pipeline(format!("failed to spawn thread '{}': {}", thread_name, e)))?;
        self.workers.push(handle);
        Ok(())
    }

    /// Number of workers not yet joined.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Joins every worker that has finished and returns how many remain.
    pub fn harvest(&mut self) -> usize {
        let mut i = 0;
        while i < self.workers.len() {
            if self.workers[i].is_finished() {
                let handle = self.workers.swap_remove(i);
                let thread_name = handle.thread().name().unwrap_or("<unnamed>").to_string();
                if handle.join().is_err() {
                    tracing::error!("Worker thread '{}' panicked", thread_name);
                }
            } else {
                i += 1;
            }
        }
        self.workers.len()
    }

    /// Stops the stage and joins every worker.
    ///
    /// Workers are joined as they finish, so one slow worker does not hold up
    /// joining the others.
    pub fn shutdown(&mut self, control: &StageControl) {
        control.stop();
        while self.harvest() > 0 {
            thread::sleep(control.poll_interval());
        }
        tracing::debug!("All '{}' workers joined", self.name);
    }
}

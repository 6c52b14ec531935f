// rust/wds-core/src/pipeline/threaded.rs

//! Multi-threaded shard reading.
//!
//! ```text
//! add_shard ─> [shards] ─> reader 0..N ─> [entries 0..M] ─> grouper 0..M ─> [samples] ─> next
//! ```
//!
//! Readers open shards and decode tar entries. Reader `i` always feeds
//! grouper `i % M`, so all entries of one shard reach the same grouper in
//! order and groupers can keep one partial sample per reader. With zero
//! grouper threads each reader groups its own shard and writes samples
//! directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::channel::{BoundedChannel, Envelope};
use super::stage::{StageControl, WorkerSet};
use crate::archive::{ArchiveDemuxer, Entry};
use crate::config::PipelineConfig;
use crate::dataset::{GroupBuilder, Sample, SampleGrouper};
use crate::error::{Result, WdsError};
use crate::opener::ShardOpener;

type SampleMessage = Envelope<Result<Sample>>;

/// Traffic from a reader to its grouper.
enum EntryMessage {
    Entry {
        reader: usize,
        shard: Arc<str>,
        entry: Entry,
    },
    /// The reader reached the end of its current shard.
    ShardEnd { reader: usize },
    /// The reader abandoned its current shard.
    ShardFailed { reader: usize, error: WdsError },
    /// The reader has exited and will send nothing more.
    ReaderDone,
}

enum ReaderOutput {
    Entries(BoundedChannel<EntryMessage>),
    Samples(BoundedChannel<SampleMessage>),
}

/// Reads shards on worker threads and delivers samples through a bounded
/// queue.
///
/// Samples of one shard arrive in archive order; samples of different shards
/// may interleave. Shard failures arrive as `Err` items and the worker moves
/// on to the next shard.
///
/// ```no_run
/// use std::sync::Arc;
/// use wds_core::config::PipelineConfig;
/// use wds_core::opener::LocalOpener;
/// use wds_core::pipeline::ShardPipeline;
///
/// # fn main() -> wds_core::Result<()> {
/// let mut pipeline = ShardPipeline::start(PipelineConfig::default(), Arc::new(LocalOpener::default()))?;
/// pipeline.add_shards(["shard-000.tar", "shard-001.tar"])?;
/// pipeline.close_input()?;
/// while let Some(sample) = pipeline.next()? {
///     println!("{}", sample.key());
/// }
/// # Ok(())
/// # }
/// ```
///
/// `add_shard` blocks while the shard queue is full, and the queue only
/// drains while samples are consumed. To feed more shards than the queues
/// hold, feed from another thread through [`input`](Self::input).
pub struct ShardPipeline {
    config: PipelineConfig,
    control: StageControl,
    input: ShardInput,
    samples: BoundedChannel<SampleMessage>,
    workers: WorkerSet,
    /// Workers that write to the sample queue.
    producers: usize,
    /// End markers received so far.
    ended: usize,
    samples_delivered: u64,
}

/// Feeding side of a [`ShardPipeline`].
///
/// Clones share one shard queue, so shards can be added from any thread
/// while another thread consumes samples. `close_input` should be called
/// once every feeder is done.
#[derive(Clone)]
pub struct ShardInput {
    control: StageControl,
    shards: BoundedChannel<Envelope<String>>,
    readers: usize,
    state: Arc<InputState>,
}

#[derive(Default)]
struct InputState {
    closed: AtomicBool,
    added: AtomicU64,
}

impl ShardInput {
    /// Queues a shard descriptor, blocking while the shard queue is full.
    pub fn add_shard(&self, descriptor: impl Into<String>) -> Result<()> {
        if self.is_closed() {
            return Err(WdsError::pipeline("cannot add shards after close_input"));
        }
        if !self.control.send(&self.shards, Envelope::Item(descriptor.into())) {
            return Err(WdsError::pipeline("pipeline is closed"));
        }
        self.state.added.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn add_shards<I, S>(&self, descriptors: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for descriptor in descriptors {
            self.add_shard(descriptor)?;
        }
        Ok(())
    }

    /// Declares that no more shards will be added.
    ///
    /// Sends one end marker per reader; only the first call has an effect.
    pub fn close_input(&self) -> Result<()> {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for _ in 0..self.readers {
            if !self.control.send(&self.shards, Envelope::End) {
                return Err(WdsError::pipeline("pipeline is closed"));
            }
        }
        debug!("Shard input closed after {} shard(s)", self.shards_added());
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    pub fn shards_added(&self) -> u64 {
        self.state.added.load(Ordering::Relaxed)
    }
}

impl ShardPipeline {
    /// Spawns the reader and grouper threads.
    pub fn start(config: PipelineConfig, opener: Arc<dyn ShardOpener>) -> Result<Self> {
        if config.reader_threads == 0 {
            return Err(WdsError::config("pipeline.reader_threads must be greater than 0"));
        }

        let readers = config.reader_threads;
        let groupers = config.grouper_threads;
        let control = StageControl::new(config.poll_interval());
        let shards = BoundedChannel::new(config.shard_queue_capacity);
        let samples = BoundedChannel::new(config.sample_queue_capacity);
        let entries: Vec<BoundedChannel<EntryMessage>> = (0..groupers)
            .map(|_| BoundedChannel::new(config.entry_queue_capacity))
            .collect();

        // Constructed before spawning so that a spawn failure drops (and
        // stops) the threads already started.
        let mut pipeline = Self {
            config,
            control: control.clone(),
            input: ShardInput {
                control: control.clone(),
                shards: shards.clone(),
                readers,
                state: Arc::new(InputState::default()),
            },
            samples: samples.clone(),
            workers: WorkerSet::new("wds"),
            producers: if groupers == 0 { readers } else { groupers },
            ended: 0,
            samples_delivered: 0,
        };

        for id in 0..readers {
            let output = if groupers == 0 {
                ReaderOutput::Samples(samples.clone())
            } else {
                ReaderOutput::Entries(entries[id % groupers].clone())
            };
            let worker = ReaderWorker {
                id,
                opener: opener.clone(),
                control: control.clone(),
                shards: shards.clone(),
                output,
            };
            pipeline.workers.spawn("reader", id, move || worker.run())?;
        }

        for (id, channel) in entries.into_iter().enumerate() {
            let worker = GrouperWorker {
                id,
                readers: (0..readers).filter(|r| r % groupers == id).count(),
                control: control.clone(),
                entries: channel,
                samples: samples.clone(),
            };
            pipeline.workers.spawn("grouper", id, move || worker.run())?;
        }

        info!(
            "Started shard pipeline with {} reader(s) and {} grouper(s)",
            readers, groupers
        );
        Ok(pipeline)
    }

    /// A handle for adding shards from another thread.
    pub fn input(&self) -> ShardInput {
        self.input.clone()
    }

    /// Queues a shard descriptor, blocking while the shard queue is full.
    pub fn add_shard(&self, descriptor: impl Into<String>) -> Result<()> {
        self.input.add_shard(descriptor)
    }

    pub fn add_shards<I, S>(&self, descriptors: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input.add_shards(descriptors)
    }

    /// Declares that no more shards will be added.
    ///
    /// Readers exit once the queued shards are read, after which
    /// [`next`](Self::next) reports end of data instead of timing out.
    pub fn close_input(&self) -> Result<()> {
        self.input.close_input()
    }

    /// Waits up to `timeout` for the next sample.
    ///
    /// Returns `Ok(None)` once input is closed and every worker has
    /// finished, and [`WdsError::Timeout`] if nothing arrived in time.
    pub fn next_timeout(&mut self, timeout: Duration) -> Result<Option<Sample>> {
        let deadline = Instant::now() + timeout;
        while self.ended < self.producers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.samples.pop_timeout(remaining) {
                Some(Envelope::Item(Ok(sample))) => {
                    self.samples_delivered += 1;
                    return Ok(Some(sample));
                }
                Some(Envelope::Item(Err(e))) => return Err(e),
                Some(Envelope::End) => self.ended += 1,
                None if !self.control.is_running() => {
                    return Err(WdsError::pipeline("pipeline is closed"));
                }
                None => return Err(WdsError::timeout(timeout)),
            }
        }
        Ok(None)
    }

    /// Waits for the next sample using the configured default timeout.
    pub fn next(&mut self) -> Result<Option<Sample>> {
        self.next_timeout(self.config.next_timeout())
    }

    /// True once every producer has signalled end of data.
    pub fn is_finished(&self) -> bool {
        self.ended >= self.producers
    }

    /// Samples currently waiting in the output queue.
    pub fn queued_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn shards_added(&self) -> u64 {
        self.input.shards_added()
    }

    pub fn samples_delivered(&self) -> u64 {
        self.samples_delivered
    }

    /// Stops every worker and waits for them to exit.
    ///
    /// Undelivered samples are discarded. Idempotent; also run on drop.
    pub fn close(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        info!(
            "Closing shard pipeline ({} shard(s) added, {} sample(s) delivered)",
            self.input.shards_added(),
            self.samples_delivered
        );
        self.input.state.closed.store(true, Ordering::Release);
        self.workers.shutdown(&self.control);
    }
}

impl Drop for ShardPipeline {
    fn drop(&mut self) {
        self.close();
    }
}

struct ReaderWorker {
    id: usize,
    opener: Arc<dyn ShardOpener>,
    control: StageControl,
    shards: BoundedChannel<Envelope<String>>,
    output: ReaderOutput,
}

impl ReaderWorker {
    fn run(self) {
        let mut shards_read = 0u64;
        while let Some(Envelope::Item(descriptor)) = self.control.recv(&self.shards) {
            if !self.read_shard(&descriptor) {
                break;
            }
            shards_read += 1;
        }

        match &self.output {
            ReaderOutput::Entries(entries) => {
                self.control.send(entries, EntryMessage::ReaderDone);
            }
            ReaderOutput::Samples(samples) => {
                self.control.send(samples, Envelope::End);
            }
        }
        debug!("Reader {} exiting after {} shard(s)", self.id, shards_read);
    }

    /// Reads one shard to the end. Returns false if the pipeline stopped.
    fn read_shard(&self, descriptor: &str) -> bool {
        let stream = match self.opener.open(descriptor) {
            Ok(stream) => stream,
            Err(e) => return self.fail(e),
        };
        debug!("Reader {} opened shard '{}'", self.id, descriptor);
        let demuxer = ArchiveDemuxer::with_name(stream, descriptor);

        match &self.output {
            ReaderOutput::Entries(entries) => {
                let shard: Arc<str> = Arc::from(descriptor);
                let mut demuxer = demuxer;
                loop {
                    match demuxer.next() {
                        Ok(Some(entry)) => {
                            let message = EntryMessage::Entry {
                                reader: self.id,
                                shard: shard.clone(),
                                entry,
                            };
                            if !self.control.send(entries, message) {
                                return false;
                            }
                        }
                        Ok(None) => {
                            return self
                                .control
                                .send(entries, EntryMessage::ShardEnd { reader: self.id });
                        }
                        Err(e) => return self.fail(e),
                    }
                }
            }
            ReaderOutput::Samples(samples) => {
                let mut grouper = SampleGrouper::with_name(demuxer, descriptor);
                loop {
                    match grouper.next() {
                        Ok(Some(sample)) => {
                            if !self.control.send(samples, Envelope::Item(Ok(sample))) {
                                return false;
                            }
                        }
                        Ok(None) => return true,
                        Err(e) => return self.fail(e),
                    }
                }
            }
        }
    }

    fn fail(&self, error: WdsError) -> bool {
        warn!("Reader {} abandoning shard: {}", self.id, error);
        match &self.output {
            ReaderOutput::Entries(entries) => self.control.send(
                entries,
                EntryMessage::ShardFailed {
                    reader: self.id,
                    error,
                },
            ),
            ReaderOutput::Samples(samples) => self.control.send(samples, Envelope::Item(Err(error))),
        }
    }
}

struct GrouperWorker {
    id: usize,
    /// Readers feeding this grouper.
    readers: usize,
    control: StageControl,
    entries: BoundedChannel<EntryMessage>,
    samples: BoundedChannel<SampleMessage>,
}

impl GrouperWorker {
    fn run(self) {
        let mut partial: HashMap<usize, GroupBuilder> = HashMap::new();
        let mut live = self.readers;
        let mut emitted = 0u64;

        while live > 0 {
            let Some(message) = self.control.recv(&self.entries) else {
                return;
            };
            let item = match message {
                EntryMessage::Entry { reader, shard, entry } => {
                    match partial.entry(reader).or_default().push(entry, &shard) {
                        Ok(Some(sample)) => Some(Ok(sample)),
                        Ok(None) => None,
                        Err(e) => {
                            warn!("Grouper {} abandoning shard: {}", self.id, e);
                            Some(Err(e))
                        }
                    }
                }
                EntryMessage::ShardEnd { reader } => partial
                    .remove(&reader)
                    .and_then(|mut builder| builder.finish())
                    .map(Ok),
                EntryMessage::ShardFailed { reader, error } => {
                    partial.remove(&reader);
                    Some(Err(error))
                }
                EntryMessage::ReaderDone => {
                    live -= 1;
                    None
                }
            };

            if let Some(item) = item {
                if !self.control.send(&self.samples, Envelope::Item(item)) {
                    return;
                }
                emitted += 1;
            }
        }

        self.control.send(&self.samples, Envelope::End);
        debug!("Grouper {} exiting after {} item(s)", self.id, emitted);
    }
}

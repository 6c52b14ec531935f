// rust/wds-core/src/dataset/sequencer.rs

use std::fmt;
use std::sync::Arc;

use crate::archive::ArchiveDemuxer;
use crate::config::{ReaderConfig, ShardOrder};
use crate::error::Result;
use crate::opener::{ShardOpener, ShardStream};

use super::grouper::SampleGrouper;
use super::sample::Sample;

/// Callback that may append descriptors when the pending list runs empty.
pub type RefillFn = Box<dyn FnMut(&mut Vec<String>) + Send>;

type ShardSamples = SampleGrouper<ArchiveDemuxer<ShardStream>>;

/// The shard currently being read.
struct ActiveShard {
    descriptor: String,
    samples: ShardSamples,
}

/// Chains the samples of many shards into one sequence.
///
/// Shards are taken from a pending list (LIFO by default, see
/// [`ShardOrder`]). When the list is found empty the refill callback is
/// invoked once; if it adds nothing the sequence is exhausted and `next`
/// returns `Ok(None)`.
///
/// An error opening or decoding a shard is returned from the call that hit
/// it and ends that shard; the following call continues with the next
/// pending shard.
pub struct ShardSequencer {
    opener: Arc<dyn ShardOpener>,
    pending: Vec<String>,
    order: ShardOrder,
    refill: RefillFn,
    active: Option<ActiveShard>,
    shards_opened: u64,
    samples_yielded: u64,
}

impl ShardSequencer {
    /// Creates a sequencer with an empty pending list and a no-op refill.
    pub fn new(opener: Arc<dyn ShardOpener>) -> Self {
        Self {
            opener,
            pending: Vec::new(),
            order: ShardOrder::default(),
            refill: Box::new(|_| {}),
            active: None,
            shards_opened: 0,
            samples_yielded: 0,
        }
    }

    pub fn from_config(opener: Arc<dyn ShardOpener>, config: &ReaderConfig) -> Self {
        Self::new(opener).with_order(config.shard_order)
    }

    /// Sets the order in which pending shards are consumed.
    #[must_use]
    pub fn with_order(mut self, order: ShardOrder) -> Self {
        self.order = order;
        self
    }

    /// Appends one descriptor to the pending list.
    pub fn add_shard(&mut self, descriptor: impl Into<String>) {
        self.pending.push(descriptor.into());
    }

    /// Replaces the pending list and abandons the shard being read.
    pub fn set_shards<I, S>(&mut self, shards: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending = shards.into_iter().map(Into::into).collect();
        self.active = None;
    }

    /// Installs the callback invoked whenever the pending list is empty.
    pub fn set_refill<F>(&mut self, refill: F)
    where
        F: FnMut(&mut Vec<String>) + Send + 'static,
    {
        self.refill = Box::new(refill);
    }

    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    pub fn order(&self) -> ShardOrder {
        self.order
    }

    /// Descriptor of the shard currently being read.
    pub fn current_shard(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.descriptor.as_str())
    }

    pub fn shards_opened(&self) -> u64 {
        self.shards_opened
    }

    pub fn samples_yielded(&self) -> u64 {
        self.samples_yielded
    }

    /// Returns the next sample without consuming it.
    pub fn peek(&mut self) -> Result<Option<&Sample>> {
        if !self.forward()? {
            return Ok(None);
        }
        match self.active.as_mut() {
            Some(active) => active.samples.peek(),
            None => Ok(None),
        }
    }

    /// Consumes and returns the next sample, or `Ok(None)` at end-of-data.
    pub fn next(&mut self) -> Result<Option<Sample>> {
        if !self.forward()? {
            return Ok(None);
        }
        let sample = match self.active.as_mut() {
            Some(active) => active.samples.next()?,
            None => None,
        };
        if sample.is_some() {
            self.samples_yielded += 1;
        }
        Ok(sample)
    }

    /// Opens shards until one has a sample buffered.
    ///
    /// Returns false once no shard is left.
    fn forward(&mut self) -> Result<bool> {
        loop {
            let ready = match self.active.as_mut() {
                Some(active) => active.samples.peek().map(|sample| sample.is_some()),
                None => Ok(false),
            };
            match ready {
                Ok(true) => return Ok(true),
                Ok(false) => {
                    self.finish_active();
                    if !self.advance()? {
                        return Ok(false);
                    }
                }
                Err(e) => {
                    self.finish_active();
                    return Err(e);
                }
            }
        }
    }

    fn finish_active(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::debug!("Finished shard {}", active.descriptor);
        }
    }

    /// Takes the next descriptor and binds a fresh demuxer and grouper to it.
    fn advance(&mut self) -> Result<bool> {
        if self.pending.is_empty() {
            (self.refill)(&mut self.pending);
            tracing::debug!("Refill supplied {} shard(s)", self.pending.len());
        }

        let descriptor = match self.order {
            ShardOrder::Lifo => self.pending.pop(),
            ShardOrder::Fifo if !self.pending.is_empty() => Some(self.pending.remove(0)),
            ShardOrder::Fifo => None,
        };
        let Some(descriptor) = descriptor else {
            return Ok(false);
        };

        let stream = self.opener.open(&descriptor)?;
        self.shards_opened += 1;
        tracing::debug!("Opened shard {} ({} pending)", descriptor, self.pending.len());

        let demuxer = ArchiveDemuxer::with_name(stream, descriptor.clone());
        self.active = Some(ActiveShard {
            samples: SampleGrouper::with_name(demuxer, descriptor.clone()),
            descriptor,
        });
        Ok(true)
    }
}

impl Iterator for ShardSequencer {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        ShardSequencer::next(self).transpose()
    }
}

impl fmt::Debug for ShardSequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardSequencer")
            .field("pending", &self.pending)
            .field("order", &self.order)
            .field("current_shard", &self.current_shard())
            .field("shards_opened", &self.shards_opened)
            .field("samples_yielded", &self.samples_yielded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WdsError;
    use crate::testutil::{shard_of, MockOpener, TarBuilder};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn keys(sequencer: &mut ShardSequencer) -> Vec<String> {
        sequencer.map(|s| s.unwrap().key().to_string()).collect()
    }

    #[test]
    fn test_two_shards_then_end_of_data() {
        let opener = Arc::new(
            MockOpener::new()
                .with_shard("s0.tar", shard_of(&["a"]))
                .with_shard("s1.tar", shard_of(&["b"])),
        );
        let refills = Arc::new(AtomicUsize::new(0));

        let mut sequencer = ShardSequencer::new(opener.clone());
        sequencer.add_shard("s0.tar");
        sequencer.add_shard("s1.tar");
        let counter = refills.clone();
        sequencer.set_refill(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(sequencer.next().unwrap().is_some());
        assert_eq!(refills.load(Ordering::SeqCst), 0);
        assert!(sequencer.next().unwrap().is_some());
        assert_eq!(refills.load(Ordering::SeqCst), 0);
        assert!(sequencer.next().unwrap().is_none());
        assert_eq!(refills.load(Ordering::SeqCst), 1);

        assert_eq!(sequencer.samples_yielded(), 2);
        assert_eq!(sequencer.shards_opened(), 2);
        assert_eq!(opener.open_count(), 2);
    }

    #[test]
    fn test_lifo_order_by_default() {
        let opener = Arc::new(
            MockOpener::new()
                .with_shard("s0.tar", shard_of(&["a0", "a1"]))
                .with_shard("s1.tar", shard_of(&["b0"]))
                .with_shard("s2.tar", shard_of(&["c0"])),
        );
        let mut sequencer = ShardSequencer::new(opener.clone());
        sequencer.set_shards(["s0.tar", "s1.tar", "s2.tar"]);

        assert_eq!(sequencer.order(), ShardOrder::Lifo);
        assert_eq!(keys(&mut sequencer), vec!["c0", "b0", "a0", "a1"]);
        assert_eq!(opener.opened(), vec!["s2.tar", "s1.tar", "s0.tar"]);
    }

    #[test]
    fn test_fifo_order() {
        let opener = Arc::new(
            MockOpener::new()
                .with_shard("s0.tar", shard_of(&["a0", "a1"]))
                .with_shard("s1.tar", shard_of(&["b0"]))
                .with_shard("s2.tar", shard_of(&["c0"])),
        );
        let mut sequencer = ShardSequencer::new(opener).with_order(ShardOrder::Fifo);
        sequencer.set_shards(["s0.tar", "s1.tar", "s2.tar"]);

        assert_eq!(keys(&mut sequencer), vec!["a0", "a1", "b0", "c0"]);
    }

    #[test]
    fn test_order_from_config() {
        let config = ReaderConfig {
            shard_order: ShardOrder::Fifo,
            ..Default::default()
        };
        let sequencer = ShardSequencer::from_config(Arc::new(MockOpener::new()), &config);
        assert_eq!(sequencer.order(), ShardOrder::Fifo);
    }

    #[test]
    fn test_refill_supplies_shards_lazily() {
        let opener = Arc::new(MockOpener::new().with_shard("s.tar", shard_of(&["a", "b"])));
        let mut sequencer = ShardSequencer::new(opener);

        // Hand out the same shard twice, then stop.
        let mut countdown = 3;
        sequencer.set_refill(move |pending| {
            countdown -= 1;
            if countdown > 0 {
                pending.push("s.tar".to_string());
            }
        });

        assert_eq!(keys(&mut sequencer), vec!["a", "b", "a", "b"]);
        assert_eq!(sequencer.shards_opened(), 2);
    }

    #[test]
    fn test_no_shards_is_end_of_data() {
        let mut sequencer = ShardSequencer::new(Arc::new(MockOpener::new()));
        assert!(sequencer.peek().unwrap().is_none());
        assert!(sequencer.next().unwrap().is_none());
    }

    #[test]
    fn test_empty_shards_are_skipped() {
        let opener = Arc::new(
            MockOpener::new()
                .with_shard("empty.tar", TarBuilder::new().finish())
                .with_shard("full.tar", shard_of(&["a"])),
        );
        let mut sequencer = ShardSequencer::new(opener).with_order(ShardOrder::Fifo);
        sequencer.set_shards(["empty.tar", "full.tar", "empty.tar"]);

        assert_eq!(keys(&mut sequencer), vec!["a"]);
        assert_eq!(sequencer.shards_opened(), 3);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let opener = Arc::new(MockOpener::new().with_shard("s.tar", shard_of(&["a", "b"])));
        let mut sequencer = ShardSequencer::new(opener);
        sequencer.add_shard("s.tar");

        assert_eq!(sequencer.peek().unwrap().unwrap().key(), "a");
        assert_eq!(sequencer.current_shard(), Some("s.tar"));
        assert_eq!(sequencer.next().unwrap().unwrap().key(), "a");
        assert_eq!(sequencer.peek().unwrap().unwrap().key(), "b");
        assert_eq!(sequencer.samples_yielded(), 1);
    }

    #[test]
    fn test_open_error_then_continue() {
        let opener = Arc::new(MockOpener::new().with_shard("good.tar", shard_of(&["a"])));
        let mut sequencer = ShardSequencer::new(opener).with_order(ShardOrder::Fifo);
        sequencer.set_shards(["missing.tar", "good.tar"]);

        assert!(matches!(sequencer.next(), Err(WdsError::Open { .. })));
        assert_eq!(sequencer.next().unwrap().unwrap().key(), "a");
        assert!(sequencer.next().unwrap().is_none());
    }

    #[test]
    fn test_local_file_and_pipe_shards() {
        use crate::opener::LocalOpener;
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&shard_of(&["a", "b"])).unwrap();
        file.flush().unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let mut sequencer =
            ShardSequencer::new(Arc::new(LocalOpener::default())).with_order(ShardOrder::Fifo);
        sequencer.set_shards([path.clone(), "pipe:exit 3".to_string(), format!("pipe:cat {}", path)]);

        assert_eq!(sequencer.next().unwrap().unwrap().key(), "a");
        assert_eq!(sequencer.next().unwrap().unwrap().key(), "b");
        // A failing command surfaces as a read error, not as an empty shard.
        assert!(matches!(sequencer.next(), Err(WdsError::Io { .. })));
        assert_eq!(sequencer.next().unwrap().unwrap().key(), "a");
        assert_eq!(sequencer.next().unwrap().unwrap().key(), "b");
        assert!(sequencer.next().unwrap().is_none());
        assert_eq!(sequencer.shards_opened(), 3);
    }

    #[test]
    fn test_malformed_shard_aborts_only_that_shard() {
        let broken = TarBuilder::new()
            .file("x.txt", b"x")
            .file("y.txt", b"y")
            .raw(&[3u8; 200])
            .unterminated();
        let opener = Arc::new(
            MockOpener::new()
                .with_shard("broken.tar", broken)
                .with_shard("good.tar", shard_of(&["a"])),
        );
        let mut sequencer = ShardSequencer::new(opener).with_order(ShardOrder::Fifo);
        sequencer.set_shards(["broken.tar", "good.tar"]);

        assert_eq!(sequencer.next().unwrap().unwrap().key(), "x");
        assert!(matches!(sequencer.next(), Err(WdsError::MalformedArchive { .. })));
        assert_eq!(sequencer.next().unwrap().unwrap().key(), "a");
        assert!(sequencer.next().unwrap().is_none());
    }

    #[test]
    fn test_set_shards_abandons_active_shard() {
        let opener = Arc::new(
            MockOpener::new()
                .with_shard("s0.tar", shard_of(&["a0", "a1"]))
                .with_shard("s1.tar", shard_of(&["b0"])),
        );
        let mut sequencer = ShardSequencer::new(opener);
        sequencer.add_shard("s0.tar");
        assert_eq!(sequencer.next().unwrap().unwrap().key(), "a0");

        sequencer.set_shards(["s1.tar"]);
        assert!(sequencer.current_shard().is_none());
        assert_eq!(keys(&mut sequencer), vec!["b0"]);
    }

    #[test]
    fn test_add_shard_after_exhaustion() {
        let opener = Arc::new(MockOpener::new().with_shard("s.tar", shard_of(&["a"])));
        let mut sequencer = ShardSequencer::new(opener);
        assert!(sequencer.next().unwrap().is_none());

        sequencer.add_shard("s.tar");
        assert_eq!(sequencer.next().unwrap().unwrap().key(), "a");
    }
}

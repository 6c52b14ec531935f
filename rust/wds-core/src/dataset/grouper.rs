// rust/wds-core/src/dataset/grouper.rs

use crate::archive::{Entry, EntrySource};
use crate::error::{Result, WdsError};

use super::sample::Sample;

/// Splits an entry key into its sample key and extension.
///
/// The sample key is everything up to the first `.` of the last path
/// component; the extension is what follows that dot. Returns `None` when
/// the last component has nothing before its first dot (e.g. `.jpg` or
/// `dir/.hidden`), since such an entry cannot be grouped.
///
/// ```
/// use wds_core::dataset::split_key;
///
/// assert_eq!(split_key("train/0001.seg.png"), Some(("train/0001", "seg.png")));
/// assert_eq!(split_key("README"), Some(("README", "")));
/// assert_eq!(split_key(".jpg"), None);
/// ```
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let name_start = key.rfind('/').map_or(0, |i| i + 1);
    let (base, extension) = match key[name_start..].find('.') {
        Some(dot) => (&key[..name_start + dot], &key[name_start + dot + 1..]),
        None => (key, ""),
    };
    if base.len() == name_start {
        return None;
    }
    Some((base, extension))
}

/// Coalesces runs of same-basename entries into samples.
///
/// The grouper looks at the next entry before consuming it, so a sample ends
/// exactly where the basename changes. Samples come out in the order their
/// first entry appears in the stream.
pub struct SampleGrouper<S> {
    source: S,
    shard: String,
    buffered: Option<Sample>,
    /// Set after an error; the shard yields nothing more.
    done: bool,
}

impl<S: EntrySource> SampleGrouper<S> {
    pub fn new(source: S) -> Self {
        Self::with_name(source, "<stream>")
    }

    /// Creates a grouper whose errors refer to `shard`.
    pub fn with_name(source: S, shard: impl Into<String>) -> Self {
        Self {
            source,
            shard: shard.into(),
            buffered: None,
            done: false,
        }
    }

    /// Returns the next sample without consuming it.
    pub fn peek(&mut self) -> Result<Option<&Sample>> {
        if self.buffered.is_none() && !self.done {
            self.buffered = self.fetch_or_stop()?;
        }
        Ok(self.buffered.as_ref())
    }

    /// Consumes and returns the next sample.
    pub fn next(&mut self) -> Result<Option<Sample>> {
        if let Some(sample) = self.buffered.take() {
            return Ok(Some(sample));
        }
        if self.done {
            return Ok(None);
        }
        self.fetch_or_stop()
    }

    fn fetch_or_stop(&mut self) -> Result<Option<Sample>> {
        let fetched = self.fetch();
        if fetched.is_err() {
            self.done = true;
        }
        fetched
    }

    fn fetch(&mut self) -> Result<Option<Sample>> {
        let mut sample: Option<Sample> = None;
        loop {
            let (base, extension) = match self.source.peek_entry()? {
                None => return Ok(sample),
                Some(entry) => match split_key(&entry.key) {
                    Some((base, extension)) => (base.to_string(), extension.to_string()),
                    None => return Err(WdsError::empty_base_name(&self.shard, &entry.key)),
                },
            };

            if let Some(current) = &sample {
                if current.key() != base {
                    return Ok(sample);
                }
            }

            let Some(entry) = self.source.next_entry()? else {
                return Ok(sample);
            };
            sample
                .get_or_insert_with(|| Sample::new(base))
                .insert(extension, entry.payload);
        }
    }
}

impl<S: EntrySource> Iterator for SampleGrouper<S> {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        SampleGrouper::next(self).transpose()
    }
}

/// Incremental grouping for entries that arrive one at a time over a channel.
///
/// Feeds the same grouping rule as [`SampleGrouper`] without lookahead: a
/// sample is complete once an entry with a different basename arrives or the
/// shard ends.
#[derive(Default)]
pub(crate) struct GroupBuilder {
    current: Option<Sample>,
    failed: bool,
}

impl GroupBuilder {
    /// Adds an entry, returning the sample it completed, if any.
    ///
    /// After an empty-basename error the rest of the shard is ignored.
    pub(crate) fn push(&mut self, entry: Entry, shard: &str) -> Result<Option<Sample>> {
        if self.failed {
            return Ok(None);
        }
        let Some((base, extension)) = split_key(&entry.key) else {
            self.failed = true;
            self.current = None;
            return Err(WdsError::empty_base_name(shard, &entry.key));
        };

        if let Some(current) = self.current.as_mut() {
            if current.key() == base {
                current.insert(extension, entry.payload);
                return Ok(None);
            }
        }

        let mut sample = Sample::new(base);
        sample.insert(extension, entry.payload);
        Ok(self.current.replace(sample))
    }

    /// Ends the shard and returns the partial sample, if any.
    pub(crate) fn finish(&mut self) -> Option<Sample> {
        self.current.take()
    }
}

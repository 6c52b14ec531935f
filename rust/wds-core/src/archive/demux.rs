// rust/wds-core/src/archive/demux.rs

use std::io::{self, ErrorKind, Read};

use bytes::Bytes;

use super::header::{is_end_block, TarHeader, BLOCK_SIZE};
use crate::error::{Result, WdsError};

/// One regular file decoded from a tar stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub payload: Bytes,
}

/// A stream of entries with one item of lookahead.
///
/// `peek_entry` inspects the buffered entry without consuming it;
/// `next_entry` consumes it. Both return `Ok(None)` once the stream is
/// exhausted.
pub trait EntrySource {
    fn peek_entry(&mut self) -> Result<Option<&Entry>>;
    fn next_entry(&mut self) -> Result<Option<Entry>>;
}

enum Lookahead {
    /// Nothing fetched yet.
    Pending,
    Ready(Entry),
    /// A fetch failed; the error is reported once, then the stream ends.
    Failed(WdsError),
    Exhausted,
}

/// Splits a tar byte-stream into entries.
///
/// Non-regular entries (directories, links, ...) are consumed but never
/// yielded. The demuxer keeps the following entry buffered after every
/// `next_entry`, so a consumer can always look one entry ahead.
pub struct ArchiveDemuxer<R> {
    reader: R,
    shard: String,
    offset: u64,
    state: Lookahead,
}

impl<R: Read> ArchiveDemuxer<R> {
    pub fn new(reader: R) -> Self {
        Self::with_name(reader, "<stream>")
    }

    /// Creates a demuxer whose errors refer to `shard`.
    pub fn with_name(reader: R, shard: impl Into<String>) -> Self {
        Self {
            reader,
            shard: shard.into(),
            offset: 0,
            state: Lookahead::Pending,
        }
    }

    /// Name used in error messages.
    pub fn shard(&self) -> &str {
        &self.shard
    }

    /// Number of bytes consumed from the underlying stream.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the buffered entry without advancing.
    pub fn peek(&mut self) -> Result<Option<&Entry>> {
        self.fill();
        if matches!(self.state, Lookahead::Failed(_)) {
            if let Lookahead::Failed(e) = std::mem::replace(&mut self.state, Lookahead::Exhausted) {
                return Err(e);
            }
        }
        match &self.state {
            Lookahead::Ready(entry) => Ok(Some(entry)),
            _ => Ok(None),
        }
    }

    /// Returns the buffered entry and prefetches the one after it.
    pub fn next(&mut self) -> Result<Option<Entry>> {
        self.fill();
        match std::mem::replace(&mut self.state, Lookahead::Pending) {
            Lookahead::Ready(entry) => {
                self.fill();
                Ok(Some(entry))
            }
            Lookahead::Failed(e) => {
                self.state = Lookahead::Exhausted;
                Err(e)
            }
            Lookahead::Pending | Lookahead::Exhausted => {
                self.state = Lookahead::Exhausted;
                Ok(None)
            }
        }
    }

    fn fill(&mut self) {
        if matches!(self.state, Lookahead::Pending) {
            self.state = match self.fetch() {
                Ok(Some(entry)) => Lookahead::Ready(entry),
                Ok(None) => Lookahead::Exhausted,
                Err(e) => Lookahead::Failed(e),
            };
        }
    }

    /// Reads headers until a regular file or the end of the archive.
    fn fetch(&mut self) -> Result<Option<Entry>> {
        let mut block = [0u8; BLOCK_SIZE];
        loop {
            let header_offset = self.offset;
            let n = self.read_block(&mut block)?;
            if n == 0 {
                // Physical end of stream on a block boundary.
                return Ok(None);
            }
            if n < BLOCK_SIZE {
                return Err(WdsError::malformed(
                    &self.shard,
                    header_offset,
                    format!("short header read: {} of {} bytes", n, BLOCK_SIZE),
                ));
            }
            if is_end_block(&block) {
                return Ok(None);
            }

            let header = TarHeader::parse(&block)
                .map_err(|message| WdsError::malformed(&self.shard, header_offset, message))?;
            let padded = header.padded_size();

            if !header.is_regular() {
                tracing::trace!(
                    "Skipping entry '{}' with type flag {:?} in {}",
                    header.key(),
                    header.typeflag as char,
                    self.shard
                );
                let skipped = io::copy(&mut (&mut self.reader).take(padded), &mut io::sink())
                    .map_err(|e| WdsError::io(&self.shard, e))?;
                self.offset += skipped;
                if skipped < padded {
                    return Err(self.short_payload(header_offset, skipped, padded));
                }
                continue;
            }

            let mut payload = Vec::new();
            let read = (&mut self.reader)
                .take(padded)
                .read_to_end(&mut payload)
                .map_err(|e| WdsError::io(&self.shard, e))? as u64;
            self.offset += read;
            if read < padded {
                return Err(self.short_payload(header_offset, read, padded));
            }
            // Drop the block padding; `size <= padded` so this fits in usize.
            payload.truncate(header.size as usize);

            let entry = Entry {
                key: header.key(),
                payload: Bytes::from(payload),
            };
            tracing::trace!("Decoded entry '{}' ({} bytes) from {}", entry.key, header.size, self.shard);
            return Ok(Some(entry));
        }
    }

    fn short_payload(&self, header_offset: u64, read: u64, padded: u64) -> WdsError {
        WdsError::malformed(
            &self.shard,
            header_offset,
            format!("short payload read: {} of {} bytes", read, padded),
        )
    }

    /// Fills `block` unless the stream ends first; returns the bytes read.
    fn read_block(&mut self, block: &mut [u8; BLOCK_SIZE]) -> Result<usize> {
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            match self.reader.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(WdsError::io(&self.shard, e)),
            }
        }
        self.offset += filled as u64;
        Ok(filled)
    }
}

impl<R: Read> EntrySource for ArchiveDemuxer<R> {
    fn peek_entry(&mut self) -> Result<Option<&Entry>> {
        self.peek()
    }

    fn next_entry(&mut self) -> Result<Option<Entry>> {
        self.next()
    }
}

impl<R: Read> Iterator for ArchiveDemuxer<R> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        ArchiveDemuxer::next(self).transpose()
    }
}

// rust/wds-core/src/testutil.rs

//! In-memory tar fixtures and a mock opener shared by the unit tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::archive::BLOCK_SIZE;
use crate::error::{Result, WdsError};
use crate::opener::{ShardOpener, ShardStream};

/// Builds tar byte-streams block by block.
#[derive(Default)]
pub(crate) struct TarBuilder {
    data: Vec<u8>,
}

impl TarBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn file(self, name: &str, content: &[u8]) -> Self {
        self.entry(name, "", b'0', content)
    }

    pub(crate) fn directory(self, name: &str) -> Self {
        self.entry(name, "", b'5', &[])
    }

    pub(crate) fn entry(mut self, name: &str, prefix: &str, typeflag: u8, content: &[u8]) -> Self {
        self.data.extend_from_slice(&header_block(name, prefix, typeflag, content.len()));
        self.data.extend_from_slice(content);
        let padding = (BLOCK_SIZE - content.len() % BLOCK_SIZE) % BLOCK_SIZE;
        self.data.extend(std::iter::repeat(0u8).take(padding));
        self
    }

    /// Appends raw bytes, e.g. a truncated header.
    pub(crate) fn raw(mut self, bytes: &[u8]) -> Self {
        self.data.extend_from_slice(bytes);
        self
    }

    /// Terminates the archive with the usual two zero blocks.
    pub(crate) fn finish(mut self) -> Vec<u8> {
        self.data.extend_from_slice(&[0u8; 2 * BLOCK_SIZE]);
        self.data
    }

    /// Returns the bytes without an end-of-archive marker.
    pub(crate) fn unterminated(self) -> Vec<u8> {
        self.data
    }
}

pub(crate) fn header_block(name: &str, prefix: &str, typeflag: u8, size: usize) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    block[..name.len()].copy_from_slice(name.as_bytes());
    block[100..108].copy_from_slice(b"0000644\0");
    block[108..116].copy_from_slice(b"0001750\0");
    block[116..124].copy_from_slice(b"0001750\0");
    block[124..136].copy_from_slice(format!("{:011o}\0", size).as_bytes());
    block[136..148].copy_from_slice(b"14707103570\0");
    block[156] = typeflag;
    block[257..263].copy_from_slice(b"ustar\0");
    block[263..265].copy_from_slice(b"00");
    block[345..345 + prefix.len()].copy_from_slice(prefix.as_bytes());

    block[148..156].copy_from_slice(b"        ");
    let checksum: u32 = block.iter().map(|&b| u32::from(b)).sum();
    block[148..156].copy_from_slice(format!("{:06o}\0 ", checksum).as_bytes());
    block
}

/// Serves shards from memory and counts open calls.
#[derive(Default)]
pub(crate) struct MockOpener {
    shards: Mutex<HashMap<String, Vec<u8>>>,
    opened: Mutex<Vec<String>>,
    opens: AtomicUsize,
}

impl MockOpener {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_shard(self, descriptor: &str, data: Vec<u8>) -> Self {
        self.shards.lock().unwrap().insert(descriptor.to_string(), data);
        self
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl ShardOpener for MockOpener {
    fn open(&self, descriptor: &str) -> Result<ShardStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.opened.lock().unwrap().push(descriptor.to_string());
        let shards = self.shards.lock().unwrap();
        let data = shards
            .get(descriptor)
            .ok_or_else(|| WdsError::open(descriptor, "not found"))?
            .clone();
        Ok(Box::new(Cursor::new(data)))
    }
}

/// A shard holding one single-file sample per key.
pub(crate) fn shard_of(keys: &[&str]) -> Vec<u8> {
    keys.iter()
        .fold(TarBuilder::new(), |tar, key| {
            tar.file(&format!("{}.txt", key), key.as_bytes())
        })
        .finish()
}

// rust/wds-core/src/archive/mod.rs

//! Tar stream decoding.
//!
//! [`ArchiveDemuxer`] reads a POSIX/ustar byte-stream sequentially and yields
//! one [`Entry`] per regular file, keeping the following entry buffered so
//! that consumers can look one entry ahead.
//!
//! # Example
//!
//! ```no_run
//! use wds_core::archive::ArchiveDemuxer;
//! use std::fs::File;
//!
//! let file = File::open("shard-000000.tar").unwrap();
//! for entry in ArchiveDemuxer::with_name(file, "shard-000000.tar") {
//!     let entry = entry.unwrap();
//!     println!("{} {}", entry.key, entry.payload.len());
//! }
//! ```

mod demux;
mod header;

pub use demux::{ArchiveDemuxer, Entry, EntrySource};
pub use header::{is_end_block, parse_octal, TarHeader, BLOCK_SIZE};

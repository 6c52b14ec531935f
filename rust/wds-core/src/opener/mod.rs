// rust/wds-core/src/opener/mod.rs

//! Obtaining sequential byte-streams for shard descriptors.
//!
//! A shard descriptor is either a filesystem path or a `pipe:` prefixed shell
//! command whose standard output is the archive. The rest of the crate only
//! depends on the [`ShardOpener`] trait, so tests and embedders can supply
//! their own sources.
//!
//! # Example
//!
//! ```no_run
//! use wds_core::config::OpenerConfig;
//! use wds_core::opener::{LocalOpener, ShardOpener};
//! use std::io::Read;
//!
//! let opener = LocalOpener::new(&OpenerConfig::default());
//! let mut stream = opener.open("pipe:curl -s https://example.com/shard-000000.tar").unwrap();
//! let mut header = [0u8; 512];
//! stream.read_exact(&mut header).unwrap();
//! ```

mod local;
mod traits;

pub use local::LocalOpener;
pub use traits::{is_pipe, ShardOpener, ShardStream, PIPE_PREFIX};

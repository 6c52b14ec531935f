// rust/wds-core/src/archive/header.rs

//! POSIX/ustar header block decoding.
//!
//! Only the fields needed to walk the stream are decoded: name, prefix, size
//! and type flag. Ownership, permissions, timestamps and the checksum are
//! left untouched.

use std::ops::Range;

/// Size of a tar header block and of the payload padding unit.
pub const BLOCK_SIZE: usize = 512;

const NAME: Range<usize> = 0..100;
const SIZE: Range<usize> = 124..136;
const TYPEFLAG: usize = 156;
const PREFIX: Range<usize> = 345..500;

/// Type flag of a regular file.
pub const REGULAR: u8 = b'0';
/// Pre-POSIX type flag of a regular file.
pub const REGULAR_LEGACY: u8 = b'\0';

/// The decoded fields of one header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarHeader {
    pub name: String,
    pub prefix: String,
    pub size: u64,
    pub typeflag: u8,
}

impl TarHeader {
    /// Decodes a header block.
    ///
    /// Returns a message describing the problem if the size field is not
    /// valid ASCII octal.
    pub fn parse(block: &[u8; BLOCK_SIZE]) -> Result<Self, String> {
        Ok(Self {
            name: field_str(&block[NAME]),
            prefix: field_str(&block[PREFIX]),
            size: parse_octal(&block[SIZE])?,
            typeflag: block[TYPEFLAG],
        })
    }

    /// Entry key built from the prefix and name fields.
    ///
    /// ustar splits long paths at a `/` and drops the separator, so it is
    /// restored here when the prefix does not already end with one.
    pub fn key(&self) -> String {
        if self.prefix.is_empty() {
            self.name.clone()
        } else if self.prefix.ends_with('/') {
            format!("{}{}", self.prefix, self.name)
        } else {
            format!("{}/{}", self.prefix, self.name)
        }
    }

    pub fn is_regular(&self) -> bool {
        self.typeflag == REGULAR || self.typeflag == REGULAR_LEGACY
    }

    /// Payload size rounded up to whole blocks.
    pub fn padded_size(&self) -> u64 {
        self.size.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64
    }
}

/// An all-zero block marks the end of the archive.
pub fn is_end_block(block: &[u8; BLOCK_SIZE]) -> bool {
    block.iter().all(|&b| b == 0)
}

fn field_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Parses a NUL/space terminated ASCII octal field.
pub fn parse_octal(field: &[u8]) -> Result<u64, String> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let digits = std::str::from_utf8(&field[..end])
        .map_err(|_| "size field is not ASCII".to_string())?
        .trim_matches(' ');

    let mut value: u64 = 0;
    for c in digits.chars() {
        let digit = c
            .to_digit(8)
            .ok_or_else(|| format!("invalid octal digit {:?} in size field", c))?;
        value = value
            .checked_mul(8)
            .and_then(|v| v.checked_add(u64::from(digit)))
            .ok_or_else(|| "size field overflows".to_string())?;
    }
    Ok(value)
}

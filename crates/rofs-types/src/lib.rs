#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Byte offset of the superblock inside block 0.
pub const ROFS_SUPER_OFFSET: usize = 1024;
pub const ROFS_SUPER_MAGIC: u32 = 0xE0F5_E1E2;
/// Size of the fixed superblock base; extension slots follow it.
pub const ROFS_SUPER_BASE_SIZE: usize = 128;
pub const ROFS_SB_EXTSLOT_SIZE: usize = 16;

/// The only block size this implementation mounts.
pub const ROFS_BLOCK_SIZE_BITS: u8 = 12;
pub const ROFS_BLOCK_SIZE: u32 = 1 << ROFS_BLOCK_SIZE_BITS;

/// Inode slots are 32 bytes; `nid` is a slot index relative to `meta_blkaddr`.
pub const ROFS_INODE_SLOT_BITS: u32 = 5;
pub const ROFS_INODE_COMPACT_SIZE: u32 = 32;
pub const ROFS_INODE_EXTENDED_SIZE: u32 = 64;

pub const ROFS_DEVT_SLOT_SIZE: u64 = 128;
pub const ROFS_BLOCK_MAP_ENTRY_SIZE: u64 = 4;
pub const ROFS_CHUNK_INDEX_SIZE: u64 = 8;

/// Sentinel block address marking an unmapped chunk.
pub const ROFS_NULL_ADDR: u32 = u32::MAX;

pub const ROFS_NAME_LEN: u32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

/// Inode identifier: a 32-byte slot index from the metadata start block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Nid(pub u64);

/// Backing device identifier as stored in chunk-index entries.
///
/// Id 0 is the primary device; extra devices are numbered from 1 in the
/// order they were supplied at mount time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u16);

impl DeviceId {
    pub const PRIMARY: Self = Self(0);

    #[must_use]
    pub fn is_primary(self) -> bool {
        self.0 == 0
    }
}

impl BlockNumber {
    /// Block holding the given byte address.
    #[must_use]
    pub fn containing(addr: u64) -> Self {
        Self(addr >> ROFS_BLOCK_SIZE_BITS)
    }

    /// Add a block count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, count: u64) -> Option<Self> {
        self.0.checked_add(count).map(Self)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
    #[error("checksum mismatch in {field}: stored {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        field: &'static str,
        expected: u32,
        computed: u32,
    },
    /// A well-formed value this build refuses to interpret.
    #[error("unsupported {field}: {value:#x}")]
    Unsupported { field: &'static str, value: u64 },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_u8(data: &[u8], offset: usize) -> Result<u8, ParseError> {
    Ok(ensure_slice(data, offset, 1)?[0])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Decode a fixed-width, NUL-terminated string field.
///
/// A field that fills its whole width without a terminator is rejected.
pub fn parse_nul_terminated(bytes: &[u8], field: &'static str) -> Result<String, ParseError> {
    let Some(end) = bytes.iter().position(|b| *b == 0) else {
        return Err(ParseError::InvalidField {
            field,
            reason: "missing NUL terminator",
        });
    };
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// Offset of a byte address inside its block.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // masked to the block size
pub fn blkoff(addr: u64) -> usize {
    (addr & u64::from(ROFS_BLOCK_SIZE - 1)) as usize
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── POSIX file mode constants ────────────────────────────────────────────────

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u16 = 0o170_000;
/// Directory.
pub const S_IFDIR: u16 = 0o040_000;
/// Regular file.
pub const S_IFREG: u16 = 0o100_000;
/// Symbolic link.
pub const S_IFLNK: u16 = 0o120_000;

// ── Free-standing checked arithmetic functions ──────────────────────────────

/// Round `value` up to the nearest multiple of `alignment`.
///
/// `alignment` must be a non-zero power of two; returns `None` on overflow
/// or if `alignment` is invalid.
#[must_use]
pub fn align_up(value: u64, alignment: u64) -> Option<u64> {
    if alignment == 0 || !alignment.is_power_of_two() {
        return None;
    }
    let mask = alignment - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

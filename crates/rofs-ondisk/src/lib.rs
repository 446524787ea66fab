#![forbid(unsafe_code)]
//! On-disk format parsing for the read-only image filesystem.
//!
//! Pure parsing crate, no I/O. Parses byte slices into the superblock,
//! inode records, chunk-table entries, device slots and compression
//! configuration payloads.

pub mod chunk;
pub mod codec;
pub mod device;
pub mod inode;
pub mod superblock;

pub use chunk::{BlockMapEntry, ChunkIndexEntry, chunk_entry_size};
pub use codec::{ALL_COMPR_ALGS, CompressionAlgorithm, Lz4Config, LzmaConfig};
pub use device::{DeviceSlot, device_slot_offset};
pub use inode::{
    ChunkFormat, DataLayout, FileLayout, InodeLayoutInfo, InodeVersion, RofsInode,
    decode_i_format, xattr_ibody_size,
};
pub use superblock::{
    CompatFeatures, IncompatFeatures, RofsSuperblock, SUPERBLOCK_REGION_LEN, superblock_checksum,
    verify_superblock_checksum,
};

use rofs_error::RofsError;
use rofs_types::ParseError;

/// Convert a parse failure at `block` into the runtime error taxonomy.
///
/// Wrong magic means "not ours"; refusals of well-formed values become
/// feature errors; everything else is corruption at `block`.
#[must_use]
pub fn parse_error_to_rofs(err: &ParseError, block: u64) -> RofsError {
    match err {
        ParseError::InvalidMagic { .. } => RofsError::NotThisFilesystem(err.to_string()),
        ParseError::ChecksumMismatch {
            expected, computed, ..
        } => RofsError::ChecksumMismatch {
            expected: *expected,
            computed: *computed,
        },
        ParseError::Unsupported {
            field: "blkszbits",
            value,
        } => RofsError::UnsupportedBlockSize(format!("blkszbits {value}")),
        ParseError::Unsupported { field, value } => {
            RofsError::UnsupportedFeature(format!("{field} {value:#x}"))
        }
        ParseError::InsufficientData { .. }
        | ParseError::InvalidField { .. }
        | ParseError::IntegerConversion { .. } => RofsError::CorruptLayout {
            block,
            detail: err.to_string(),
        },
    }
}

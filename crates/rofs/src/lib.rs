#![forbid(unsafe_code)]
//! Public API facade for read-only compressed images.
//!
//! Re-exports the mounted-image API from `rofs-core` together with the
//! types that appear in its signatures, so downstream consumers (the CLI,
//! a FUSE front-end, a decompression layer) depend on one crate.

pub use rofs_core::*;

pub use rofs_block::{
    BlockDevice, ByteDevice, DeviceOpener, DeviceTable, FileDeviceOpener, MemoryDeviceOpener,
    MetaBuf,
};
pub use rofs_error::{Result, RofsError};
pub use rofs_extent::{ExtentMapping, MappingKind, ObservableExtent, ObservableKind};
pub use rofs_ondisk::{
    CompressionAlgorithm, FileLayout, InodeLayoutInfo, Lz4Config, LzmaConfig, RofsInode,
    RofsSuperblock,
};
pub use rofs_types::{BlockNumber, DeviceId, Nid};

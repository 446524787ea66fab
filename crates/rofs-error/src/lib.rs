#![forbid(unsafe_code)]
//! Error types for the read-only image filesystem.
//!
//! # Error Taxonomy
//!
//! Errors come in two layers:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `rofs-types` | On-disk format violations detected during byte parsing |
//! | Runtime | `RofsError` | `rofs-error` (this crate) | Errors returned by the loader, resolver, mount and CLI |
//!
//! `rofs-error` does not depend on `rofs-types`. The conversion from
//! `ParseError` to `RofsError` lives in `rofs-ondisk::parse_error_to_rofs`,
//! which knows the block being parsed.
//!
//! | ParseError Variant | RofsError Variant |
//! |--------------------|-------------------|
//! | `InsufficientData` | `CorruptLayout { block, detail }` |
//! | `InvalidMagic` | `NotThisFilesystem` |
//! | `InvalidField` | `CorruptLayout` |
//! | `IntegerConversion` | `CorruptLayout` |
//! | `ChecksumMismatch` | `ChecksumMismatch` |
//! | `Unsupported` | `UnsupportedFeature` (or `UnsupportedBlockSize` for `blkszbits`) |
//!
//! ## Severity
//!
//! - `NotThisFilesystem`: the image is not ours; the caller should try
//!   another driver. See [`RofsError::is_not_this_filesystem`].
//! - `ChecksumMismatch`, `CorruptLayout`, `CrossBlockInlineData`,
//!   `UnknownDevice`: on-disk corruption or a hostile image. Fatal to the
//!   mount and never worked around.
//! - `UnsupportedFeature`, `UnsupportedBlockSize`: forward-compatibility
//!   refusals. The image may be fine, this build cannot read it.
//! - `DeviceCountMismatch`, `InvalidOption`: caller configuration errors.
//! - `Io`: propagated verbatim from the block-I/O layer.
//!
//! ## errno Mapping
//!
//! Every variant maps to exactly one POSIX errno via [`RofsError::to_errno`].
//! The mapping is exhaustive (no wildcard arms) so adding a new variant is a
//! compile error until its errno is assigned.
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | raw OS error, else `EIO` |
//! | `NotThisFilesystem` | `EINVAL` |
//! | `ChecksumMismatch` | `EBADMSG` |
//! | `CorruptLayout` | `EUCLEAN` |
//! | `CrossBlockInlineData` | `EUCLEAN` |
//! | `UnknownDevice` | `ENODEV` |
//! | `UnsupportedFeature` | `EOPNOTSUPP` |
//! | `UnsupportedBlockSize` | `EOPNOTSUPP` |
//! | `DeviceCountMismatch` | `EINVAL` |
//! | `InvalidOption` | `EINVAL` |
//! | `NotDirectory` | `ENOTDIR` |
//! | `Internal` | `EFAULT` |

use thiserror::Error;

/// Unified error type for mount, resolution and raw read operations.
#[derive(Debug, Error)]
pub enum RofsError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The magic number did not match; the image belongs to another driver.
    #[error("not this filesystem: {0}")]
    NotThisFilesystem(String),

    /// Stored superblock checksum disagrees with the recomputed one.
    #[error("superblock checksum mismatch: stored {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    /// Metadata is structurally invalid at a known block.
    #[error("corrupt layout at block {block}: {detail}")]
    CorruptLayout { block: u64, detail: String },

    /// Tail-packed data would cross the block holding its inode.
    #[error("inline data of nid {nid} crosses a block boundary")]
    CrossBlockInlineData { nid: u64 },

    /// A chunk referenced a device id with no descriptor.
    #[error("unknown device id {0}")]
    UnknownDevice(u16),

    /// The image requires a feature this build does not implement.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("unsupported block size: {0}")]
    UnsupportedBlockSize(String),

    /// The image's device table and the caller's device list disagree.
    #[error("device count mismatch: image declares {on_disk} extra devices, {given} given")]
    DeviceCountMismatch { on_disk: u16, given: usize },

    #[error("invalid mount option: {0}")]
    InvalidOption(String),

    /// The root inode is not a directory.
    #[error("not a directory")]
    NotDirectory,

    /// Internal contract violation (a bug, not an image problem).
    #[error("internal error: {0}")]
    Internal(String),
}

impl RofsError {
    /// Convert this error into a POSIX errno.
    ///
    /// The mapping is exhaustive. Policy notes:
    /// - `CorruptLayout`/`CrossBlockInlineData` → `EUCLEAN`: "structure needs
    ///   cleaning", the conventional corruption errno.
    /// - `ChecksumMismatch` → `EBADMSG`.
    /// - `NotThisFilesystem` → `EINVAL`: what mount(2) reports for a wrong
    ///   filesystem type.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::NotThisFilesystem(_)
            | Self::DeviceCountMismatch { .. }
            | Self::InvalidOption(_) => libc::EINVAL,
            Self::ChecksumMismatch { .. } => libc::EBADMSG,
            Self::CorruptLayout { .. } | Self::CrossBlockInlineData { .. } => libc::EUCLEAN,
            Self::UnknownDevice(_) => libc::ENODEV,
            Self::UnsupportedFeature(_) | Self::UnsupportedBlockSize(_) => libc::EOPNOTSUPP,
            Self::NotDirectory => libc::ENOTDIR,
            Self::Internal(_) => libc::EFAULT,
        }
    }

    /// True when the caller should try a different driver.
    #[must_use]
    pub fn is_not_this_filesystem(&self) -> bool {
        matches!(self, Self::NotThisFilesystem(_))
    }

    /// True for errors that indicate on-disk corruption or a hostile image.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::CorruptLayout { .. }
                | Self::CrossBlockInlineData { .. }
                | Self::UnknownDevice(_)
        )
    }
}

/// Result alias using `RofsError`.
pub type Result<T> = std::result::Result<T, RofsError>;

#![forbid(unsafe_code)]
//! Mounted image: superblock loading, device setup and file resolution.
//!
//! ```ignore
//! let fs = RofsMount::open("/path/to/image.rofs", MountOptions::default())?;
//! let root = fs.root_inode()?;
//! println!("{} blocks, root nid {}", fs.statfs().total_blocks, root.nid);
//! ```

pub mod codec;
pub mod options;

pub use codec::{BuiltinCodecConfigs, CodecConfigLoader, load_codec_configs};
pub use options::{CacheStrategy, MountOptions};

use rofs_block::{
    BlockDevice, DeviceOpener, DeviceTable, DeviceTableParams, FileDeviceOpener, MetaBuf,
    open_file_block_device, read_bytes,
};
use rofs_error::{Result, RofsError};
use rofs_extent::{ExtentMapping, ExtentResolver, ObservableExtent, ObservableKind, to_observable};
use rofs_ondisk::{
    InodeLayoutInfo, RofsInode, RofsSuperblock, decode_i_format, parse_error_to_rofs,
};
use rofs_types::{BlockNumber, Nid, ParseError, ROFS_BLOCK_SIZE, ROFS_NAME_LEN, blkoff};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

// ── Superblock loading ──────────────────────────────────────────────────────

/// Read block 0 of `primary` and validate the superblock.
///
/// Wrong magic yields `NotThisFilesystem` so a caller can try another
/// driver; every other refusal is logged.
pub fn load_superblock(primary: &dyn BlockDevice, meta: &mut MetaBuf) -> Result<RofsSuperblock> {
    if primary.block_size() != ROFS_BLOCK_SIZE {
        error!(block_size = primary.block_size(), "primary device block size unsupported");
        return Err(RofsError::UnsupportedBlockSize(format!(
            "device block size {}",
            primary.block_size()
        )));
    }
    let block0 = meta.map(primary, BlockNumber(0))?;
    let parsed = RofsSuperblock::parse_block0(block0);
    meta.release();

    parsed.map_err(|e| {
        let err = parse_error_to_rofs(&e, 0);
        match &e {
            ParseError::InvalidMagic { actual, .. } => {
                debug!(magic = actual, "no superblock magic in block 0");
            }
            ParseError::ChecksumMismatch {
                expected, computed, ..
            } => error!(expected, computed, "superblock checksum mismatch"),
            ParseError::Unsupported { field, value } => {
                error!(field, value, "superblock requires an unsupported feature");
            }
            _ => error!(error = %e, "corrupt superblock"),
        }
        err
    })
}

// ── Mounted image ───────────────────────────────────────────────────────────

/// Filesystem-wide counters, the `statfs` view of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatFs {
    pub block_size: u32,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub files: u64,
    pub name_len: u32,
}

/// A mounted image. Immutable after construction and shareable across
/// reader threads; each read path brings its own [`MetaBuf`].
pub struct RofsMount<C = BuiltinCodecConfigs> {
    sb: RofsSuperblock,
    options: MountOptions,
    devices: DeviceTable,
    codecs: C,
}

impl<C> std::fmt::Debug for RofsMount<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RofsMount")
            .field("volume_name", &self.sb.volume_name)
            .field("options", &self.options)
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

impl RofsMount<BuiltinCodecConfigs> {
    /// Open the image at `path` with extra devices taken from `options`.
    pub fn open(path: impl AsRef<Path>, options: MountOptions) -> Result<Self> {
        let primary: Arc<dyn BlockDevice> =
            Arc::new(open_file_block_device(path, ROFS_BLOCK_SIZE)?);
        Self::from_device(
            primary,
            options,
            &FileDeviceOpener,
            BuiltinCodecConfigs::default(),
        )
    }
}

impl<C: CodecConfigLoader> RofsMount<C> {
    /// Mount from an already-open primary device.
    ///
    /// Loads the superblock, hands compression records to `codecs`, opens
    /// the extra devices through `opener` and checks the root inode. Devices
    /// opened before a failure are released before the error is returned.
    pub fn from_device(
        primary: Arc<dyn BlockDevice>,
        options: MountOptions,
        opener: &dyn DeviceOpener,
        mut codecs: C,
    ) -> Result<Self> {
        let mut meta = MetaBuf::new();
        let sb = load_superblock(primary.as_ref(), &mut meta)?;
        load_codec_configs(primary.as_ref(), &sb, &mut meta, &mut codecs)?;
        meta.release();

        let devices = DeviceTable::init(
            primary,
            DeviceTableParams {
                primary_blocks: sb.blocks,
                on_disk_devices: sb.extra_devices,
                slot_table_offset: sb.devt_offset(),
                flat_addressing: options.flat_device_addressing,
            },
            &options.devices,
            opener,
        )?;

        let mount = Self {
            sb,
            options,
            devices,
            codecs,
        };
        let root = mount.root_inode()?;
        if !root.is_dir() {
            error!(nid = root.nid.0, mode = root.mode, "root inode is not a directory");
            return Err(RofsError::NotDirectory);
        }

        info!(
            volume = %mount.sb.volume_name,
            uuid = %mount.sb.uuid_string(),
            blocks = mount.sb.blocks,
            devices = mount.devices.devices().len(),
            root_nid = mount.sb.root_nid.0,
            "mounted image"
        );
        Ok(mount)
    }

    #[must_use]
    pub fn superblock(&self) -> &RofsSuperblock {
        &self.sb
    }

    #[must_use]
    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    #[must_use]
    pub fn device_table(&self) -> &DeviceTable {
        &self.devices
    }

    #[must_use]
    pub fn codecs(&self) -> &C {
        &self.codecs
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.sb.block_size()
    }

    #[must_use]
    pub fn root_nid(&self) -> Nid {
        self.sb.root_nid
    }

    pub fn root_inode(&self) -> Result<RofsInode> {
        self.read_inode(self.sb.root_nid)
    }

    /// Read and parse the inode record of `nid`.
    ///
    /// Records are 32-byte aligned, so an extended record may start in the
    /// last 32 bytes of a block and continue into the next one.
    pub fn read_inode(&self, nid: Nid) -> Result<RofsInode> {
        let iloc = self.sb.iloc(nid).ok_or_else(|| RofsError::CorruptLayout {
            block: u64::from(self.sb.meta_blkaddr),
            detail: format!("inode location of nid {} overflows", nid.0),
        })?;
        let block = BlockNumber::containing(iloc);
        let primary = self.devices.primary().as_ref();
        let to_rofs = |e: ParseError| {
            error!(nid = nid.0, block = block.0, error = %e, "bad inode record");
            parse_error_to_rofs(&e, block.0)
        };

        let mut meta = MetaBuf::new();
        let start = blkoff(iloc);
        let head = meta.map(primary, block)?;
        let i_format = u16::from_le_bytes([head[start], head[start + 1]]);
        let (version, _) = decode_i_format(i_format).map_err(to_rofs)?;
        let record_len = version.record_size() as usize;

        let inode = if start + record_len <= head.len() {
            RofsInode::parse_from_bytes(nid, iloc, &head[start..start + record_len])
        } else {
            let mut record = [0_u8; 64];
            let first = head.len() - start;
            record[..first].copy_from_slice(&head[start..]);
            let next = block
                .checked_add(1)
                .ok_or_else(|| RofsError::Internal("inode block overflow".to_owned()))?;
            let tail = meta.map(primary, next)?;
            record[first..record_len].copy_from_slice(&tail[..record_len - first]);
            debug!(nid = nid.0, block = block.0, "inode record straddles blocks");
            RofsInode::parse_from_bytes(nid, iloc, &record[..record_len])
        }
        .map_err(to_rofs)?;
        meta.release();
        Ok(inode)
    }

    /// Layout descriptor of `inode`.
    pub fn layout_info(&self, inode: &RofsInode) -> Result<InodeLayoutInfo> {
        inode.layout_info().map_err(|e| {
            error!(nid = inode.nid.0, error = %e, "unsupported inode layout");
            parse_error_to_rofs(&e, BlockNumber::containing(inode.iloc).0)
        })
    }

    #[must_use]
    pub fn resolver(&self) -> ExtentResolver<'_> {
        ExtentResolver::new(
            self.devices.primary().as_ref(),
            self.devices.device_id_mask(),
        )
    }

    /// Resolve the extent holding `offset` of `inode`.
    pub fn resolve(&self, inode: &RofsInode, offset: u64, len: u64) -> Result<ExtentMapping> {
        let layout = self.layout_info(inode)?;
        let mut meta = MetaBuf::new();
        let mapping = self.resolver().resolve(&layout, offset, len, &mut meta)?;
        meta.release();
        Ok(mapping)
    }

    /// Package `mapping` for the read path; inline bytes borrow from `meta`.
    pub fn map<'m>(
        &self,
        mapping: &ExtentMapping,
        meta: &'m mut MetaBuf,
    ) -> Result<ObservableExtent<'m>> {
        to_observable(mapping, &self.devices, meta)
    }

    /// Every mapping of `inode`, front to back.
    pub fn extents(&self, inode: &RofsInode) -> Result<Vec<ExtentMapping>> {
        let layout = self.layout_info(inode)?;
        self.resolver().walk(&layout, &mut MetaBuf::new())
    }

    /// Copy file bytes from `offset` into `buf`; holes read as zeros.
    ///
    /// Returns the number of bytes copied, short only at end of file.
    pub fn read_at(&self, inode: &RofsInode, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if inode.layout.is_compressed() {
            return Err(RofsError::UnsupportedFeature(format!(
                "nid {} is compressed; decompression is not available here",
                inode.nid.0
            )));
        }
        let layout = self.layout_info(inode)?;
        let resolver = self.resolver();
        let mut meta = MetaBuf::new();
        let mut done = 0_usize;

        while done < buf.len() {
            let pos = offset.saturating_add(done as u64);
            if pos >= layout.size {
                break;
            }
            let want = (buf.len() - done) as u64;
            let mapping = resolver.resolve(&layout, pos, want, &mut meta)?;
            let skip = pos - mapping.logical_offset;
            let n = mapping
                .logical_len
                .saturating_sub(skip)
                .min(want)
                .min(layout.size - pos);
            if n == 0 {
                return Err(RofsError::Internal(format!(
                    "read of nid {} made no progress at offset {pos}",
                    inode.nid.0
                )));
            }
            let n = usize::try_from(n)
                .map_err(|_| RofsError::Internal("read length does not fit usize".to_owned()))?;
            let dst = &mut buf[done..done + n];

            let seen = to_observable(&mapping, &self.devices, &mut meta)?;
            match seen.kind {
                ObservableKind::Hole => dst.fill(0),
                ObservableKind::Inline { data } => {
                    let at = usize::try_from(skip).map_err(|_| {
                        RofsError::Internal("inline offset does not fit usize".to_owned())
                    })?;
                    dst.copy_from_slice(&data[at..at + n]);
                }
                ObservableKind::Mapped { device, offset, .. } => {
                    read_bytes(device.as_ref(), offset + skip, dst)?;
                }
            }
            done += n;
        }
        meta.release();
        Ok(done)
    }

    #[must_use]
    pub fn statfs(&self) -> StatFs {
        StatFs {
            block_size: self.sb.block_size(),
            total_blocks: self.devices.total_blocks(),
            free_blocks: 0,
            files: self.sb.inos,
            name_len: ROFS_NAME_LEN,
        }
    }
}

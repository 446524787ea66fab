#![forbid(unsafe_code)]
//! Extent resolution: file logical offset to physical extent.
//!
//! [`ExtentResolver`] turns an inode's layout descriptor and a logical byte
//! offset into an [`ExtentMapping`]: a hole, an inline range in the inode's
//! metadata block, or a mapped range on one of the image's devices. A single
//! mapping may cover less than the caller asked for; callers advance to
//! `logical_offset + logical_len` and resolve again.
//!
//! [`to_observable`] then packages a mapping for the read path, resolving the
//! device id through the [`DeviceTable`](rofs_block::DeviceTable).

mod adaptor;

pub use adaptor::{ObservableExtent, ObservableKind, to_observable};

use rofs_block::{BlockDevice, MetaBuf};
use rofs_error::{Result, RofsError};
use rofs_ondisk::{BlockMapEntry, ChunkIndexEntry, FileLayout, InodeLayoutInfo, chunk_entry_size};
use rofs_types::{BlockNumber, DeviceId, Nid, ROFS_BLOCK_SIZE, ROFS_BLOCK_SIZE_BITS, align_up};
use serde::{Deserialize, Serialize};
use tracing::{error, trace};

const BLOCK_SIZE: u64 = ROFS_BLOCK_SIZE as u64;

/// Where the bytes of one mapping live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingKind {
    /// Unbacked range; reads as zeros.
    Hole,
    /// Tail-packed bytes at byte address `addr` of the primary device,
    /// inside the inode's own metadata block.
    Inline { addr: u64 },
    /// `logical_len` bytes at byte `physical` of device `device_id`, before
    /// device-table translation.
    Mapped { device_id: DeviceId, physical: u64 },
}

/// Result of resolving one logical offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentMapping {
    pub nid: Nid,
    pub requested_offset: u64,
    pub requested_len: u64,
    /// First logical byte covered. Equals `requested_offset` except for
    /// chunked files, where it is the start of the chunk.
    pub logical_offset: u64,
    pub logical_len: u64,
    pub kind: MappingKind,
}

impl ExtentMapping {
    /// One past the last logical byte covered.
    #[must_use]
    pub fn logical_end(&self) -> u64 {
        self.logical_offset.saturating_add(self.logical_len)
    }

    #[must_use]
    pub fn is_hole(&self) -> bool {
        matches!(self.kind, MappingKind::Hole)
    }
}

/// Resolves logical offsets against metadata on the primary device.
///
/// Holds only shared, immutable mount state; every call brings its own
/// [`MetaBuf`].
#[derive(Clone, Copy)]
pub struct ExtentResolver<'a> {
    primary: &'a dyn BlockDevice,
    device_id_mask: u16,
}

impl std::fmt::Debug for ExtentResolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtentResolver")
            .field("device_id_mask", &self.device_id_mask)
            .finish_non_exhaustive()
    }
}

impl<'a> ExtentResolver<'a> {
    #[must_use]
    pub fn new(primary: &'a dyn BlockDevice, device_id_mask: u16) -> Self {
        Self {
            primary,
            device_id_mask,
        }
    }

    /// Resolve `offset` within the file described by `layout`.
    ///
    /// Offsets at or past the end of the file yield a zero-length hole.
    pub fn resolve(
        &self,
        layout: &InodeLayoutInfo,
        offset: u64,
        len: u64,
        meta: &mut MetaBuf,
    ) -> Result<ExtentMapping> {
        let mut mapping = ExtentMapping {
            nid: layout.nid,
            requested_offset: offset,
            requested_len: len,
            logical_offset: offset,
            logical_len: 0,
            kind: MappingKind::Hole,
        };
        if offset >= layout.size {
            trace!(nid = layout.nid.0, offset, size = layout.size, "offset past eof");
            return Ok(mapping);
        }

        match layout.layout {
            FileLayout::Flat {
                raw_blkaddr,
                tail_packing,
            } => resolve_flat(layout, raw_blkaddr, tail_packing, &mut mapping)?,
            FileLayout::Chunk {
                chunk_bits,
                index_format,
            } => self.resolve_chunk(layout, chunk_bits, index_format, meta, &mut mapping)?,
            FileLayout::Compressed { .. } => {
                return Err(RofsError::UnsupportedFeature(format!(
                    "nid {} uses a compressed layout; extents come from the decompression front-end",
                    layout.nid.0
                )));
            }
        }

        trace!(
            nid = layout.nid.0,
            offset,
            logical_offset = mapping.logical_offset,
            logical_len = mapping.logical_len,
            kind = ?mapping.kind,
            "resolved extent"
        );
        Ok(mapping)
    }

    fn resolve_chunk(
        &self,
        layout: &InodeLayoutInfo,
        chunk_bits: u8,
        index_format: bool,
        meta: &mut MetaBuf,
        mapping: &mut ExtentMapping,
    ) -> Result<()> {
        let corrupt = |detail: String| RofsError::CorruptLayout {
            block: BlockNumber::containing(layout.inode_loc).0,
            detail,
        };
        if u32::from(chunk_bits) >= u64::BITS {
            return Err(corrupt(format!(
                "chunk bits {chunk_bits} of nid {} out of range",
                layout.nid.0
            )));
        }

        let chunk_size = 1_u64 << chunk_bits;
        let chunk_nr = mapping.requested_offset >> chunk_bits;
        let chunk_start = chunk_nr << chunk_bits;
        let unit = chunk_entry_size(index_format);

        let pos = layout
            .trailer_offset()
            .and_then(|t| align_up(t, unit))
            .and_then(|table| chunk_nr.checked_mul(unit)?.checked_add(table))
            .ok_or_else(|| corrupt(format!("chunk table of nid {} overflows", layout.nid.0)))?;

        #[allow(clippy::cast_possible_truncation)] // 4 or 8
        let raw = meta.map_range(self.primary, pos, unit as usize)?;
        let (device_id, blkaddr, null) = if index_format {
            let entry = ChunkIndexEntry::parse_from_bytes(raw)
                .map_err(|e| rofs_ondisk::parse_error_to_rofs(&e, BlockNumber::containing(pos).0))?;
            (
                DeviceId(entry.device_id & self.device_id_mask),
                entry.blkaddr,
                entry.is_null(),
            )
        } else {
            let entry = BlockMapEntry::parse_from_bytes(raw)
                .map_err(|e| rofs_ondisk::parse_error_to_rofs(&e, BlockNumber::containing(pos).0))?;
            (DeviceId::PRIMARY, entry.0, entry.is_null())
        };

        mapping.logical_offset = chunk_start;
        mapping.logical_len = chunk_size.min(layout.size - chunk_start);
        mapping.kind = if null {
            MappingKind::Hole
        } else {
            MappingKind::Mapped {
                device_id,
                physical: u64::from(blkaddr) << ROFS_BLOCK_SIZE_BITS,
            }
        };
        Ok(())
    }

    /// Resolve every mapping of the file, front to back.
    pub fn walk(&self, layout: &InodeLayoutInfo, meta: &mut MetaBuf) -> Result<Vec<ExtentMapping>> {
        let mut out = Vec::new();
        let mut pos = 0_u64;
        while pos < layout.size {
            let mapping = self.resolve(layout, pos, layout.size - pos, meta)?;
            let next = mapping.logical_end();
            if next <= pos {
                return Err(RofsError::Internal(format!(
                    "extent walk of nid {} stalled at offset {pos}",
                    layout.nid.0
                )));
            }
            out.push(mapping);
            pos = next;
        }
        meta.release();
        Ok(out)
    }
}

fn resolve_flat(
    layout: &InodeLayoutInfo,
    raw_blkaddr: u32,
    tail_packing: bool,
    mapping: &mut ExtentMapping,
) -> Result<()> {
    let offset = mapping.requested_offset;
    let nblocks = layout.size.div_ceil(BLOCK_SIZE);
    // A block-aligned size leaves nothing for the inline tail.
    let has_tail = tail_packing && layout.size % BLOCK_SIZE != 0;
    let last_block = nblocks - u64::from(has_tail);
    let mapped_end = last_block * BLOCK_SIZE;

    if offset < mapped_end {
        let physical = (u64::from(raw_blkaddr) << ROFS_BLOCK_SIZE_BITS)
            .checked_add(offset)
            .ok_or_else(|| RofsError::CorruptLayout {
                block: u64::from(raw_blkaddr),
                detail: format!("flat extent of nid {} overflows", layout.nid.0),
            })?;
        mapping.logical_len = mapped_end - offset;
        mapping.kind = MappingKind::Mapped {
            device_id: DeviceId::PRIMARY,
            physical,
        };
        return Ok(());
    }

    // Only reachable with a non-empty tail: the remainder sits right after
    // the inode record and its xattrs.
    let addr = layout
        .trailer_offset()
        .and_then(|t| t.checked_add(offset % BLOCK_SIZE))
        .ok_or_else(|| RofsError::CorruptLayout {
            block: BlockNumber::containing(layout.inode_loc).0,
            detail: format!("inline data address of nid {} overflows", layout.nid.0),
        })?;
    let len = layout.size - offset;
    if addr % BLOCK_SIZE + len > BLOCK_SIZE {
        error!(
            nid = layout.nid.0,
            addr,
            len,
            block = BlockNumber::containing(addr).0,
            "inline data crosses block boundary"
        );
        return Err(RofsError::CrossBlockInlineData {
            nid: layout.nid.0,
        });
    }
    mapping.logical_len = len;
    mapping.kind = MappingKind::Inline { addr };
    Ok(())
}

//! Packaging of resolved mappings for the read path.

use crate::{ExtentMapping, MappingKind};
use rofs_block::{BlockDevice, DeviceTable, MetaBuf};
use rofs_error::{Result, RofsError};
use rofs_types::DeviceId;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// What a reader sees for one extent.
pub enum ObservableKind<'a> {
    Hole,
    /// Bytes borrowed from the caller's metadata buffer; valid until that
    /// buffer is released or refetched.
    Inline { data: &'a [u8] },
    /// `length` bytes at byte `offset` of `device`.
    Mapped {
        device_id: DeviceId,
        device: Arc<dyn BlockDevice>,
        offset: u64,
    },
}

impl fmt::Debug for ObservableKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hole => f.write_str("Hole"),
            Self::Inline { data } => f.debug_struct("Inline").field("len", &data.len()).finish(),
            Self::Mapped {
                device_id, offset, ..
            } => f
                .debug_struct("Mapped")
                .field("device_id", device_id)
                .field("offset", offset)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug)]
pub struct ObservableExtent<'a> {
    /// Logical file offset of the first byte.
    pub logical_offset: u64,
    pub length: u64,
    pub kind: ObservableKind<'a>,
}

/// Translate `mapping` into device handles and borrowed inline bytes.
///
/// A zero-length hole (offset past EOF) is reported with the caller's
/// requested length so readers can skip ahead in one step.
pub fn to_observable<'m>(
    mapping: &ExtentMapping,
    table: &DeviceTable,
    meta: &'m mut MetaBuf,
) -> Result<ObservableExtent<'m>> {
    match mapping.kind {
        MappingKind::Hole => {
            let length = if mapping.logical_len == 0 {
                mapping.requested_len
            } else {
                mapping.logical_len
            };
            Ok(ObservableExtent {
                logical_offset: mapping.logical_offset,
                length,
                kind: ObservableKind::Hole,
            })
        }
        MappingKind::Mapped {
            device_id,
            physical,
        } => {
            let resolved = table.resolve(device_id, physical)?;
            trace!(
                nid = mapping.nid.0,
                device_id = resolved.device_id.0,
                offset = resolved.offset,
                len = mapping.logical_len,
                "mapped extent"
            );
            Ok(ObservableExtent {
                logical_offset: mapping.logical_offset,
                length: mapping.logical_len,
                kind: ObservableKind::Mapped {
                    device_id: resolved.device_id,
                    device: resolved.device,
                    offset: resolved.offset,
                },
            })
        }
        MappingKind::Inline { addr } => {
            let len = usize::try_from(mapping.logical_len)
                .map_err(|_| RofsError::Internal("inline length does not fit usize".to_owned()))?;
            let data = meta.map_range(table.primary().as_ref(), addr, len)?;
            Ok(ObservableExtent {
                logical_offset: mapping.logical_offset,
                length: mapping.logical_len,
                kind: ObservableKind::Inline { data },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExtentResolver;
    use rofs_block::{ByteBlockDevice, DeviceTableParams, MemoryByteDevice, MemoryDeviceOpener};
    use rofs_harness::{DeviceSpec, ImageBuilder, InodeSpec, patterned};
    use rofs_ondisk::{ChunkIndexEntry, RofsInode, RofsSuperblock};
    use rofs_types::{Nid, ROFS_BLOCK_SIZE};
    use std::path::PathBuf;

    fn primary(img: Vec<u8>) -> Arc<dyn BlockDevice> {
        Arc::new(ByteBlockDevice::new(MemoryByteDevice::new(img), ROFS_BLOCK_SIZE).expect("dev"))
    }

    #[test]
    fn past_eof_hole_reports_requested_length() {
        let img = ImageBuilder::new()
            .inode(InodeSpec::dir(0))
            .inode(InodeSpec::flat(1, 4, 100))
            .build()
            .expect("build");
        let layout = RofsInode::parse_from_bytes(Nid(1), 4096 + 32, &img[4096 + 32..])
            .expect("inode")
            .layout_info()
            .expect("layout");
        let dev = primary(img);
        let table = DeviceTable::primary_only(Arc::clone(&dev), 2);
        let mut meta = MetaBuf::new();
        let mapping = ExtentResolver::new(dev.as_ref(), 0)
            .resolve(&layout, 500, 8192, &mut meta)
            .expect("resolve");
        assert_eq!(mapping.logical_len, 0);
        let seen = to_observable(&mapping, &table, &mut meta).expect("observable");
        assert_eq!(seen.length, 8192);
        assert!(matches!(seen.kind, ObservableKind::Hole));
    }

    #[test]
    fn inline_tail_is_borrowed_from_metadata() {
        let data = patterned(5000, 4);
        let builder = ImageBuilder::new()
            .inode(InodeSpec::dir(0))
            .inode(InodeSpec::inline(3, 5, 5000, data[4096..].to_vec()))
            .data(5, data[..4096].to_vec());
        let img = builder.build().expect("build");
        let iloc = builder.iloc(3);
        let layout = RofsInode::parse_from_bytes(Nid(3), iloc, &img[iloc as usize..])
            .expect("inode")
            .layout_info()
            .expect("layout");
        let dev = primary(img);
        let table = DeviceTable::primary_only(Arc::clone(&dev), 6);
        let mut meta = MetaBuf::new();
        let mapping = ExtentResolver::new(dev.as_ref(), 0)
            .resolve(&layout, 4096, 904, &mut meta)
            .expect("resolve");
        let seen = to_observable(&mapping, &table, &mut meta).expect("observable");
        let ObservableKind::Inline { data: tail } = seen.kind else {
            panic!("expected inline, got {:?}", seen.kind);
        };
        assert_eq!(tail, &data[4096..]);
    }

    #[test]
    fn chunk_on_extra_device_resolves_through_table() {
        let mut entries = vec![
            ChunkIndexEntry {
                advise: 0,
                device_id: 0,
                blkaddr: 8,
            };
            5
        ];
        entries[2] = ChunkIndexEntry {
            advise: 0,
            device_id: 1,
            blkaddr: 10,
        };
        let builder = ImageBuilder::new()
            .inode(InodeSpec::dir(0))
            .inode(InodeSpec::chunk_indexes(2, 300_000, 16, entries))
            .device(DeviceSpec {
                tag: "blob0".to_owned(),
                blocks: 64,
                mapped_blkaddr: 0,
            })
            .devt_slotoff(4);
        let img = builder.build().expect("build");
        let sb = RofsSuperblock::parse_block0(&img).expect("sb");
        let iloc = builder.iloc(2);
        let layout = RofsInode::parse_from_bytes(Nid(2), iloc, &img[iloc as usize..])
            .expect("inode")
            .layout_info()
            .expect("layout");
        let dev = primary(img);

        let mut opener = MemoryDeviceOpener::new();
        opener
            .insert_bytes("/dev/blob0", vec![0xAB; 64 * 4096])
            .expect("insert");
        let table = DeviceTable::init(
            Arc::clone(&dev),
            DeviceTableParams {
                primary_blocks: sb.blocks,
                on_disk_devices: sb.extra_devices,
                slot_table_offset: sb.devt_offset(),
                flat_addressing: false,
            },
            &[PathBuf::from("/dev/blob0")],
            &opener,
        )
        .expect("table");

        let resolver = ExtentResolver::new(dev.as_ref(), table.device_id_mask());
        let mut meta = MetaBuf::new();
        let mapping = resolver
            .resolve(&layout, 2 * 65536, 65536, &mut meta)
            .expect("resolve");
        let seen = to_observable(&mapping, &table, &mut meta).expect("observable");
        assert_eq!(seen.length, 65536);
        let ObservableKind::Mapped {
            device_id,
            device,
            offset,
        } = seen.kind
        else {
            panic!("expected a mapped extent");
        };
        assert_eq!(device_id, DeviceId(1));
        assert_eq!(offset, 10 * 4096);
        assert_eq!(device.block_count(), 64);
    }
}

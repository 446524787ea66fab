#![forbid(unsafe_code)]

use proptest::prelude::*;
use rofs_block::{ByteBlockDevice, MemoryByteDevice, MetaBuf};
use rofs_extent::{ExtentResolver, MappingKind};
use rofs_harness::{ImageBuilder, InodeSpec};
use rofs_ondisk::{ChunkIndexEntry, InodeLayoutInfo, RofsInode};
use rofs_types::{DeviceId, Nid, ROFS_BLOCK_SIZE, ROFS_NULL_ADDR};

fn mount(builder: &ImageBuilder, nid: u64) -> (ByteBlockDevice<MemoryByteDevice>, InodeLayoutInfo) {
    let img = builder.build().expect("build");
    let iloc = builder.iloc(nid);
    let layout = RofsInode::parse_from_bytes(Nid(nid), iloc, &img[iloc as usize..])
        .expect("inode")
        .layout_info()
        .expect("layout");
    let dev = ByteBlockDevice::new(MemoryByteDevice::new(img), ROFS_BLOCK_SIZE).expect("device");
    (dev, layout)
}

/// Flat file sizes; tail-packed files keep their tail within what fits
/// after a record at the start of a block.
fn flat_case() -> impl Strategy<Value = (u64, bool)> {
    prop_oneof![
        (1_u64..40_000).prop_map(|size| (size, false)),
        (0_u64..10, 0_u64..=4064)
            .prop_filter("empty file", |(blocks, tail)| blocks * 4096 + tail > 0)
            .prop_map(|(blocks, tail)| (blocks * 4096 + tail, true)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn flat_walk_covers_file_without_gaps((size, tail_packing) in flat_case(), start_frac in 0.0_f64..1.0) {
        let tail_len = usize::try_from(size % 4096).expect("tail");
        let spec = if tail_packing {
            InodeSpec::inline(0, 2, size, vec![0x5A; tail_len])
        } else {
            InodeSpec::flat(0, 2, size)
        };
        let builder = ImageBuilder::new().inode(spec);
        let (dev, layout) = mount(&builder, 0);
        let resolver = ExtentResolver::new(&dev, 0);
        let mut meta = MetaBuf::new();

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let start = ((size as f64) * start_frac) as u64 % size;
        let mut pos = start;
        let mut inline_hits = 0;
        while pos < size {
            let m = resolver.resolve(&layout, pos, size - pos, &mut meta).expect("resolve");
            prop_assert_eq!(m.logical_offset, pos);
            prop_assert!(m.logical_len > 0);
            match m.kind {
                MappingKind::Inline { addr } => {
                    inline_hits += 1;
                    prop_assert_eq!(m.logical_end(), size);
                    prop_assert!(addr % 4096 + m.logical_len <= 4096);
                }
                MappingKind::Mapped { device_id, physical } => {
                    prop_assert_eq!(device_id, DeviceId::PRIMARY);
                    prop_assert_eq!(physical, 2 * 4096 + pos);
                }
                MappingKind::Hole => prop_assert!(false, "flat files have no holes"),
            }
            pos = m.logical_end();
        }
        prop_assert_eq!(pos, size);
        let expect_inline = tail_packing && size % 4096 != 0;
        prop_assert_eq!(inline_hits, usize::from(expect_inline));
    }

    #[test]
    fn offsets_past_eof_are_zero_length_holes(size in 0_u64..100_000, past in 0_u64..1_000_000) {
        let builder = ImageBuilder::new().inode(InodeSpec::flat(0, 2, size));
        let (dev, layout) = mount(&builder, 0);
        let m = ExtentResolver::new(&dev, 0)
            .resolve(&layout, size + past, 4096, &mut MetaBuf::new())
            .expect("resolve");
        prop_assert!(m.is_hole());
        prop_assert_eq!(m.logical_len, 0);
    }

    #[test]
    fn chunk_walk_reproduces_table(
        chunk_bits in 12_u8..=14,
        addrs in proptest::collection::vec(prop_oneof![Just(ROFS_NULL_ADDR), 3_u32..1000], 1..24),
        devices in proptest::collection::vec(0_u16..4, 24),
        short_tail in 0_u64..4096,
        index_format: bool,
    ) {
        let chunk_size = 1_u64 << chunk_bits;
        let chunks = addrs.len() as u64;
        let size = chunks * chunk_size - short_tail.min(chunk_size - 1);
        let spec = if index_format {
            let entries = addrs
                .iter()
                .zip(&devices)
                .map(|(&blkaddr, &device_id)| ChunkIndexEntry { advise: 0, device_id, blkaddr })
                .collect();
            InodeSpec::chunk_indexes(1, size, chunk_bits, entries)
        } else {
            InodeSpec::block_map(1, size, chunk_bits, addrs.clone())
        };
        let builder = ImageBuilder::new().inode(InodeSpec::dir(0)).inode(spec);
        let (dev, layout) = mount(&builder, 1);
        let resolver = ExtentResolver::new(&dev, 0b11);
        let mut meta = MetaBuf::new();

        for (nr, &addr) in addrs.iter().enumerate() {
            let offset = nr as u64 * chunk_size;
            let m = resolver.resolve(&layout, offset, chunk_size, &mut meta).expect("resolve");
            prop_assert_eq!(m.logical_offset, offset);
            prop_assert_eq!(m.logical_len, chunk_size.min(size - offset));
            if addr == ROFS_NULL_ADDR {
                prop_assert_eq!(m.kind, MappingKind::Hole);
            } else {
                let device_id = if index_format { DeviceId(devices[nr]) } else { DeviceId::PRIMARY };
                prop_assert_eq!(m.kind, MappingKind::Mapped { device_id, physical: u64::from(addr) * 4096 });
            }
        }

        let walk = resolver.walk(&layout, &mut meta).expect("walk");
        prop_assert_eq!(walk.len(), addrs.len());
        prop_assert_eq!(walk.last().map(|m| m.logical_end()), Some(size));
    }
}

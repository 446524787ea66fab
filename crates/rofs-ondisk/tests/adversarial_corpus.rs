#![forbid(unsafe_code)]

use proptest::prelude::*;
use rofs_ondisk::{
    BlockMapEntry, ChunkFormat, ChunkIndexEntry, CompatFeatures, DeviceSlot, IncompatFeatures,
    Lz4Config, LzmaConfig, RofsInode, RofsSuperblock, superblock_checksum,
};
use rofs_types::{
    Nid, ParseError, ROFS_BLOCK_SIZE, ROFS_BLOCK_SIZE_BITS, ROFS_SUPER_MAGIC, ROFS_SUPER_OFFSET,
};
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

#[derive(Debug, Default)]
struct ErrorCoverage {
    insufficient_data: u32,
    invalid_magic: u32,
    invalid_field: u32,
    integer_conversion: u32,
    checksum_mismatch: u32,
    unsupported: u32,
}

impl ErrorCoverage {
    fn observe(&mut self, err: &ParseError) {
        match err {
            ParseError::InsufficientData { .. } => self.insufficient_data += 1,
            ParseError::InvalidMagic { .. } => self.invalid_magic += 1,
            ParseError::InvalidField { .. } => self.invalid_field += 1,
            ParseError::IntegerConversion { .. } => self.integer_conversion += 1,
            ParseError::ChecksumMismatch { .. } => self.checksum_mismatch += 1,
            ParseError::Unsupported { .. } => self.unsupported += 1,
        }
    }
}

fn valid_block0(checksummed: bool) -> Vec<u8> {
    let mut b = vec![0_u8; ROFS_BLOCK_SIZE as usize];
    let sb = ROFS_SUPER_OFFSET;
    b[sb..sb + 4].copy_from_slice(&ROFS_SUPER_MAGIC.to_le_bytes());
    b[sb + 12] = ROFS_BLOCK_SIZE_BITS;
    b[sb + 36..sb + 40].copy_from_slice(&16_u32.to_le_bytes());
    b[sb + 40..sb + 44].copy_from_slice(&1_u32.to_le_bytes());
    b[sb + 64..sb + 68].copy_from_slice(b"fuzz");
    if checksummed {
        b[sb + 8..sb + 12].copy_from_slice(&CompatFeatures::SB_CHKSUM.0.to_le_bytes());
        let sum = superblock_checksum(&b[sb..]);
        b[sb + 4..sb + 8].copy_from_slice(&sum.to_le_bytes());
    }
    b
}

/// Deterministic hostile samples: truncations and single-field corruptions
/// of an otherwise valid block 0.
fn adversarial_samples() -> Vec<(String, Vec<u8>)> {
    let sb = ROFS_SUPER_OFFSET;
    let mut out = Vec::new();

    for len in [0_usize, 1, 4, 1023, 1024, 1028, 1100, 2048, 4095] {
        let mut b = valid_block0(false);
        b.truncate(len);
        out.push((format!("truncated_{len}"), b));
    }

    let mut b = valid_block0(false);
    b[sb..sb + 4].copy_from_slice(&0x0BAD_F00D_u32.to_le_bytes());
    out.push(("bad_magic".into(), b));

    let mut b = valid_block0(true);
    b[sb + 300] ^= 0x80;
    out.push(("checksum_flip".into(), b));

    for bits in [0_u8, 9, 13, 16, 255] {
        let mut b = valid_block0(false);
        b[sb + 12] = bits;
        out.push((format!("blkszbits_{bits}"), b));
    }

    for incompat in [0x20_u32, 0x8000_0000, 0xFFFF_FFFF] {
        let mut b = valid_block0(false);
        b[sb + 80..sb + 84].copy_from_slice(&incompat.to_le_bytes());
        out.push((format!("incompat_{incompat:x}"), b));
    }

    for slots in [248_u8, 255] {
        let mut b = valid_block0(false);
        b[sb + 13] = slots;
        out.push((format!("extslots_{slots}"), b));
    }

    let mut b = valid_block0(false);
    b[sb + 64..sb + 80].fill(b'N');
    out.push(("unterminated_volume_name".into(), b));

    out
}

fn run_parser<T, F>(
    sample_name: &str,
    parser_name: &'static str,
    parser_hits: &mut BTreeMap<&'static str, u32>,
    coverage: &mut ErrorCoverage,
    parser: F,
) -> bool
where
    F: FnOnce() -> Result<T, ParseError>,
{
    *parser_hits.entry(parser_name).or_default() += 1;
    match catch_unwind(AssertUnwindSafe(parser)) {
        Ok(Ok(_)) => false,
        Ok(Err(err)) => {
            coverage.observe(&err);
            true
        }
        Err(_) => panic!("parser `{parser_name}` panicked on sample `{sample_name}`"),
    }
}

#[test]
fn adversarial_samples_are_panic_free_and_exercise_parse_error_variants() {
    let samples = adversarial_samples();
    let mut parser_hits = BTreeMap::new();
    let mut coverage = ErrorCoverage::default();

    for (name, bytes) in &samples {
        let mut sample_had_error = false;

        sample_had_error |= run_parser(
            name,
            "superblock_parse_block0",
            &mut parser_hits,
            &mut coverage,
            || RofsSuperblock::parse_block0(bytes),
        );
        let tail = bytes.get(ROFS_SUPER_OFFSET..).unwrap_or(&[]);
        sample_had_error |= run_parser(
            name,
            "inode_parse",
            &mut parser_hits,
            &mut coverage,
            || RofsInode::parse_from_bytes(Nid(0), 0, tail),
        );
        sample_had_error |= run_parser(
            name,
            "device_slot_parse",
            &mut parser_hits,
            &mut coverage,
            || DeviceSlot::parse_from_bytes(tail),
        );
        sample_had_error |= run_parser(
            name,
            "lz4_config_parse",
            &mut parser_hits,
            &mut coverage,
            || Lz4Config::from_payload(tail, true),
        );
        sample_had_error |= run_parser(
            name,
            "lzma_config_parse",
            &mut parser_hits,
            &mut coverage,
            || LzmaConfig::from_payload(tail),
        );

        assert!(
            sample_had_error,
            "sample `{name}` produced no parser errors across the adversarial harness"
        );
    }

    assert!(coverage.insufficient_data > 0, "expected InsufficientData coverage");
    assert!(coverage.invalid_magic > 0, "expected InvalidMagic coverage");
    assert!(coverage.invalid_field > 0, "expected InvalidField coverage");
    assert!(coverage.checksum_mismatch > 0, "expected ChecksumMismatch coverage");
    assert!(coverage.unsupported > 0, "expected Unsupported coverage");
    assert_eq!(parser_hits.len(), 5);

    let total = coverage.insufficient_data
        + coverage.invalid_magic
        + coverage.invalid_field
        + coverage.integer_conversion
        + coverage.checksum_mismatch
        + coverage.unsupported;
    assert!(total as usize >= samples.len());
}

#[test]
fn valid_samples_parse() {
    let plain = RofsSuperblock::parse_block0(&valid_block0(false)).expect("plain");
    let sealed = RofsSuperblock::parse_block0(&valid_block0(true)).expect("sealed");
    assert_eq!(plain.volume_name, sealed.volume_name);
    assert_eq!(plain.feature_incompat, IncompatFeatures(0));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..4200)) {
        let _ = RofsSuperblock::parse_block0(&bytes);
        let _ = RofsInode::parse_from_bytes(Nid(1), 0, &bytes);
        let _ = DeviceSlot::parse_from_bytes(&bytes);
        let _ = ChunkIndexEntry::parse_from_bytes(&bytes);
        let _ = BlockMapEntry::parse_from_bytes(&bytes);
        let _ = Lz4Config::from_payload(&bytes, true);
        let _ = LzmaConfig::from_payload(&bytes);
    }

    #[test]
    fn random_superblock_bodies_behind_valid_magic_never_panic(
        body in proptest::collection::vec(any::<u8>(), 3068),
    ) {
        let mut block0 = vec![0_u8; ROFS_SUPER_OFFSET];
        block0.extend_from_slice(&ROFS_SUPER_MAGIC.to_le_bytes());
        block0.extend_from_slice(&body);
        if let Ok(sb) = RofsSuperblock::parse_block0(&block0) {
            prop_assert_eq!(sb.blkszbits, ROFS_BLOCK_SIZE_BITS);
            prop_assert_eq!(sb.feature_incompat.unknown_bits(), 0);
            prop_assert!(sb.sb_size <= ROFS_BLOCK_SIZE);
        }
    }

    #[test]
    fn chunk_format_bits_are_bounded(raw in any::<u32>()) {
        if let Ok(format) = ChunkFormat::parse(raw) {
            prop_assert!(format.chunk_bits() >= ROFS_BLOCK_SIZE_BITS);
            prop_assert!(format.chunk_bits() <= ROFS_BLOCK_SIZE_BITS + 31);
        }
    }
}

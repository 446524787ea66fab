use rofs_types::{
    Nid, ParseError, ROFS_BLOCK_SIZE, ROFS_BLOCK_SIZE_BITS, ROFS_DEVT_SLOT_SIZE,
    ROFS_INODE_SLOT_BITS, ROFS_SB_EXTSLOT_SIZE, ROFS_SUPER_BASE_SIZE, ROFS_SUPER_MAGIC,
    ROFS_SUPER_OFFSET, ensure_slice, parse_nul_terminated, read_fixed, read_le_u16, read_le_u32,
    read_le_u64, read_u8,
};
use serde::{Deserialize, Serialize};

/// Length of the checksummed region: from the superblock to the end of block 0.
pub const SUPERBLOCK_REGION_LEN: usize = ROFS_BLOCK_SIZE as usize - ROFS_SUPER_OFFSET;

const CHECKSUM_OFFSET: usize = 4;

// ── Feature flags ───────────────────────────────────────────────────────────

/// Compatible feature flags (`feature_compat`).
///
/// Unknown bits are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatFeatures(pub u32);

impl CompatFeatures {
    /// The superblock region carries a CRC32C checksum.
    pub const SB_CHKSUM: Self = Self(0x0001);
    pub const MTIME: Self = Self(0x0002);

    const KNOWN: &[(u32, &'static str)] = &[(0x0001, "SB_CHKSUM"), (0x0002, "MTIME")];

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_flags(self.0, Self::KNOWN)
    }
}

impl std::fmt::Display for CompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// Incompatible feature flags (`feature_incompat`).
///
/// Unknown bits MUST cause mount failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompatFeatures(pub u32);

impl IncompatFeatures {
    pub const ZERO_PADDING: Self = Self(0x0001);
    /// Explicit compression configuration records follow the superblock.
    pub const COMPR_CFGS: Self = Self(0x0002);
    /// Physical clusters may span more than one block. Same bit as `COMPR_CFGS`.
    pub const BIG_PCLUSTER: Self = Self(0x0002);
    pub const CHUNKED_FILE: Self = Self(0x0004);
    pub const DEVICE_TABLE: Self = Self(0x0008);
    /// Same bit as `DEVICE_TABLE`.
    pub const COMPR_HEAD2: Self = Self(0x0008);
    pub const ZTAILPACKING: Self = Self(0x0010);

    /// Every bit this build knows how to honour.
    pub const SUPPORTED: Self = Self(0x001F);

    const KNOWN: &[(u32, &'static str)] = &[
        (0x0001, "ZERO_PADDING"),
        (0x0002, "COMPR_CFGS"),
        (0x0004, "CHUNKED_FILE"),
        (0x0008, "DEVICE_TABLE"),
        (0x0010, "ZTAILPACKING"),
    ];

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_flags(self.0, Self::KNOWN)
    }

    /// Bits outside [`Self::SUPPORTED`].
    #[must_use]
    pub fn unknown_bits(self) -> u32 {
        self.0 & !Self::SUPPORTED.0
    }
}

impl std::fmt::Display for IncompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

fn describe_flags(bits: u32, known: &[(u32, &'static str)]) -> Vec<&'static str> {
    known
        .iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

/// Format a bitmask as a pipe-separated list of flag names.
///
/// Example output: `SB_CHKSUM|MTIME` or `(none)` when zero. Unknown bits are
/// appended as hex, e.g. `CHUNKED_FILE|0x80`.
fn format_flags(
    f: &mut std::fmt::Formatter<'_>,
    bits: u32,
    known: &[(u32, &'static str)],
) -> std::fmt::Result {
    if bits == 0 {
        return f.write_str("(none)");
    }
    let mut first = true;
    let mut remaining = bits;
    for &(bit, name) in known {
        if remaining & bit != 0 {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            remaining &= !bit;
            first = false;
        }
    }
    if remaining != 0 {
        if !first {
            f.write_str("|")?;
        }
        write!(f, "0x{remaining:X}")?;
    }
    Ok(())
}

// ── Checksum ────────────────────────────────────────────────────────────────

/// Compute the superblock checksum over `region` (block 0 from byte 1024 on),
/// treating the stored checksum field as zero.
///
/// The on-disk value is a CRC32C seeded with `!0` and never inverted at the
/// end. `crc32c::crc32c` inverts on both sides, so the raw value is its
/// complement.
#[must_use]
pub fn superblock_checksum(region: &[u8]) -> u32 {
    let head = &region[..CHECKSUM_OFFSET.min(region.len())];
    let mut crc = crc32c::crc32c(head);
    if region.len() > CHECKSUM_OFFSET {
        crc = crc32c::crc32c_append(crc, &[0_u8; 4]);
    }
    if region.len() > CHECKSUM_OFFSET + 4 {
        crc = crc32c::crc32c_append(crc, &region[CHECKSUM_OFFSET + 4..]);
    }
    !crc
}

/// Verify the stored superblock checksum against the recomputed one.
pub fn verify_superblock_checksum(region: &[u8]) -> Result<(), ParseError> {
    let region = ensure_slice(region, 0, SUPERBLOCK_REGION_LEN)?;
    let stored = read_le_u32(region, CHECKSUM_OFFSET)?;
    let computed = superblock_checksum(region);
    if stored != computed {
        return Err(ParseError::ChecksumMismatch {
            field: "checksum",
            expected: stored,
            computed,
        });
    }
    Ok(())
}

// ── Superblock ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RofsSuperblock {
    pub checksum: u32,
    pub feature_compat: CompatFeatures,
    pub feature_incompat: IncompatFeatures,
    pub blkszbits: u8,
    pub sb_extslots: u8,
    pub root_nid: Nid,
    pub inos: u64,
    pub build_time: u64,
    pub build_time_nsec: u32,
    /// Block count of the primary device.
    pub blocks: u32,
    pub meta_blkaddr: u32,
    pub xattr_blkaddr: u32,
    pub uuid: [u8; 16],
    pub volume_name: String,
    /// Algorithm bitmask; only meaningful with `COMPR_CFGS`.
    pub available_compr_algs: u16,
    /// Default LZ4 window; only meaningful without `COMPR_CFGS`.
    pub lz4_max_distance: u16,
    /// Extra devices declared by the device table (0 without `DEVICE_TABLE`).
    pub extra_devices: u16,
    pub devt_slotoff: u16,
    /// `128 + 16 * sb_extslots`.
    pub sb_size: u32,
    pub islotbits: u32,
}

impl RofsSuperblock {
    /// Parse and validate the superblock from the full contents of block 0.
    ///
    /// Checks, in order: magic, checksum (when `SB_CHKSUM` is set), block
    /// size, unknown incompatible features, superblock size, volume name
    /// termination.
    pub fn parse_block0(block0: &[u8]) -> Result<Self, ParseError> {
        let region = ensure_slice(block0, ROFS_SUPER_OFFSET, SUPERBLOCK_REGION_LEN)?;

        let magic = read_le_u32(region, 0)?;
        if magic != ROFS_SUPER_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(ROFS_SUPER_MAGIC),
                actual: u64::from(magic),
            });
        }

        let feature_compat = CompatFeatures(read_le_u32(region, 8)?);
        if feature_compat.contains(CompatFeatures::SB_CHKSUM) {
            verify_superblock_checksum(region)?;
        }

        let blkszbits = read_u8(region, 12)?;
        if blkszbits != ROFS_BLOCK_SIZE_BITS {
            return Err(ParseError::Unsupported {
                field: "blkszbits",
                value: u64::from(blkszbits),
            });
        }

        let feature_incompat = IncompatFeatures(read_le_u32(region, 80)?);
        let unknown = feature_incompat.unknown_bits();
        if unknown != 0 {
            return Err(ParseError::Unsupported {
                field: "feature_incompat",
                value: u64::from(unknown),
            });
        }

        let sb_extslots = read_u8(region, 13)?;
        let sb_size = ROFS_SUPER_BASE_SIZE + usize::from(sb_extslots) * ROFS_SB_EXTSLOT_SIZE;
        if sb_size > ROFS_BLOCK_SIZE as usize {
            return Err(ParseError::InvalidField {
                field: "sb_extslots",
                reason: "superblock larger than one block",
            });
        }

        let volume_name_raw: [u8; 16] = read_fixed(region, 64)?;
        let volume_name = parse_nul_terminated(&volume_name_raw, "volume_name")?;

        let union_u1 = read_le_u16(region, 84)?;
        let compr_cfgs = feature_incompat.contains(IncompatFeatures::COMPR_CFGS);
        let (available_compr_algs, lz4_max_distance) = if compr_cfgs {
            (union_u1, 0)
        } else {
            (0, union_u1)
        };

        let extra_devices = if feature_incompat.contains(IncompatFeatures::DEVICE_TABLE) {
            read_le_u16(region, 86)?
        } else {
            0
        };

        Ok(Self {
            checksum: read_le_u32(region, 4)?,
            feature_compat,
            feature_incompat,
            blkszbits,
            sb_extslots,
            root_nid: Nid(u64::from(read_le_u16(region, 14)?)),
            inos: read_le_u64(region, 16)?,
            build_time: read_le_u64(region, 24)?,
            build_time_nsec: read_le_u32(region, 32)?,
            blocks: read_le_u32(region, 36)?,
            meta_blkaddr: read_le_u32(region, 40)?,
            xattr_blkaddr: read_le_u32(region, 44)?,
            uuid: read_fixed(region, 48)?,
            volume_name,
            available_compr_algs,
            lz4_max_distance,
            extra_devices,
            devt_slotoff: read_le_u16(region, 88)?,
            sb_size: u32::try_from(sb_size)
                .map_err(|_| ParseError::IntegerConversion { field: "sb_size" })?,
            islotbits: ROFS_INODE_SLOT_BITS,
        })
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        1_u32 << self.blkszbits
    }

    #[must_use]
    pub fn has_compat(&self, mask: CompatFeatures) -> bool {
        self.feature_compat.contains(mask)
    }

    #[must_use]
    pub fn has_incompat(&self, mask: IncompatFeatures) -> bool {
        self.feature_incompat.contains(mask)
    }

    /// Whether explicit compression configuration records follow the superblock.
    #[must_use]
    pub fn has_compr_cfgs(&self) -> bool {
        self.has_incompat(IncompatFeatures::COMPR_CFGS)
    }

    #[must_use]
    pub fn has_big_pcluster(&self) -> bool {
        self.has_incompat(IncompatFeatures::BIG_PCLUSTER)
    }

    /// Byte address of the inode record for `nid`, `None` on overflow.
    #[must_use]
    pub fn iloc(&self, nid: Nid) -> Option<u64> {
        let meta = u64::from(self.meta_blkaddr).checked_mul(u64::from(self.block_size()))?;
        let slot = nid.0.checked_mul(1_u64 << self.islotbits)?;
        meta.checked_add(slot)
    }

    /// Byte address of the first compression configuration record.
    #[must_use]
    pub fn compr_cfgs_offset(&self) -> u64 {
        ROFS_SUPER_OFFSET as u64 + u64::from(self.sb_size)
    }

    /// Byte address of the device slot table.
    #[must_use]
    pub fn devt_offset(&self) -> u64 {
        u64::from(self.devt_slotoff) * ROFS_DEVT_SLOT_SIZE
    }

    /// Canonical `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` rendering of the volume id.
    #[must_use]
    pub fn uuid_string(&self) -> String {
        let u = &self.uuid;
        format!(
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            u[0], u[1], u[2], u[3], u[4], u[5], u[6], u[7], u[8], u[9], u[10], u[11], u[12], u[13],
            u[14], u[15]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_u16(buf: &mut [u8], off: usize, v: u16) {
        buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn write_u32(buf: &mut [u8], off: usize, v: u32) {
        buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn make_block0() -> Vec<u8> {
        let mut b = vec![0_u8; ROFS_BLOCK_SIZE as usize];
        let sb = ROFS_SUPER_OFFSET;
        write_u32(&mut b, sb, ROFS_SUPER_MAGIC);
        b[sb + 12] = ROFS_BLOCK_SIZE_BITS;
        write_u16(&mut b, sb + 14, 36);
        b[sb + 16..sb + 24].copy_from_slice(&7_u64.to_le_bytes());
        write_u32(&mut b, sb + 36, 64);
        write_u32(&mut b, sb + 40, 1);
        b[sb + 48..sb + 64].copy_from_slice(&[0xAB; 16]);
        b[sb + 64..sb + 69].copy_from_slice(b"image");
        write_u16(&mut b, sb + 84, 4096);
        b
    }

    fn seal(b: &mut [u8]) {
        let sb = ROFS_SUPER_OFFSET;
        let compat = u32::from_le_bytes([b[sb + 8], b[sb + 9], b[sb + 10], b[sb + 11]]);
        write_u32(b, sb + 8, compat | CompatFeatures::SB_CHKSUM.0);
        let sum = superblock_checksum(&b[sb..]);
        write_u32(b, sb + 4, sum);
    }

    #[test]
    fn parse_minimal_superblock() {
        let b = make_block0();
        let sb = RofsSuperblock::parse_block0(&b).expect("parse");
        assert_eq!(sb.block_size(), 4096);
        assert_eq!(sb.root_nid, Nid(36));
        assert_eq!(sb.inos, 7);
        assert_eq!(sb.blocks, 64);
        assert_eq!(sb.volume_name, "image");
        assert_eq!(sb.sb_size, 128);
        assert_eq!(sb.lz4_max_distance, 4096);
        assert_eq!(sb.available_compr_algs, 0);
        assert_eq!(sb.extra_devices, 0);
        assert_eq!(sb.iloc(Nid(36)), Some(4096 + 36 * 32));
        assert_eq!(sb.compr_cfgs_offset(), 1024 + 128);
        assert_eq!(sb.uuid_string(), "abababab-abab-abab-abab-abababababab");
    }

    #[test]
    fn bad_magic_is_invalid_magic() {
        let mut b = make_block0();
        b[ROFS_SUPER_OFFSET] ^= 0xFF;
        assert!(matches!(
            RofsSuperblock::parse_block0(&b),
            Err(ParseError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn checksum_roundtrip_and_mismatch() {
        let mut b = make_block0();
        seal(&mut b);
        let sb = RofsSuperblock::parse_block0(&b).expect("sealed parse");
        assert!(sb.has_compat(CompatFeatures::SB_CHKSUM));

        b[ROFS_SUPER_OFFSET + 200] ^= 0x01;
        assert!(matches!(
            RofsSuperblock::parse_block0(&b),
            Err(ParseError::ChecksumMismatch { field: "checksum", .. })
        ));
    }

    #[test]
    fn checksum_matches_plain_crc_with_zeroed_field() {
        let mut b = make_block0();
        seal(&mut b);
        let mut copy = b[ROFS_SUPER_OFFSET..].to_vec();
        copy[4..8].fill(0);
        assert_eq!(superblock_checksum(&b[ROFS_SUPER_OFFSET..]), !crc32c::crc32c(&copy));
    }

    #[test]
    fn checksum_is_checked_before_block_size() {
        let mut b = make_block0();
        seal(&mut b);
        b[ROFS_SUPER_OFFSET + 12] = 13;
        assert!(matches!(
            RofsSuperblock::parse_block0(&b),
            Err(ParseError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn unsupported_block_size() {
        let mut b = make_block0();
        b[ROFS_SUPER_OFFSET + 12] = 9;
        assert_eq!(
            RofsSuperblock::parse_block0(&b),
            Err(ParseError::Unsupported {
                field: "blkszbits",
                value: 9,
            })
        );
    }

    #[test]
    fn unknown_incompat_bits_refused() {
        let mut b = make_block0();
        write_u32(&mut b, ROFS_SUPER_OFFSET + 80, 0x0004 | 0x0100);
        assert_eq!(
            RofsSuperblock::parse_block0(&b),
            Err(ParseError::Unsupported {
                field: "feature_incompat",
                value: 0x100,
            })
        );
    }

    #[test]
    fn oversized_extslots_is_corrupt() {
        let mut b = make_block0();
        b[ROFS_SUPER_OFFSET + 13] = 255;
        assert!(matches!(
            RofsSuperblock::parse_block0(&b),
            Err(ParseError::InvalidField {
                field: "sb_extslots",
                ..
            })
        ));

        b[ROFS_SUPER_OFFSET + 13] = 2;
        let sb = RofsSuperblock::parse_block0(&b).expect("two extslots");
        assert_eq!(sb.sb_size, 160);
    }

    #[test]
    fn volume_name_requires_terminator() {
        let mut b = make_block0();
        b[ROFS_SUPER_OFFSET + 64..ROFS_SUPER_OFFSET + 80].fill(b'x');
        assert!(matches!(
            RofsSuperblock::parse_block0(&b),
            Err(ParseError::InvalidField {
                field: "volume_name",
                ..
            })
        ));
    }

    #[test]
    fn union_field_follows_compr_cfgs() {
        let mut b = make_block0();
        write_u32(&mut b, ROFS_SUPER_OFFSET + 80, IncompatFeatures::COMPR_CFGS.0);
        write_u16(&mut b, ROFS_SUPER_OFFSET + 84, 0b11);
        let sb = RofsSuperblock::parse_block0(&b).expect("parse");
        assert!(sb.has_compr_cfgs());
        assert_eq!(sb.available_compr_algs, 0b11);
        assert_eq!(sb.lz4_max_distance, 0);
    }

    #[test]
    fn extra_devices_require_device_table() {
        let mut b = make_block0();
        write_u16(&mut b, ROFS_SUPER_OFFSET + 86, 2);
        write_u16(&mut b, ROFS_SUPER_OFFSET + 88, 3);
        let sb = RofsSuperblock::parse_block0(&b).expect("parse");
        assert_eq!(sb.extra_devices, 0);

        write_u32(&mut b, ROFS_SUPER_OFFSET + 80, IncompatFeatures::DEVICE_TABLE.0);
        let sb = RofsSuperblock::parse_block0(&b).expect("parse");
        assert_eq!(sb.extra_devices, 2);
        assert_eq!(sb.devt_offset(), 3 * 128);
    }

    #[test]
    fn truncated_block0() {
        let b = vec![0_u8; 2048];
        assert!(matches!(
            RofsSuperblock::parse_block0(&b),
            Err(ParseError::InsufficientData { .. })
        ));
    }

    #[test]
    fn feature_display() {
        assert_eq!(CompatFeatures(0).to_string(), "(none)");
        assert_eq!(CompatFeatures(0x3).to_string(), "SB_CHKSUM|MTIME");
        assert_eq!(
            IncompatFeatures(0x0004 | 0x0080).to_string(),
            "CHUNKED_FILE|0x80"
        );
        assert_eq!(
            IncompatFeatures(0x0014).describe(),
            vec!["CHUNKED_FILE", "ZTAILPACKING"]
        );
        assert_eq!(IncompatFeatures(0x1F).unknown_bits(), 0);
    }
}

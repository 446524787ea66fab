#![forbid(unsafe_code)]
//! Synthetic image construction for tests and fixtures.
//!
//! [`ImageBuilder`] lays out a complete image in memory: superblock,
//! compression configuration records, device slot table, inode records with
//! their inline tails or chunk tables, and raw data blocks.

use anyhow::{Context, Result, bail};
use rofs_block::{ByteBlockDevice, MemoryByteDevice};
use rofs_ondisk::{
    ChunkIndexEntry, CompatFeatures, IncompatFeatures, RofsSuperblock, superblock_checksum,
};
use rofs_types::{
    ROFS_BLOCK_SIZE, ROFS_BLOCK_SIZE_BITS, ROFS_SUPER_MAGIC, ROFS_SUPER_OFFSET, S_IFDIR, S_IFREG,
    align_up,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

const BS: usize = ROFS_BLOCK_SIZE as usize;

/// Per-file layout as it should land on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutSpec {
    FlatPlain {
        blkaddr: u32,
    },
    /// Flat with the final partial block written right after the inode.
    FlatInline {
        blkaddr: u32,
        tail: Vec<u8>,
    },
    ChunkIndexes {
        chunk_bits: u8,
        entries: Vec<ChunkIndexEntry>,
    },
    BlockMap {
        chunk_bits: u8,
        blkaddrs: Vec<u32>,
    },
    Compressed {
        compact: bool,
    },
    /// Arbitrary `i_format` layout bits and `i_u`, for hostile images.
    Raw {
        datalayout: u16,
        i_u: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeSpec {
    pub nid: u64,
    pub extended: bool,
    pub mode: u16,
    pub size: u64,
    pub xattr_icount: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: u64,
    pub layout: LayoutSpec,
}

impl InodeSpec {
    fn new(nid: u64, mode: u16, size: u64, layout: LayoutSpec) -> Self {
        Self {
            nid,
            extended: size > u64::from(u32::MAX),
            mode,
            size,
            xattr_icount: 0,
            nlink: 1,
            uid: 0,
            gid: 0,
            mtime: 0,
            layout,
        }
    }

    /// Empty directory.
    #[must_use]
    pub fn dir(nid: u64) -> Self {
        let mut spec = Self::new(nid, S_IFDIR | 0o755, 0, LayoutSpec::FlatPlain { blkaddr: 0 });
        spec.nlink = 2;
        spec
    }

    #[must_use]
    pub fn flat(nid: u64, blkaddr: u32, size: u64) -> Self {
        Self::new(nid, S_IFREG | 0o644, size, LayoutSpec::FlatPlain { blkaddr })
    }

    /// Tail-packed file; `tail` holds the final `size % 4096` bytes.
    #[must_use]
    pub fn inline(nid: u64, blkaddr: u32, size: u64, tail: Vec<u8>) -> Self {
        Self::new(
            nid,
            S_IFREG | 0o644,
            size,
            LayoutSpec::FlatInline { blkaddr, tail },
        )
    }

    #[must_use]
    pub fn chunk_indexes(nid: u64, size: u64, chunk_bits: u8, entries: Vec<ChunkIndexEntry>) -> Self {
        Self::new(
            nid,
            S_IFREG | 0o644,
            size,
            LayoutSpec::ChunkIndexes {
                chunk_bits,
                entries,
            },
        )
    }

    #[must_use]
    pub fn block_map(nid: u64, size: u64, chunk_bits: u8, blkaddrs: Vec<u32>) -> Self {
        Self::new(
            nid,
            S_IFREG | 0o644,
            size,
            LayoutSpec::BlockMap {
                chunk_bits,
                blkaddrs,
            },
        )
    }

    #[must_use]
    pub fn compressed(nid: u64, size: u64) -> Self {
        Self::new(
            nid,
            S_IFREG | 0o644,
            size,
            LayoutSpec::Compressed { compact: false },
        )
    }

    #[must_use]
    pub fn extended(mut self) -> Self {
        self.extended = true;
        self
    }

    #[must_use]
    pub fn xattr_icount(mut self, icount: u16) -> Self {
        self.xattr_icount = icount;
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: u16) -> Self {
        self.mode = mode;
        self
    }

    fn record_size(&self) -> usize {
        if self.extended { 64 } else { 32 }
    }

    fn xattr_size(&self) -> usize {
        if self.xattr_icount == 0 {
            0
        } else {
            12 + 4 * (usize::from(self.xattr_icount) - 1)
        }
    }

    fn i_format(&self) -> u16 {
        let datalayout = match &self.layout {
            LayoutSpec::FlatPlain { .. } => 0,
            LayoutSpec::Compressed { compact: false } => 1,
            LayoutSpec::FlatInline { .. } => 2,
            LayoutSpec::Compressed { compact: true } => 3,
            LayoutSpec::ChunkIndexes { .. } | LayoutSpec::BlockMap { .. } => 4,
            LayoutSpec::Raw { datalayout, .. } => *datalayout,
        };
        (datalayout << 1) | u16::from(self.extended)
    }

    fn i_u(&self) -> u32 {
        match &self.layout {
            LayoutSpec::FlatPlain { blkaddr } | LayoutSpec::FlatInline { blkaddr, .. } => *blkaddr,
            LayoutSpec::ChunkIndexes { chunk_bits, .. } => {
                u32::from(chunk_bits - ROFS_BLOCK_SIZE_BITS) | 0x20
            }
            LayoutSpec::BlockMap { chunk_bits, .. } => u32::from(chunk_bits - ROFS_BLOCK_SIZE_BITS),
            LayoutSpec::Compressed { .. } => 0,
            LayoutSpec::Raw { i_u, .. } => *i_u,
        }
    }

    #[allow(clippy::cast_possible_truncation)] // compact fields are 16/32 bits by format
    fn record(&self) -> Vec<u8> {
        let mut r = vec![0_u8; self.record_size()];
        r[0..2].copy_from_slice(&self.i_format().to_le_bytes());
        r[2..4].copy_from_slice(&self.xattr_icount.to_le_bytes());
        r[4..6].copy_from_slice(&self.mode.to_le_bytes());
        r[16..20].copy_from_slice(&self.i_u().to_le_bytes());
        r[20..24].copy_from_slice(&(self.nid as u32).to_le_bytes());
        if self.extended {
            r[8..16].copy_from_slice(&self.size.to_le_bytes());
            r[24..28].copy_from_slice(&self.uid.to_le_bytes());
            r[28..32].copy_from_slice(&self.gid.to_le_bytes());
            r[32..40].copy_from_slice(&self.mtime.to_le_bytes());
            r[44..48].copy_from_slice(&self.nlink.to_le_bytes());
        } else {
            r[6..8].copy_from_slice(&(self.nlink as u16).to_le_bytes());
            r[8..12].copy_from_slice(&(self.size as u32).to_le_bytes());
            r[24..26].copy_from_slice(&(self.uid as u16).to_le_bytes());
            r[26..28].copy_from_slice(&(self.gid as u16).to_le_bytes());
        }
        r
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub tag: String,
    pub blocks: u32,
    pub mapped_blkaddr: u32,
}

/// In-memory image writer.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    volume_name: Vec<u8>,
    uuid: [u8; 16],
    build_time: u64,
    checksum: bool,
    blkszbits: u8,
    extslots: u8,
    extra_incompat: u32,
    meta_blkaddr: u32,
    root_nid: u16,
    inos: Option<u64>,
    inodes: Vec<InodeSpec>,
    data: BTreeMap<u32, Vec<u8>>,
    devices: Vec<DeviceSpec>,
    devt_slotoff: u16,
    compression: Option<(u16, Vec<Vec<u8>>)>,
    lz4_max_distance: u16,
    min_blocks: u32,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    /// Metadata starts at block 1; the root directory is nid 0 unless set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            volume_name: b"rofs-test".to_vec(),
            uuid: [0x5A; 16],
            build_time: 1_700_000_000,
            checksum: false,
            blkszbits: ROFS_BLOCK_SIZE_BITS,
            extslots: 0,
            extra_incompat: 0,
            meta_blkaddr: 1,
            root_nid: 0,
            inos: None,
            inodes: Vec::new(),
            data: BTreeMap::new(),
            devices: Vec::new(),
            devt_slotoff: 0,
            compression: None,
            lz4_max_distance: 0,
            min_blocks: 0,
        }
    }

    #[must_use]
    pub fn volume_name(mut self, name: &[u8]) -> Self {
        self.volume_name = name.to_vec();
        self
    }

    #[must_use]
    pub fn uuid(mut self, uuid: [u8; 16]) -> Self {
        self.uuid = uuid;
        self
    }

    #[must_use]
    pub fn checksum(mut self, enabled: bool) -> Self {
        self.checksum = enabled;
        self
    }

    #[must_use]
    pub fn blkszbits(mut self, bits: u8) -> Self {
        self.blkszbits = bits;
        self
    }

    #[must_use]
    pub fn extslots(mut self, slots: u8) -> Self {
        self.extslots = slots;
        self
    }

    /// Extra `feature_incompat` bits on top of the ones implied by content.
    #[must_use]
    pub fn incompat(mut self, bits: u32) -> Self {
        self.extra_incompat |= bits;
        self
    }

    #[must_use]
    pub fn meta_blkaddr(mut self, blkaddr: u32) -> Self {
        self.meta_blkaddr = blkaddr;
        self
    }

    #[must_use]
    pub fn root(mut self, nid: u16) -> Self {
        self.root_nid = nid;
        self
    }

    #[must_use]
    pub fn inos(mut self, inos: u64) -> Self {
        self.inos = Some(inos);
        self
    }

    #[must_use]
    pub fn inode(mut self, spec: InodeSpec) -> Self {
        self.inodes.push(spec);
        self
    }

    /// Raw bytes written at the start of block `blkaddr`.
    #[must_use]
    pub fn data(mut self, blkaddr: u32, bytes: Vec<u8>) -> Self {
        self.data.insert(blkaddr, bytes);
        self
    }

    /// Declare an extra device; slots are written at `devt_slotoff * 128`.
    #[must_use]
    pub fn device(mut self, spec: DeviceSpec) -> Self {
        self.devices.push(spec);
        self
    }

    #[must_use]
    pub fn devt_slotoff(mut self, slotoff: u16) -> Self {
        self.devt_slotoff = slotoff;
        self
    }

    /// Advertise `algs` and write one length-prefixed record per payload.
    #[must_use]
    pub fn compression(mut self, algs: u16, records: Vec<Vec<u8>>) -> Self {
        self.compression = Some((algs, records));
        self
    }

    #[must_use]
    pub fn lz4_max_distance(mut self, distance: u16) -> Self {
        self.lz4_max_distance = distance;
        self
    }

    /// Pad the image to at least `blocks` blocks.
    #[must_use]
    pub fn min_blocks(mut self, blocks: u32) -> Self {
        self.min_blocks = blocks;
        self
    }

    fn incompat_bits(&self) -> u32 {
        let mut bits = self.extra_incompat;
        if self.inodes.iter().any(|i| {
            matches!(
                i.layout,
                LayoutSpec::ChunkIndexes { .. } | LayoutSpec::BlockMap { .. }
            )
        }) {
            bits |= IncompatFeatures::CHUNKED_FILE.0;
        }
        if !self.devices.is_empty() {
            bits |= IncompatFeatures::DEVICE_TABLE.0;
        }
        if self.compression.is_some() {
            bits |= IncompatFeatures::COMPR_CFGS.0;
        }
        bits
    }

    /// Byte address of the record for `nid`.
    #[must_use]
    pub fn iloc(&self, nid: u64) -> u64 {
        u64::from(self.meta_blkaddr) * u64::from(ROFS_BLOCK_SIZE) + nid * 32
    }

    /// Lay the image out.
    #[allow(clippy::cast_possible_truncation)]
    pub fn build(&self) -> Result<Vec<u8>> {
        let mut img = vec![0_u8; BS];
        let sb = ROFS_SUPER_OFFSET;
        let sb_size = 128 + 16 * usize::from(self.extslots);

        if self.volume_name.len() > 16 {
            bail!("volume name longer than 16 bytes");
        }

        // Compression records directly follow the superblock.
        if let Some((_, records)) = &self.compression {
            let mut pos = sb + sb_size;
            for payload in records {
                pos = align_up(pos as u64, 4).context("record offset overflow")? as usize;
                let len = u16::try_from(payload.len()).unwrap_or(0);
                put(&mut img, pos, &len.to_le_bytes());
                put(&mut img, pos + 2, payload);
                pos += 2 + payload.len();
            }
        }

        for (i, dev) in self.devices.iter().enumerate() {
            let at = usize::from(self.devt_slotoff) * 128 + i * 128;
            let mut slot = [0_u8; 128];
            let tag = dev.tag.as_bytes();
            slot[..tag.len().min(64)].copy_from_slice(&tag[..tag.len().min(64)]);
            slot[64..68].copy_from_slice(&dev.blocks.to_le_bytes());
            slot[68..72].copy_from_slice(&dev.mapped_blkaddr.to_le_bytes());
            put(&mut img, at, &slot);
        }

        for spec in &self.inodes {
            let iloc = self.iloc(spec.nid) as usize;
            put(&mut img, iloc, &spec.record());
            let trailer = iloc + spec.record_size() + spec.xattr_size();
            put(&mut img, iloc + spec.record_size(), &vec![0_u8; spec.xattr_size()]);
            match &spec.layout {
                LayoutSpec::FlatInline { tail, .. } => put(&mut img, trailer, tail),
                LayoutSpec::ChunkIndexes { entries, .. } => {
                    let mut at = align_up(trailer as u64, 8).context("align")? as usize;
                    for entry in entries {
                        put(&mut img, at, &entry.to_bytes());
                        at += 8;
                    }
                }
                LayoutSpec::BlockMap { blkaddrs, .. } => {
                    let mut at = align_up(trailer as u64, 4).context("align")? as usize;
                    for addr in blkaddrs {
                        put(&mut img, at, &addr.to_le_bytes());
                        at += 4;
                    }
                }
                LayoutSpec::FlatPlain { .. }
                | LayoutSpec::Compressed { .. }
                | LayoutSpec::Raw { .. } => {}
            }
        }

        for (blkaddr, bytes) in &self.data {
            put(&mut img, *blkaddr as usize * BS, bytes);
        }

        let blocks = (img.len().div_ceil(BS) as u32).max(self.min_blocks);
        img.resize(blocks as usize * BS, 0);

        let incompat = self.incompat_bits();
        let union_u1 = match &self.compression {
            Some((algs, _)) => *algs,
            None => self.lz4_max_distance,
        };
        let inos = self.inos.unwrap_or(self.inodes.len() as u64);

        put(&mut img, sb, &ROFS_SUPER_MAGIC.to_le_bytes());
        let compat = if self.checksum {
            CompatFeatures::SB_CHKSUM.0
        } else {
            0
        };
        put(&mut img, sb + 8, &compat.to_le_bytes());
        img[sb + 12] = self.blkszbits;
        img[sb + 13] = self.extslots;
        put(&mut img, sb + 14, &self.root_nid.to_le_bytes());
        put(&mut img, sb + 16, &inos.to_le_bytes());
        put(&mut img, sb + 24, &self.build_time.to_le_bytes());
        put(&mut img, sb + 36, &blocks.to_le_bytes());
        put(&mut img, sb + 40, &self.meta_blkaddr.to_le_bytes());
        put(&mut img, sb + 48, &self.uuid);
        let mut name = [0_u8; 16];
        name[..self.volume_name.len()].copy_from_slice(&self.volume_name);
        put(&mut img, sb + 64, &name);
        put(&mut img, sb + 80, &incompat.to_le_bytes());
        put(&mut img, sb + 84, &union_u1.to_le_bytes());
        put(&mut img, sb + 86, &(self.devices.len() as u16).to_le_bytes());
        put(&mut img, sb + 88, &self.devt_slotoff.to_le_bytes());

        if self.checksum {
            let sum = superblock_checksum(&img[sb..BS]);
            put(&mut img, sb + 4, &sum.to_le_bytes());
        }
        Ok(img)
    }

    /// Build and wrap the image as an in-memory block device.
    pub fn build_device(&self) -> Result<Arc<ByteBlockDevice<MemoryByteDevice>>> {
        let img = self.build()?;
        let dev = ByteBlockDevice::new(MemoryByteDevice::new(img), ROFS_BLOCK_SIZE)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(Arc::new(dev))
    }
}

fn put(img: &mut Vec<u8>, at: usize, bytes: &[u8]) {
    let end = at + bytes.len();
    if img.len() < end {
        img.resize(end, 0);
    }
    img[at..end].copy_from_slice(bytes);
}

/// Deterministic file contents for data blocks: byte `i` is `(seed + i) % 251`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn patterned(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((usize::from(seed) + i) % 251) as u8)
        .collect()
}

/// A small image with one of each uncompressed layout, used by the CLI and
/// end-to-end tests.
///
/// | nid | layout | size |
/// |-----|--------|------|
/// | 0 | root directory | 0 |
/// | 2 | flat plain at block 4 | 8192 |
/// | 4 | flat inline at block 6 | 5000 |
/// | 64 | block-map chunks of 8 KiB at blocks 8, hole, 12 | 20000 |
pub fn sample_image() -> Result<Vec<u8>> {
    sample_builder().build()
}

/// Builder behind [`sample_image`], for tests that need `iloc` or tweaks.
#[must_use]
pub fn sample_builder() -> ImageBuilder {
    let flat = patterned(8192, 1);
    let inline = patterned(5000, 2);
    let chunked = patterned(20000, 3);
    ImageBuilder::new()
        .volume_name(b"sample")
        .checksum(true)
        .inode(InodeSpec::dir(0))
        .inode(InodeSpec::flat(2, 4, 8192))
        .inode(InodeSpec::inline(4, 6, 5000, inline[4096..].to_vec()))
        .inode(InodeSpec::block_map(
            64,
            20000,
            13,
            vec![8, rofs_types::ROFS_NULL_ADDR, 12],
        ))
        .data(4, flat)
        .data(6, inline[..4096].to_vec())
        .data(8, chunked[..8192].to_vec())
        .data(12, chunked[16384..].to_vec())
}

// ── Sparse JSON fixtures ────────────────────────────────────────────────────

/// A block-sized image described by its non-zero byte runs.
#[derive(Debug, Clone, Deserialize)]
pub struct SparseFixture {
    /// Image length; a whole number of blocks.
    pub size: usize,
    pub writes: Vec<FixtureWrite>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureWrite {
    pub offset: usize,
    pub hex: String,
}

/// Expand `fixture` into a zero-filled image with its runs applied.
pub fn sparse_fixture_bytes(fixture: &SparseFixture) -> Result<Vec<u8>> {
    if fixture.size == 0 || fixture.size % BS != 0 {
        bail!(
            "fixture size {} is not a whole number of {BS} byte blocks",
            fixture.size
        );
    }
    let mut image = vec![0_u8; fixture.size];
    for run in &fixture.writes {
        let payload =
            hex::decode(&run.hex).with_context(|| format!("bad hex run at byte {}", run.offset))?;
        let end = run
            .offset
            .checked_add(payload.len())
            .filter(|&end| end <= image.len())
            .with_context(|| {
                format!(
                    "run at byte {} ({} bytes) exceeds {} block image",
                    run.offset,
                    payload.len(),
                    image.len() / BS
                )
            })?;
        image[run.offset..end].copy_from_slice(&payload);
    }
    Ok(image)
}

pub fn load_sparse_fixture(path: &Path) -> Result<Vec<u8>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture: SparseFixture = serde_json::from_str(&text)
        .with_context(|| format!("invalid fixture json {}", path.display()))?;
    sparse_fixture_bytes(&fixture).with_context(|| format!("fixture {}", path.display()))
}

pub fn validate_superblock_fixture(path: &Path) -> Result<RofsSuperblock> {
    let data = load_sparse_fixture(path)?;
    RofsSuperblock::parse_block0(&data)
        .with_context(|| format!("failed superblock parse for fixture {}", path.display()))
}

/// Render the non-zero runs of block 0 as a sparse fixture.
pub fn extract_superblock_fixture(image: &[u8]) -> Result<serde_json::Value> {
    if image.len() < BS {
        bail!("image shorter than one block ({} bytes)", image.len());
    }
    let block0 = &image[..BS];
    let mut writes = Vec::new();
    let mut i = 0;
    while i < block0.len() {
        if block0[i] == 0 {
            i += 1;
            continue;
        }
        let start = i;
        while i < block0.len() && block0[i] != 0 {
            i += 1;
        }
        writes.push(serde_json::json!({
            "offset": start,
            "hex": hex::encode(&block0[start..i]),
        }));
    }
    Ok(serde_json::json!({ "size": BS, "writes": writes }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rofs_ondisk::RofsInode;
    use rofs_types::Nid;

    fn fixture_path(rel: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .and_then(Path::parent)
            .expect("workspace root")
            .join("conformance")
            .join("fixtures")
            .join(rel)
    }

    #[test]
    fn superblock_fixture_parses() {
        let sb = validate_superblock_fixture(&fixture_path("rofs_superblock_sparse.json"))
            .expect("fixture parse");
        assert_eq!(sb.volume_name, "rofs-lab");
        assert_eq!(sb.root_nid, Nid(36));
        assert_eq!(sb.inos, 5);
        assert_eq!(sb.blocks, 64);
        assert_eq!(sb.meta_blkaddr, 1);
    }

    #[test]
    fn built_superblock_roundtrips() {
        let img = ImageBuilder::new()
            .volume_name(b"built")
            .checksum(true)
            .root(4)
            .inode(InodeSpec::dir(4))
            .build()
            .expect("build");
        assert_eq!(img.len() % BS, 0);
        let sb = RofsSuperblock::parse_block0(&img).expect("parse");
        assert_eq!(sb.volume_name, "built");
        assert_eq!(sb.root_nid, Nid(4));
        assert_eq!(sb.inos, 1);
        assert!(sb.has_compat(CompatFeatures::SB_CHKSUM));
        assert_eq!(u64::from(sb.blocks) * 4096, img.len() as u64);
    }

    #[test]
    fn inode_records_land_at_iloc() {
        let builder = ImageBuilder::new()
            .inode(InodeSpec::dir(0))
            .inode(InodeSpec::flat(3, 9, 100).extended());
        let img = builder.build().expect("build");
        let iloc = builder.iloc(3);
        let inode = RofsInode::parse_from_bytes(Nid(3), iloc, &img[iloc as usize..])
            .expect("inode");
        assert_eq!(inode.size, 100);
        assert_eq!(inode.i_u, 9);
        assert_eq!(inode.record_size(), 64);
    }

    #[test]
    fn chunk_table_is_aligned() {
        let entries = vec![
            ChunkIndexEntry {
                advise: 0,
                device_id: 0,
                blkaddr: 20,
            };
            2
        ];
        let builder = ImageBuilder::new()
            .inode(InodeSpec::dir(0))
            .inode(InodeSpec::chunk_indexes(1, 8192, 12, entries).xattr_icount(1));
        let img = builder.build().expect("build");
        let table = builder.iloc(1) as usize + 32 + 12;
        let aligned = table.next_multiple_of(8);
        assert_eq!(&img[aligned + 4..aligned + 8], &20_u32.to_le_bytes());
        let sb = RofsSuperblock::parse_block0(&img).expect("parse");
        assert!(sb.has_incompat(IncompatFeatures::CHUNKED_FILE));
    }

    #[test]
    fn extract_fixture_roundtrips() {
        let img = sample_image().expect("sample");
        let json = extract_superblock_fixture(&img).expect("extract");
        let fixture: SparseFixture = serde_json::from_value(json).expect("fixture");
        let bytes = sparse_fixture_bytes(&fixture).expect("expand");
        assert_eq!(bytes, img[..BS]);
    }

    #[test]
    fn fixture_size_must_be_whole_blocks() {
        let run = |offset: usize, hex: &str| FixtureWrite {
            offset,
            hex: hex.to_owned(),
        };
        for size in [0, 1024, BS + 1] {
            let fixture = SparseFixture {
                size,
                writes: vec![],
            };
            assert!(sparse_fixture_bytes(&fixture).is_err(), "size {size}");
        }

        let past_end = SparseFixture {
            size: BS,
            writes: vec![run(BS - 1, "aabb")],
        };
        assert!(sparse_fixture_bytes(&past_end).is_err());

        let two_blocks = SparseFixture {
            size: 2 * BS,
            writes: vec![run(BS - 1, "aabb")],
        };
        let bytes = sparse_fixture_bytes(&two_blocks).expect("expand");
        assert_eq!(bytes.len(), 2 * BS);
        assert_eq!(&bytes[BS - 1..=BS], &[0xAA, 0xBB]);
    }
}

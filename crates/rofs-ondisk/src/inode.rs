use rofs_types::{
    Nid, ParseError, ROFS_BLOCK_SIZE_BITS, ROFS_INODE_COMPACT_SIZE, ROFS_INODE_EXTENDED_SIZE,
    S_IFDIR, S_IFLNK, S_IFMT, S_IFREG, ensure_slice, read_le_u16, read_le_u32, read_le_u64,
};
use serde::{Deserialize, Serialize};

const I_FORMAT_VERSION_MASK: u16 = 0x0001;
const I_FORMAT_DATALAYOUT_SHIFT: u16 = 1;
const I_FORMAT_DATALAYOUT_MASK: u16 = 0x0007;
const I_FORMAT_ALL: u16 = 0x000F;

/// Chunk format: low bits are the chunk size exponent above the block size.
pub const CHUNK_FORMAT_BLKBITS_MASK: u16 = 0x001F;
/// Chunk format: the table holds 8-byte chunk-index entries, not block-map entries.
pub const CHUNK_FORMAT_INDEXES: u16 = 0x0020;
pub const CHUNK_FORMAT_ALL: u16 = CHUNK_FORMAT_BLKBITS_MASK | CHUNK_FORMAT_INDEXES;

const XATTR_IBODY_HEADER_SIZE: u32 = 12;
const XATTR_ENTRY_SIZE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InodeVersion {
    Compact,
    Extended,
}

impl InodeVersion {
    /// On-disk record size in bytes.
    #[must_use]
    pub fn record_size(self) -> u32 {
        match self {
            Self::Compact => ROFS_INODE_COMPACT_SIZE,
            Self::Extended => ROFS_INODE_EXTENDED_SIZE,
        }
    }
}

/// Data layout stored in bits 1..3 of `i_format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataLayout {
    FlatPlain,
    CompressedFull,
    /// Flat with the final partial block stored inline after the inode.
    FlatInline,
    CompressedCompact,
    ChunkBased,
}

impl DataLayout {
    pub fn from_raw(raw: u16) -> Result<Self, ParseError> {
        match raw {
            0 => Ok(Self::FlatPlain),
            1 => Ok(Self::CompressedFull),
            2 => Ok(Self::FlatInline),
            3 => Ok(Self::CompressedCompact),
            4 => Ok(Self::ChunkBased),
            other => Err(ParseError::Unsupported {
                field: "i_datalayout",
                value: u64::from(other),
            }),
        }
    }

    #[must_use]
    pub fn is_compressed(self) -> bool {
        matches!(self, Self::CompressedFull | Self::CompressedCompact)
    }
}

/// Split `i_format` into version and data layout.
pub fn decode_i_format(i_format: u16) -> Result<(InodeVersion, DataLayout), ParseError> {
    if i_format & !I_FORMAT_ALL != 0 {
        return Err(ParseError::Unsupported {
            field: "i_format",
            value: u64::from(i_format),
        });
    }
    let version = if i_format & I_FORMAT_VERSION_MASK == 0 {
        InodeVersion::Compact
    } else {
        InodeVersion::Extended
    };
    let layout =
        DataLayout::from_raw((i_format >> I_FORMAT_DATALAYOUT_SHIFT) & I_FORMAT_DATALAYOUT_MASK)?;
    Ok((version, layout))
}

/// A parsed inode record (compact or extended).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RofsInode {
    pub nid: Nid,
    /// Byte address of the record on the primary device.
    pub iloc: u64,
    pub version: InodeVersion,
    pub layout: DataLayout,
    pub xattr_icount: u16,
    pub mode: u16,
    pub nlink: u32,
    pub size: u64,
    /// Raw `i_u` union: start block for flat files, chunk format for chunked ones.
    pub i_u: u32,
    pub ino: u32,
    pub uid: u32,
    pub gid: u32,
    /// Extended records only; compact records inherit the image build time.
    pub mtime: Option<(u64, u32)>,
}

impl RofsInode {
    /// Parse an inode record. `bytes` must start at the record and hold at
    /// least the size its `i_format` declares.
    pub fn parse_from_bytes(nid: Nid, iloc: u64, bytes: &[u8]) -> Result<Self, ParseError> {
        let i_format = read_le_u16(bytes, 0)?;
        let (version, layout) = decode_i_format(i_format)?;
        #[allow(clippy::cast_possible_truncation)] // 32 or 64
        let record = ensure_slice(bytes, 0, version.record_size() as usize)?;

        let xattr_icount = read_le_u16(record, 2)?;
        let mode = read_le_u16(record, 4)?;
        let i_u = read_le_u32(record, 16)?;
        let ino = read_le_u32(record, 20)?;

        let inode = match version {
            InodeVersion::Compact => Self {
                nid,
                iloc,
                version,
                layout,
                xattr_icount,
                mode,
                nlink: u32::from(read_le_u16(record, 6)?),
                size: u64::from(read_le_u32(record, 8)?),
                i_u,
                ino,
                uid: u32::from(read_le_u16(record, 24)?),
                gid: u32::from(read_le_u16(record, 26)?),
                mtime: None,
            },
            InodeVersion::Extended => Self {
                nid,
                iloc,
                version,
                layout,
                xattr_icount,
                mode,
                nlink: read_le_u32(record, 44)?,
                size: read_le_u64(record, 8)?,
                i_u,
                ino,
                uid: read_le_u32(record, 24)?,
                gid: read_le_u32(record, 28)?,
                mtime: Some((read_le_u64(record, 32)?, read_le_u32(record, 40)?)),
            },
        };
        Ok(inode)
    }

    #[must_use]
    pub fn record_size(&self) -> u32 {
        self.version.record_size()
    }

    /// Size of the inline xattr area that follows the record.
    #[must_use]
    pub fn xattr_size(&self) -> u32 {
        xattr_ibody_size(self.xattr_icount)
    }

    #[must_use]
    pub fn file_type_mode(&self) -> u16 {
        self.mode & S_IFMT
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type_mode() == S_IFDIR
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.file_type_mode() == S_IFREG
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.file_type_mode() == S_IFLNK
    }

    /// Derive the layout descriptor used for extent resolution.
    pub fn layout_info(&self) -> Result<InodeLayoutInfo, ParseError> {
        let layout = match self.layout {
            DataLayout::FlatPlain => FileLayout::Flat {
                raw_blkaddr: self.i_u,
                tail_packing: false,
            },
            DataLayout::FlatInline => FileLayout::Flat {
                raw_blkaddr: self.i_u,
                tail_packing: true,
            },
            DataLayout::ChunkBased => {
                let format = ChunkFormat::parse(self.i_u)?;
                FileLayout::Chunk {
                    chunk_bits: format.chunk_bits(),
                    index_format: format.has_indexes(),
                }
            }
            DataLayout::CompressedFull => FileLayout::Compressed { compact: false },
            DataLayout::CompressedCompact => FileLayout::Compressed { compact: true },
        };
        Ok(InodeLayoutInfo {
            nid: self.nid,
            size: self.size,
            inode_loc: self.iloc,
            inode_size: self.record_size(),
            xattr_size: self.xattr_size(),
            layout,
        })
    }
}

/// `0` without inline xattrs, otherwise the ibody header plus `icount - 1` entries.
#[must_use]
pub fn xattr_ibody_size(icount: u16) -> u32 {
    if icount == 0 {
        0
    } else {
        XATTR_IBODY_HEADER_SIZE + XATTR_ENTRY_SIZE * (u32::from(icount) - 1)
    }
}

/// Chunk format word stored in `i_u` of chunk-based inodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFormat(pub u16);

impl ChunkFormat {
    /// Decode the low 16 bits of `i_u`, rejecting unknown format bits.
    pub fn parse(i_u: u32) -> Result<Self, ParseError> {
        #[allow(clippy::cast_possible_truncation)] // the format is the low half
        let raw = i_u as u16;
        if raw & !CHUNK_FORMAT_ALL != 0 {
            return Err(ParseError::Unsupported {
                field: "chunk_format",
                value: u64::from(raw),
            });
        }
        Ok(Self(raw))
    }

    /// log2 of the chunk size in bytes.
    #[must_use]
    pub fn chunk_bits(self) -> u8 {
        #[allow(clippy::cast_possible_truncation)] // masked to 5 bits
        let extra = (self.0 & CHUNK_FORMAT_BLKBITS_MASK) as u8;
        ROFS_BLOCK_SIZE_BITS + extra
    }

    #[must_use]
    pub fn has_indexes(self) -> bool {
        self.0 & CHUNK_FORMAT_INDEXES != 0
    }
}

/// How a file's logical bytes map onto storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileLayout {
    /// Contiguous blocks from `raw_blkaddr`; with `tail_packing` the final
    /// partial block lives inline after the inode record. A block-aligned
    /// size has no partial block and so no inline tail.
    Flat { raw_blkaddr: u32, tail_packing: bool },
    /// Fixed-size chunks looked up through a per-inode table of block-map
    /// entries, or chunk-index entries when `index_format` is set.
    Chunk { chunk_bits: u8, index_format: bool },
    /// Handed to the decompression front-end; not resolved here.
    Compressed { compact: bool },
}

/// Everything extent resolution needs to know about one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeLayoutInfo {
    pub nid: Nid,
    pub size: u64,
    /// Byte address of the inode record.
    pub inode_loc: u64,
    pub inode_size: u32,
    pub xattr_size: u32,
    pub layout: FileLayout,
}

impl InodeLayoutInfo {
    /// First byte after the inode record and its inline xattrs.
    #[must_use]
    pub fn trailer_offset(&self) -> Option<u64> {
        self.inode_loc
            .checked_add(u64::from(self.inode_size))?
            .checked_add(u64::from(self.xattr_size))
    }
}

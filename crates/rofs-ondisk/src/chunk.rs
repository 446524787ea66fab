use rofs_types::{
    ParseError, ROFS_BLOCK_MAP_ENTRY_SIZE, ROFS_CHUNK_INDEX_SIZE, ROFS_NULL_ADDR, read_le_u16,
    read_le_u32,
};
use serde::{Deserialize, Serialize};

/// 8-byte chunk-index entry: `{advise u16, device_id u16, blkaddr u32}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkIndexEntry {
    pub advise: u16,
    /// Raw device id; callers mask it with the device table's id mask.
    pub device_id: u16,
    pub blkaddr: u32,
}

impl ChunkIndexEntry {
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            advise: read_le_u16(bytes, 0)?,
            device_id: read_le_u16(bytes, 2)?,
            blkaddr: read_le_u32(bytes, 4)?,
        })
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.blkaddr == ROFS_NULL_ADDR
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut out = [0_u8; 8];
        out[0..2].copy_from_slice(&self.advise.to_le_bytes());
        out[2..4].copy_from_slice(&self.device_id.to_le_bytes());
        out[4..8].copy_from_slice(&self.blkaddr.to_le_bytes());
        out
    }
}

/// 4-byte block-map entry: a bare block address on the primary device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMapEntry(pub u32);

impl BlockMapEntry {
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self(read_le_u32(bytes, 0)?))
    }

    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == ROFS_NULL_ADDR
    }
}

/// Size of one table entry for the given chunk format.
#[must_use]
pub fn chunk_entry_size(index_format: bool) -> u64 {
    if index_format {
        ROFS_CHUNK_INDEX_SIZE
    } else {
        ROFS_BLOCK_MAP_ENTRY_SIZE
    }
}

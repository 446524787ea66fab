use rofs_types::{ParseError, ROFS_DEVT_SLOT_SIZE, ensure_slice, read_le_u32};
use serde::{Deserialize, Serialize};

const TAG_LEN: usize = 64;

/// One 128-byte entry of the on-disk device slot table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSlot {
    /// Free-form tag (typically a digest or path hint), NUL-trimmed.
    pub tag: String,
    pub blocks: u32,
    /// Start of this device's window in the flat block address space; `0`
    /// when the device is addressed only through chunk-index device ids.
    pub mapped_blkaddr: u32,
}

impl DeviceSlot {
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        #[allow(clippy::cast_possible_truncation)] // 128
        let slot = ensure_slice(bytes, 0, ROFS_DEVT_SLOT_SIZE as usize)?;
        let tag_raw = &slot[..TAG_LEN];
        let end = tag_raw.iter().position(|b| *b == 0).unwrap_or(TAG_LEN);
        Ok(Self {
            tag: String::from_utf8_lossy(&tag_raw[..end]).into_owned(),
            blocks: read_le_u32(slot, 64)?,
            mapped_blkaddr: read_le_u32(slot, 68)?,
        })
    }

    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.mapped_blkaddr != 0
    }
}

/// Byte address of the slot for extra device `index` (0-based) in a table
/// starting at `table_offset`.
#[must_use]
pub fn device_slot_offset(table_offset: u64, index: u64) -> Option<u64> {
    index
        .checked_mul(ROFS_DEVT_SLOT_SIZE)
        .and_then(|rel| table_offset.checked_add(rel))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_device_slot() {
        let mut b = [0_u8; 128];
        b[..7].copy_from_slice(b"blob-01");
        b[64..68].copy_from_slice(&256_u32.to_le_bytes());
        b[68..72].copy_from_slice(&1024_u32.to_le_bytes());
        let slot = DeviceSlot::parse_from_bytes(&b).expect("parse");
        assert_eq!(slot.tag, "blob-01");
        assert_eq!(slot.blocks, 256);
        assert_eq!(slot.mapped_blkaddr, 1024);
        assert!(slot.is_mapped());
    }

    #[test]
    fn full_width_tag_is_accepted() {
        let mut b = [0_u8; 128];
        b[..64].fill(b'a');
        let slot = DeviceSlot::parse_from_bytes(&b).expect("parse");
        assert_eq!(slot.tag.len(), 64);
        assert!(!slot.is_mapped());
    }

    #[test]
    fn short_slot_rejected() {
        assert!(DeviceSlot::parse_from_bytes(&[0; 100]).is_err());
    }

    #[test]
    fn slot_offsets() {
        assert_eq!(device_slot_offset(384, 0), Some(384));
        assert_eq!(device_slot_offset(384, 2), Some(640));
        assert_eq!(device_slot_offset(u64::MAX, 1), None);
    }
}

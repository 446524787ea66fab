//! Compression configuration payloads.
//!
//! Only the configuration blobs are parsed here; the codecs themselves live
//! outside this workspace.

use rofs_types::{ParseError, ROFS_BLOCK_SIZE, read_le_u16, read_le_u32};
use serde::{Deserialize, Serialize};

/// Every algorithm bit this build understands.
pub const ALL_COMPR_ALGS: u16 = 0b11;

/// Largest physical cluster a codec may be configured for (1 MiB).
pub const PCLUSTER_MAX_SIZE: u32 = 1 << 20;
/// Largest LZMA dictionary accepted (8 MiB).
pub const LZMA_MAX_DICT_SIZE: u32 = 8 * PCLUSTER_MAX_SIZE;

const LZ4_DISTANCE_MAX: u32 = 65_535;
/// Window in pages used when the image does not specify one.
pub const LZ4_MAX_DISTANCE_PAGES: u32 = LZ4_DISTANCE_MAX.div_ceil(ROFS_BLOCK_SIZE) + 1;

const LZ4_CFGS_SIZE: usize = 14;
const LZMA_CFGS_SIZE: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    Lz4,
    Lzma,
}

impl CompressionAlgorithm {
    /// Algorithm for bit `index` of `available_compr_algs`.
    #[must_use]
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::Lz4),
            1 => Some(Self::Lzma),
            _ => None,
        }
    }

    #[must_use]
    pub fn index(self) -> u32 {
        match self {
            Self::Lz4 => 0,
            Self::Lzma => 1,
        }
    }

    #[must_use]
    pub fn bit(self) -> u16 {
        1 << self.index()
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Lz4 => "lz4",
            Self::Lzma => "lzma",
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lz4Config {
    pub max_distance: u16,
    /// Physical cluster size in blocks, at least 1.
    pub max_pclusterblks: u16,
    pub max_distance_pages: u32,
}

impl Lz4Config {
    /// Configuration implied by the superblock when no record is present.
    #[must_use]
    pub fn baseline(max_distance: u16) -> Self {
        Self {
            max_distance,
            max_pclusterblks: 1,
            max_distance_pages: distance_pages(max_distance),
        }
    }

    /// Parse a 14-byte `{max_distance u16, max_pclusterblks u16, reserved[10]}` record.
    pub fn from_payload(payload: &[u8], big_pcluster: bool) -> Result<Self, ParseError> {
        if payload.len() != LZ4_CFGS_SIZE {
            return Err(ParseError::InvalidField {
                field: "lz4_cfgs",
                reason: "unexpected payload size",
            });
        }
        let max_distance = read_le_u16(payload, 0)?;
        let max_pclusterblks = match read_le_u16(payload, 2)? {
            0 => 1,
            n if u32::from(n) > PCLUSTER_MAX_SIZE / ROFS_BLOCK_SIZE => {
                return Err(ParseError::InvalidField {
                    field: "lz4_max_pclusterblks",
                    reason: "physical cluster larger than 1 MiB",
                });
            }
            n if n > 1 && !big_pcluster => {
                return Err(ParseError::InvalidField {
                    field: "lz4_max_pclusterblks",
                    reason: "big pcluster feature not enabled",
                });
            }
            n => n,
        };
        Ok(Self {
            max_distance,
            max_pclusterblks,
            max_distance_pages: distance_pages(max_distance),
        })
    }
}

fn distance_pages(max_distance: u16) -> u32 {
    if max_distance == 0 {
        LZ4_MAX_DISTANCE_PAGES
    } else {
        u32::from(max_distance).div_ceil(ROFS_BLOCK_SIZE) + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LzmaConfig {
    pub dict_size: u32,
    pub format: u16,
}

impl LzmaConfig {
    /// Parse a 14-byte `{dict_size u32, format u16, reserved[8]}` record.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ParseError> {
        if payload.len() != LZMA_CFGS_SIZE {
            return Err(ParseError::InvalidField {
                field: "lzma_cfgs",
                reason: "unexpected payload size",
            });
        }
        let dict_size = read_le_u32(payload, 0)?;
        let format = read_le_u16(payload, 4)?;
        if format != 0 {
            return Err(ParseError::Unsupported {
                field: "lzma_format",
                value: u64::from(format),
            });
        }
        if dict_size > LZMA_MAX_DICT_SIZE {
            return Err(ParseError::Unsupported {
                field: "lzma_dict_size",
                value: u64::from(dict_size),
            });
        }
        Ok(Self { dict_size, format })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lz4_payload(distance: u16, blocks: u16) -> [u8; 14] {
        let mut p = [0_u8; 14];
        p[0..2].copy_from_slice(&distance.to_le_bytes());
        p[2..4].copy_from_slice(&blocks.to_le_bytes());
        p
    }

    #[test]
    fn algorithm_bits() {
        assert_eq!(CompressionAlgorithm::from_index(0), Some(CompressionAlgorithm::Lz4));
        assert_eq!(CompressionAlgorithm::from_index(1), Some(CompressionAlgorithm::Lzma));
        assert_eq!(CompressionAlgorithm::from_index(2), None);
        assert_eq!(CompressionAlgorithm::Lzma.bit(), 0b10);
        assert_eq!(CompressionAlgorithm::Lz4.to_string(), "lz4");
    }

    #[test]
    fn lz4_baseline_pages() {
        assert_eq!(Lz4Config::baseline(0).max_distance_pages, 17);
        assert_eq!(Lz4Config::baseline(4096).max_distance_pages, 2);
        assert_eq!(Lz4Config::baseline(4097).max_distance_pages, 3);
        assert_eq!(Lz4Config::baseline(100).max_pclusterblks, 1);
    }

    #[test]
    fn lz4_payload_rules() {
        let cfg = Lz4Config::from_payload(&lz4_payload(8192, 0), false).expect("zero blocks");
        assert_eq!(cfg.max_pclusterblks, 1);
        assert_eq!(cfg.max_distance_pages, 3);

        let cfg = Lz4Config::from_payload(&lz4_payload(8192, 256), true).expect("1 MiB");
        assert_eq!(cfg.max_pclusterblks, 256);

        assert!(Lz4Config::from_payload(&lz4_payload(0, 257), true).is_err());
        assert!(Lz4Config::from_payload(&lz4_payload(0, 2), false).is_err());
        assert!(Lz4Config::from_payload(&[0; 10], true).is_err());
    }

    #[test]
    fn lzma_payload_rules() {
        let mut p = [0_u8; 14];
        p[0..4].copy_from_slice(&(1_u32 << 20).to_le_bytes());
        assert_eq!(
            LzmaConfig::from_payload(&p).expect("lzma"),
            LzmaConfig {
                dict_size: 1 << 20,
                format: 0,
            }
        );

        p[4] = 1;
        assert!(matches!(
            LzmaConfig::from_payload(&p),
            Err(ParseError::Unsupported {
                field: "lzma_format",
                ..
            })
        ));

        p[4] = 0;
        p[0..4].copy_from_slice(&(LZMA_MAX_DICT_SIZE + 1).to_le_bytes());
        assert!(LzmaConfig::from_payload(&p).is_err());
        assert!(LzmaConfig::from_payload(&p[..12]).is_err());
    }
}

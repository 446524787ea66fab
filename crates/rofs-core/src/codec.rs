//! Compression configuration records.
//!
//! With `COMPR_CFGS` set, one length-prefixed record per bit of
//! `available_compr_algs` follows the superblock, in ascending bit order.
//! Each record starts 4-byte aligned; a zero length means 65536. Records may
//! run across block boundaries. Without `COMPR_CFGS` only the LZ4 baseline is
//! configured, from the superblock union field.

use rofs_block::{BlockDevice, MetaBuf};
use rofs_error::{Result, RofsError};
use rofs_ondisk::{
    ALL_COMPR_ALGS, CompressionAlgorithm, Lz4Config, LzmaConfig, RofsSuperblock,
    parse_error_to_rofs,
};
use rofs_types::{BlockNumber, ROFS_BLOCK_SIZE, align_up, blkoff};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Receives one call per configuration record found at mount.
pub trait CodecConfigLoader {
    /// `payload` is `None` when the image carries no explicit records and
    /// the baseline codec should be configured from superblock defaults.
    fn load_config(
        &mut self,
        algorithm: CompressionAlgorithm,
        payload: Option<&[u8]>,
        sb: &RofsSuperblock,
    ) -> Result<()>;
}

/// Parsed configurations for the codecs this workspace knows about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltinCodecConfigs {
    pub lz4: Option<Lz4Config>,
    pub lzma: Option<LzmaConfig>,
}

impl CodecConfigLoader for BuiltinCodecConfigs {
    fn load_config(
        &mut self,
        algorithm: CompressionAlgorithm,
        payload: Option<&[u8]>,
        sb: &RofsSuperblock,
    ) -> Result<()> {
        let block = BlockNumber::containing(sb.compr_cfgs_offset()).0;
        match (algorithm, payload) {
            (CompressionAlgorithm::Lz4, None) => {
                self.lz4 = Some(Lz4Config::baseline(sb.lz4_max_distance));
            }
            (CompressionAlgorithm::Lz4, Some(bytes)) => {
                let cfg = Lz4Config::from_payload(bytes, sb.has_big_pcluster())
                    .map_err(|e| parse_error_to_rofs(&e, block))?;
                self.lz4 = Some(cfg);
            }
            (CompressionAlgorithm::Lzma, Some(bytes)) => {
                let cfg = LzmaConfig::from_payload(bytes).map_err(|e| parse_error_to_rofs(&e, block))?;
                self.lzma = Some(cfg);
            }
            (CompressionAlgorithm::Lzma, None) => {
                return Err(RofsError::CorruptLayout {
                    block,
                    detail: "lzma requires an explicit configuration record".to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// Walk the configuration records of `sb` and feed them to `loader`.
pub fn load_codec_configs(
    primary: &dyn BlockDevice,
    sb: &RofsSuperblock,
    meta: &mut MetaBuf,
    loader: &mut dyn CodecConfigLoader,
) -> Result<()> {
    if !sb.has_compr_cfgs() {
        return loader.load_config(CompressionAlgorithm::Lz4, None, sb);
    }

    let algs = sb.available_compr_algs;
    let unknown = algs & !ALL_COMPR_ALGS;
    if unknown != 0 {
        error!(algs, unknown, "image uses unsupported compression algorithms");
        return Err(RofsError::UnsupportedFeature(format!(
            "compression algorithms {unknown:#x}"
        )));
    }

    let mut offset = sb.compr_cfgs_offset();
    for index in 0..u16::BITS {
        if algs & (1 << index) == 0 {
            continue;
        }
        let algorithm = CompressionAlgorithm::from_index(index).ok_or_else(|| {
            RofsError::Internal(format!("no codec for algorithm bit {index}"))
        })?;
        let payload = read_record(primary, meta, &mut offset)?;
        debug!(%algorithm, len = payload.len(), "compression config record");
        loader.load_config(algorithm, Some(&payload), sb)?;
    }
    Ok(())
}

/// Read one length-prefixed record at `*offset` and advance past it.
fn read_record(dev: &dyn BlockDevice, meta: &mut MetaBuf, offset: &mut u64) -> Result<Vec<u8>> {
    let overflow = |at: u64| RofsError::CorruptLayout {
        block: BlockNumber::containing(at).0,
        detail: "compression config record offset overflows".to_owned(),
    };

    let start = align_up(*offset, 4).ok_or_else(|| overflow(*offset))?;
    let prefix = meta.map_range(dev, start, 2)?;
    let len = match u16::from_le_bytes([prefix[0], prefix[1]]) {
        0 => 1_usize << 16,
        n => usize::from(n),
    };

    let mut pos = start + 2;
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let room = ROFS_BLOCK_SIZE as usize - blkoff(pos);
        let cnt = room.min(len - out.len());
        out.extend_from_slice(meta.map_range(dev, pos, cnt)?);
        pos = pos.checked_add(cnt as u64).ok_or_else(|| overflow(pos))?;
    }
    *offset = pos;
    Ok(out)
}

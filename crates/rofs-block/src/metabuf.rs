//! Single-block metadata buffer.
//!
//! A `MetaBuf` holds at most one block of on-disk metadata. Asking for the
//! block it already holds is served without touching the device; asking for
//! another block drops the previous one first. Each read path owns its own
//! handle, so nothing here is shared between threads.

use crate::{BlockBuf, BlockDevice};
use rofs_error::{Result, RofsError};
use rofs_types::{BlockNumber, blkoff};
use tracing::trace;

/// How the caller intends to use the fetched block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    /// Only make the block resident; no bytes are returned.
    NoPointer,
    /// Return the block's bytes.
    Mapped,
}

/// Handle over at most one resident metadata block.
///
/// A handle is meant to be used against a single device; the cached block
/// is keyed by block number only.
#[derive(Debug, Default)]
pub struct MetaBuf {
    block: Option<BlockNumber>,
    buf: Option<BlockBuf>,
    mode: Option<MapMode>,
    device_reads: u64,
}

impl MetaBuf {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `block` resident and, in `Mapped` mode, return its bytes.
    ///
    /// A `NoPointer` handle may be upgraded to `Mapped` on the same block.
    /// Downgrading a mapped handle without `release` is a contract violation
    /// and fails with `Internal`.
    pub fn fetch(
        &mut self,
        dev: &dyn BlockDevice,
        block: BlockNumber,
        mode: MapMode,
    ) -> Result<Option<&[u8]>> {
        if self.block != Some(block) {
            self.release();
            let buf = dev.read_block(block)?;
            self.device_reads += 1;
            trace!(block = block.0, ?mode, "metabuf miss");
            self.block = Some(block);
            self.buf = Some(buf);
        }

        match (self.mode, mode) {
            (None | Some(MapMode::NoPointer), _) => self.mode = Some(mode),
            (Some(MapMode::Mapped), MapMode::Mapped) => {}
            (Some(MapMode::Mapped), MapMode::NoPointer) => {
                return Err(RofsError::Internal(format!(
                    "metabuf for block {} is mapped; release before refetching without a pointer",
                    block.0
                )));
            }
        }

        match mode {
            MapMode::NoPointer => Ok(None),
            MapMode::Mapped => Ok(self.buf.as_ref().map(BlockBuf::as_slice)),
        }
    }

    /// Map `block` and return its bytes.
    pub fn map(&mut self, dev: &dyn BlockDevice, block: BlockNumber) -> Result<&[u8]> {
        self.fetch(dev, block, MapMode::Mapped)?
            .ok_or_else(|| RofsError::Internal("mapped fetch returned no bytes".to_owned()))
    }

    /// Map the block holding byte `addr` and return `len` bytes starting
    /// there. The range must not leave the block.
    pub fn map_range(&mut self, dev: &dyn BlockDevice, addr: u64, len: usize) -> Result<&[u8]> {
        let block_size = u64::from(dev.block_size());
        let block = BlockNumber(addr / block_size);
        let start = blkoff(addr);
        let bytes = self.map(dev, block)?;
        bytes
            .get(start..start.saturating_add(len))
            .ok_or_else(|| RofsError::CorruptLayout {
                block: block.0,
                detail: format!("{len} bytes at offset {start} cross the block boundary"),
            })
    }

    /// Drop the resident block, if any. Safe on an empty handle.
    pub fn release(&mut self) {
        if let Some(block) = self.block.take() {
            trace!(block = block.0, "metabuf release");
        }
        self.buf = None;
        self.mode = None;
    }

    #[must_use]
    pub fn block(&self) -> Option<BlockNumber> {
        self.block
    }

    #[must_use]
    pub fn mode(&self) -> Option<MapMode> {
        self.mode
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.block.is_none()
    }

    /// Bytes of the resident block, if it is mapped.
    #[must_use]
    pub fn mapped(&self) -> Option<&[u8]> {
        match self.mode {
            Some(MapMode::Mapped) => self.buf.as_ref().map(BlockBuf::as_slice),
            _ => None,
        }
    }

    /// Number of block reads this handle has issued.
    #[must_use]
    pub fn device_reads(&self) -> u64 {
        self.device_reads
    }
}

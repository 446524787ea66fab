#![forbid(unsafe_code)]
//! Block I/O layer.
//!
//! Provides the read-only `ByteDevice`/`BlockDevice` traits, file- and
//! memory-backed devices, the single-block metadata buffer used while
//! parsing on-disk layout, and the multi-device table.

pub mod device;
pub mod metabuf;

pub use device::{
    DeviceInfo, DeviceOpener, DeviceTable, DeviceTableParams, FileDeviceOpener,
    MemoryDeviceOpener, ResolvedDevice,
};
pub use metabuf::{MapMode, MetaBuf};

use parking_lot::RwLock;
use rofs_error::{Result, RofsError};
use rofs_types::BlockNumber;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Owned block buffer.
///
/// Invariant: length == device block size for the originating device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

fn out_of_range(what: &str, offset: u64, len: usize, limit: u64) -> RofsError {
    RofsError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("{what} out of bounds: offset={offset} len={len} device_len={limit}"),
    ))
}

/// Byte-addressed device for fixed-offset reads (pread semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

/// File-backed byte device using `pread` style I/O.
///
/// This uses `std::os::unix::fs::FileExt`, which is thread-safe and does not
/// require a shared seek position. Images are opened read-only.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }

    #[must_use]
    pub fn file(&self) -> &Arc<File> {
        &self.file
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset
            .checked_add(u64::try_from(buf.len()).unwrap_or(u64::MAX))
            .ok_or_else(|| out_of_range("read", offset, buf.len(), self.len))?;
        if end > self.len {
            return Err(out_of_range("read", offset, buf.len(), self.len));
        }
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }
}

/// In-memory byte device.
///
/// `write_at` exists so tests can corrupt an image after it was built.
#[derive(Debug, Default)]
pub struct MemoryByteDevice {
    bytes: RwLock<Vec<u8>>,
}

impl MemoryByteDevice {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: RwLock::new(bytes),
        }
    }

    /// Overwrite bytes in place.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.write();
        let limit = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        let start = usize::try_from(offset)
            .map_err(|_| out_of_range("write", offset, data.len(), limit))?;
        let end = start
            .checked_add(data.len())
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| out_of_range("write", offset, data.len(), limit))?;
        bytes[start..end].copy_from_slice(data);
        drop(bytes);
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }
}

impl ByteDevice for MemoryByteDevice {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.bytes.read().len()).unwrap_or(u64::MAX)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.read();
        let limit = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        let start =
            usize::try_from(offset).map_err(|_| out_of_range("read", offset, buf.len(), limit))?;
        let end = start
            .checked_add(buf.len())
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| out_of_range("read", offset, buf.len(), limit))?;
        buf.copy_from_slice(&bytes[start..end]);
        drop(bytes);
        Ok(())
    }
}

impl<T: ByteDevice + ?Sized> ByteDevice for Arc<T> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

/// Block-addressed read interface.
///
/// Block index times block size is the byte offset on the device.
pub trait BlockDevice: Send + Sync {
    /// Read a block by number.
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf>;

    /// Device block size in bytes.
    fn block_size(&self) -> u32;

    /// Total number of blocks.
    fn block_count(&self) -> u64;
}

#[derive(Debug)]
pub struct ByteBlockDevice<D: ByteDevice> {
    inner: D,
    block_size: u32,
    block_count: u64,
}

impl<D: ByteDevice> ByteBlockDevice<D> {
    /// Wrap `inner`. A trailing partial block is not addressable.
    pub fn new(inner: D, block_size: u32) -> Result<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(RofsError::UnsupportedBlockSize(format!(
                "block_size={block_size} (must be power of two)"
            )));
        }
        let block_count = inner.len_bytes() / u64::from(block_size);
        Ok(Self {
            inner,
            block_size,
            block_count,
        })
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: ByteDevice> BlockDevice for ByteBlockDevice<D> {
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        let size = usize::try_from(self.block_size)
            .map_err(|_| RofsError::Internal("block_size does not fit usize".to_owned()))?;
        if block.0 >= self.block_count {
            return Err(out_of_range(
                "block",
                block.0,
                size,
                self.block_count.saturating_mul(u64::from(self.block_size)),
            ));
        }
        let offset = block
            .0
            .checked_mul(u64::from(self.block_size))
            .ok_or_else(|| RofsError::Internal("block offset overflow".to_owned()))?;
        let mut buf = vec![0_u8; size];
        self.inner.read_exact_at(offset, &mut buf)?;
        Ok(BlockBuf::new(buf))
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }
}

/// Copy `buf.len()` bytes starting at byte `offset` of `dev`, crossing block
/// boundaries as needed.
pub fn read_bytes(dev: &dyn BlockDevice, offset: u64, buf: &mut [u8]) -> Result<()> {
    let block_size = u64::from(dev.block_size());
    let mut done = 0_usize;
    while done < buf.len() {
        let pos = offset
            .checked_add(u64::try_from(done).unwrap_or(u64::MAX))
            .ok_or_else(|| RofsError::Internal("read offset overflow".to_owned()))?;
        let block = dev.read_block(BlockNumber(pos / block_size))?;
        let in_block = usize::try_from(pos % block_size)
            .map_err(|_| RofsError::Internal("block offset does not fit usize".to_owned()))?;
        let src = &block.as_slice()[in_block..];
        let n = src.len().min(buf.len() - done);
        buf[done..done + n].copy_from_slice(&src[..n]);
        done += n;
    }
    Ok(())
}

/// Open an image file as a block device of `block_size`.
pub fn open_file_block_device(
    path: impl AsRef<Path>,
    block_size: u32,
) -> Result<ByteBlockDevice<FileByteDevice>> {
    ByteBlockDevice::new(FileByteDevice::open(path)?, block_size)
}

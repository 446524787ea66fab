//! Multi-device table.
//!
//! Device 0 is the primary device that holds the superblock. Extra devices
//! are numbered from 1 in the order the caller lists them; their geometry
//! comes from the on-disk slot table. Handles live in an arena indexed by
//! `id - 1` and are released when the table is dropped.

use crate::{BlockDevice, ByteBlockDevice, MetaBuf, open_file_block_device};
use rofs_error::{Result, RofsError};
use rofs_ondisk::{DeviceSlot, device_slot_offset, parse_error_to_rofs};
use rofs_types::{BlockNumber, DeviceId, ROFS_BLOCK_SIZE, ROFS_DEVT_SLOT_SIZE};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Opens extra backing devices by path.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Arc<dyn BlockDevice>>;
}

/// Opens image files read-only with the filesystem block size.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDeviceOpener;

impl DeviceOpener for FileDeviceOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn BlockDevice>> {
        Ok(Arc::new(open_file_block_device(path, ROFS_BLOCK_SIZE)?))
    }
}

/// Serves pre-registered in-memory devices by path.
#[derive(Default)]
pub struct MemoryDeviceOpener {
    devices: HashMap<PathBuf, Arc<dyn BlockDevice>>,
}

impl MemoryDeviceOpener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `device` under `path`.
    pub fn insert(&mut self, path: impl Into<PathBuf>, device: Arc<dyn BlockDevice>) {
        self.devices.insert(path.into(), device);
    }

    /// Register raw image bytes under `path`.
    pub fn insert_bytes(&mut self, path: impl Into<PathBuf>, bytes: Vec<u8>) -> Result<()> {
        let dev = ByteBlockDevice::new(crate::MemoryByteDevice::new(bytes), ROFS_BLOCK_SIZE)?;
        self.insert(path, Arc::new(dev));
        Ok(())
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&Arc<dyn BlockDevice>> {
        self.devices.get(path)
    }
}

impl DeviceOpener for MemoryDeviceOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn BlockDevice>> {
        self.devices.get(path).cloned().ok_or_else(|| {
            RofsError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no device registered at {}", path.display()),
            ))
        })
    }
}

/// One extra backing device.
pub struct DeviceInfo {
    pub id: DeviceId,
    pub path: PathBuf,
    pub tag: String,
    pub handle: Arc<dyn BlockDevice>,
    pub blocks: u32,
    pub mapped_blkaddr: u32,
}

impl DeviceInfo {
    /// Byte window `[start, end)` this device occupies in the flat address
    /// space, or `None` when it is not virtually mapped.
    #[must_use]
    pub fn mapped_window(&self) -> Option<(u64, u64)> {
        if self.mapped_blkaddr == 0 {
            return None;
        }
        let bs = u64::from(ROFS_BLOCK_SIZE);
        let start = u64::from(self.mapped_blkaddr) * bs;
        Some((start, start + u64::from(self.blocks) * bs))
    }
}

impl fmt::Debug for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceInfo")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("tag", &self.tag)
            .field("blocks", &self.blocks)
            .field("mapped_blkaddr", &self.mapped_blkaddr)
            .finish_non_exhaustive()
    }
}

/// Superblock values the table is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTableParams {
    pub primary_blocks: u32,
    /// Extra devices the image declares.
    pub on_disk_devices: u16,
    /// Byte address of the slot table on the primary device.
    pub slot_table_offset: u64,
    /// Let device id 0 resolve through the mapped windows of extra devices,
    /// and let out-of-window addresses of mapped devices fall back to the
    /// primary device.
    pub flat_addressing: bool,
}

/// Outcome of resolving a device-relative physical address.
#[derive(Clone)]
pub struct ResolvedDevice {
    pub device_id: DeviceId,
    pub device: Arc<dyn BlockDevice>,
    pub offset: u64,
}

impl fmt::Debug for ResolvedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedDevice")
            .field("device_id", &self.device_id)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

pub struct DeviceTable {
    primary: Arc<dyn BlockDevice>,
    primary_blocks: u32,
    devices: Vec<DeviceInfo>,
    device_id_mask: u16,
    total_blocks: u64,
    flat_addressing: bool,
}

impl DeviceTable {
    /// Build the table: check the device count, read one slot per extra
    /// device and open it. Devices opened before a failure are released
    /// before the error is returned.
    pub fn init(
        primary: Arc<dyn BlockDevice>,
        params: DeviceTableParams,
        paths: &[PathBuf],
        opener: &dyn DeviceOpener,
    ) -> Result<Self> {
        if usize::from(params.on_disk_devices) != paths.len() {
            error!(
                on_disk = params.on_disk_devices,
                given = paths.len(),
                "extra device count mismatch"
            );
            return Err(RofsError::DeviceCountMismatch {
                on_disk: params.on_disk_devices,
                given: paths.len(),
            });
        }

        let mut devices = Vec::with_capacity(paths.len());
        let mut total_blocks = u64::from(params.primary_blocks);
        let mut meta = MetaBuf::new();

        for (index, path) in paths.iter().enumerate() {
            let id = u16::try_from(index + 1)
                .map(DeviceId)
                .map_err(|_| RofsError::Internal("device id overflow".to_owned()))?;
            let pos = u64::try_from(index)
                .ok()
                .and_then(|index| device_slot_offset(params.slot_table_offset, index))
                .ok_or_else(|| RofsError::CorruptLayout {
                    block: 0,
                    detail: "device slot offset overflow".to_owned(),
                })?;

            #[allow(clippy::cast_possible_truncation)] // 128
            let raw = meta.map_range(primary.as_ref(), pos, ROFS_DEVT_SLOT_SIZE as usize)?;
            let slot = DeviceSlot::parse_from_bytes(raw)
                .map_err(|e| parse_error_to_rofs(&e, BlockNumber::containing(pos).0))?;

            let handle = opener.open(path)?;
            debug!(
                device_id = id.0,
                path = %path.display(),
                blocks = slot.blocks,
                mapped_blkaddr = slot.mapped_blkaddr,
                "opened extra device"
            );
            total_blocks += u64::from(slot.blocks);
            devices.push(DeviceInfo {
                id,
                path: path.clone(),
                tag: slot.tag,
                handle,
                blocks: slot.blocks,
                mapped_blkaddr: slot.mapped_blkaddr,
            });
        }
        meta.release();

        Ok(Self {
            primary,
            primary_blocks: params.primary_blocks,
            device_id_mask: device_id_mask(devices.len()),
            devices,
            total_blocks,
            flat_addressing: params.flat_addressing,
        })
    }

    /// A table with only the primary device.
    #[must_use]
    pub fn primary_only(primary: Arc<dyn BlockDevice>, primary_blocks: u32) -> Self {
        Self {
            primary,
            primary_blocks,
            devices: Vec::new(),
            device_id_mask: 0,
            total_blocks: u64::from(primary_blocks),
            flat_addressing: false,
        }
    }

    /// Map `(device_id, physical)` onto a concrete device and offset.
    pub fn resolve(&self, device_id: DeviceId, physical: u64) -> Result<ResolvedDevice> {
        if device_id.is_primary() {
            if self.flat_addressing {
                if let Some(hit) = self.devices.iter().find_map(|dev| {
                    let (start, end) = dev.mapped_window()?;
                    (start..end).contains(&physical).then(|| ResolvedDevice {
                        device_id: dev.id,
                        device: Arc::clone(&dev.handle),
                        offset: physical - start,
                    })
                }) {
                    trace!(device_id = hit.device_id.0, physical, "flat address in mapped window");
                    return Ok(hit);
                }
            }
            return Ok(self.primary_at(physical));
        }

        let Some(dev) = self.device(device_id) else {
            error!(device_id = device_id.0, "chunk references unknown device");
            return Err(RofsError::UnknownDevice(device_id.0));
        };

        let Some((start, end)) = dev.mapped_window() else {
            return Ok(ResolvedDevice {
                device_id,
                device: Arc::clone(&dev.handle),
                offset: physical,
            });
        };

        if (start..end).contains(&physical) {
            return Ok(ResolvedDevice {
                device_id,
                device: Arc::clone(&dev.handle),
                offset: physical - start,
            });
        }

        if self.flat_addressing {
            debug!(
                device_id = device_id.0,
                physical, "address outside mapped window, using primary device"
            );
            return Ok(self.primary_at(physical));
        }

        error!(
            device_id = device_id.0,
            physical,
            window_start = start,
            window_end = end,
            "address outside the device's mapped window"
        );
        Err(RofsError::CorruptLayout {
            block: physical / u64::from(ROFS_BLOCK_SIZE),
            detail: format!(
                "address {physical} outside mapped window [{start}, {end}) of device {}",
                device_id.0
            ),
        })
    }

    fn primary_at(&self, physical: u64) -> ResolvedDevice {
        ResolvedDevice {
            device_id: DeviceId::PRIMARY,
            device: Arc::clone(&self.primary),
            offset: physical,
        }
    }

    #[must_use]
    pub fn device(&self, id: DeviceId) -> Option<&DeviceInfo> {
        let index = usize::from(id.0).checked_sub(1)?;
        self.devices.get(index)
    }

    #[must_use]
    pub fn primary(&self) -> &Arc<dyn BlockDevice> {
        &self.primary
    }

    #[must_use]
    pub fn primary_blocks(&self) -> u32 {
        self.primary_blocks
    }

    #[must_use]
    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    /// Mask applied to device ids decoded from chunk-index entries.
    #[must_use]
    pub fn device_id_mask(&self) -> u16 {
        self.device_id_mask
    }

    /// Primary plus all extra device blocks.
    #[must_use]
    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    #[must_use]
    pub fn flat_addressing(&self) -> bool {
        self.flat_addressing
    }
}

impl Drop for DeviceTable {
    fn drop(&mut self) {
        for dev in self.devices.drain(..) {
            trace!(device_id = dev.id.0, path = %dev.path.display(), "releasing extra device");
        }
    }
}

impl fmt::Debug for DeviceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceTable")
            .field("primary_blocks", &self.primary_blocks)
            .field("devices", &self.devices)
            .field("device_id_mask", &self.device_id_mask)
            .field("total_blocks", &self.total_blocks)
            .field("flat_addressing", &self.flat_addressing)
            .finish_non_exhaustive()
    }
}

/// Smallest all-ones mask covering every id in `0..=extra`.
#[must_use]
pub fn device_id_mask(extra: usize) -> u16 {
    if extra == 0 {
        return 0;
    }
    let covering = (extra + 1).next_power_of_two() - 1;
    u16::try_from(covering).unwrap_or(u16::MAX)
}

#![doc = include_str!("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

pub mod error;
mod internal;
mod layout;
pub mod platform;

extern crate alloc;

use crate::error::Error;
use crate::layout::{BLOCK_HEADER_SIZE, LEN_UNWRITTEN, SECTOR_HEADER_SIZE};
use crate::platform::Nvm;
use core::fmt;

#[cfg(feature = "defmt")]
use defmt::trace;

/// A 16-bit item identifier. The high byte selects a category ("major id"),
/// the low byte an instance within it ("minor id"), so a whole category can
/// be enumerated with [`Pds::list`].
///
/// Usage: `ItemId::new(0xB0, 0x01)`
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ItemId(u16);

impl ItemId {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self(((major as u16) << 8) | minor as u16)
    }

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn major(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn minor(self) -> u8 {
        self.0 as u8
    }
}

impl From<u16> for ItemId {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({:#06x})", self.0)
    }
}

/// Placement of the storage region inside the flash address space. All fields
/// are fixed at construction time, nothing is runtime-negotiable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PdsConfig {
    /// First byte of the region, aligned to the erase granularity.
    pub base_address: u32,
    /// Number of sectors in the rotation ring, at least two.
    pub sector_count: u16,
    /// Bytes per sector, a multiple of the erase granularity.
    pub sector_size: u32,
}

/// What [`Pds::compact`] did.
#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CompactOutcome {
    /// Live records were migrated into the next sector of the ring.
    Compacted,
    /// The previous active sector's header was no longer readable, so a fresh
    /// sector was initialized instead and nothing was migrated.
    FreshSector,
}

/// Active-sector occupancy, as reported by [`Pds::usage`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Usage {
    pub live: u32,
    pub deleted: u32,
    pub reserved: u32,
    pub used_bytes: u32,
    pub free_bytes: u32,
    pub generation: u32,
}

/// The storage engine. Owns the flash back-end and the identity of the active
/// sector; everything else lives on flash and is re-scanned per operation.
///
/// All operations take `&mut self`: the engine assumes a single exclusive
/// caller, which the borrow checker enforces. Wrap the whole engine in a
/// mutex if several tasks need it.
pub struct Pds<T: Nvm> {
    pub(crate) flash: T,
    pub(crate) cfg: PdsConfig,
    pub(crate) active_sector: u16,
    pub(crate) generation: u32,
}

impl<T: Nvm> Pds<T> {
    /// Bring up the store: validate the region geometry, scan every sector
    /// header and select the one with the highest valid generation as active.
    /// A blank or unrecognizable region is reset to a single fresh sector at
    /// generation 1, so construction succeeds on a factory-new device.
    pub fn new(cfg: PdsConfig, flash: T) -> Result<Pds<T>, Error> {
        if T::WRITE_SIZE != 1 || T::READ_SIZE != 1 {
            return Err(Error::UnsupportedFlash);
        }
        if !(cfg.base_address as usize).is_multiple_of(T::ERASE_SIZE) {
            return Err(Error::InvalidRegionOffset);
        }
        if cfg.sector_size == 0 || !(cfg.sector_size as usize).is_multiple_of(T::ERASE_SIZE) {
            return Err(Error::InvalidRegionSize);
        }
        if (cfg.sector_size as usize) < SECTOR_HEADER_SIZE + BLOCK_HEADER_SIZE {
            return Err(Error::InvalidRegionSize);
        }
        if cfg.sector_count < 2 {
            return Err(Error::InvalidRegionSize);
        }

        let mut pds = Self {
            flash,
            cfg,
            active_sector: 0,
            generation: 0,
        };
        pds.load_sectors()?;
        Ok(pds)
    }

    /// Read the live item `id` into `buf` and return its payload length.
    ///
    /// Fails with [`Error::BufferTooSmall`] when the stored payload exceeds
    /// `buf`, [`Error::ItemCorrupted`] when the payload fails its checksum,
    /// and [`Error::ItemNotFound`] when no live record carries the id.
    /// Nothing useful is in `buf` on any error path.
    pub fn read(&mut self, id: ItemId, buf: &mut [u8]) -> Result<usize, Error> {
        #[cfg(feature = "defmt")]
        trace!("read: id {:#06x}", id.raw());

        self.read_item(id, buf)
    }

    /// Append a new item to the active sector.
    ///
    /// Items are immutable once written. A live record with the same id makes
    /// this fail with [`Error::ItemExists`]: delete it first, there is no
    /// implicit update. [`Error::StorageFull`] means the active sector has no
    /// room left; [`compact`](Self::compact) and retry.
    pub fn write(&mut self, id: ItemId, data: &[u8]) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("write: id {:#06x} len {}", id.raw(), data.len());

        if id.raw() == 0x0000 || id.raw() == LEN_UNWRITTEN {
            return Err(Error::InvalidItemId);
        }
        if data.len() > self.max_item_len() {
            return Err(Error::ValueTooLong);
        }
        self.write_item(id, data)
    }

    /// Mark the live item `id` as deleted.
    ///
    /// A single in-place status write; the payload bytes stay on flash until
    /// the next compaction drops them.
    pub fn delete(&mut self, id: ItemId) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("delete: id {:#06x}", id.raw());

        self.delete_item(id)
    }

    /// Collect the ids of every live item in the category `major` into `out`,
    /// in scan order, and return how many were found. Collection stops when
    /// `out` is full. Returns 0 on any flash error.
    pub fn list(&mut self, major: u8, out: &mut [ItemId]) -> usize {
        #[cfg(feature = "defmt")]
        trace!("list: major {:#04x}", major);

        self.list_items(major, out)
    }

    /// Whether a live item with the given id exists. The [`read`](Self::read)
    /// scan without the payload copy.
    pub fn contains(&mut self, id: ItemId) -> Result<bool, Error> {
        self.item_exists(id)
    }

    /// Factory reset: erase every sector and start over with a fresh sector 0
    /// at generation 1.
    pub fn delete_all(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("delete_all");

        self.format()
    }

    /// Reclaim the space held by deleted and corrupt records by migrating the
    /// live ones into the next sector of the ring, which then becomes active.
    ///
    /// The old sector stays authoritative until the new header is finalized,
    /// so a power loss anywhere in here loses no committed data. This is the
    /// only operation that shrinks the live-data footprint.
    pub fn compact(&mut self) -> Result<CompactOutcome, Error> {
        self.compact_sector()
    }

    /// Occupancy of the active sector. Diagnostics only.
    pub fn usage(&mut self) -> Result<Usage, Error> {
        self.scan_usage()
    }

    /// Index of the sector currently accepting writes.
    pub fn active_sector(&self) -> u16 {
        self.active_sector
    }

    /// Largest payload a single item can carry with this geometry.
    pub fn max_item_len(&self) -> usize {
        let capacity = self.cfg.sector_size as usize - SECTOR_HEADER_SIZE - BLOCK_HEADER_SIZE;
        capacity.min(LEN_UNWRITTEN as usize - 1)
    }
}

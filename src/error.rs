use thiserror::Error;

/// Errors that can occur during storage operations. The list is likely to stay as is but marked
/// as non-exhaustive to allow for future additions without breaking the API. Flash-level failures
/// keep their operation kind so callers can tell a failed erase from a failed program cycle.
#[derive(Error, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The region base address has to be aligned to the flash erase granularity.
    #[error("invalid region offset")]
    InvalidRegionOffset,

    /// The sector size has to be a nonzero multiple of the erase granularity, and the region
    /// needs at least two sectors so compaction always has a shadow slot.
    #[error("invalid region size")]
    InvalidRegionSize,

    /// The back-end must offer single-byte read and write granularity.
    #[error("unsupported flash back-end")]
    UnsupportedFlash,

    /// Item ids `0x0000` and `0xFFFF` are reserved; the latter is indistinguishable
    /// from erased flash.
    #[error("invalid item id")]
    InvalidItemId,

    /// Reading from the flash back-end failed.
    #[error("flash read failed")]
    FlashRead,

    /// Programming the flash back-end failed.
    #[error("flash write failed")]
    FlashWrite,

    /// Erasing a flash sector failed.
    #[error("flash erase failed")]
    FlashErase,

    /// No live item with the requested id exists in the active sector.
    #[error("item not found")]
    ItemNotFound,

    /// A live item with the same id already exists. Updates are never implicit:
    /// delete the old item first.
    #[error("item already exists")]
    ItemExists,

    /// The stored payload failed its checksum.
    #[error("item checksum mismatch")]
    ItemCorrupted,

    /// The caller buffer is smaller than the stored payload.
    #[error("buffer too small")]
    BufferTooSmall,

    /// The active sector has no room left for the item. Compact and retry.
    #[error("storage full")]
    StorageFull,

    /// The payload cannot fit even an empty sector, so compacting would not help.
    #[error("value too long")]
    ValueTooLong,

    /// The record chain is structurally damaged. There is no partial repair;
    /// only [`delete_all`](crate::Pds::delete_all) recovers the region.
    #[error("corrupted sector")]
    CorruptedSector,
}

//! On-flash layout: sector and block headers with explicit serialization.
//!
//! All multi-byte fields are little-endian. Nothing in here touches the
//! flash; the engine reads raw byte arrays and hands them to `from_bytes`.

use crc::{CRC_16_XMODEM, Crc};

/// Magic leading every initialized sector. Anything else means the sector
/// does not belong to us.
pub(crate) const SECTOR_SIGNATURE: [u8; 6] = *b"$PDS1$";

pub(crate) const SECTOR_HEADER_SIZE: usize = 11;
pub(crate) const BLOCK_HEADER_SIZE: usize = 7;

/// Byte offset of the status field inside a serialized sector header.
pub(crate) const SECTOR_STATUS_OFFSET: usize = 10;
/// Byte offset of the status field inside a serialized block header.
pub(crate) const BLOCK_STATUS_OFFSET: usize = 4;

/// The sector is authoritative. Any other status value means it is not.
pub(crate) const SECTOR_VALID: u8 = 0x00;
/// Written into a shadow sector before the copy phase of compaction and
/// finalized to [`SECTOR_VALID`] only once every live record has landed.
pub(crate) const SECTOR_PROVISIONAL: u8 = 0xFE;

/// `len` value of a block header slot that was never written.
pub(crate) const LEN_UNWRITTEN: u16 = 0xFFFF;

// Record status transitions only ever clear bits, as NOR programming demands.
// Set while the record is reserved but not yet committed; activation clears it.
const RSB_RESERVED: u8 = 0x80;
// Set while the record is live; deletion clears it.
const RSB_LIVE: u8 = 0x20;

pub(crate) const STATUS_RESERVED: u8 = 0xFF;
pub(crate) const STATUS_ACTIVE: u8 = STATUS_RESERVED & !RSB_RESERVED;
pub(crate) const STATUS_DELETED: u8 = STATUS_ACTIVE & !RSB_LIVE;

const _: () = assert!(STATUS_ACTIVE == 0x7F && STATUS_DELETED == 0x5F);

const PAYLOAD_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

pub(crate) fn payload_crc(data: &[u8]) -> u16 {
    PAYLOAD_CRC.checksum(data)
}

/// The status byte decoded exactly once per header read. Call sites never
/// re-derive bitmask logic.
#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum RecordState {
    /// Header written, payload possibly incomplete. Skipped everywhere.
    Reserved,
    /// Committed and not deleted.
    Active,
    /// Deleted in place; space is reclaimed at the next compaction.
    Deleted,
}

impl RecordState {
    pub(crate) fn from_status(status: u8) -> Self {
        if status & RSB_RESERVED != 0 {
            RecordState::Reserved
        } else if status & RSB_LIVE != 0 {
            RecordState::Active
        } else {
            RecordState::Deleted
        }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) struct SectorHeader {
    pub(crate) signature: [u8; 6],
    pub(crate) number: u32,
    pub(crate) status: u8,
}

impl SectorHeader {
    pub(crate) fn new(number: u32, status: u8) -> Self {
        Self {
            signature: SECTOR_SIGNATURE,
            number,
            status,
        }
    }

    /// A sector counts only while it carries the signature and a valid status.
    pub(crate) fn is_authoritative(&self) -> bool {
        self.signature == SECTOR_SIGNATURE && self.status == SECTOR_VALID
    }

    pub(crate) fn to_bytes(&self) -> [u8; SECTOR_HEADER_SIZE] {
        let mut raw = [0u8; SECTOR_HEADER_SIZE];
        raw[..6].copy_from_slice(&self.signature);
        raw[6..10].copy_from_slice(&self.number.to_le_bytes());
        raw[10] = self.status;
        raw
    }

    pub(crate) fn from_bytes(raw: &[u8; SECTOR_HEADER_SIZE]) -> Self {
        let mut signature = [0u8; 6];
        signature.copy_from_slice(&raw[..6]);
        Self {
            signature,
            number: u32::from_le_bytes([raw[6], raw[7], raw[8], raw[9]]),
            status: raw[10],
        }
    }
}

/// Per-record metadata preceding each payload in a sector.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) struct BlockHeader {
    pub(crate) id: u16,
    pub(crate) len: u16,
    pub(crate) status: u8,
    pub(crate) crc: u16,
}

impl BlockHeader {
    /// The header as first written, before the payload lands and the record
    /// is committed.
    pub(crate) fn reserved(id: u16, len: u16, crc: u16) -> Self {
        Self {
            id,
            len,
            status: STATUS_RESERVED,
            crc,
        }
    }

    pub(crate) fn state(&self) -> RecordState {
        RecordState::from_status(self.status)
    }

    pub(crate) fn major(&self) -> u8 {
        (self.id >> 8) as u8
    }

    pub(crate) fn to_bytes(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut raw = [0u8; BLOCK_HEADER_SIZE];
        raw[..2].copy_from_slice(&self.id.to_le_bytes());
        raw[2..4].copy_from_slice(&self.len.to_le_bytes());
        raw[4] = self.status;
        raw[5..7].copy_from_slice(&self.crc.to_le_bytes());
        raw
    }

    pub(crate) fn from_bytes(raw: &[u8; BLOCK_HEADER_SIZE]) -> Self {
        Self {
            id: u16::from_le_bytes([raw[0], raw[1]]),
            len: u16::from_le_bytes([raw[2], raw[3]]),
            status: raw[4],
            crc: u16::from_le_bytes([raw[5], raw[6]]),
        }
    }
}

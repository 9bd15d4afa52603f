use crate::error::Error;
use crate::layout::{
    BLOCK_HEADER_SIZE, BLOCK_STATUS_OFFSET, BlockHeader, LEN_UNWRITTEN, RecordState,
    SECTOR_HEADER_SIZE, SECTOR_PROVISIONAL, SECTOR_STATUS_OFFSET, SECTOR_VALID, STATUS_ACTIVE,
    STATUS_DELETED, SectorHeader, payload_crc,
};
use crate::platform::Nvm;
use crate::{CompactOutcome, ItemId, Pds, Usage};
use alloc::vec;
#[cfg(feature = "defmt")]
use defmt::trace;

/// Forward walk over one sector's record chain.
pub(crate) struct RecordCursor {
    offset: u32,
    end: u32,
}

pub(crate) struct Record {
    pub(crate) header: BlockHeader,
    pub(crate) header_offset: u32,
    pub(crate) payload_offset: u32,
}

pub(crate) enum ScanStep {
    Record(Record),
    /// A header slot with the unwritten length sentinel. `blank` tells whether
    /// the whole slot still reads erased, i.e. whether it can take an append.
    Sentinel { offset: u32, blank: bool },
    /// Not even a header fits before the sector end.
    Bounds,
}

impl RecordCursor {
    fn new(base: u32, sector_size: u32) -> Self {
        Self {
            offset: base + SECTOR_HEADER_SIZE as u32,
            end: base + sector_size,
        }
    }

    pub(crate) fn step<T: Nvm>(&mut self, flash: &mut T) -> Result<ScanStep, Error> {
        if self.offset + BLOCK_HEADER_SIZE as u32 > self.end {
            return Ok(ScanStep::Bounds);
        }

        let mut raw = [0u8; BLOCK_HEADER_SIZE];
        flash
            .read(self.offset, &mut raw)
            .map_err(|_| Error::FlashRead)?;
        let header = BlockHeader::from_bytes(&raw);

        if header.len == LEN_UNWRITTEN {
            return Ok(ScanStep::Sentinel {
                offset: self.offset,
                blank: raw.iter().all(|&b| b == 0xFF),
            });
        }

        let header_offset = self.offset;
        let payload_offset = header_offset + BLOCK_HEADER_SIZE as u32;
        let next = payload_offset + header.len as u32;
        if next > self.end {
            // a record claiming to run past the sector cannot be walked over
            return Err(Error::CorruptedSector);
        }
        self.offset = next;

        Ok(ScanStep::Record(Record {
            header,
            header_offset,
            payload_offset,
        }))
    }
}

impl<T: Nvm> Pds<T> {
    pub(crate) fn sector_base(&self, sector: u16) -> u32 {
        self.cfg.base_address + sector as u32 * self.cfg.sector_size
    }

    fn sector_end(&self, sector: u16) -> u32 {
        self.sector_base(sector) + self.cfg.sector_size
    }

    fn cursor(&self, sector: u16) -> RecordCursor {
        RecordCursor::new(self.sector_base(sector), self.cfg.sector_size)
    }

    fn read_sector_header(&mut self, sector: u16) -> Result<SectorHeader, Error> {
        let mut raw = [0u8; SECTOR_HEADER_SIZE];
        self.flash
            .read(self.sector_base(sector), &mut raw)
            .map_err(|_| Error::FlashRead)?;
        Ok(SectorHeader::from_bytes(&raw))
    }

    fn erase_sector(&mut self, sector: u16) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_sector: {}", sector);

        self.flash
            .erase(self.sector_base(sector), self.sector_end(sector))
            .map_err(|_| Error::FlashErase)
    }

    fn set_record_status(&mut self, header_offset: u32, status: u8) -> Result<(), Error> {
        self.flash
            .write(header_offset + BLOCK_STATUS_OFFSET as u32, &[status])
            .map_err(|_| Error::FlashWrite)
    }

    /// Pick the sector with the strictly highest valid generation, or reset
    /// the whole region when none qualifies.
    pub(crate) fn load_sectors(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("load_sectors");

        let mut best: Option<(u16, u32)> = None;
        for sector in 0..self.cfg.sector_count {
            let header = self.read_sector_header(sector)?;
            if !header.is_authoritative() {
                continue;
            }

            #[cfg(feature = "debug-logs")]
            println!("  pds: sector {sector} generation {}", header.number);

            match best {
                Some((_, number)) if header.number <= number => {}
                _ => best = Some((sector, header.number)),
            }
        }

        match best {
            Some((sector, number)) => {
                self.active_sector = sector;
                self.generation = number;
                Ok(())
            }
            None => self.format(),
        }
    }

    /// Erase every sector and start over at generation 1 in sector 0. Both the
    /// factory reset and the blank-device bootstrap path.
    pub(crate) fn format(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("format");

        #[cfg(feature = "debug-logs")]
        println!("  pds: format");

        for sector in 0..self.cfg.sector_count {
            self.erase_sector(sector)?;
        }

        let header = SectorHeader::new(1, SECTOR_VALID);
        self.flash
            .write(self.sector_base(0), &header.to_bytes())
            .map_err(|_| Error::FlashWrite)?;

        self.active_sector = 0;
        self.generation = 1;
        Ok(())
    }

    pub(crate) fn read_item(&mut self, id: ItemId, buf: &mut [u8]) -> Result<usize, Error> {
        let mut cursor = self.cursor(self.active_sector);
        loop {
            match cursor.step(&mut self.flash)? {
                ScanStep::Record(rec) => {
                    if rec.header.id != id.raw() || rec.header.state() != RecordState::Active {
                        continue;
                    }

                    let len = rec.header.len as usize;
                    if len > buf.len() {
                        return Err(Error::BufferTooSmall);
                    }
                    if len > 0 {
                        self.flash
                            .read(rec.payload_offset, &mut buf[..len])
                            .map_err(|_| Error::FlashRead)?;
                    }
                    if payload_crc(&buf[..len]) != rec.header.crc {
                        return Err(Error::ItemCorrupted);
                    }
                    return Ok(len);
                }
                _ => return Err(Error::ItemNotFound),
            }
        }
    }

    pub(crate) fn write_item(&mut self, id: ItemId, data: &[u8]) -> Result<(), Error> {
        let mut cursor = self.cursor(self.active_sector);
        let append_at = loop {
            match cursor.step(&mut self.flash)? {
                ScanStep::Record(rec) => {
                    if rec.header.id == id.raw() && rec.header.state() == RecordState::Active {
                        return Err(Error::ItemExists);
                    }
                }
                ScanStep::Sentinel { offset, blank } => {
                    if !blank {
                        // a torn header cannot be appended over; the chain is broken
                        return Err(Error::CorruptedSector);
                    }
                    break offset;
                }
                ScanStep::Bounds => return Err(Error::StorageFull),
            }
        };

        let end = self.sector_end(self.active_sector);
        if append_at + (BLOCK_HEADER_SIZE + data.len()) as u32 > end {
            return Err(Error::StorageFull);
        }

        #[cfg(feature = "debug-logs")]
        println!("  pds: append {:#06x} [{}] @{append_at:#06x}", id.raw(), data.len());

        // Two-phase commit: reserved header, payload, then a single status
        // write activates the record. A power loss in between leaves a
        // reserved record that every scan skips.
        let header = BlockHeader::reserved(id.raw(), data.len() as u16, payload_crc(data));
        self.flash
            .write(append_at, &header.to_bytes())
            .map_err(|_| Error::FlashWrite)?;
        if !data.is_empty() {
            self.flash
                .write(append_at + BLOCK_HEADER_SIZE as u32, data)
                .map_err(|_| Error::FlashWrite)?;
        }
        self.set_record_status(append_at, STATUS_ACTIVE)
    }

    pub(crate) fn delete_item(&mut self, id: ItemId) -> Result<(), Error> {
        let mut cursor = self.cursor(self.active_sector);
        loop {
            match cursor.step(&mut self.flash)? {
                ScanStep::Record(rec) => {
                    if rec.header.id == id.raw() && rec.header.state() == RecordState::Active {
                        return self.set_record_status(rec.header_offset, STATUS_DELETED);
                    }
                }
                _ => return Err(Error::ItemNotFound),
            }
        }
    }

    pub(crate) fn item_exists(&mut self, id: ItemId) -> Result<bool, Error> {
        let mut cursor = self.cursor(self.active_sector);
        loop {
            match cursor.step(&mut self.flash)? {
                ScanStep::Record(rec) => {
                    if rec.header.id == id.raw() && rec.header.state() == RecordState::Active {
                        return Ok(true);
                    }
                }
                _ => return Ok(false),
            }
        }
    }

    pub(crate) fn list_items(&mut self, major: u8, out: &mut [ItemId]) -> usize {
        let mut count = 0;
        let mut cursor = self.cursor(self.active_sector);
        while count < out.len() {
            match cursor.step(&mut self.flash) {
                Ok(ScanStep::Record(rec)) => {
                    if rec.header.state() == RecordState::Active && rec.header.major() == major {
                        out[count] = ItemId::from_raw(rec.header.id);
                        count += 1;
                    }
                }
                Ok(_) => break,
                Err(_) => return 0,
            }
        }
        count
    }

    /// Migrate live records into the next sector of the ring. The shadow
    /// header stays provisional until the copy phase finishes, so the old
    /// sector remains authoritative across a power loss at any point here.
    pub(crate) fn compact_sector(&mut self) -> Result<CompactOutcome, Error> {
        let source = self.active_sector;
        let shadow = (source + 1) % self.cfg.sector_count;

        #[cfg(feature = "defmt")]
        trace!("compact: {} -> {}", source, shadow);

        self.erase_sector(shadow)?;

        let source_header = self.read_sector_header(source)?;
        let shadow_base = self.sector_base(shadow);

        if !source_header.is_authoritative() {
            // nothing trustworthy to migrate, start the ring over
            let header = SectorHeader::new(1, SECTOR_VALID);
            self.flash
                .write(shadow_base, &header.to_bytes())
                .map_err(|_| Error::FlashWrite)?;
            self.active_sector = shadow;
            self.generation = 1;
            return Ok(CompactOutcome::FreshSector);
        }

        let number = source_header.number + 1;
        let provisional = SectorHeader::new(number, SECTOR_PROVISIONAL);
        self.flash
            .write(shadow_base, &provisional.to_bytes())
            .map_err(|_| Error::FlashWrite)?;

        let mut write_at = shadow_base + SECTOR_HEADER_SIZE as u32;
        let mut cursor = self.cursor(source);
        loop {
            match cursor.step(&mut self.flash)? {
                ScanStep::Record(rec) => {
                    if rec.header.state() != RecordState::Active {
                        #[cfg(feature = "debug-logs")]
                        println!(
                            "  pds: drop {} record {:#06x}",
                            rec.header.state(),
                            rec.header.id
                        );
                        continue;
                    }

                    let len = rec.header.len as usize;
                    let mut payload = vec![0u8; len];
                    if len > 0 {
                        self.flash
                            .read(rec.payload_offset, &mut payload)
                            .map_err(|_| Error::FlashRead)?;
                    }
                    if payload_crc(&payload) != rec.header.crc {
                        // failed records are reclaimed by omission
                        continue;
                    }

                    self.flash
                        .write(write_at, &rec.header.to_bytes())
                        .map_err(|_| Error::FlashWrite)?;
                    if !payload.is_empty() {
                        self.flash
                            .write(write_at + BLOCK_HEADER_SIZE as u32, &payload)
                            .map_err(|_| Error::FlashWrite)?;
                    }
                    write_at += (BLOCK_HEADER_SIZE + len) as u32;
                }
                _ => break,
            }
        }

        // the shadow sector becomes authoritative only with this final write
        self.flash
            .write(shadow_base + SECTOR_STATUS_OFFSET as u32, &[SECTOR_VALID])
            .map_err(|_| Error::FlashWrite)?;

        self.active_sector = shadow;
        self.generation = number;
        Ok(CompactOutcome::Compacted)
    }

    pub(crate) fn scan_usage(&mut self) -> Result<Usage, Error> {
        let mut usage = Usage {
            live: 0,
            deleted: 0,
            reserved: 0,
            used_bytes: SECTOR_HEADER_SIZE as u32,
            free_bytes: 0,
            generation: self.generation,
        };

        let end = self.sector_end(self.active_sector);
        let mut cursor = self.cursor(self.active_sector);
        loop {
            match cursor.step(&mut self.flash)? {
                ScanStep::Record(rec) => {
                    match rec.header.state() {
                        RecordState::Active => usage.live += 1,
                        RecordState::Deleted => usage.deleted += 1,
                        RecordState::Reserved => usage.reserved += 1,
                    }
                    usage.used_bytes += (BLOCK_HEADER_SIZE + rec.header.len as usize) as u32;
                }
                ScanStep::Sentinel { offset, .. } => {
                    usage.free_bytes = end - offset;
                    break;
                }
                ScanStep::Bounds => break,
            }
        }

        Ok(usage)
    }
}

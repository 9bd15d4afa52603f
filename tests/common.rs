#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use flash_pds::PdsConfig;
use std::cell::RefCell;
use std::rc::Rc;

pub const SECTOR_SIZE: usize = 4096;

// From the on-flash layout: 7-byte block header with the status byte at
// offset 4, records starting right after the 11-byte sector header.
pub const BLOCK_HEADER_SIZE: usize = 7;
pub const BLOCK_STATUS_OFFSET: usize = 4;
pub const SECTOR_HEADER_SIZE: usize = 11;

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

struct Inner {
    buf: Vec<u8>,
    fail_after_operation: usize,
    operations: Vec<Operation>,
}

/// In-memory NOR flash with operation recording and fault injection. The
/// handle is cloneable so a test can keep one while the store owns another,
/// inspecting or corrupting the raw bytes mid-run.
#[derive(Clone)]
pub struct Flash {
    inner: Rc<RefCell<Inner>>,
}

impl Flash {
    pub fn new(sectors: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                buf: vec![0xffu8; SECTOR_SIZE * sectors],
                fail_after_operation: usize::MAX,
                operations: vec![],
            })),
        }
    }

    pub fn new_with_fault(sectors: usize, fail_after_operation: usize) -> Self {
        let flash = Self::new(sectors);
        flash.fail_after(fail_after_operation);
        flash
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().buf.len()
    }

    /// Every flash operation from the given count on fails.
    pub fn fail_after(&self, operation: usize) {
        self.inner.borrow_mut().fail_after_operation = operation;
    }

    pub fn disable_faults(&self) {
        self.inner.borrow_mut().fail_after_operation = usize::MAX;
    }

    pub fn operation_count(&self) -> usize {
        self.inner.borrow().operations.len()
    }

    pub fn erases(&self) -> usize {
        self.inner
            .borrow()
            .operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.inner.borrow().operations {
            println!("  {:?}", op);
        }
    }

    pub fn peek(&self, offset: usize) -> u8 {
        self.inner.borrow().buf[offset]
    }

    /// Raw byte poke bypassing the NOR bit-clearing rule. Emulates external
    /// corruption, or rewinds a byte to a pre-write state for power-loss
    /// scenarios.
    pub fn poke(&self, offset: usize, value: u8) {
        self.inner.borrow_mut().buf[offset] = value;
    }

    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        self.inner
            .borrow()
            .buf
            .windows(needle.len())
            .position(|w| w == needle)
    }

    pub fn contains(&self, needle: &[u8]) -> bool {
        self.find(needle).is_some()
    }
}

pub fn config(sector_count: u16) -> PdsConfig {
    PdsConfig {
        base_address: 0,
        sector_count,
        sector_size: SECTOR_SIZE as u32,
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        if inner.operations.len() >= inner.fail_after_operation {
            return Err(FlashError);
        }
        inner.operations.push(Operation::Read {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        bytes.copy_from_slice(&inner.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.len()
    }
}

impl NorFlash for Flash {
    const WRITE_SIZE: usize = 1;

    const ERASE_SIZE: usize = SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as u32));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as u32));

        let mut inner = self.inner.borrow_mut();
        if inner.operations.len() >= inner.fail_after_operation {
            return Err(FlashError);
        }
        inner.operations.push(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        for addr in from..to {
            inner.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(!bytes.is_empty());

        let mut inner = self.inner.borrow_mut();
        if inner.operations.len() >= inner.fail_after_operation {
            return Err(FlashError);
        }
        inner.operations.push(Operation::Write {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        for (i, &val) in bytes.iter().enumerate() {
            // NOR programming can only clear bits
            inner.buf[offset + i] &= val;
        }
        Ok(())
    }
}

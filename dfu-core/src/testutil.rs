extern crate std;

use crate::bcb::{BcbCell, BootControlBlock};
use crate::flash::{FlashFault, FlashHal};
use crate::layout::{FlashRegion, Layout, SIGNATURE, SIGNATURE_OFFSET};
use std::vec;
use std::vec::Vec;

/// Small map: 4K staging in sectors 2-3, application in sectors 4-5.
pub fn test_layout() -> Layout {
    Layout::new(
        FlashRegion::new(0x0800_8000, 0x1000, &[2, 3]),
        FlashRegion::new(0x0800_9000, 0x2000, &[4, 5]),
        0x1000,
        SIGNATURE,
        SIGNATURE_OFFSET,
    )
}

/// NOR flash model: erase sets sectors to 0xFF, programming can only clear
/// bits, and every operation must happen while unlocked.
pub struct SimFlash {
    base: u32,
    mem: Vec<u8>,
    sectors: Vec<(u8, u32, u32)>,
    unlocked: bool,
    pending: Option<Result<(), FlashFault>>,
    pub erases: usize,
    pub fail_sector: Option<u8>,
    /// Byte that ignores programming.
    pub stuck_byte: Option<u32>,
}

impl SimFlash {
    pub fn new(layout: &Layout) -> Self {
        let base = layout.staging.base.min(layout.application.base);
        let end = layout.staging.end().max(layout.application.end());
        let mut sectors = Vec::new();
        for region in [&layout.staging, &layout.application] {
            let size = region.size / region.sectors.len() as u32;
            for (i, &id) in region.sectors.iter().enumerate() {
                sectors.push((id, region.base + i as u32 * size, size));
            }
        }
        Self {
            base,
            mem: vec![0xFF; (end - base) as usize],
            sectors,
            unlocked: false,
            pending: None,
            erases: 0,
            fail_sector: None,
            stuck_byte: None,
        }
    }

    pub fn bytes(&self, address: u32, len: usize) -> &[u8] {
        let at = (address - self.base) as usize;
        &self.mem[at..at + len]
    }

    /// Writes memory directly, as a debugger would.
    pub fn poke(&mut self, address: u32, bytes: &[u8]) {
        let at = (address - self.base) as usize;
        self.mem[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Places a valid application with matching trailer.
    pub fn install_application(&mut self, layout: &Layout, image: &[u8], checksum: u32) {
        self.poke(layout.application.base, image);
        self.poke(layout.length_address(), &(image.len() as u32).to_le_bytes());
        self.poke(layout.checksum_address(), &checksum.to_le_bytes());
    }

    fn write(&mut self, address: u32, bytes: &[u8]) {
        assert!(self.unlocked, "program while locked");
        for (i, &byte) in bytes.iter().enumerate() {
            let addr = address + i as u32;
            if self.stuck_byte == Some(addr) {
                continue;
            }
            let at = (addr - self.base) as usize;
            self.mem[at] &= byte;
        }
        self.pending = Some(Ok(()));
    }
}

impl FlashHal for SimFlash {
    fn unlock(&mut self) {
        self.unlocked = true;
    }

    fn lock(&mut self) {
        self.unlocked = false;
    }

    fn start_sector_erase(&mut self, sector: u8) {
        assert!(self.unlocked, "erase while locked");
        self.erases += 1;
        if self.fail_sector == Some(sector) {
            self.pending = Some(Err(FlashFault::Status(0x80)));
            return;
        }
        let &(_, start, size) = self
            .sectors
            .iter()
            .find(|(id, _, _)| *id == sector)
            .expect("unknown sector");
        let at = (start - self.base) as usize;
        self.mem[at..at + size as usize].fill(0xFF);
        self.pending = Some(Ok(()));
    }

    fn program_word(&mut self, address: u32, word: u32) {
        assert_eq!(address % 4, 0, "unaligned word program");
        self.write(address, &word.to_le_bytes());
    }

    fn program_byte(&mut self, address: u32, byte: u8) {
        self.write(address, &[byte]);
    }

    fn wait_complete(&mut self, _timeout_ms: u32) -> Result<(), FlashFault> {
        self.pending.take().unwrap_or(Err(FlashFault::Timeout))
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) {
        buf.copy_from_slice(self.bytes(address, buf.len()));
    }
}

/// Deterministic image of `len` bytes carrying the layout's signature.
pub fn image(layout: &Layout, len: usize) -> Vec<u8> {
    let mut data: Vec<u8> = (0..len).map(|i| (i * 31 + 7) as u8).collect();
    let sig = layout.signature_offset as usize;
    data[sig..sig + 4].copy_from_slice(&layout.signature.to_le_bytes());
    data
}

#[derive(Default)]
pub struct Cell(pub BootControlBlock);

impl BcbCell for Cell {
    fn load(&mut self) -> BootControlBlock {
        self.0
    }

    fn store(&mut self, bcb: &BootControlBlock) {
        self.0 = *bcb;
    }
}

//! Erase/program sequencing over a raw flash controller.
//!
//! Every elementary operation runs inside its own unlock/lock cycle held by
//! [`Unlocked`], so an early return can never leave the controller unlocked.

use crate::error::FlashError;
use crate::layout::{FlashRegion, WORD};

/// Why an erase or program operation did not complete.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashFault {
    Timeout,
    /// Controller error flags, as read from the status register.
    Status(u32),
}

/// Raw flash controller.
///
/// `start_*` and `program_*` only launch an operation; completion is
/// reported by [`FlashHal::wait_complete`].
pub trait FlashHal {
    fn unlock(&mut self);
    fn lock(&mut self);
    fn start_sector_erase(&mut self, sector: u8);
    fn program_word(&mut self, address: u32, word: u32);
    fn program_byte(&mut self, address: u32, byte: u8);
    fn wait_complete(&mut self, timeout_ms: u32) -> Result<(), FlashFault>;
    fn read(&mut self, address: u32, buf: &mut [u8]);
}

struct Unlocked<'a, F: FlashHal>(&'a mut F);

impl<'a, F: FlashHal> Unlocked<'a, F> {
    fn acquire(hal: &'a mut F) -> Self {
        hal.unlock();
        Self(hal)
    }
}

impl<F: FlashHal> Drop for Unlocked<'_, F> {
    fn drop(&mut self) {
        self.0.lock();
    }
}

enum Unit {
    Word(u32),
    Byte(u8),
}

pub struct FlashDriver<F> {
    hal: F,
    timeout_ms: u32,
}

impl<F: FlashHal> FlashDriver<F> {
    pub fn new(hal: F, timeout_ms: u32) -> Self {
        Self { hal, timeout_ms }
    }

    pub fn hal(&self) -> &F {
        &self.hal
    }

    pub fn release(self) -> F {
        self.hal
    }

    /// Erases `sectors` in order, stopping at the first one that fails.
    pub fn erase(&mut self, sectors: &[u8]) -> Result<(), FlashError> {
        for &sector in sectors {
            let flash = Unlocked::acquire(&mut self.hal);
            flash.0.start_sector_erase(sector);
            flash
                .0
                .wait_complete(self.timeout_ms)
                .map_err(|fault| FlashError::EraseFailed { sector, fault })?;
            debug!("erased sector {}", sector);
        }
        Ok(())
    }

    pub fn erase_region(&mut self, region: &FlashRegion) -> Result<(), FlashError> {
        self.erase(region.sectors)
    }

    /// Programs `data` at `address`: single bytes up to the first word
    /// boundary, whole words for the bulk, single bytes for the tail.
    ///
    /// Stops at the first unit that fails; units already written stay written.
    pub fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        let mut address = address;
        let head = (address.wrapping_neg() % WORD) as usize;
        let (head, body) = data.split_at(head.min(data.len()));

        for &byte in head {
            self.program_unit(address, Unit::Byte(byte))?;
            address += 1;
        }

        let mut words = body.chunks_exact(WORD as usize);
        for chunk in &mut words {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.program_unit(address, Unit::Word(word))?;
            address += WORD;
        }

        for &byte in words.remainder() {
            self.program_unit(address, Unit::Byte(byte))?;
            address += 1;
        }
        Ok(())
    }

    /// Programs `data` at `offset` inside `region`, refusing writes that
    /// would spill past its end.
    pub fn program_region(
        &mut self,
        region: &FlashRegion,
        offset: u32,
        data: &[u8],
    ) -> Result<(), FlashError> {
        let address = region.address(offset, len_u32(data.len()))?;
        self.program(address, data)
    }

    pub fn read_region(
        &mut self,
        region: &FlashRegion,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<(), FlashError> {
        let address = region.address(offset, len_u32(buf.len()))?;
        self.hal.read(address, buf);
        Ok(())
    }

    pub fn read_u32(&mut self, address: u32) -> u32 {
        let mut word = [0u8; 4];
        self.hal.read(address, &mut word);
        u32::from_le_bytes(word)
    }

    fn program_unit(&mut self, address: u32, unit: Unit) -> Result<(), FlashError> {
        let flash = Unlocked::acquire(&mut self.hal);
        match unit {
            Unit::Word(word) => flash.0.program_word(address, word),
            Unit::Byte(byte) => flash.0.program_byte(address, byte),
        }
        flash
            .0
            .wait_complete(self.timeout_ms)
            .map_err(|fault| FlashError::ProgramFailed { address, fault })
    }
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

//! STM32F4 embedded flash controller.

use core::ptr;

use dfu_core::flash::{FlashFault, FlashHal};
use stm32f4::stm32f411::FLASH;

use crate::time::Deadline;

const KEY1: u32 = 0x4567_0123;
const KEY2: u32 = 0xCDEF_89AB;

/// Program parallelism field values.
const PSIZE_X8: u8 = 0b00;
const PSIZE_X32: u8 = 0b10;

pub struct Stm32Flash {
    flash: FLASH,
    erasing: bool,
}

impl Stm32Flash {
    pub fn new(flash: FLASH) -> Self {
        Self {
            flash,
            erasing: false,
        }
    }

    fn busy(&self) -> bool {
        self.flash.sr().read().bsy().bit_is_set()
    }

    /// Clears sticky status left over from an earlier operation.
    fn clear_status(&mut self) {
        // Status flags clear on a written one.
        let sr = self.flash.sr().read().bits();
        self.flash.sr().write(|w| unsafe { w.bits(sr) });
    }

    /// Erased sectors may still sit in the data cache.
    fn flush_data_cache(&mut self) {
        let enabled = self.flash.acr().read().dcen().bit_is_set();
        self.flash.acr().modify(|_, w| w.dcen().clear_bit());
        self.flash.acr().modify(|_, w| w.dcrst().set_bit());
        self.flash
            .acr()
            .modify(|_, w| w.dcrst().clear_bit().dcen().bit(enabled));
    }
}

impl FlashHal for Stm32Flash {
    fn unlock(&mut self) {
        if self.flash.cr().read().lock().bit_is_set() {
            self.flash.keyr().write(|w| unsafe { w.key().bits(KEY1) });
            self.flash.keyr().write(|w| unsafe { w.key().bits(KEY2) });
        }
        self.clear_status();
    }

    fn lock(&mut self) {
        self.flash.cr().modify(|_, w| w.lock().set_bit());
    }

    fn start_sector_erase(&mut self, sector: u8) {
        self.flash.cr().modify(|_, w| unsafe {
            w.pg()
                .clear_bit()
                .psize()
                .bits(PSIZE_X32)
                .ser()
                .set_bit()
                .snb()
                .bits(sector)
        });
        self.flash.cr().modify(|_, w| w.strt().set_bit());
        self.erasing = true;
    }

    fn program_word(&mut self, address: u32, word: u32) {
        self.flash.cr().modify(|_, w| unsafe {
            w.ser()
                .clear_bit()
                .psize()
                .bits(PSIZE_X32)
                .pg()
                .set_bit()
        });
        // SAFETY: `address` is a word-aligned flash address inside a region
        // checked by the caller; PG is set.
        unsafe { ptr::write_volatile(address as *mut u32, word) };
    }

    fn program_byte(&mut self, address: u32, byte: u8) {
        self.flash.cr().modify(|_, w| unsafe {
            w.ser()
                .clear_bit()
                .psize()
                .bits(PSIZE_X8)
                .pg()
                .set_bit()
        });
        // SAFETY: as in `program_word`.
        unsafe { ptr::write_volatile(address as *mut u8, byte) };
    }

    fn wait_complete(&mut self, timeout_ms: u32) -> Result<(), FlashFault> {
        let mut deadline = Deadline::after_ms(timeout_ms);
        while self.busy() {
            if deadline.expired() {
                return Err(FlashFault::Timeout);
            }
        }

        let sr = self.flash.sr().read();
        let failed = sr.operr().bit_is_set()
            || sr.wrperr().bit_is_set()
            || sr.pgaerr().bit_is_set()
            || sr.pgperr().bit_is_set()
            || sr.pgserr().bit_is_set()
            || sr.rderr().bit_is_set();
        self.flash
            .cr()
            .modify(|_, w| w.pg().clear_bit().ser().clear_bit());
        self.clear_status();
        if core::mem::take(&mut self.erasing) {
            self.flush_data_cache();
        }

        if failed {
            return Err(FlashFault::Status(sr.bits()));
        }
        Ok(())
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            // SAFETY: memory-mapped flash is always readable.
            *byte = unsafe { ptr::read_volatile((address as usize + i) as *const u8) };
        }
    }
}

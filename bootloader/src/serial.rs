//! USART2 on PA2 (TX) / PA3 (RX), 115200 8N1, polled.

use dfu_core::frame::{Transport, TransportError};
use stm32f4::stm32f411::{usart1, GPIOA, RCC, USART2};

use crate::time::{Deadline, CORE_HZ};

pub const BAUD: u32 = 115_200;

pub struct Usart2 {
    usart: USART2,
}

impl Usart2 {
    pub fn new(usart: USART2, gpioa: &GPIOA, rcc: &RCC) -> Self {
        rcc.ahb1enr().modify(|_, w| w.gpioaen().set_bit());
        rcc.apb1enr().modify(|_, w| w.usart2en().set_bit());

        gpioa
            .moder()
            .modify(|_, w| w.moder2().alternate().moder3().alternate());
        gpioa.afrl().modify(|_, w| w.afrl2().af7().afrl3().af7());

        // Oversampling by 16: BRR holds CORE_HZ / BAUD in 12.4 fixed point.
        let div = (CORE_HZ + BAUD / 2) / BAUD;
        usart.brr().write(|w| unsafe {
            w.div_mantissa()
                .bits((div >> 4) as u16)
                .div_fraction()
                .bits((div & 0xF) as u8)
        });
        usart
            .cr1()
            .write(|w| w.ue().set_bit().te().set_bit().re().set_bit());

        Self { usart }
    }

    /// Throws away anything received so far and clears error flags.
    fn drain(&mut self) {
        loop {
            let sr = self.usart.sr().read();
            if !(sr.rxne().bit_is_set() || Self::line_fault(&sr)) {
                break;
            }
            let _ = self.usart.dr().read().dr().bits();
        }
    }

    fn line_fault(sr: &usart1::sr::R) -> bool {
        sr.ore().bit_is_set() || sr.fe().bit_is_set() || sr.nf().bit_is_set()
    }
}

impl Transport for Usart2 {
    fn write(&mut self, bytes: &[u8], timeout_ms: u32) -> Result<(), TransportError> {
        let mut deadline = Deadline::after_ms(timeout_ms);
        for &byte in bytes {
            while self.usart.sr().read().txe().bit_is_clear() {
                if deadline.expired() {
                    return Err(TransportError::Timeout);
                }
            }
            self.usart
                .dr()
                .write(|w| unsafe { w.dr().bits(u16::from(byte)) });
        }
        while self.usart.sr().read().tc().bit_is_clear() {
            if deadline.expired() {
                return Err(TransportError::Timeout);
            }
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<(), TransportError> {
        let mut deadline = Deadline::after_ms(timeout_ms);
        for slot in buf.iter_mut() {
            loop {
                let sr = self.usart.sr().read();
                if Self::line_fault(&sr) {
                    self.drain();
                    return Err(TransportError::Fault);
                }
                if sr.rxne().bit_is_set() {
                    *slot = self.usart.dr().read().dr().bits() as u8;
                    break;
                }
                if deadline.expired() {
                    return Err(TransportError::Timeout);
                }
            }
        }
        Ok(())
    }

    fn discard_input(&mut self) {
        self.drain();
    }
}

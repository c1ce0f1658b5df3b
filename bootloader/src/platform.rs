//! Hand-over to the application and device reset.

use cortex_m::peripheral::{NVIC, SCB, SYST};
use dfu_core::platform::Platform;
use stm32f4::stm32f411::RCC;

pub struct CortexM {
    nvic: NVIC,
    scb: SCB,
    syst: SYST,
    rcc: RCC,
}

impl CortexM {
    pub fn new(nvic: NVIC, scb: SCB, syst: SYST, rcc: RCC) -> Self {
        Self {
            nvic,
            scb,
            syst,
            rcc,
        }
    }
}

impl Platform for CortexM {
    fn quiesce(&mut self) {
        cortex_m::interrupt::disable();

        self.syst.disable_counter();
        self.syst.disable_interrupt();
        self.syst.clear_current();

        // Put back what the bootloader brought up.
        self.rcc.apb1rstr().modify(|_, w| w.usart2rst().set_bit());
        self.rcc.apb1rstr().modify(|_, w| w.usart2rst().clear_bit());
        self.rcc.ahb1rstr().modify(|_, w| w.gpioarst().set_bit());
        self.rcc.ahb1rstr().modify(|_, w| w.gpioarst().clear_bit());
        self.rcc.apb1enr().modify(|_, w| w.usart2en().clear_bit());
        self.rcc.ahb1enr().modify(|_, w| w.gpioaen().clear_bit());

        for (icer, icpr) in self.nvic.icer.iter().zip(self.nvic.icpr.iter()) {
            // SAFETY: disabling and un-pending interrupts has no memory
            // safety impact.
            unsafe {
                icer.write(0xFFFF_FFFF);
                icpr.write(0xFFFF_FFFF);
            }
        }

        // SAFETY: interrupts are off; re-enabled by the application.
        unsafe { cortex_m::interrupt::enable() };
    }

    fn transfer_control(&mut self, vector_table: u32) -> ! {
        defmt::info!("jumping to {=u32:#010x}", vector_table);
        // SAFETY: the vector table was verified before the decision to jump.
        unsafe {
            self.scb.vtor.write(vector_table);
            cortex_m::asm::dsb();
            cortex_m::asm::isb();
            cortex_m::asm::bootload(vector_table as *const u32)
        }
    }

    fn system_reset(&mut self) -> ! {
        defmt::info!("resetting");
        SCB::sys_reset()
    }
}

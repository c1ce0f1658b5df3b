#![no_std]
#![no_main]

use cortex_m::peripheral::SCB;
use cortex_m_rt::entry;
use defmt_rtt as _;
use dfu_core::bcb::RamBcb;
use dfu_core::layout::{BCB_ADDRESS, STM32F411};
use dfu_core::{Bootloader, Config};
use panic_halt as _;
use stm32f4::stm32f411 as pac;

mod flash;
mod platform;
mod serial;
mod time;

use flash::Stm32Flash;
use platform::CortexM;
use serial::Usart2;

const CONFIG: Config = {
    let config = Config::new();
    #[cfg(feature = "crc16")]
    let config = config.with_checksum(dfu_core::Checksum::Crc16);
    #[cfg(feature = "deferred-promotion")]
    let config = config.with_promotion(dfu_core::PromotionPolicy::NextBoot);
    config
};

#[entry]
fn main() -> ! {
    let (Some(mut cp), Some(dp)) = (cortex_m::Peripherals::take(), pac::Peripherals::take())
    else {
        SCB::sys_reset()
    };

    time::start(&mut cp.SYST);
    defmt::info!("bootloader up");

    let serial = Usart2::new(dp.USART2, &dp.GPIOA, &dp.RCC);
    let flash = Stm32Flash::new(dp.FLASH);
    // SAFETY: memory.x leaves the top 16 bytes of SRAM out of RAM.
    let bcb = unsafe { RamBcb::new(BCB_ADDRESS) };
    let platform = CortexM::new(cp.NVIC, cp.SCB, cp.SYST, dp.RCC);

    Bootloader::new(serial, flash, bcb, platform, STM32F411, CONFIG).boot()
}

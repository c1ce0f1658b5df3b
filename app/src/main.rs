#![deny(warnings)]
#![no_main]
#![no_std]

use defmt_rtt as _;
use dfu_core::bcb::{BcbCell, BootControlBlock, RamBcb};
use dfu_core::layout::BCB_ADDRESS;
use panic_halt as _;

/// Asks the bootloader for DFU mode and resets into it.
pub fn request_dfu() -> ! {
    // SAFETY: memory.x keeps the boot control block out of RAM.
    let mut bcb = unsafe { RamBcb::new(BCB_ADDRESS) };
    bcb.store(&BootControlBlock::dfu_request());
    cortex_m::asm::dsb();

    cortex_m::peripheral::SCB::sys_reset();
}

/// One LED pulse: `on_ms` lit, then `off_ms` dark.
pub fn pulse(
    led: &mut impl embedded_hal::digital::OutputPin,
    delay: &mut impl embedded_hal::delay::DelayNs,
    on_ms: u32,
    off_ms: u32,
) {
    led.set_high().ok();
    delay.delay_ms(on_ms);
    led.set_low().ok();
    delay.delay_ms(off_ms);
}

#[rtic::app(device = stm32f4xx_hal::pac, peripherals = true)]
mod app {

    use fugit::MillisDurationU32;
    use stm32f4xx_hal::{
        gpio::{self, Edge, Input, Output, PushPull},
        pac::TIM1,
        prelude::*,
        rcc::Config,
        timer,
    };

    use crate::{pulse, request_dfu};

    const HEARTBEAT_PAUSE: MillisDurationU32 = MillisDurationU32::millis(2000);

    #[shared]
    struct Shared {
        pause: MillisDurationU32,
    }

    #[local]
    struct Local {
        button: gpio::PA0<Input>,
        led: gpio::PC13<Output<PushPull>>,
        delay: timer::DelayMs<TIM1>,
    }

    #[init]
    fn init(ctx: init::Context) -> (Shared, Local) {
        let mut dp = ctx.device;

        let rcc = dp.RCC.constrain();
        let mut rcc = rcc.freeze(Config::hse(25.MHz()));
        let delay = dp.TIM1.delay_ms(&mut rcc);

        // Blackpill STM32F411CEU6: LED on PC13, user button on PA0.
        let gpioc = dp.GPIOC.split(&mut rcc);
        let led = gpioc.pc13.into_push_pull_output();

        let gpioa: gpio::gpioa::Parts = dp.GPIOA.split(&mut rcc);
        let mut button = gpioa.pa0.into_pull_up_input();

        let mut syscfg = dp.SYSCFG.constrain(&mut rcc);
        button.make_interrupt_source(&mut syscfg);
        button.trigger_on_edge(&mut dp.EXTI, Edge::Rising);
        button.enable_interrupt(&mut dp.EXTI);

        defmt::info!("app running, press the button for DFU");

        (
            Shared {
                pause: HEARTBEAT_PAUSE,
            },
            Local { button, led, delay },
        )
    }

    // Heartbeat: two short blinks, then a long one.
    #[idle(local = [led, delay], shared = [pause])]
    fn idle(mut ctx: idle::Context) -> ! {
        let led = ctx.local.led;
        let delay = ctx.local.delay;
        loop {
            pulse(led, delay, 150, 50);
            pulse(led, delay, 150, 50);
            let pause = ctx.shared.pause.lock(|pause| pause.ticks());
            pulse(led, delay, pause, 0);
        }
    }

    #[task(binds = EXTI0, local = [button])]
    fn button_pressed(ctx: button_pressed::Context) {
        ctx.local.button.clear_interrupt_pending_bit();
        defmt::info!("button pressed, rebooting into DFU");
        request_dfu();
    }
}

//! Millisecond deadlines on SysTick.
//!
//! SysTick wraps once per millisecond; deadlines poll its COUNTFLAG, so at
//! most one deadline may be live at a time.

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SYST;

/// Core clock out of reset (HSI).
pub const CORE_HZ: u32 = 16_000_000;

const COUNTFLAG: u32 = 1 << 16;

pub fn start(syst: &mut SYST) {
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(CORE_HZ / 1_000 - 1);
    syst.clear_current();
    syst.enable_counter();
}

pub struct Deadline {
    remaining: u32,
}

impl Deadline {
    pub fn after_ms(ms: u32) -> Self {
        // Drop a wrap that happened before the deadline existed.
        let _ = wrapped();
        Self { remaining: ms }
    }

    pub fn expired(&mut self) -> bool {
        if wrapped() {
            self.remaining = self.remaining.saturating_sub(1);
        }
        self.remaining == 0
    }
}

fn wrapped() -> bool {
    // SAFETY: read-only access; reading CSR clears COUNTFLAG, which only
    // deadlines observe.
    let csr = unsafe { (*SYST::PTR).csr.read() };
    csr & COUNTFLAG != 0
}

//! Boot decision engine: runs once per reset and ends in either a jump to
//! the application or a full device reset.

use crate::bcb::{self, BcbCell, BootControlBlock, BootRequest};
use crate::config::{Config, PromotionPolicy};
use crate::error::Error;
use crate::flash::{FlashDriver, FlashHal};
use crate::frame::{FrameLink, Transport};
use crate::image::{self, AppFault, ImageInfo};
use crate::layout::Layout;
use crate::platform::Platform;
use crate::promote::Promoter;
use crate::protocol::DfuClient;
use crate::transfer::{TransferEngine, SEGMENT_CAPACITY};

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuReason {
    Requested,
    InvalidApplication(AppFault),
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDecision {
    Normal,
    Dfu(DfuReason),
    /// A staged image is waiting to be promoted (deferred policy).
    Promote(ImageInfo),
}

/// How the current boot ends.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootAction {
    Jump { vector_table: u32 },
    Reset,
}

pub struct Bootloader<T, F, B, P> {
    client: DfuClient<T>,
    flash: FlashDriver<F>,
    bcb: B,
    platform: P,
    layout: Layout,
    config: Config,
    buffer: [u8; SEGMENT_CAPACITY],
}

impl<T, F, B, P> Bootloader<T, F, B, P>
where
    T: Transport,
    F: FlashHal,
    B: BcbCell,
    P: Platform,
{
    pub fn new(
        transport: T,
        flash: F,
        bcb: B,
        platform: P,
        layout: Layout,
        config: Config,
    ) -> Self {
        let link = FrameLink::new(transport, config.checksum, config.io_timeout_ms);
        Self {
            client: DfuClient::new(link),
            flash: FlashDriver::new(flash, config.flash_timeout_ms),
            bcb,
            platform,
            layout,
            config,
            buffer: [0; SEGMENT_CAPACITY],
        }
    }

    pub fn transport(&self) -> &T {
        self.client.link().transport()
    }

    pub fn flash(&self) -> &F {
        self.flash.hal()
    }

    pub fn bcb(&self) -> &B {
        &self.bcb
    }

    pub fn release(self) -> (T, F, B, P) {
        (
            self.client.release().release(),
            self.flash.release(),
            self.bcb,
            self.platform,
        )
    }

    /// Decides, acts, and hands the MCU over. Never returns.
    pub fn boot(mut self) -> ! {
        match self.run() {
            BootAction::Jump { vector_table } => {
                self.platform.quiesce();
                self.platform.transfer_control(vector_table)
            }
            BootAction::Reset => self.platform.system_reset(),
        }
    }

    /// Everything up to, but not including, the final hand-over.
    pub fn run(&mut self) -> BootAction {
        let decision = self.decide();
        info!("boot decision: {}", decision);
        match decision {
            BootDecision::Normal => self.jump_target(),
            BootDecision::Dfu(_) => {
                if let Err(err) = self.dfu_mode() {
                    error!("dfu mode ended with {}", err);
                }
                BootAction::Reset
            }
            BootDecision::Promote(staged) => match self.promote_staged(&staged) {
                Ok(()) => self.jump_target(),
                Err(err) => {
                    error!("deferred promotion failed: {}", err);
                    BootAction::Reset
                }
            },
        }
    }

    /// Consumes the boot control block and checks the application.
    pub fn decide(&mut self) -> BootDecision {
        match bcb::take(&mut self.bcb) {
            BootRequest::Dfu => return BootDecision::Dfu(DfuReason::Requested),
            BootRequest::Promote { length, checksum } => {
                return BootDecision::Promote(ImageInfo {
                    length,
                    checksum: u32::from(checksum),
                })
            }
            BootRequest::None => {}
        }

        match image::check_application(&mut self.flash, &self.layout, self.config.checksum) {
            Ok(_) => BootDecision::Normal,
            Err(fault) => {
                warn!("application invalid: {}", fault);
                BootDecision::Dfu(DfuReason::InvalidApplication(fault))
            }
        }
    }

    /// Connects to the host and runs one transfer. Whatever happens, the
    /// caller resets afterwards.
    pub fn dfu_mode(&mut self) -> Result<(), Error> {
        let mut engine = TransferEngine::new(
            &mut self.client,
            &mut self.flash,
            &self.layout,
            &self.config,
            &mut self.buffer,
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            match engine.start() {
                Ok(()) => break,
                Err(err) if attempt < self.config.start_attempts => {
                    debug!("start attempt {} failed: {}", attempt, err);
                }
                Err(err) => {
                    warn!("no dfu host after {} attempts", attempt);
                    return Err(err);
                }
            }
        }

        let staged = engine.receive()?;

        let installed = match self.config.promotion {
            PromotionPolicy::Immediate => {
                Promoter::new(engine.flash_mut(), &self.layout).promote(&staged)
            }
            PromotionPolicy::NextBoot => {
                // The staged checksum fits 16 bits: it matched a 16-bit digest.
                self.bcb.store(&BootControlBlock::promotion_pending(
                    staged.length,
                    staged.checksum as u16,
                ));
                Ok(())
            }
        };

        match installed {
            Ok(()) => {
                engine.complete();
                Ok(())
            }
            Err(err) => {
                error!("promotion failed: {}", err);
                engine.abort();
                Err(err)
            }
        }
    }

    /// Re-verifies the staged image against the recorded length and checksum
    /// before promoting it.
    fn promote_staged(&mut self, staged: &ImageInfo) -> Result<(), Error> {
        let length = staged.length;
        if length < self.config.min_image_size || length > self.layout.max_image_size() {
            return Err(Error::SizeOutOfBounds(length));
        }
        image::verify(
            &mut self.flash,
            &self.layout.staging,
            &self.layout,
            staged,
            self.config.checksum,
        )?;
        Promoter::new(&mut self.flash, &self.layout).promote(staged)
    }

    fn jump_target(&self) -> BootAction {
        BootAction::Jump {
            vector_table: self.layout.application.base,
        }
    }
}

use crate::checksum::Checksum;
use crate::layout::MIN_IMAGE_SIZE;

/// What a successful DFU transfer does with the staged image.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromotionPolicy {
    /// Promote inside the DFU session, then notify and reset.
    #[default]
    Immediate,
    /// Notify, leave a pending-promotion record in the boot control block and
    /// reset; the next boot verifies the staged image again and promotes it.
    NextBoot,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub checksum: Checksum,
    pub promotion: PromotionPolicy,
    /// Bound on every elementary serial read or write.
    pub io_timeout_ms: u32,
    /// Bound on every erase or program completion wait.
    pub flash_timeout_ms: u32,
    /// START requests issued before DFU mode gives up.
    pub start_attempts: u8,
    /// Retries of one segment before the transfer aborts.
    pub segment_retries: u8,
    /// Smallest image accepted; anything shorter is treated as degenerate.
    pub min_image_size: u32,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            checksum: Checksum::Sum16,
            promotion: PromotionPolicy::Immediate,
            io_timeout_ms: 1000,
            flash_timeout_ms: 5000,
            start_attempts: 10,
            segment_retries: 3,
            min_image_size: MIN_IMAGE_SIZE,
        }
    }

    pub const fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = checksum;
        self
    }

    pub const fn with_promotion(mut self, promotion: PromotionPolicy) -> Self {
        self.promotion = promotion;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

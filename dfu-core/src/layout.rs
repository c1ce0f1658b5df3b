//! Memory map: flash regions, image metadata offsets and the boot control
//! block address. Layouts are `const`-built so an inconsistent map is a
//! compile error rather than a bricked board.

use crate::error::FlashError;

pub const WORD: u32 = 4;

/// A contiguous range of flash made of whole erase sectors.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashRegion {
    pub base: u32,
    pub size: u32,
    /// Sector ids covering the region, erased in this order.
    pub sectors: &'static [u8],
}

impl FlashRegion {
    pub const fn new(base: u32, size: u32, sectors: &'static [u8]) -> Self {
        assert!(size > 0, "empty flash region");
        assert!(base % WORD == 0, "flash region not word aligned");
        assert!(base.checked_add(size).is_some(), "flash region wraps");
        assert!(!sectors.is_empty(), "flash region without sectors");
        Self {
            base,
            size,
            sectors,
        }
    }

    pub const fn end(&self) -> u32 {
        self.base + self.size
    }

    /// Absolute address of `len` bytes at `offset`, if they fit in the region.
    pub fn address(&self, offset: u32, len: u32) -> Result<u32, FlashError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(self.base + offset),
            _ => Err(FlashError::OutOfBounds { offset, len }),
        }
    }

    const fn overlaps(&self, other: &FlashRegion) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

/// Where images live and where their metadata sits.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub staging: FlashRegion,
    pub application: FlashRegion,
    /// Bytes of the application region an image may occupy; the trailer
    /// follows directly after.
    pub image_capacity: u32,
    pub signature: u32,
    /// Offset of the signature word from an image's base.
    pub signature_offset: u32,
    /// Offsets of the length and checksum words inside the application region.
    pub length_offset: u32,
    pub checksum_offset: u32,
}

impl Layout {
    pub const fn new(
        staging: FlashRegion,
        application: FlashRegion,
        image_capacity: u32,
        signature: u32,
        signature_offset: u32,
    ) -> Self {
        let length_offset = image_capacity;
        let checksum_offset = image_capacity + WORD;
        assert!(!staging.overlaps(&application), "staging overlaps application");
        assert!(
            staging.size <= image_capacity,
            "staged image cannot fit the application region"
        );
        assert!(
            checksum_offset + WORD <= application.size,
            "application trailer outside its region"
        );
        assert!(length_offset % WORD == 0, "application trailer misaligned");
        assert!(
            signature_offset % WORD == 0 && signature_offset + WORD <= MIN_IMAGE_SIZE,
            "signature outside the smallest image"
        );
        Self {
            staging,
            application,
            image_capacity,
            signature,
            signature_offset,
            length_offset,
            checksum_offset,
        }
    }

    /// Largest image the staging region can hold.
    pub const fn max_image_size(&self) -> u32 {
        self.staging.size
    }

    pub const fn length_address(&self) -> u32 {
        self.application.base + self.length_offset
    }

    pub const fn checksum_address(&self) -> u32 {
        self.application.base + self.checksum_offset
    }
}

/// Lower bound on a declared image length; smaller transfers are degenerate.
pub const MIN_IMAGE_SIZE: u32 = 448;

pub const SIGNATURE: u32 = 0x0804_0123;
pub const SIGNATURE_OFFSET: u32 = 0x20;

/// Last 16 bytes of the STM32F411's 128K SRAM, kept out of the linker's RAM.
pub const BCB_ADDRESS: u32 = 0x2001_FFF0;

pub const STAGING_BASE: u32 = 0x0800_8000;
pub const APP_BASE: u32 = 0x0804_0000;
pub const IMAGE_CAPACITY: u32 = 0x0003_8000;

/// STM32F411 (512K flash): bootloader in sector 0, sector 1 reserved,
/// staging in sectors 2-5, application in sectors 6-7.
pub const STM32F411: Layout = Layout::new(
    FlashRegion::new(STAGING_BASE, IMAGE_CAPACITY, &[2, 3, 4, 5]),
    FlashRegion::new(APP_BASE, 0x0004_0000, &[6, 7]),
    IMAGE_CAPACITY,
    SIGNATURE,
    SIGNATURE_OFFSET,
);

//! Image validation. Signature and checksum are separate checks and an
//! image is valid only when both pass.

use crate::checksum::Checksum;
use crate::error::{Error, FlashError};
use crate::flash::{FlashDriver, FlashHal};
use crate::layout::{FlashRegion, Layout};

const READ_CHUNK: usize = 256;

/// Length and checksum an image is expected to have.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub length: u32,
    pub checksum: u32,
}

pub fn signature<F: FlashHal>(
    flash: &mut FlashDriver<F>,
    region: &FlashRegion,
    layout: &Layout,
) -> Result<u32, FlashError> {
    let address = region.address(layout.signature_offset, 4)?;
    Ok(flash.read_u32(address))
}

pub fn check_signature<F: FlashHal>(
    flash: &mut FlashDriver<F>,
    region: &FlashRegion,
    layout: &Layout,
) -> Result<(), Error> {
    let found = signature(flash, region, layout)?;
    if found != layout.signature {
        return Err(Error::SignatureInvalid(found));
    }
    Ok(())
}

/// Checksum over the first `length` bytes of `region`, read back in chunks.
pub fn region_checksum<F: FlashHal>(
    flash: &mut FlashDriver<F>,
    region: &FlashRegion,
    length: u32,
    checksum: Checksum,
) -> Result<u16, FlashError> {
    region.address(0, length)?;
    let mut digest = checksum.digest();
    let mut chunk = [0u8; READ_CHUNK];
    let mut offset = 0;
    while offset < length {
        let n = (length - offset).min(READ_CHUNK as u32);
        let piece = &mut chunk[..n as usize];
        flash.read_region(region, offset, piece)?;
        digest.update(piece);
        offset += n;
    }
    Ok(digest.finalize())
}

/// Verifies signature and checksum of the image at the start of `region`.
pub fn verify<F: FlashHal>(
    flash: &mut FlashDriver<F>,
    region: &FlashRegion,
    layout: &Layout,
    expected: &ImageInfo,
    checksum: Checksum,
) -> Result<(), Error> {
    check_signature(flash, region, layout)?;
    let actual = u32::from(region_checksum(flash, region, expected.length, checksum)?);
    if actual != expected.checksum {
        return Err(Error::ImageChecksum {
            expected: expected.checksum,
            actual,
        });
    }
    Ok(())
}

/// Length and checksum recorded in the application trailer.
pub fn application_info<F: FlashHal>(flash: &mut FlashDriver<F>, layout: &Layout) -> ImageInfo {
    ImageInfo {
        length: flash.read_u32(layout.length_address()),
        checksum: flash.read_u32(layout.checksum_address()),
    }
}

/// Why the application image cannot be booted.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppFault {
    Signature(u32),
    /// Trailer length is zero or beyond the image area (erased trailer).
    Length(u32),
    Checksum { expected: u32, actual: u32 },
}

/// Validates the application the way every normal boot does.
pub fn check_application<F: FlashHal>(
    flash: &mut FlashDriver<F>,
    layout: &Layout,
    checksum: Checksum,
) -> Result<ImageInfo, AppFault> {
    let app = &layout.application;
    let found = signature(flash, app, layout).map_err(|_| AppFault::Signature(0))?;
    if found != layout.signature {
        return Err(AppFault::Signature(found));
    }

    let info = application_info(flash, layout);
    if info.length == 0 || info.length > layout.image_capacity {
        return Err(AppFault::Length(info.length));
    }

    let actual = region_checksum(flash, app, info.length, checksum)
        .map(u32::from)
        .map_err(|_| AppFault::Length(info.length))?;
    if actual != info.checksum {
        return Err(AppFault::Checksum {
            expected: info.checksum,
            actual,
        });
    }
    Ok(info)
}

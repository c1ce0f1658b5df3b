//! Promotion: moves a verified staged image into the application region.
//!
//! Sequence: erase the application sectors, copy, byte-compare the copy,
//! then program the trailer words and read each back. Any failure leaves the
//! application without a valid trailer, so the next boot refuses to jump
//! into it and falls back to DFU.

use crate::error::Error;
use crate::flash::{FlashDriver, FlashHal};
use crate::image::ImageInfo;
use crate::layout::Layout;

const COPY_CHUNK: usize = 256;

pub struct Promoter<'a, F> {
    flash: &'a mut FlashDriver<F>,
    layout: &'a Layout,
}

impl<'a, F: FlashHal> Promoter<'a, F> {
    pub fn new(flash: &'a mut FlashDriver<F>, layout: &'a Layout) -> Self {
        Self { flash, layout }
    }

    /// Installs the first `image.length` staged bytes as the application.
    /// The caller must have verified the staged image against `image`.
    pub fn promote(&mut self, image: &ImageInfo) -> Result<(), Error> {
        if image.length == 0 || image.length > self.layout.image_capacity {
            return Err(Error::SizeOutOfBounds(image.length));
        }
        info!("promoting {} bytes", image.length);

        self.flash.erase_region(&self.layout.application)?;
        self.copy(image.length)?;
        self.compare(image.length)?;

        self.write_word(self.layout.length_address(), image.length)?;
        self.write_word(self.layout.checksum_address(), image.checksum)?;
        info!("application promoted");
        Ok(())
    }

    fn copy(&mut self, length: u32) -> Result<(), Error> {
        let staging = &self.layout.staging;
        let app = &self.layout.application;
        let mut chunk = [0u8; COPY_CHUNK];
        let mut offset = 0;
        while offset < length {
            let n = (length - offset).min(COPY_CHUNK as u32);
            let piece = &mut chunk[..n as usize];
            self.flash.read_region(staging, offset, piece)?;
            self.flash.program_region(app, offset, piece)?;
            offset += n;
        }
        Ok(())
    }

    fn compare(&mut self, length: u32) -> Result<(), Error> {
        let staging = &self.layout.staging;
        let app = &self.layout.application;
        let mut source = [0u8; COPY_CHUNK];
        let mut copied = [0u8; COPY_CHUNK];
        let mut offset = 0;
        while offset < length {
            let n = (length - offset).min(COPY_CHUNK as u32) as usize;
            self.flash.read_region(staging, offset, &mut source[..n])?;
            self.flash.read_region(app, offset, &mut copied[..n])?;
            if let Some(at) = source[..n].iter().zip(&copied[..n]).position(|(a, b)| a != b) {
                return Err(Error::VerifyMismatch {
                    offset: offset + at as u32,
                });
            }
            offset += n as u32;
        }
        Ok(())
    }

    fn write_word(&mut self, address: u32, value: u32) -> Result<(), Error> {
        self.flash.program(address, &value.to_le_bytes())?;
        let actual = self.flash.read_u32(address);
        if actual != value {
            return Err(Error::MetadataReadback {
                address,
                expected: value,
                actual,
            });
        }
        Ok(())
    }
}

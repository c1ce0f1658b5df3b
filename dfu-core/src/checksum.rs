//! Integrity functions shared by the frame layer, segment checks and image
//! verification. Sender and receiver must be built with the same variant.

use crc::{Crc, CRC_16_IBM_3740};

static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Checksum {
    /// Plain wraparound sum of bytes modulo 2^16.
    ///
    /// Weak: reordering bytes, or two flips that cancel, go unnoticed.
    #[default]
    Sum16,
    /// CRC-16/IBM-3740 (poly 0x1021, init 0xFFFF).
    Crc16,
}

impl Checksum {
    pub fn compute(self, data: &[u8]) -> u16 {
        let mut digest = self.digest();
        digest.update(data);
        digest.finalize()
    }

    /// Incremental form, for ranges read back from flash in pieces.
    pub fn digest(self) -> Digest {
        match self {
            Checksum::Sum16 => Digest::Sum16(0),
            Checksum::Crc16 => Digest::Crc16(CRC16.digest()),
        }
    }
}

pub enum Digest {
    Sum16(u16),
    Crc16(crc::Digest<'static, u16>),
}

impl Digest {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Digest::Sum16(sum) => {
                *sum = data
                    .iter()
                    .fold(*sum, |acc, &byte| acc.wrapping_add(u16::from(byte)));
            }
            Digest::Crc16(digest) => digest.update(data),
        }
    }

    pub fn finalize(self) -> u16 {
        match self {
            Digest::Sum16(sum) => sum,
            Digest::Crc16(digest) => digest.finalize(),
        }
    }
}

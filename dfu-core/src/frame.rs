//! Serial frame layer.
//!
//! Frame layout, all fields little-endian:
//!
//! ```text
//! [preamble: 2][size: 2][payload: size][checksum: 2]
//! ```
//!
//! The checksum covers the payload only. Any failed or timed-out elementary
//! read fails the whole frame; there is no resynchronisation here, the caller
//! re-issues its request instead. Input still pending from an abandoned
//! exchange is discarded before every frame goes out.

use crate::checksum::Checksum;
use crate::error::FrameError;

pub const PREAMBLE: u16 = 0xAAAA;
pub const HEADER_LEN: usize = 4;
pub const CHECKSUM_LEN: usize = 2;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Fault,
}

/// Byte-level serial transport with a bounded wait per call.
pub trait Transport {
    /// Writes all of `bytes` or fails.
    fn write(&mut self, bytes: &[u8], timeout_ms: u32) -> Result<(), TransportError>;
    /// Fills all of `buf` or fails.
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<(), TransportError>;
    /// Drops every byte received but not yet read.
    fn discard_input(&mut self);
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, bytes: &[u8], timeout_ms: u32) -> Result<(), TransportError> {
        (**self).write(bytes, timeout_ms)
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<(), TransportError> {
        (**self).read(buf, timeout_ms)
    }

    fn discard_input(&mut self) {
        (**self).discard_input()
    }
}

impl From<TransportError> for FrameError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => FrameError::Timeout,
            TransportError::Fault => FrameError::Transport,
        }
    }
}

pub struct FrameLink<T> {
    transport: T,
    checksum: Checksum,
    timeout_ms: u32,
}

impl<T: Transport> FrameLink<T> {
    pub fn new(transport: T, checksum: Checksum, timeout_ms: u32) -> Self {
        Self {
            transport,
            checksum,
            timeout_ms,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn release(self) -> T {
        self.transport
    }

    pub fn send(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let size =
            u16::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;
        let timeout = self.timeout_ms;

        // A reply to this frame must not be parsed from the tail of an old one.
        self.transport.discard_input();
        self.transport.write(&PREAMBLE.to_le_bytes(), timeout)?;
        self.transport.write(&size.to_le_bytes(), timeout)?;
        self.transport.write(payload, timeout)?;
        let sum = self.checksum.compute(payload);
        self.transport.write(&sum.to_le_bytes(), timeout)?;
        Ok(())
    }

    /// Receives one frame into `buf` and returns the payload size.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize, FrameError> {
        let timeout = self.timeout_ms;
        let mut word = [0u8; 2];

        self.transport.read(&mut word, timeout)?;
        let preamble = u16::from_le_bytes(word);
        if preamble != PREAMBLE {
            return Err(FrameError::BadPreamble(preamble));
        }

        self.transport.read(&mut word, timeout)?;
        let declared = u16::from_le_bytes(word);
        let size = usize::from(declared);
        if size > buf.len() {
            return Err(FrameError::Oversize {
                declared,
                capacity: u16::try_from(buf.len()).unwrap_or(u16::MAX),
            });
        }

        let payload = &mut buf[..size];
        self.transport.read(payload, timeout)?;

        let mut trailer = [0u8; CHECKSUM_LEN];
        self.transport.read(&mut trailer, timeout)?;
        let expected = u16::from_le_bytes(trailer);
        let actual = self.checksum.compute(payload);
        if expected != actual {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }

        Ok(size)
    }
}

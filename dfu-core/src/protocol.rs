//! Request/response exchanges of the DFU session, on top of [`FrameLink`].
//!
//! Every request starts with a 16-bit little-endian request id. Segment
//! requests append a 32-bit offset and a 32-bit size.

use crate::error::Error;
use crate::frame::{FrameLink, Transport};

/// Reply to [`Request::Start`] that accepts the session.
pub const START_ACK: u16 = 0xCC33;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Request {
    Start = 0x5555,
    Size = 0x0001,
    Checksum = 0x0002,
    SegmentData = 0x0003,
    SegmentChecksum = 0x0004,
    Abort = 0x00EE,
    Complete = 0x00FF,
}

impl Request {
    pub const fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Self> {
        Some(match id {
            0x5555 => Request::Start,
            0x0001 => Request::Size,
            0x0002 => Request::Checksum,
            0x0003 => Request::SegmentData,
            0x0004 => Request::SegmentChecksum,
            0x00EE => Request::Abort,
            0x00FF => Request::Complete,
            _ => return None,
        })
    }
}

pub const SEGMENT_REQUEST_LEN: usize = 10;

pub fn encode_segment_request(
    request: Request,
    offset: u32,
    size: u32,
) -> [u8; SEGMENT_REQUEST_LEN] {
    let mut out = [0u8; SEGMENT_REQUEST_LEN];
    out[..2].copy_from_slice(&request.id().to_le_bytes());
    out[2..6].copy_from_slice(&offset.to_le_bytes());
    out[6..].copy_from_slice(&size.to_le_bytes());
    out
}

/// Device side of the DFU exchange: the device asks, the host answers.
pub struct DfuClient<T> {
    link: FrameLink<T>,
}

impl<T: Transport> DfuClient<T> {
    pub fn new(link: FrameLink<T>) -> Self {
        Self { link }
    }

    pub fn link(&self) -> &FrameLink<T> {
        &self.link
    }

    pub fn release(self) -> FrameLink<T> {
        self.link
    }

    pub fn start(&mut self) -> Result<(), Error> {
        let ack = self.request_u16(Request::Start)?;
        if ack != START_ACK {
            return Err(Error::StartRejected(ack));
        }
        Ok(())
    }

    pub fn image_size(&mut self) -> Result<u32, Error> {
        self.send(Request::Size)?;
        let mut reply = [0u8; 4];
        let len = self.link.receive(&mut reply)?;
        if len != reply.len() {
            return Err(Error::UnexpectedReply {
                request: Request::Size.id(),
                len,
            });
        }
        Ok(u32::from_le_bytes(reply))
    }

    /// Whole-image checksum, sent by the host as two or four bytes.
    pub fn image_checksum(&mut self) -> Result<u32, Error> {
        self.send(Request::Checksum)?;
        let mut reply = [0u8; 4];
        match self.link.receive(&mut reply)? {
            2 => Ok(u32::from(u16::from_le_bytes([reply[0], reply[1]]))),
            4 => Ok(u32::from_le_bytes(reply)),
            len => Err(Error::UnexpectedReply {
                request: Request::Checksum.id(),
                len,
            }),
        }
    }

    /// Asks for `buf.len()` bytes at `offset` and returns how many arrived.
    pub fn segment_data(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, Error> {
        let size = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        let request = encode_segment_request(Request::SegmentData, offset, size);
        self.link.send(&request)?;
        Ok(self.link.receive(buf)?)
    }

    /// The host's checksum over `size` bytes at `offset`.
    pub fn segment_checksum(&mut self, offset: u32, size: u32) -> Result<u16, Error> {
        let request = encode_segment_request(Request::SegmentChecksum, offset, size);
        self.link.send(&request)?;
        self.receive_u16(Request::SegmentChecksum)
    }

    /// Best effort: the session is over either way.
    pub fn abort(&mut self) {
        if let Err(err) = self.send(Request::Abort) {
            warn!("abort notification failed: {}", err);
        }
    }

    pub fn complete(&mut self) {
        if let Err(err) = self.send(Request::Complete) {
            warn!("complete notification failed: {}", err);
        }
    }

    fn send(&mut self, request: Request) -> Result<(), Error> {
        self.link.send(&request.id().to_le_bytes())?;
        Ok(())
    }

    fn request_u16(&mut self, request: Request) -> Result<u16, Error> {
        self.send(request)?;
        self.receive_u16(request)
    }

    fn receive_u16(&mut self, request: Request) -> Result<u16, Error> {
        let mut reply = [0u8; 2];
        let len = self.link.receive(&mut reply)?;
        if len != reply.len() {
            return Err(Error::UnexpectedReply {
                request: request.id(),
                len,
            });
        }
        Ok(u16::from_le_bytes(reply))
    }
}

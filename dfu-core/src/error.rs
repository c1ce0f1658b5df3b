use crate::flash::FlashFault;

/// Failures of a single frame exchange over the serial link.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// An elementary read or write did not finish within the I/O timeout.
    Timeout,
    /// The transport reported a line fault (framing, overrun, noise).
    Transport,
    BadPreamble(u16),
    /// The sender declared more payload than the receive buffer holds.
    Oversize { declared: u16, capacity: u16 },
    /// Payload does not fit in the 16-bit size field.
    PayloadTooLarge(usize),
    ChecksumMismatch { expected: u16, actual: u16 },
}

/// Failures of the non-volatile memory driver.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    EraseFailed { sector: u8, fault: FlashFault },
    ProgramFailed { address: u32, fault: FlashFault },
    /// Access outside the region it was addressed through.
    OutOfBounds { offset: u32, len: u32 },
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Frame(FrameError),
    /// The counterpart answered with a payload of the wrong shape.
    UnexpectedReply { request: u16, len: usize },
    StartRejected(u16),
    EmptySegment { offset: u32 },
    SegmentChecksum { offset: u32, expected: u16, actual: u16 },
    SegmentRetriesExhausted { offset: u32 },
    SignatureInvalid(u32),
    ImageChecksum { expected: u32, actual: u32 },
    /// Copied bytes differ from the staged image.
    VerifyMismatch { offset: u32 },
    /// A metadata word did not read back as written.
    MetadataReadback { address: u32, expected: u32, actual: u32 },
    Flash(FlashError),
    SizeOutOfBounds(u32),
    ZeroChecksum,
}

/// Coarse classification used to decide between retry and abort.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Protocol,
    Integrity,
    Flash,
    Policy,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Frame(_) | Error::UnexpectedReply { .. } | Error::StartRejected(_) => {
                ErrorKind::Protocol
            }
            Error::EmptySegment { .. }
            | Error::SegmentChecksum { .. }
            | Error::SegmentRetriesExhausted { .. }
            | Error::SignatureInvalid(_)
            | Error::ImageChecksum { .. }
            | Error::VerifyMismatch { .. }
            | Error::MetadataReadback { .. } => ErrorKind::Integrity,
            Error::Flash(_) => ErrorKind::Flash,
            Error::SizeOutOfBounds(_) | Error::ZeroChecksum => ErrorKind::Policy,
        }
    }

    /// Whether the enclosing segment exchange may be retried after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Protocol | ErrorKind::Integrity)
    }
}

impl From<FrameError> for Error {
    fn from(err: FrameError) -> Self {
        Error::Frame(err)
    }
}

impl From<FlashError> for Error {
    fn from(err: FlashError) -> Self {
        Error::Flash(err)
    }
}

//! DFU transfer engine: pulls a full image into the staging region.
//!
//! ```text
//! Idle -> Started -> SizeKnown -> ChecksumKnown -> Erasing -> Transferring
//!      -> Verifying -> { Complete | Aborted }
//! ```
//!
//! Only a segment is ever retried; a failed transfer is not restarted.

use crate::config::Config;
use crate::error::Error;
use crate::flash::{FlashDriver, FlashHal};
use crate::frame::Transport;
use crate::image::{self, ImageInfo};
use crate::layout::Layout;
use crate::protocol::DfuClient;

/// Capacity of the in-flight segment buffer.
pub const SEGMENT_CAPACITY: usize = 1024;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Started,
    SizeKnown,
    ChecksumKnown,
    Erasing,
    Transferring,
    Verifying,
    Complete,
    Aborted,
}

/// Progress of the segment loop.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub total: u32,
    pub offset: u32,
    pub retries: u8,
    max_retries: u8,
}

impl Session {
    pub fn new(total: u32, max_retries: u8) -> Self {
        Self {
            total,
            offset: 0,
            retries: 0,
            max_retries,
        }
    }

    pub fn is_done(&self) -> bool {
        self.offset >= self.total
    }

    /// Size of the next segment request.
    pub fn next_request(&self, capacity: usize) -> usize {
        let remaining = self.total - self.offset;
        remaining.min(u32::try_from(capacity).unwrap_or(u32::MAX)) as usize
    }

    pub fn record_success(&mut self, received: usize) {
        self.offset += received as u32;
        self.retries = 0;
    }

    /// Counts a failed attempt; `false` once the retry budget is spent.
    pub fn record_failure(&mut self) -> bool {
        self.retries = self.retries.saturating_add(1);
        self.retries <= self.max_retries
    }
}

pub struct TransferEngine<'a, T, F> {
    client: &'a mut DfuClient<T>,
    flash: &'a mut FlashDriver<F>,
    layout: &'a Layout,
    config: &'a Config,
    buffer: &'a mut [u8; SEGMENT_CAPACITY],
    state: TransferState,
}

impl<'a, T: Transport, F: FlashHal> TransferEngine<'a, T, F> {
    pub fn new(
        client: &'a mut DfuClient<T>,
        flash: &'a mut FlashDriver<F>,
        layout: &'a Layout,
        config: &'a Config,
        buffer: &'a mut [u8; SEGMENT_CAPACITY],
    ) -> Self {
        Self {
            client,
            flash,
            layout,
            config,
            buffer,
            state: TransferState::Idle,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Flash access for the promotion step that runs before the outcome is
    /// reported.
    pub fn flash_mut(&mut self) -> &mut FlashDriver<F> {
        &mut *self.flash
    }

    /// Opens the session. A failed start has no side effects and may be
    /// attempted again.
    pub fn start(&mut self) -> Result<(), Error> {
        self.client.start()?;
        self.state = TransferState::Started;
        info!("dfu session started");
        Ok(())
    }

    /// Runs the transfer from `Started` to a verified staged image.
    ///
    /// On failure the counterpart has already been told to abort.
    pub fn receive(&mut self) -> Result<ImageInfo, Error> {
        match self.run() {
            Ok(info) => Ok(info),
            Err(err) => {
                error!("dfu transfer failed in {}: {}", self.state, err);
                self.abort();
                Err(err)
            }
        }
    }

    pub fn complete(&mut self) {
        self.client.complete();
        self.state = TransferState::Complete;
        info!("dfu session complete");
    }

    pub fn abort(&mut self) {
        self.client.abort();
        self.state = TransferState::Aborted;
    }

    fn run(&mut self) -> Result<ImageInfo, Error> {
        let length = self.client.image_size()?;
        if length < self.config.min_image_size || length > self.layout.max_image_size() {
            return Err(Error::SizeOutOfBounds(length));
        }
        self.state = TransferState::SizeKnown;

        let checksum = self.client.image_checksum()?;
        if checksum == 0 {
            return Err(Error::ZeroChecksum);
        }
        self.state = TransferState::ChecksumKnown;
        info!("image: {} bytes, checksum {:#x}", length, checksum);

        self.state = TransferState::Erasing;
        self.flash.erase_region(&self.layout.staging)?;

        self.state = TransferState::Transferring;
        let mut session = Session::new(length, self.config.segment_retries);
        while !session.is_done() {
            let requested = session.next_request(SEGMENT_CAPACITY);
            match self.fetch_segment(session.offset, requested) {
                Ok(received) => {
                    let data = &self.buffer[..received];
                    self.flash
                        .program_region(&self.layout.staging, session.offset, data)?;
                    trace!("segment at {} staged ({} bytes)", session.offset, received);
                    session.record_success(received);
                }
                Err(err) if err.is_retryable() => {
                    warn!("segment at {} failed: {}", session.offset, err);
                    if !session.record_failure() {
                        return Err(Error::SegmentRetriesExhausted {
                            offset: session.offset,
                        });
                    }
                }
                Err(err) => return Err(err),
            }
        }

        self.state = TransferState::Verifying;
        let info = ImageInfo { length, checksum };
        image::verify(
            self.flash,
            &self.layout.staging,
            self.layout,
            &info,
            self.config.checksum,
        )?;
        Ok(info)
    }

    /// One segment attempt: data, then the sender's checksum over what
    /// actually arrived, compared against our own.
    fn fetch_segment(&mut self, offset: u32, requested: usize) -> Result<usize, Error> {
        let received = self
            .client
            .segment_data(offset, &mut self.buffer[..requested])?;
        if received == 0 {
            return Err(Error::EmptySegment { offset });
        }
        let expected = self.client.segment_checksum(offset, received as u32)?;
        let actual = self.config.checksum.compute(&self.buffer[..received]);
        if expected != actual {
            return Err(Error::SegmentChecksum {
                offset,
                expected,
                actual,
            });
        }
        Ok(received)
    }
}

#![allow(dead_code)]

use std::collections::VecDeque;

use dfu_core::bcb::{BcbCell, BootControlBlock};
use dfu_core::flash::{FlashFault, FlashHal};
use dfu_core::frame::{Transport, TransportError};
use dfu_core::layout::{Layout, STM32F411};
use dfu_core::platform::Platform;
use dfu_core::protocol::{Request, START_ACK};
use dfu_core::{Bootloader, Checksum, Config};

pub const LAYOUT: Layout = STM32F411;

/// Deterministic firmware image carrying the board signature.
pub fn firmware(len: usize, seed: u8) -> Vec<u8> {
    let mut data: Vec<u8> = (0..len)
        .map(|i| (i as u8).wrapping_mul(13).wrapping_add(seed))
        .collect();
    let at = LAYOUT.signature_offset as usize;
    data[at..at + 4].copy_from_slice(&LAYOUT.signature.to_le_bytes());
    data
}

/// What goes wrong with one reply to a segment data request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFault {
    /// Flip a payload byte but keep the frame consistent, so only the
    /// per-segment checksum can notice.
    CorruptData,
    /// Damage the frame checksum.
    LineNoise,
    /// Say nothing; the device times out.
    NoReply,
    /// Send one byte more than asked for.
    Oversize,
}

/// Host side of the DFU protocol, answering frame by frame.
pub struct HostSim {
    pub image: Vec<u8>,
    pub declared_size: u32,
    pub declared_checksum: u32,
    pub checksum: Checksum,
    /// `None` leaves START unanswered.
    pub start_reply: Option<u16>,
    /// Largest segment the host sends, regardless of what is asked.
    pub max_segment: usize,
    pub faults: Vec<(u32, SegmentFault)>,
    pub requests: Vec<(Request, u32, u32)>,
    pub outcome: Option<Request>,
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
}

impl HostSim {
    pub fn new(image: Vec<u8>, checksum: Checksum) -> Self {
        let declared_checksum = u32::from(checksum.compute(&image));
        Self {
            declared_size: image.len() as u32,
            declared_checksum,
            image,
            checksum,
            start_reply: Some(START_ACK),
            max_segment: usize::MAX,
            faults: Vec::new(),
            requests: Vec::new(),
            outcome: None,
            inbox: Vec::new(),
            outbox: VecDeque::new(),
        }
    }

    /// A host that never answers.
    pub fn absent() -> Self {
        let mut host = Self::new(Vec::new(), Checksum::Sum16);
        host.start_reply = None;
        host
    }

    pub fn count(&self, request: Request, offset: u32) -> usize {
        self.requests
            .iter()
            .filter(|(r, o, _)| *r == request && *o == offset)
            .count()
    }

    fn reply(&mut self, payload: &[u8]) {
        self.reply_with_sum(payload, self.checksum.compute(payload));
    }

    fn reply_with_sum(&mut self, payload: &[u8], sum: u16) {
        self.outbox.extend([0xAA, 0xAA]);
        self.outbox.extend((payload.len() as u16).to_le_bytes());
        self.outbox.extend(payload);
        self.outbox.extend(sum.to_le_bytes());
    }

    fn segment(&self, offset: u32, size: u32) -> Vec<u8> {
        let start = (offset as usize).min(self.image.len());
        let size = (size as usize).min(self.max_segment);
        let end = (start + size).min(self.image.len());
        self.image[start..end].to_vec()
    }

    fn take_fault(&mut self, offset: u32) -> Option<SegmentFault> {
        let at = self.faults.iter().position(|(o, _)| *o == offset)?;
        Some(self.faults.remove(at).1)
    }

    fn handle(&mut self, payload: &[u8]) {
        let id = u16::from_le_bytes([payload[0], payload[1]]);
        let request = Request::from_id(id).expect("unknown request id");
        let (offset, size) = if payload.len() == 10 {
            (
                u32::from_le_bytes(payload[2..6].try_into().unwrap()),
                u32::from_le_bytes(payload[6..10].try_into().unwrap()),
            )
        } else {
            (0, 0)
        };
        self.requests.push((request, offset, size));

        match request {
            Request::Start => {
                if let Some(ack) = self.start_reply {
                    self.reply(&ack.to_le_bytes());
                }
            }
            Request::Size => self.reply(&self.declared_size.to_le_bytes()),
            Request::Checksum => self.reply(&(self.declared_checksum as u16).to_le_bytes()),
            Request::SegmentData => {
                let mut data = self.segment(offset, size);
                match self.take_fault(offset) {
                    None => self.reply(&data),
                    Some(SegmentFault::CorruptData) => {
                        data[0] ^= 0x5A;
                        self.reply(&data);
                    }
                    Some(SegmentFault::LineNoise) => {
                        let sum = self.checksum.compute(&data) ^ 0x0101;
                        self.reply_with_sum(&data, sum);
                    }
                    Some(SegmentFault::NoReply) => {}
                    Some(SegmentFault::Oversize) => {
                        data.resize(size as usize + 1, 0x00);
                        self.reply(&data);
                    }
                }
            }
            Request::SegmentChecksum => {
                let data = self.segment(offset, size);
                let sum = self.checksum.compute(&data);
                self.reply(&sum.to_le_bytes());
            }
            Request::Abort | Request::Complete => self.outcome = Some(request),
        }
    }

    /// Parses every complete device frame sitting in the inbox.
    fn pump(&mut self) {
        loop {
            if self.inbox.len() < 4 {
                return;
            }
            assert_eq!(&self.inbox[..2], &[0xAA, 0xAA], "device sent bad preamble");
            let len = u16::from_le_bytes([self.inbox[2], self.inbox[3]]) as usize;
            if self.inbox.len() < 4 + len + 2 {
                return;
            }
            let frame: Vec<u8> = self.inbox.drain(..4 + len + 2).collect();
            let payload = &frame[4..4 + len];
            let sum = u16::from_le_bytes([frame[4 + len], frame[5 + len]]);
            assert_eq!(sum, self.checksum.compute(payload), "device frame checksum");
            self.handle(payload);
        }
    }
}

impl Transport for HostSim {
    fn write(&mut self, bytes: &[u8], _timeout_ms: u32) -> Result<(), TransportError> {
        self.inbox.extend_from_slice(bytes);
        self.pump();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout_ms: u32) -> Result<(), TransportError> {
        // Like a UART, whatever the device does not read stays on the line.
        if self.outbox.len() < buf.len() {
            return Err(TransportError::Timeout);
        }
        for slot in buf.iter_mut() {
            *slot = self.outbox.pop_front().unwrap();
        }
        Ok(())
    }

    fn discard_input(&mut self) {
        self.outbox.clear();
    }
}

/// STM32F411 flash model with the real sector table.
pub struct BoardFlash {
    mem: Vec<u8>,
    unlocked: bool,
    pending: Option<Result<(), FlashFault>>,
    pub erased: Vec<u8>,
    pub fail_sector: Option<u8>,
    /// Programming a unit covering this address reports a controller error.
    pub fail_program_at: Option<u32>,
    /// Programming a unit covering this address reports success but
    /// leaves the cells erased.
    pub drop_program_at: Option<u32>,
}

const FLASH_BASE: u32 = 0x0800_0000;
const FLASH_SIZE: usize = 512 * 1024;

const SECTORS: [(u8, u32, u32); 8] = [
    (0, 0x0800_0000, 0x4000),
    (1, 0x0800_4000, 0x4000),
    (2, 0x0800_8000, 0x4000),
    (3, 0x0800_C000, 0x4000),
    (4, 0x0801_0000, 0x1_0000),
    (5, 0x0802_0000, 0x2_0000),
    (6, 0x0804_0000, 0x2_0000),
    (7, 0x0806_0000, 0x2_0000),
];

impl BoardFlash {
    pub fn new() -> Self {
        Self {
            mem: vec![0xFF; FLASH_SIZE],
            unlocked: false,
            pending: None,
            erased: Vec::new(),
            fail_sector: None,
            fail_program_at: None,
            drop_program_at: None,
        }
    }

    pub fn bytes(&self, address: u32, len: usize) -> &[u8] {
        let at = (address - FLASH_BASE) as usize;
        &self.mem[at..at + len]
    }

    pub fn word(&self, address: u32) -> u32 {
        u32::from_le_bytes(self.bytes(address, 4).try_into().unwrap())
    }

    pub fn poke(&mut self, address: u32, bytes: &[u8]) {
        let at = (address - FLASH_BASE) as usize;
        self.mem[at..at + bytes.len()].copy_from_slice(bytes);
    }

    pub fn install_application(&mut self, image: &[u8], checksum: Checksum) {
        self.poke(LAYOUT.application.base, image);
        self.poke(LAYOUT.length_address(), &(image.len() as u32).to_le_bytes());
        let sum = u32::from(checksum.compute(image));
        self.poke(LAYOUT.checksum_address(), &sum.to_le_bytes());
    }

    fn program(&mut self, address: u32, bytes: &[u8]) {
        assert!(self.unlocked, "program while locked");
        let covers = |target: Option<u32>| {
            target.is_some_and(|t| (address..address + bytes.len() as u32).contains(&t))
        };
        if covers(self.fail_program_at) {
            self.pending = Some(Err(FlashFault::Status(0x40)));
            return;
        }
        if covers(self.drop_program_at) {
            self.pending = Some(Ok(()));
            return;
        }
        let at = (address - FLASH_BASE) as usize;
        for (slot, &byte) in self.mem[at..at + bytes.len()].iter_mut().zip(bytes) {
            assert_eq!(*slot, 0xFF, "programming non-erased flash at {address:#x}");
            *slot = byte;
        }
        self.pending = Some(Ok(()));
    }
}

impl FlashHal for BoardFlash {
    fn unlock(&mut self) {
        assert!(!self.unlocked, "double unlock");
        self.unlocked = true;
    }

    fn lock(&mut self) {
        self.unlocked = false;
    }

    fn start_sector_erase(&mut self, sector: u8) {
        assert!(self.unlocked, "erase while locked");
        assert_ne!(sector, 0, "bootloader sector erased");
        self.erased.push(sector);
        if self.fail_sector == Some(sector) {
            self.pending = Some(Err(FlashFault::Status(0x80)));
            return;
        }
        let (_, base, size) = SECTORS[usize::from(sector)];
        let at = (base - FLASH_BASE) as usize;
        self.mem[at..at + size as usize].fill(0xFF);
        self.pending = Some(Ok(()));
    }

    fn program_word(&mut self, address: u32, word: u32) {
        assert_eq!(address % 4, 0);
        self.program(address, &word.to_le_bytes());
    }

    fn program_byte(&mut self, address: u32, byte: u8) {
        self.program(address, &[byte]);
    }

    fn wait_complete(&mut self, _timeout_ms: u32) -> Result<(), FlashFault> {
        assert!(self.unlocked, "wait while locked");
        self.pending.take().unwrap_or(Err(FlashFault::Timeout))
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) {
        buf.copy_from_slice(self.bytes(address, buf.len()));
    }
}

/// Always-on RAM that survives warm resets.
#[derive(Default)]
pub struct NoinitRam(pub BootControlBlock);

impl BcbCell for NoinitRam {
    fn load(&mut self) -> BootControlBlock {
        self.0
    }

    fn store(&mut self, bcb: &BootControlBlock) {
        self.0 = *bcb;
    }
}

#[derive(Default)]
pub struct Board {
    pub quiesced: bool,
}

impl Platform for Board {
    fn quiesce(&mut self) {
        self.quiesced = true;
    }

    fn transfer_control(&mut self, vector_table: u32) -> ! {
        assert!(self.quiesced, "jump with live interrupts");
        panic!("jump to {vector_table:#010x}")
    }

    fn system_reset(&mut self) -> ! {
        panic!("system reset")
    }
}

pub type Device = Bootloader<HostSim, BoardFlash, NoinitRam, Board>;

pub fn device(host: HostSim, flash: BoardFlash, bcb: BootControlBlock, config: Config) -> Device {
    Bootloader::new(host, flash, NoinitRam(bcb), Board::default(), LAYOUT, config)
}

/// Simulates a warm reset: RAM and flash keep their contents.
pub fn reset(device: Device, host: HostSim, config: Config) -> Device {
    let (_, flash, ram, board) = device.release();
    Bootloader::new(host, flash, ram, board, LAYOUT, config)
}

//! Boot Control Block: a four-word record in always-powered RAM that carries
//! boot intent across a warm reset.

use core::sync::atomic::{compiler_fence, Ordering};

/// Written by the application (or a host tool) to ask for DFU mode.
pub const DFU_REQUEST_MAGIC: u32 = 0x1234_5678;
/// Written by the bootloader when a verified staged image awaits promotion.
pub const PROMOTE_REQUEST_MAGIC: u32 = 0x5052_4F4D;

pub const BCB_WORDS: usize = 4;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootControlBlock {
    pub magic: u32,
    /// Expected image length, meaningful with [`PROMOTE_REQUEST_MAGIC`].
    pub length: u32,
    /// Expected 16-bit image checksum, meaningful with [`PROMOTE_REQUEST_MAGIC`].
    pub checksum: u16,
}

/// What the boot control block asked for.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootRequest {
    None,
    Dfu,
    Promote { length: u32, checksum: u16 },
}

impl BootControlBlock {
    pub const fn empty() -> Self {
        Self {
            magic: 0,
            length: 0,
            checksum: 0,
        }
    }

    pub const fn dfu_request() -> Self {
        Self {
            magic: DFU_REQUEST_MAGIC,
            length: 0,
            checksum: 0,
        }
    }

    pub const fn promotion_pending(length: u32, checksum: u16) -> Self {
        Self {
            magic: PROMOTE_REQUEST_MAGIC,
            length,
            checksum,
        }
    }

    pub const fn to_words(&self) -> [u32; BCB_WORDS] {
        [self.magic, self.length, self.checksum as u32, 0]
    }

    pub const fn from_words(words: [u32; BCB_WORDS]) -> Self {
        Self {
            magic: words[0],
            length: words[1],
            checksum: words[2] as u16,
        }
    }

    pub fn request(&self) -> BootRequest {
        match self.magic {
            DFU_REQUEST_MAGIC => BootRequest::Dfu,
            PROMOTE_REQUEST_MAGIC => BootRequest::Promote {
                length: self.length,
                checksum: self.checksum,
            },
            _ => BootRequest::None,
        }
    }
}

/// Storage holding the boot control block.
pub trait BcbCell {
    fn load(&mut self) -> BootControlBlock;
    fn store(&mut self, bcb: &BootControlBlock);
}

/// Reads the block and clears it, whatever it contained, so a stale request
/// is acted on at most once.
pub fn take<C: BcbCell>(cell: &mut C) -> BootRequest {
    let bcb = cell.load();
    cell.store(&BootControlBlock::empty());
    bcb.request()
}

/// Boot control block at a fixed RAM address, accessed with volatile word
/// reads and writes.
pub struct RamBcb {
    words: *mut u32,
}

impl RamBcb {
    /// # Safety
    /// `address` must be word aligned and point to [`BCB_WORDS`] words of RAM
    /// that nothing else (stack, heap, statics) uses.
    pub unsafe fn new(address: u32) -> Self {
        Self::from_ptr(address as usize as *mut u32)
    }

    /// # Safety
    /// Same contract as [`RamBcb::new`].
    pub unsafe fn from_ptr(words: *mut u32) -> Self {
        assert!((words as usize) % 4 == 0, "boot control block misaligned");
        Self { words }
    }
}

impl BcbCell for RamBcb {
    fn load(&mut self) -> BootControlBlock {
        let mut words = [0u32; BCB_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            // SAFETY: `new` guarantees BCB_WORDS valid, exclusive words.
            *word = unsafe { self.words.add(i).read_volatile() };
        }
        BootControlBlock::from_words(words)
    }

    fn store(&mut self, bcb: &BootControlBlock) {
        for (i, word) in bcb.to_words().into_iter().enumerate() {
            // SAFETY: as in `load`.
            unsafe { self.words.add(i).write_volatile(word) };
        }
        compiler_fence(Ordering::SeqCst);
    }
}

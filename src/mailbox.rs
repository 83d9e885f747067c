// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Access to mailbox memory shared with an agent.

use arm_scmi::smt::{
    CHANNEL_STATUS_OFFSET, FLAGS_OFFSET, HEADER_SIZE, LENGTH_OFFSET, MESSAGE_HEADER_OFFSET,
    SmtHeader,
};
use core::{mem::size_of, ptr::NonNull};
use zerocopy::{IntoBytes, transmute};

/// How a mailbox is mapped into the server's address space.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MailboxMapping {
    /// Mapped as secure memory, only accessible to secure agents.
    Secure,
    /// Mapped as non-secure memory, accessible to the normal world.
    NonSecure,
}

/// A mailbox in memory shared with an agent.
///
/// The agent may write to the memory at any time, so every access is volatile and nothing is cached.
#[derive(Debug)]
pub struct SharedMailbox {
    base: NonNull<u8>,
    size: usize,
    mapping: MailboxMapping,
}

// SAFETY: The mailbox only holds the address of memory which the caller of `new` guaranteed stays
// valid, and all accesses through it are volatile.
unsafe impl Send for SharedMailbox {}
// SAFETY: Concurrent accesses are serialised by the channel lock held by the transport.
unsafe impl Sync for SharedMailbox {}

impl SharedMailbox {
    /// Creates a mailbox for the `size` bytes of shared memory starting at `base`.
    ///
    /// The size is checked when the channel is initialised, not here.
    ///
    /// # Safety
    ///
    /// `base` must be 4-byte aligned and point to `size` bytes of memory which stay mapped and valid
    /// for volatile reads and writes for the lifetime of the returned value, and which are not
    /// accessed through any Rust reference while it exists.
    pub const unsafe fn new(base: NonNull<u8>, size: usize, mapping: MailboxMapping) -> Self {
        Self {
            base,
            size,
            mapping,
        }
    }

    /// Creates a mailbox over a statically allocated buffer.
    pub fn from_static(buffer: &'static mut [u32], mapping: MailboxMapping) -> Self {
        let size = size_of::<u32>() * buffer.len();
        // SAFETY: The buffer is word aligned, valid for the rest of the program, and we take its
        // only reference.
        unsafe { Self::new(NonNull::from(buffer).cast(), size, mapping) }
    }

    /// Returns the size of the mailbox in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns how the mailbox memory is mapped.
    pub fn mapping(&self) -> MailboxMapping {
        self.mapping
    }

    /// Reads the little-endian word at `offset` bytes from the start of the mailbox.
    ///
    /// # Panics
    ///
    /// Panics if the word is not entirely within the mailbox or is misaligned.
    pub fn read_u32(&self, offset: usize) -> u32 {
        assert!(offset % size_of::<u32>() == 0 && offset + size_of::<u32>() <= self.size);
        // SAFETY: The word is within the region promised valid by the caller of `new`, and the
        // offset is a multiple of 4 from a base which the same caller promised is aligned.
        u32::from_le(unsafe { self.base.add(offset).cast::<u32>().read_volatile() })
    }

    /// Writes `value` to the word at `offset` bytes from the start of the mailbox.
    ///
    /// # Panics
    ///
    /// Panics if the word is not entirely within the mailbox or is misaligned.
    pub fn write_u32(&self, offset: usize, value: u32) {
        assert!(offset % size_of::<u32>() == 0 && offset + size_of::<u32>() <= self.size);
        // SAFETY: As for `read_u32`.
        unsafe { self.base.add(offset).cast::<u32>().write_volatile(value.to_le()) }
    }

    /// Reads the mailbox header.
    pub fn read_header(&self) -> SmtHeader {
        let mut bytes = [0u8; HEADER_SIZE];
        for (offset, chunk) in bytes.chunks_exact_mut(size_of::<u32>()).enumerate() {
            chunk.copy_from_slice(&self.read_u32(offset * size_of::<u32>()).to_le_bytes());
        }
        transmute!(bytes)
    }

    /// Writes the flags, length and message header words of the mailbox header.
    ///
    /// The channel status word is left alone, see [`Self::write_channel_status`].
    pub fn write_header(&self, header: &SmtHeader) {
        for offset in [FLAGS_OFFSET, LENGTH_OFFSET, MESSAGE_HEADER_OFFSET] {
            let word = &header.as_bytes()[offset..offset + size_of::<u32>()];
            self.write_u32(offset, u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
        }
    }

    /// Reads the channel status word.
    pub fn channel_status(&self) -> u32 {
        self.read_u32(CHANNEL_STATUS_OFFSET)
    }

    /// Writes the channel status word.
    pub fn write_channel_status(&self, status: u32) {
        self.write_u32(CHANNEL_STATUS_OFFSET, status);
    }

    /// Copies `dest.len()` bytes of payload into `dest`.
    ///
    /// # Panics
    ///
    /// Panics if the range is not entirely within the mailbox.
    pub fn read_payload(&self, dest: &mut [u8]) {
        assert!(HEADER_SIZE + dest.len() <= self.size);
        for (i, byte) in dest.iter_mut().enumerate() {
            // SAFETY: The byte is within the region promised valid by the caller of `new`.
            *byte = unsafe { self.base.add(HEADER_SIZE + i).read_volatile() };
        }
    }

    /// Copies `src` into the payload area.
    ///
    /// # Panics
    ///
    /// Panics if the range is not entirely within the mailbox.
    pub fn write_payload(&self, src: &[u8]) {
        assert!(HEADER_SIZE + src.len() <= self.size);
        for (i, byte) in src.iter().enumerate() {
            // SAFETY: The byte is within the region promised valid by the caller of `new`.
            unsafe { self.base.add(HEADER_SIZE + i).write_volatile(*byte) };
        }
    }
}

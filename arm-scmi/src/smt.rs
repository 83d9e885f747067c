// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Layout of a Shared Memory Transport (SMT) mailbox.
//!
//! A mailbox is a region of memory shared between one agent and the platform. It starts with a
//! fixed header of [`HEADER_SIZE`] bytes followed by the message payload.

use bitflags::bitflags;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, little_endian::U32};

/// Offset of the channel status word.
pub const CHANNEL_STATUS_OFFSET: usize = 0x04;
/// Offset of the mailbox flags word.
pub const FLAGS_OFFSET: usize = 0x10;
/// Offset of the length word, which counts the message header and the payload.
pub const LENGTH_OFFSET: usize = 0x14;
/// Offset of the SCMI message header.
pub const MESSAGE_HEADER_OFFSET: usize = 0x18;
/// Offset of the message payload, and size of the mailbox header.
pub const HEADER_SIZE: usize = 0x1c;
/// Size of the message header counted in the length word.
pub const MESSAGE_HEADER_SIZE: usize = 4;
/// Smallest usable mailbox.
pub const MIN_MAILBOX_SIZE: usize = 128;

/// Fixed header at the start of an SMT mailbox.
#[derive(Clone, Debug, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
pub struct SmtHeader {
    /// Reserved, must be zero.
    pub reserved0: U32,
    /// Channel status, see [`ChannelStatus`].
    pub channel_status: U32,
    /// Implementation defined.
    pub reserved1: [U32; 2],
    /// Mailbox flags, see [`MailboxFlags`].
    pub flags: U32,
    /// Length of the message header and payload in bytes.
    pub length: U32,
    /// SCMI message header.
    pub message_header: U32,
}

bitflags! {
    /// Bits of the channel status word.
    #[derive(Debug, Eq, PartialEq, Clone, Copy)]
    #[repr(transparent)]
    pub struct ChannelStatus: u32 {
        /// The mailbox is owned by the agent. Cleared by the agent when it posts a message.
        const FREE = 1 << 0;
        /// The last transfer failed.
        const ERROR = 1 << 1;
    }
}

bitflags! {
    /// Bits of the mailbox flags word.
    #[derive(Debug, Eq, PartialEq, Clone, Copy)]
    #[repr(transparent)]
    pub struct MailboxFlags: u32 {
        /// The agent wants an interrupt when the platform completes a message.
        const INTERRUPT_ENABLE = 1 << 0;
    }
}

/// Returns the largest payload that fits a mailbox of `mailbox_size` bytes.
pub const fn max_payload_size(mailbox_size: usize) -> usize {
    mailbox_size.saturating_sub(HEADER_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};

    #[test]
    fn header_layout() {
        assert_eq!(size_of::<SmtHeader>(), HEADER_SIZE);
        assert_eq!(
            offset_of!(SmtHeader, channel_status),
            CHANNEL_STATUS_OFFSET
        );
        assert_eq!(offset_of!(SmtHeader, flags), FLAGS_OFFSET);
        assert_eq!(offset_of!(SmtHeader, length), LENGTH_OFFSET);
        assert_eq!(
            offset_of!(SmtHeader, message_header),
            MESSAGE_HEADER_OFFSET
        );
    }

    #[test]
    fn header_from_bytes() {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[CHANNEL_STATUS_OFFSET] = 0x3;
        bytes[LENGTH_OFFSET] = 8;
        let header = SmtHeader::read_from_bytes(&bytes).unwrap();
        assert_eq!(
            ChannelStatus::from_bits_truncate(header.channel_status.get()),
            ChannelStatus::FREE | ChannelStatus::ERROR
        );
        assert_eq!(header.length.get(), 8);
        assert_eq!(header.as_bytes(), &bytes);
    }

    #[test]
    fn payload_size() {
        assert_eq!(max_payload_size(MIN_MAILBOX_SIZE), 100);
        assert_eq!(max_payload_size(4), 0);
    }
}

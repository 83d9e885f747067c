// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Wire-level definitions for the Arm System Control and Management Interface (SCMI).
//!
//! This covers the message header encoding, the protocol identifiers and status codes shared by all
//! protocols, and the layout of the Shared Memory Transport (SMT) mailbox.

#![cfg_attr(not(test), no_std)]

pub mod smt;

use core::fmt::{self, Debug, Formatter};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// Length in bytes of the fixed-size name fields carried in SCMI replies, including the NUL
/// terminator.
pub const NAME_LENGTH: usize = 16;

/// Message ID of `PROTOCOL_VERSION`, common to all protocols.
pub const PROTOCOL_VERSION: u8 = 0x0;
/// Message ID of `PROTOCOL_ATTRIBUTES`, common to all protocols.
pub const PROTOCOL_ATTRIBUTES: u8 = 0x1;
/// Message ID of `PROTOCOL_MESSAGE_ATTRIBUTES`, common to all protocols.
pub const PROTOCOL_MESSAGE_ATTRIBUTES: u8 = 0x2;

/// Errors decoding SCMI wire values.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// The value is not a known SCMI status code.
    #[error("Unrecognised SCMI status {0}")]
    UnrecognisedStatus(i32),
    /// The value is not a known SCMI protocol identifier.
    #[error("Unrecognised SCMI protocol {0:#x}")]
    UnrecognisedProtocolId(u8),
    /// The value is not a known SCMI message type.
    #[error("Unrecognised SCMI message type {0}")]
    UnrecognisedMessageType(u8),
    /// A name does not fit in a [`NAME_LENGTH`] byte field with its terminator.
    #[error("Name longer than {} bytes", NAME_LENGTH - 1)]
    NameTooLong,
}

/// Status codes returned as the first word of every SCMI response.
#[derive(Clone, Copy, Debug, Eq, Error, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[num_enum(error_type(name = Error, constructor = Error::UnrecognisedStatus))]
#[repr(i32)]
pub enum ScmiStatus {
    /// The command completed successfully.
    #[error("Success")]
    Success = 0,
    /// The command or one of its options is not supported.
    #[error("Not supported")]
    NotSupported = -1,
    /// A parameter is malformed or out of its permitted set.
    #[error("Invalid parameters")]
    InvalidParameters = -2,
    /// The caller is not permitted to perform the command.
    #[error("Denied")]
    Denied = -3,
    /// The referenced resource does not exist.
    #[error("Not found")]
    NotFound = -4,
    /// A value is outside the range supported by the resource.
    #[error("Out of range")]
    OutOfRange = -5,
    /// The platform is temporarily unable to handle the command.
    #[error("Busy")]
    Busy = -6,
    /// The transport failed to deliver the message.
    #[error("Communications error")]
    CommsError = -7,
    /// Some unspecified failure.
    #[error("Generic error")]
    GenericError = -8,
    /// The hardware failed to complete the operation.
    #[error("Hardware error")]
    HardwareError = -9,
    /// The message was malformed or violated the protocol.
    #[error("Protocol error")]
    ProtocolError = -10,
}

/// Identifiers of the SCMI protocols.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, Ord, PartialEq, PartialOrd, TryFromPrimitive)]
#[num_enum(error_type(name = Error, constructor = Error::UnrecognisedProtocolId))]
#[repr(u8)]
pub enum ProtocolId {
    /// Base protocol, for discovery.
    Base = 0x10,
    /// Power domain management protocol.
    PowerDomain = 0x11,
    /// System power management protocol.
    SystemPower = 0x12,
    /// Performance domain management protocol.
    Performance = 0x13,
    /// Clock management protocol.
    Clock = 0x14,
    /// Sensor management protocol.
    Sensor = 0x15,
    /// Reset domain management protocol.
    ResetDomain = 0x16,
    /// Voltage domain management protocol.
    VoltageDomain = 0x17,
}

/// The type field of a message header.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[num_enum(error_type(name = Error, constructor = Error::UnrecognisedMessageType))]
#[repr(u8)]
pub enum MessageType {
    /// A synchronous command, answered by a response on the same channel.
    Command = 0,
    /// The completion of an asynchronous command.
    DelayedResponse = 2,
    /// A platform-initiated notification.
    Notification = 3,
}

/// The 32-bit header at the start of every SCMI message.
#[derive(Clone, Copy, Default, Eq, PartialEq)]
pub struct MessageHeader(pub u32);

impl MessageHeader {
    const MESSAGE_ID_MASK: u32 = 0xff;
    const MESSAGE_TYPE_SHIFT: u32 = 8;
    const MESSAGE_TYPE_MASK: u32 = 0x3;
    const PROTOCOL_ID_SHIFT: u32 = 10;
    const PROTOCOL_ID_MASK: u32 = 0xff;
    const TOKEN_SHIFT: u32 = 18;
    const TOKEN_MASK: u32 = 0x3ff;

    /// Builds a header from its fields. Out of range bits of `message_type` and `token` are
    /// discarded.
    pub const fn new(protocol_id: u8, message_id: u8, message_type: u8, token: u16) -> Self {
        Self(
            message_id as u32
                | (message_type as u32 & Self::MESSAGE_TYPE_MASK) << Self::MESSAGE_TYPE_SHIFT
                | (protocol_id as u32) << Self::PROTOCOL_ID_SHIFT
                | (token as u32 & Self::TOKEN_MASK) << Self::TOKEN_SHIFT,
        )
    }

    /// Returns the message identifier, bits [7:0].
    pub const fn message_id(self) -> u8 {
        (self.0 & Self::MESSAGE_ID_MASK) as u8
    }

    /// Returns the raw message type, bits [9:8].
    pub const fn message_type(self) -> u8 {
        ((self.0 >> Self::MESSAGE_TYPE_SHIFT) & Self::MESSAGE_TYPE_MASK) as u8
    }

    /// Returns the protocol identifier, bits [17:10].
    pub const fn protocol_id(self) -> u8 {
        ((self.0 >> Self::PROTOCOL_ID_SHIFT) & Self::PROTOCOL_ID_MASK) as u8
    }

    /// Returns the sequence token, bits [27:18].
    pub const fn token(self) -> u16 {
        ((self.0 >> Self::TOKEN_SHIFT) & Self::TOKEN_MASK) as u16
    }
}

impl Debug for MessageHeader {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("MessageHeader")
            .field("protocol_id", &format_args!("{:#x}", self.protocol_id()))
            .field("message_id", &format_args!("{:#x}", self.message_id()))
            .field("message_type", &self.message_type())
            .field("token", &self.token())
            .finish()
    }
}

/// Encodes `name` into a NUL-padded fixed-size SCMI name field.
pub fn encode_name(name: &str) -> Result<[u8; NAME_LENGTH], Error> {
    let bytes = name.as_bytes();
    if bytes.len() >= NAME_LENGTH {
        return Err(Error::NameTooLong);
    }
    let mut field = [0; NAME_LENGTH];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fields() {
        let header = MessageHeader(0x0004_5006);
        assert_eq!(header.message_id(), 0x06);
        assert_eq!(header.message_type(), 0);
        assert_eq!(header.protocol_id(), 0x14);
        assert_eq!(header.token(), 1);
        assert_eq!(MessageHeader::new(0x14, 0x06, 0, 1), header);
    }

    #[test]
    fn header_truncates_token() {
        let header = MessageHeader::new(0x10, 0, 0, 0x7ff);
        assert_eq!(header.token(), 0x3ff);
        assert_eq!(header.protocol_id(), 0x10);
    }

    #[test]
    fn status_values() {
        assert_eq!(i32::from(ScmiStatus::ProtocolError), -10);
        assert_eq!(ScmiStatus::try_from(-4), Ok(ScmiStatus::NotFound));
        assert_eq!(
            ScmiStatus::try_from(-11),
            Err(Error::UnrecognisedStatus(-11))
        );
    }

    #[test]
    fn protocol_ids() {
        assert_eq!(ProtocolId::try_from(0x16), Ok(ProtocolId::ResetDomain));
        assert_eq!(
            ProtocolId::try_from(0x80),
            Err(Error::UnrecognisedProtocolId(0x80))
        );
    }

    #[test]
    fn names() {
        let field = encode_name("clk-hse").unwrap();
        assert_eq!(&field[..8], b"clk-hse\0");
        assert_eq!(field[15], 0);
        assert_eq!(encode_name("fifteen-chars-x").unwrap()[14], b'x');
        assert_eq!(encode_name("sixteen-chars-xx"), Err(Error::NameTooLong));
    }
}

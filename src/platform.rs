// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The boundary between the server and the environment hosting it.

#[cfg(test)]
pub(crate) mod test;

use crate::ChannelId;

/// Services the host environment provides to the server.
///
/// The host is also responsible for calling [`crate::ScmiServer::process`] when an agent signals
/// a channel, and for installing a log sink with [`crate::logger::init`].
pub trait Host: Send + Sync {
    /// Notifies the agent owning `channel_id` that the reply to its message is in the mailbox.
    ///
    /// Only called if the agent asked for an interrupt in the mailbox flags.
    fn raise_interrupt(&self, channel_id: ChannelId);
}

// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The shared memory transport, which frames SCMI messages in per-agent mailboxes.
//!
//! An agent posts a command by writing the message header and payload, setting the length and then
//! clearing the free bit of the channel status. The server reads the command, writes the reply over
//! it and hands the mailbox back by setting the free bit again.

use crate::{
    AgentId, ChannelId,
    config::ChannelConfig,
    framework::{BindRound, FrameworkContext, InitError, Module, ModuleId},
    mailbox::{MailboxMapping, SharedMailbox},
    platform::Host,
    protocols::Response,
    server::ProcessError,
};
use alloc::{vec, vec::Vec};
use arm_scmi::{
    MessageHeader, ProtocolId, ScmiStatus,
    smt::{
        CHANNEL_STATUS_OFFSET, ChannelStatus, FLAGS_OFFSET, MESSAGE_HEADER_SIZE, MIN_MAILBOX_SIZE,
        MailboxFlags, SmtHeader, max_payload_size,
    },
};
use core::{
    mem::size_of,
    sync::atomic::{Ordering, fence},
};
use log::{debug, info, warn};
use spin::mutex::SpinMutex;
use zerocopy::FromZeros;

/// Size of the status word at the start of every reply.
const STATUS_SIZE: usize = size_of::<i32>();

#[derive(Debug)]
struct Buffers {
    /// Copy of the command payload, taken so the agent cannot change it while it is handled.
    inbound: Vec<u8>,
    /// The reply being built: status word then return values.
    outbound: Vec<u8>,
}

#[derive(Debug)]
struct Channel {
    mailbox: SharedMailbox,
    agent_id: AgentId,
    secure: bool,
    requires_init: bool,
    buffers: SpinMutex<Buffers>,
}

/// The shared memory transport and its channels.
#[derive(Debug)]
pub struct SmtTransport {
    channels: Vec<Channel>,
}

impl SmtTransport {
    /// Creates the transport for the given channels, indexed by channel ID.
    pub fn new(channels: Vec<ChannelConfig>) -> Self {
        Self {
            channels: channels
                .into_iter()
                .map(|config| {
                    let payload_size = max_payload_size(config.mailbox.size());
                    Channel {
                        mailbox: config.mailbox,
                        agent_id: config.agent_id,
                        secure: config.secure,
                        requires_init: config.requires_init,
                        buffers: SpinMutex::new(Buffers {
                            inbound: vec![0; payload_size],
                            outbound: vec![0; payload_size],
                        }),
                    }
                })
                .collect(),
        }
    }

    /// Returns the number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Returns the mailbox of a channel.
    pub fn mailbox(&self, channel_id: ChannelId) -> Option<&SharedMailbox> {
        self.channels.get(channel_id).map(|channel| &channel.mailbox)
    }

    /// Reads the command posted on a channel, lets `handler` build the return values and writes
    /// the reply back.
    ///
    /// Does nothing if the mailbox is still owned by the agent. A command whose length does not fit
    /// the mailbox is answered with `PROTOCOL_ERROR` without calling `handler`.
    pub fn respond(
        &self,
        channel_id: ChannelId,
        host: &dyn Host,
        handler: impl FnOnce(MessageHeader, AgentId, &[u8], &mut Response) -> Result<(), ScmiStatus>,
    ) -> Result<(), ProcessError> {
        let channel = self
            .channels
            .get(channel_id)
            .ok_or(ProcessError::ChannelUnknown(channel_id))?;
        let mut buffers = channel.buffers.lock();
        let Buffers { inbound, outbound } = &mut *buffers;
        let mailbox = &channel.mailbox;
        if outbound.len() < STATUS_SIZE {
            warn!("Channel {channel_id}: mailbox too small to reply");
            release_undersized(channel_id, mailbox, host);
            return Ok(());
        }

        let mut header = mailbox.read_header();
        if ChannelStatus::from_bits_retain(header.channel_status.get()).contains(ChannelStatus::FREE)
        {
            warn!("Channel {channel_id}: signalled without a pending message");
            return Ok(());
        }
        let message_header = MessageHeader(header.message_header.get());
        let length = header.length.get() as usize;

        let (status_word, values) = outbound.split_at_mut(STATUS_SIZE);
        let mut response = Response::new(values);
        let result = match length.checked_sub(MESSAGE_HEADER_SIZE) {
            Some(payload_length) if payload_length <= inbound.len() => {
                let payload = &mut inbound[..payload_length];
                mailbox.read_payload(payload);
                debug!(
                    "Channel {channel_id}: {message_header:?}, {payload_length} bytes of payload"
                );
                handler(message_header, channel.agent_id, payload, &mut response)
            }
            _ => {
                warn!("Channel {channel_id}: invalid message length {length}");
                Err(ScmiStatus::ProtocolError)
            }
        };
        let status = match result {
            Ok(()) => ScmiStatus::Success,
            Err(status) => {
                response.clear();
                status
            }
        };
        let reply_length = STATUS_SIZE + response.len();
        status_word.copy_from_slice(&i32::from(status).to_le_bytes());

        mailbox.write_payload(&outbound[..reply_length]);
        header.length.set((MESSAGE_HEADER_SIZE + reply_length) as u32);
        mailbox.write_header(&header);
        release(
            channel_id,
            mailbox,
            ChannelStatus::FREE,
            MailboxFlags::from_bits_retain(header.flags.get()),
            host,
        );
        Ok(())
    }
}

/// Hands the mailbox back to the agent, interrupting it if it asked to be.
fn release(
    channel_id: ChannelId,
    mailbox: &SharedMailbox,
    status: ChannelStatus,
    flags: MailboxFlags,
    host: &dyn Host,
) {
    // The reply must be visible to the agent before it sees the mailbox as free.
    fence(Ordering::Release);
    mailbox.write_channel_status(status.bits());
    if flags.contains(MailboxFlags::INTERRUPT_ENABLE) {
        host.raise_interrupt(channel_id);
    }
}

/// Frees a mailbox with no room for a reply, flagging the transfer as failed.
///
/// Only the header words which fit the mailbox are touched.
fn release_undersized(channel_id: ChannelId, mailbox: &SharedMailbox, host: &dyn Host) {
    let fits = |offset: usize| offset + size_of::<u32>() <= mailbox.size();
    if !fits(CHANNEL_STATUS_OFFSET) {
        return;
    }
    if ChannelStatus::from_bits_retain(mailbox.channel_status()).contains(ChannelStatus::FREE) {
        return;
    }
    let flags = if fits(FLAGS_OFFSET) {
        MailboxFlags::from_bits_retain(mailbox.read_u32(FLAGS_OFFSET))
    } else {
        MailboxFlags::empty()
    };
    release(
        channel_id,
        mailbox,
        ChannelStatus::FREE | ChannelStatus::ERROR,
        flags,
        host,
    );
}

impl Module for SmtTransport {
    fn id(&self) -> ModuleId {
        ModuleId::Smt
    }

    fn dependencies(&self) -> &'static [ModuleId] {
        &[ModuleId::Protocol(ProtocolId::Base)]
    }

    fn element_count(&self) -> usize {
        self.channels.len()
    }

    fn element_init(&mut self, index: usize) -> Result<(), InitError> {
        let channel = &self.channels[index];
        let size = channel.mailbox.size();
        if size < MIN_MAILBOX_SIZE {
            return Err(InitError::MailboxTooSmall {
                channel: index,
                size,
            });
        }
        if channel.secure && channel.mailbox.mapping() != MailboxMapping::Secure {
            return Err(InitError::InsecureMailbox { channel: index });
        }
        Ok(())
    }

    fn bind(&mut self, round: BindRound, context: &FrameworkContext) -> Result<(), InitError> {
        if round != BindRound::Second {
            return Ok(());
        }
        match self
            .channels
            .iter()
            .position(|channel| !context.agents.contains(channel.agent_id))
        {
            Some(index) => Err(InitError::UnknownAgent {
                module: ModuleId::Smt,
                index,
                agent: self.channels[index].agent_id,
            }),
            None => Ok(()),
        }
    }

    fn start(&mut self, _context: &FrameworkContext) -> Result<(), InitError> {
        for channel in self.channels.iter().filter(|channel| channel.requires_init) {
            channel.mailbox.write_header(&SmtHeader::new_zeroed());
            channel
                .mailbox
                .write_channel_status(ChannelStatus::FREE.bits());
        }
        info!("{} SCMI channels", self.channels.len());
        Ok(())
    }
}

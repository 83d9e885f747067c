// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The SCMI server, which ties the transport, the protocol handlers and the host together.

use crate::{
    ChannelId,
    arbitration::Origin,
    config::{AgentTable, ServerConfig},
    framework::{FrameworkContext, MAX_MODULES, ServerState, start_modules},
    mailbox::SharedMailbox,
    platform::Host,
    protocols::{Dispatcher, MAX_PROTOCOLS, base::BaseProtocol},
    smt::SmtTransport,
};
use arm_scmi::ScmiStatus;
use log::info;
#[cfg(not(feature = "multithreading"))]
use spin::mutex::SpinMutex;
use thiserror::Error;

// Every protocol handler and the transport must fit in the module table.
const _: () = assert!(MAX_PROTOCOLS < MAX_MODULES);

/// Errors returned to the host by [`ScmiServer::process`].
///
/// Everything else, including malformed messages, is reported to the agent in the mailbox.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum ProcessError {
    /// There is no channel with the given ID.
    #[error("Unknown channel {0}")]
    ChannelUnknown(ChannelId),
}

/// An SCMI server instance.
///
/// The server is built from a [`ServerConfig`] and starts all its modules straight away. If start-up
/// fails the server stays dead, and answers every message with `PROTOCOL_ERROR`.
pub struct ScmiServer<H: Host> {
    host: H,
    state: ServerState,
    /// Serialises message processing across all channels.
    #[cfg(not(feature = "multithreading"))]
    busy: SpinMutex<()>,
    transport: SmtTransport,
    dispatcher: Dispatcher,
}

impl<H: Host> ScmiServer<H> {
    /// Creates a server for the given platform configuration and runs its start-up.
    pub fn new(config: ServerConfig, host: H) -> Self {
        let ServerConfig {
            vendor,
            sub_vendor,
            implementation_version,
            agents,
            channels,
            clocks,
            reset_domains,
            voltage_domains,
            perf_domains,
        } = config;
        let agents = AgentTable::new(agents);
        let mut dispatcher = Dispatcher::new(
            BaseProtocol::new(vendor, sub_vendor, implementation_version, agents.clone()),
            clocks,
            reset_domains,
            voltage_domains,
            perf_domains,
        );
        let mut transport = SmtTransport::new(channels);

        let protocols = dispatcher.protocol_ids();
        let context = FrameworkContext {
            agents: &agents,
            protocols: &protocols,
        };
        let mut state = ServerState::Uninit;
        let started = {
            let mut modules = dispatcher.modules_mut();
            modules.push(&mut transport);
            start_modules(&mut modules, &context, &mut state).is_ok()
        };
        if started {
            info!(
                "SCMI server ready: {} agents, {} protocols",
                agents.len(),
                protocols.len()
            );
        }

        Self {
            host,
            state,
            #[cfg(not(feature = "multithreading"))]
            busy: SpinMutex::new(()),
            transport,
            dispatcher,
        }
    }

    /// Returns the host environment.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Returns the lifecycle state reached by start-up.
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Returns the number of channels.
    pub fn channel_count(&self) -> usize {
        self.transport.channel_count()
    }

    /// Returns the mailbox of a channel.
    pub fn mailbox(&self, channel_id: ChannelId) -> Option<&SharedMailbox> {
        self.transport.mailbox(channel_id)
    }

    /// Handles the message the agent has posted on `channel_id`, and writes the reply to the
    /// mailbox.
    ///
    /// Called by the host when the agent signals the channel.
    pub fn process(&self, channel_id: ChannelId) -> Result<(), ProcessError> {
        #[cfg(not(feature = "multithreading"))]
        let _busy = self.busy.lock();

        if self.state == ServerState::Ready {
            self.transport
                .respond(channel_id, &self.host, |header, agent_id, payload, response| {
                    self.dispatcher.dispatch(header, agent_id, payload, response)
                })
        } else {
            self.transport
                .respond(channel_id, &self.host, |_, _, _, _| {
                    Err(ScmiStatus::ProtocolError)
                })
        }
    }

    /// Returns the interface through which other secure drivers share resources with the agents,
    /// or `None` if the server did not start.
    pub fn secure(&self) -> Option<SecureAccess<'_>> {
        (self.state == ServerState::Ready).then_some(SecureAccess {
            dispatcher: &self.dispatcher,
        })
    }
}

/// Requests made by the secure world on resources it shares with the agents.
///
/// References taken here are counted separately from the agents' ones, so that an agent can never
/// switch off a resource the secure world is using.
#[derive(Clone, Copy)]
pub struct SecureAccess<'a> {
    dispatcher: &'a Dispatcher,
}

impl SecureAccess<'_> {
    /// Takes a secure reference on a clock, switching it on if needed.
    pub fn clock_enable(&self, clock_id: u32) -> Result<(), ScmiStatus> {
        self.clock_set(clock_id, true)
    }

    /// Releases a secure reference on a clock, switching it off if no one else holds it.
    ///
    /// Fails with `DENIED` if the secure world holds no reference.
    pub fn clock_disable(&self, clock_id: u32) -> Result<(), ScmiStatus> {
        self.clock_set(clock_id, false)
    }

    /// Returns whether a clock is on.
    pub fn clock_is_enabled(&self, clock_id: u32) -> Result<bool, ScmiStatus> {
        self.dispatcher
            .clock()
            .ok_or(ScmiStatus::NotFound)?
            .is_enabled(clock_id)
    }

    /// Takes a secure reference on a voltage domain, switching its regulator on if needed.
    pub fn voltage_domain_enable(&self, domain_id: u32) -> Result<(), ScmiStatus> {
        self.voltage_domain_set(domain_id, true)
    }

    /// Releases a secure reference on a voltage domain.
    ///
    /// Fails with `DENIED` if the secure world holds no reference.
    pub fn voltage_domain_disable(&self, domain_id: u32) -> Result<(), ScmiStatus> {
        self.voltage_domain_set(domain_id, false)
    }

    fn clock_set(&self, clock_id: u32, enable: bool) -> Result<(), ScmiStatus> {
        self.dispatcher
            .clock()
            .ok_or(ScmiStatus::NotFound)?
            .set_enabled(clock_id, Origin::Secure, enable)
    }

    fn voltage_domain_set(&self, domain_id: u32, enable: bool) -> Result<(), ScmiStatus> {
        self.dispatcher
            .voltage_domain()
            .ok_or(ScmiStatus::NotFound)?
            .set_enabled(domain_id, Origin::Secure, enable)
    }
}

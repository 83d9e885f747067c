// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Platform configuration of the server: agents, channels and the resources exposed to them.
//!
//! A platform builds a [`ServerConfig`] once and hands it to [`crate::ScmiServer::new`]. Nothing
//! here is checked at construction; the server validates the whole configuration while it starts
//! and refuses to serve agents if any of it is inconsistent.

use crate::{
    AgentId,
    devices::{ClockDevice, PerfDevice, ResetDevice, VoltageDevice},
    mailbox::SharedMailbox,
};
use alloc::{boxed::Box, vec::Vec};
use arrayvec::ArrayVec;
use bitflags::{Flags, bitflags};

/// Maximum number of agents, not counting the platform.
pub const MAX_AGENTS: usize = 8;

/// The kind of software an agent is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AgentType {
    /// The platform itself.
    PlatformReserved,
    /// A PSCI implementation in secure firmware.
    Psci,
    /// An operating system.
    Ospm,
    /// Anything else.
    Other,
}

/// An agent allowed to talk to the server.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AgentConfig {
    /// Name reported by `BASE_DISCOVER_AGENT`.
    pub name: &'static str,
    /// The kind of agent.
    pub agent_type: AgentType,
}

/// The agents of a configuration, indexed by agent ID.
#[derive(Clone, Debug, Default)]
pub struct AgentTable {
    agents: Vec<AgentConfig>,
}

impl AgentTable {
    /// Creates a table where `agents[i]` has agent ID `i + 1`.
    pub fn new(agents: Vec<AgentConfig>) -> Self {
        Self { agents }
    }

    /// Returns the number of configured agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Returns true if there are no agents.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Returns the agent with the given ID, if it is configured.
    pub fn get(&self, agent_id: AgentId) -> Option<&AgentConfig> {
        let index = usize::try_from(agent_id).ok()?.checked_sub(1)?;
        self.agents.get(index)
    }

    /// Returns true if `agent_id` is a configured agent.
    pub fn contains(&self, agent_id: AgentId) -> bool {
        self.get(agent_id).is_some()
    }
}

/// Permissions granted to each agent on a single resource.
///
/// Agents which are not listed have no permissions.
#[derive(Clone, Debug)]
pub struct AgentPermissions<P> {
    entries: ArrayVec<(AgentId, P), MAX_AGENTS>,
    overflowed: bool,
}

impl<P: Flags + Copy> AgentPermissions<P> {
    /// Creates a table granting nothing to anyone.
    pub fn new() -> Self {
        Self {
            entries: ArrayVec::new(),
            overflowed: false,
        }
    }

    /// Grants `permissions` to `agent_id`, in addition to anything granted before.
    ///
    /// Listing more than [`MAX_AGENTS`] distinct agents makes the configuration invalid.
    pub fn allow(mut self, agent_id: AgentId, permissions: P) -> Self {
        if let Some((_, existing)) = self.entries.iter_mut().find(|(id, _)| *id == agent_id) {
            *existing = existing.union(permissions);
        } else if self.entries.try_push((agent_id, permissions)).is_err() {
            self.overflowed = true;
        }
        self
    }

    /// Returns the permissions of `agent_id`.
    pub fn get(&self, agent_id: AgentId) -> P {
        self.entries
            .iter()
            .find(|(id, _)| *id == agent_id)
            .map_or(P::empty(), |(_, permissions)| *permissions)
    }

    /// Returns true if `agent_id` holds every permission in `required`.
    pub fn allows(&self, agent_id: AgentId, required: P) -> bool {
        self.get(agent_id).contains(required)
    }

    /// Returns the first agent ID which is not in `agents`, or which could not be recorded.
    pub(crate) fn invalid_agent(&self, agents: &AgentTable) -> Option<AgentId> {
        if self.overflowed {
            return Some(AgentId::MAX);
        }
        self.entries
            .iter()
            .map(|(id, _)| *id)
            .find(|id| !agents.contains(*id))
    }
}

impl<P: Flags + Copy> Default for AgentPermissions<P> {
    fn default() -> Self {
        Self::new()
    }
}

bitflags! {
    /// Per-agent permissions on a clock.
    #[derive(Debug, Eq, PartialEq, Clone, Copy)]
    #[repr(transparent)]
    pub struct ClockPermissions: u32 {
        /// `CLOCK_ATTRIBUTES`.
        const ATTRIBUTES = 1 << 0;
        /// `CLOCK_DESCRIBE_RATES`.
        const DESCRIBE_RATES = 1 << 1;
        /// `CLOCK_RATE_GET`.
        const GET_RATE = 1 << 2;
        /// `CLOCK_RATE_SET`.
        const SET_RATE = 1 << 3;
        /// `CLOCK_CONFIG_SET`.
        const SET_CONFIG = 1 << 4;
    }
}

bitflags! {
    /// Per-agent permissions on a reset domain.
    #[derive(Debug, Eq, PartialEq, Clone, Copy)]
    #[repr(transparent)]
    pub struct ResetPermissions: u32 {
        /// `RESET_DOMAIN_ATTRIBUTES`.
        const ATTRIBUTES = 1 << 0;
        /// `RESET`.
        const RESET = 1 << 1;
    }
}

bitflags! {
    /// Per-agent permissions on a voltage domain.
    #[derive(Debug, Eq, PartialEq, Clone, Copy)]
    #[repr(transparent)]
    pub struct VoltagePermissions: u32 {
        /// `VOLTAGE_DOMAIN_ATTRIBUTES` and `VOLTAGE_DESCRIBE_LEVELS`.
        const ATTRIBUTES = 1 << 0;
        /// `VOLTAGE_CONFIG_GET` and `VOLTAGE_LEVEL_GET`.
        const GET = 1 << 1;
        /// `VOLTAGE_CONFIG_SET`.
        const SET_CONFIG = 1 << 2;
        /// `VOLTAGE_LEVEL_SET`.
        const SET_LEVEL = 1 << 3;
    }
}

bitflags! {
    /// Per-agent permissions on a performance domain. Reading state needs no permission.
    #[derive(Debug, Eq, PartialEq, Clone, Copy)]
    #[repr(transparent)]
    pub struct PerfPermissions: u32 {
        /// `PERFORMANCE_LEVEL_SET`.
        const SET_LEVEL = 1 << 0;
        /// `PERFORMANCE_LIMITS_SET`.
        const SET_LIMITS = 1 << 1;
    }
}

/// A transport channel between one agent and the server.
#[derive(Debug)]
pub struct ChannelConfig {
    /// The shared memory mailbox.
    pub mailbox: SharedMailbox,
    /// The agent which owns the channel.
    pub agent_id: AgentId,
    /// Whether the channel may only be used by secure agents, and so must use secure memory.
    pub secure: bool,
    /// Whether the server must reset the mailbox to the free state when it starts.
    pub requires_init: bool,
}

/// A clock exposed through the clock protocol. Its ID is its index in [`ServerConfig::clocks`].
pub struct ClockConfig {
    /// Name reported to agents, at most 15 bytes.
    pub name: &'static str,
    /// What each agent may do with the clock.
    pub permissions: AgentPermissions<ClockPermissions>,
    /// Whether the clock is left running by the boot stages. The secure world then holds a
    /// reference to it from start-up.
    pub enabled_at_boot: bool,
    /// The driver.
    pub device: Box<dyn ClockDevice>,
}

/// A reset domain exposed through the reset domain protocol.
pub struct ResetDomainConfig {
    /// Name reported to agents, at most 15 bytes.
    pub name: &'static str,
    /// What each agent may do with the domain.
    pub permissions: AgentPermissions<ResetPermissions>,
    /// The driver.
    pub device: Box<dyn ResetDevice>,
}

/// A voltage domain exposed through the voltage domain protocol.
pub struct VoltageDomainConfig {
    /// Name reported to agents, at most 15 bytes.
    pub name: &'static str,
    /// What each agent may do with the domain.
    pub permissions: AgentPermissions<VoltagePermissions>,
    /// Whether the regulator is left on by the boot stages.
    pub enabled_at_boot: bool,
    /// The driver.
    pub device: Box<dyn VoltageDevice>,
}

/// A performance domain exposed through the performance domain protocol.
pub struct PerfDomainConfig {
    /// Name reported to agents, at most 15 bytes.
    pub name: &'static str,
    /// What each agent may change on the domain.
    pub permissions: AgentPermissions<PerfPermissions>,
    /// Minimum interval between level changes, in microseconds.
    pub rate_limit_us: u32,
    /// Frequency of the sustained performance level, in kHz.
    pub sustained_freq_khz: u32,
    /// Performance level which can be sustained indefinitely.
    pub sustained_level: u32,
    /// The driver.
    pub device: Box<dyn PerfDevice>,
}

/// Everything the server needs to know about the platform.
///
/// A protocol is only offered to agents if at least one resource of its kind is configured.
#[derive(Default)]
pub struct ServerConfig {
    /// Vendor name reported by `BASE_DISCOVER_VENDOR`, at most 15 bytes.
    pub vendor: &'static str,
    /// Sub-vendor name reported by `BASE_DISCOVER_SUB_VENDOR`, at most 15 bytes.
    pub sub_vendor: &'static str,
    /// Vendor specific implementation version.
    pub implementation_version: u32,
    /// Agents; the agent ID of `agents[i]` is `i + 1`.
    pub agents: Vec<AgentConfig>,
    /// Channels; the channel ID of `channels[i]` is `i`.
    pub channels: Vec<ChannelConfig>,
    /// Clocks, indexed by clock ID.
    pub clocks: Vec<ClockConfig>,
    /// Reset domains, indexed by domain ID.
    pub reset_domains: Vec<ResetDomainConfig>,
    /// Voltage domains, indexed by domain ID.
    pub voltage_domains: Vec<VoltageDomainConfig>,
    /// Performance domains, indexed by domain ID.
    pub perf_domains: Vec<PerfDomainConfig>,
}

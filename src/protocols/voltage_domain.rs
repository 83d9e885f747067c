// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The voltage domain management protocol.
//!
//! Regulators may be shared with the secure world, so switching them on and off goes through the
//! same arbitration as clocks. A domain's configuration is either one of the architectural on/off
//! modes or a vendor mode, which is passed through to the driver.

use super::{
    Message, Protocol, Response, boot_reference_error, check_names, check_permissions, lookup,
    page,
};
use crate::{
    AgentId,
    arbitration::{Arbitrated, Origin},
    config::{AgentPermissions, VoltageDomainConfig, VoltagePermissions},
    devices::{LevelTable, VoltageCapabilities, VoltageDevice},
    framework::{BindRound, FrameworkContext, InitError, Module, ModuleId},
};
use alloc::{boxed::Box, vec::Vec};
use arm_scmi::{ProtocolId, ScmiStatus};
use log::debug;
use num_enum::TryFromPrimitive;
use spin::mutex::{SpinMutex, SpinMutexGuard};
use zerocopy::{
    FromBytes, Immutable, KnownLayout,
    little_endian::{I32, U32},
};

const VOLTAGE_DOMAIN_VERSION: u32 = 0x0001_0000;

const VOLTAGE_DOMAIN_ATTRIBUTES: u8 = 0x3;
const VOLTAGE_DESCRIBE_LEVELS: u8 = 0x4;
const VOLTAGE_CONFIG_SET: u8 = 0x5;
const VOLTAGE_CONFIG_GET: u8 = 0x6;
const VOLTAGE_LEVEL_SET: u8 = 0x7;
const VOLTAGE_LEVEL_GET: u8 = 0x8;

const LEVEL_SET_ASYNC: u32 = 1 << 0;

const CONFIG_MASK: u32 = 0xf;
const CONFIG_VENDOR: u32 = 1 << 3;

const LEVELS_FORMAT_RANGE: u32 = 1 << 12;
const LEVELS_REMAINING_SHIFT: u32 = 16;

/// Size of a level in a `VOLTAGE_DESCRIBE_LEVELS` reply.
const LEVEL_SIZE: usize = 4;

const MODULE: ModuleId = ModuleId::Protocol(ProtocolId::VoltageDomain);

/// Architectural modes of a voltage domain.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
enum ArchMode {
    Off = 0,
    On = 7,
}

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct DomainIdParameters {
    domain_id: U32,
}

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct DescribeLevelsParameters {
    domain_id: U32,
    level_index: U32,
}

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct ConfigSetParameters {
    domain_id: U32,
    config: U32,
}

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct LevelSetParameters {
    domain_id: U32,
    flags: U32,
    voltage_level: I32,
}

struct DomainState {
    regulator: Arbitrated<Box<dyn VoltageDevice>>,
    vendor_mode: Option<u32>,
}

struct VoltageDomain {
    name: &'static str,
    permissions: AgentPermissions<VoltagePermissions>,
    enabled_at_boot: bool,
    state: SpinMutex<DomainState>,
}

/// Handler of the voltage domain management protocol.
pub struct VoltageDomainProtocol {
    domains: Vec<VoltageDomain>,
}

/// Returns the lowest supported level at or above `requested`.
fn round_level(levels: LevelTable, requested: i32) -> Result<i32, ScmiStatus> {
    match levels {
        LevelTable::Discrete(levels) => levels
            .iter()
            .copied()
            .find(|&level| level >= requested)
            .ok_or(ScmiStatus::OutOfRange),
        LevelTable::Range { min, max, step } => {
            if requested > max {
                return Err(ScmiStatus::OutOfRange);
            }
            if requested <= min || step <= 0 {
                return Ok(requested.max(min));
            }
            let offset = i64::from(requested) - i64::from(min);
            let steps = (offset + i64::from(step) - 1) / i64::from(step);
            let level = i64::from(min) + steps * i64::from(step);
            i32::try_from(level)
                .ok()
                .filter(|&level| level <= max)
                .ok_or(ScmiStatus::OutOfRange)
        }
    }
}

impl VoltageDomainProtocol {
    /// Creates the handler for the given voltage domains, indexed by domain ID.
    pub fn new(domains: Vec<VoltageDomainConfig>) -> Self {
        Self {
            domains: domains
                .into_iter()
                .map(|config| VoltageDomain {
                    name: config.name,
                    permissions: config.permissions,
                    enabled_at_boot: config.enabled_at_boot,
                    state: SpinMutex::new(DomainState {
                        regulator: Arbitrated::new(config.device),
                        vendor_mode: None,
                    }),
                })
                .collect(),
        }
    }

    /// Takes or releases a reference to a regulator for `origin`.
    pub fn set_enabled(
        &self,
        domain_id: u32,
        origin: Origin,
        enable: bool,
    ) -> Result<(), ScmiStatus> {
        let domain = lookup(&self.domains, domain_id)?;
        let mut state = domain.state.lock();
        if enable {
            state.regulator.enable(origin)?;
        } else {
            state.regulator.disable(origin)?;
        }
        Ok(())
    }

    fn access(
        &self,
        agent_id: AgentId,
        domain_id: u32,
        required: VoltagePermissions,
    ) -> Result<(&VoltageDomain, SpinMutexGuard<'_, DomainState>), ScmiStatus> {
        let domain = lookup(&self.domains, domain_id)?;
        if !domain.permissions.allows(agent_id, required) {
            debug!("Agent {agent_id}: voltage domain {domain_id} denied {required:?}");
            return Err(ScmiStatus::Denied);
        }
        let state = domain.state.lock();
        if !state.regulator.device().nonsecure_accessible() {
            return Err(ScmiStatus::Denied);
        }
        Ok((domain, state))
    }

    fn domain_attributes(
        &self,
        message: &Message,
        response: &mut Response,
    ) -> Result<(), ScmiStatus> {
        let parameters: DomainIdParameters = message.parameters()?;
        let (domain, _) = self.access(
            message.agent_id,
            parameters.domain_id.get(),
            VoltagePermissions::ATTRIBUTES,
        )?;
        response.push_u32(0)?;
        response.push_name(domain.name)
    }

    fn describe_levels(
        &self,
        message: &Message,
        response: &mut Response,
    ) -> Result<(), ScmiStatus> {
        let parameters: DescribeLevelsParameters = message.parameters()?;
        let (_, state) = self.access(
            message.agent_id,
            parameters.domain_id.get(),
            VoltagePermissions::ATTRIBUTES,
        )?;
        match state.regulator.device().levels()? {
            LevelTable::Discrete(levels) => {
                let (returned, remaining) = page(
                    levels.len(),
                    parameters.level_index.get(),
                    LEVEL_SIZE,
                    response.remaining().saturating_sub(4),
                )?;
                let start = levels.len() - returned - remaining;
                response.push_u32((remaining as u32) << LEVELS_REMAINING_SHIFT | returned as u32)?;
                for &level in &levels[start..start + returned] {
                    response.push_i32(level)?;
                }
            }
            LevelTable::Range { min, max, step } => {
                response.push_u32(LEVELS_FORMAT_RANGE | 3)?;
                response.push_i32(min)?;
                response.push_i32(max)?;
                response.push_i32(step)?;
            }
        }
        Ok(())
    }

    fn config_set(&self, message: &Message) -> Result<(), ScmiStatus> {
        let parameters: ConfigSetParameters = message.parameters()?;
        let (_, mut state) = self.access(
            message.agent_id,
            parameters.domain_id.get(),
            VoltagePermissions::SET_CONFIG,
        )?;
        let config = parameters.config.get();
        if config & !CONFIG_MASK != 0 {
            return Err(ScmiStatus::InvalidParameters);
        }

        if config & CONFIG_VENDOR != 0 {
            let device = state.regulator.device_mut();
            if !device
                .capabilities()
                .contains(VoltageCapabilities::VENDOR_MODES)
            {
                return Err(ScmiStatus::NotSupported);
            }
            device.set_vendor_mode(config)?;
            state.vendor_mode = Some(config);
            return Ok(());
        }

        match ArchMode::try_from(config) {
            Ok(ArchMode::On) => state.regulator.agent_enable(message.agent_id)?,
            Ok(ArchMode::Off) => state.regulator.agent_disable(message.agent_id)?,
            Err(_) => return Err(ScmiStatus::NotSupported),
        }
        state.vendor_mode = None;
        Ok(())
    }

    fn config_get(&self, message: &Message, response: &mut Response) -> Result<(), ScmiStatus> {
        let parameters: DomainIdParameters = message.parameters()?;
        let (_, state) = self.access(
            message.agent_id,
            parameters.domain_id.get(),
            VoltagePermissions::GET,
        )?;
        let config = state.vendor_mode.unwrap_or(if state.regulator.is_enabled() {
            ArchMode::On as u32
        } else {
            ArchMode::Off as u32
        });
        response.push_u32(config)
    }

    fn level_set(&self, message: &Message) -> Result<(), ScmiStatus> {
        let parameters: LevelSetParameters = message.parameters()?;
        let (_, mut state) = self.access(
            message.agent_id,
            parameters.domain_id.get(),
            VoltagePermissions::SET_LEVEL,
        )?;
        if parameters.flags.get() & LEVEL_SET_ASYNC != 0 {
            return Err(ScmiStatus::NotSupported);
        }
        let device = state.regulator.device_mut();
        if !device
            .capabilities()
            .contains(VoltageCapabilities::SET_LEVEL)
        {
            return Err(ScmiStatus::NotSupported);
        }
        let level = round_level(device.levels()?, parameters.voltage_level.get())?;
        device.set_level(level)?;
        Ok(())
    }

    fn level_get(&self, message: &Message, response: &mut Response) -> Result<(), ScmiStatus> {
        let parameters: DomainIdParameters = message.parameters()?;
        let (_, state) = self.access(
            message.agent_id,
            parameters.domain_id.get(),
            VoltagePermissions::GET,
        )?;
        response.push_i32(state.regulator.device().level()?)
    }
}

impl Module for VoltageDomainProtocol {
    fn id(&self) -> ModuleId {
        MODULE
    }

    fn init(&mut self, context: &FrameworkContext) -> Result<(), InitError> {
        check_names(MODULE, self.domains.iter().map(|domain| domain.name))?;
        check_permissions(
            MODULE,
            self.domains.iter().map(|domain| &domain.permissions),
            context,
        )
    }

    fn element_count(&self) -> usize {
        self.domains.len()
    }

    fn element_init(&mut self, index: usize) -> Result<(), InitError> {
        self.domains[index]
            .state
            .get_mut()
            .regulator
            .device_mut()
            .init()
            .map_err(|error| InitError::Device {
                module: MODULE,
                index,
                error,
            })
    }

    fn bind(&mut self, round: BindRound, _context: &FrameworkContext) -> Result<(), InitError> {
        if round != BindRound::First {
            return Ok(());
        }
        for (index, domain) in self.domains.iter_mut().enumerate() {
            let device = domain.state.get_mut().regulator.device();
            if !device
                .capabilities()
                .contains(VoltageCapabilities::REQUIRED)
            {
                return Err(InitError::MissingCapability {
                    module: MODULE,
                    index,
                });
            }
            if matches!(device.levels(), Ok(LevelTable::Discrete([])) | Err(_)) {
                return Err(InitError::InvalidElement {
                    module: MODULE,
                    index,
                });
            }
        }
        Ok(())
    }

    fn start(&mut self, _context: &FrameworkContext) -> Result<(), InitError> {
        for (index, domain) in self.domains.iter_mut().enumerate() {
            if domain.enabled_at_boot {
                domain
                    .state
                    .get_mut()
                    .regulator
                    .enable(Origin::Secure)
                    .map_err(|error| boot_reference_error(MODULE, index, error))?;
            }
        }
        Ok(())
    }
}

impl Protocol for VoltageDomainProtocol {
    fn protocol_id(&self) -> ProtocolId {
        ProtocolId::VoltageDomain
    }

    fn version(&self) -> u32 {
        VOLTAGE_DOMAIN_VERSION
    }

    fn attributes(&self, _agent_id: AgentId, response: &mut Response) -> Result<(), ScmiStatus> {
        response.push_u32(self.domains.len() as u32 & 0xffff)
    }

    fn supports_message(&self, message_id: u8) -> bool {
        (VOLTAGE_DOMAIN_ATTRIBUTES..=VOLTAGE_LEVEL_GET).contains(&message_id)
    }

    fn handle(&self, message: &Message, response: &mut Response) -> Result<(), ScmiStatus> {
        match message.message_id {
            VOLTAGE_DOMAIN_ATTRIBUTES => self.domain_attributes(message, response),
            VOLTAGE_DESCRIBE_LEVELS => self.describe_levels(message, response),
            VOLTAGE_CONFIG_SET => self.config_set(message),
            VOLTAGE_CONFIG_GET => self.config_get(message, response),
            VOLTAGE_LEVEL_SET => self.level_set(message),
            VOLTAGE_LEVEL_GET => self.level_get(message, response),
            _ => Err(ScmiStatus::NotSupported),
        }
    }
}

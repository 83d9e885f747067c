// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The clock management protocol.

use super::{
    Message, Protocol, Response, boot_reference_error, check_names, check_permissions, lookup,
    page,
};
use crate::{
    AgentId,
    arbitration::{Arbitrated, Origin},
    config::{AgentPermissions, ClockConfig, ClockPermissions},
    devices::{ClockCapabilities, ClockDevice, RateRounding, RateTable},
    framework::{BindRound, FrameworkContext, InitError, Module, ModuleId},
};
use alloc::{boxed::Box, vec::Vec};
use arm_scmi::{ProtocolId, ScmiStatus};
use log::{debug, info};
use spin::mutex::{SpinMutex, SpinMutexGuard};
use zerocopy::{FromBytes, Immutable, KnownLayout, little_endian::U32};

const CLOCK_VERSION: u32 = 0x0001_0000;

const CLOCK_ATTRIBUTES: u8 = 0x3;
const CLOCK_DESCRIBE_RATES: u8 = 0x4;
const CLOCK_RATE_SET: u8 = 0x5;
const CLOCK_RATE_GET: u8 = 0x6;
const CLOCK_CONFIG_SET: u8 = 0x7;

const RATE_SET_ASYNC: u32 = 1 << 0;
const RATE_SET_ROUND_UP: u32 = 1 << 2;
const RATE_SET_ROUND_AUTO: u32 = 1 << 3;

const CONFIG_SET_ENABLE: u32 = 1 << 0;

const ATTRIBUTES_ENABLED: u32 = 1 << 0;

const RATES_FORMAT_RANGE: u32 = 1 << 12;
const RATES_REMAINING_SHIFT: u32 = 16;

/// Size of a rate in a `CLOCK_DESCRIBE_RATES` reply.
const RATE_SIZE: usize = 8;

const MODULE: ModuleId = ModuleId::Protocol(ProtocolId::Clock);

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct ClockIdParameters {
    clock_id: U32,
}

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct DescribeRatesParameters {
    clock_id: U32,
    rate_index: U32,
}

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct RateSetParameters {
    flags: U32,
    clock_id: U32,
    rate_low: U32,
    rate_high: U32,
}

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct ConfigSetParameters {
    clock_id: U32,
    attributes: U32,
}

type ClockState = Arbitrated<Box<dyn ClockDevice>>;

struct Clock {
    name: &'static str,
    permissions: AgentPermissions<ClockPermissions>,
    enabled_at_boot: bool,
    state: SpinMutex<ClockState>,
}

/// Handler of the clock management protocol.
pub struct ClockProtocol {
    clocks: Vec<Clock>,
}

impl ClockProtocol {
    /// Creates the handler for the given clocks, indexed by clock ID.
    pub fn new(clocks: Vec<ClockConfig>) -> Self {
        Self {
            clocks: clocks
                .into_iter()
                .map(|config| Clock {
                    name: config.name,
                    permissions: config.permissions,
                    enabled_at_boot: config.enabled_at_boot,
                    state: SpinMutex::new(Arbitrated::new(config.device)),
                })
                .collect(),
        }
    }

    /// Takes or releases a reference to a clock for `origin`.
    pub fn set_enabled(
        &self,
        clock_id: u32,
        origin: Origin,
        enable: bool,
    ) -> Result<(), ScmiStatus> {
        let clock = lookup(&self.clocks, clock_id)?;
        let mut state = clock.state.lock();
        if enable {
            state.enable(origin)?;
        } else {
            state.disable(origin)?;
        }
        Ok(())
    }

    /// Returns whether a clock is enabled for any world.
    pub fn is_enabled(&self, clock_id: u32) -> Result<bool, ScmiStatus> {
        Ok(lookup(&self.clocks, clock_id)?.state.lock().is_enabled())
    }

    /// Looks up a clock and checks that `agent_id` may use it as `required`.
    fn access(
        &self,
        agent_id: AgentId,
        clock_id: u32,
        required: ClockPermissions,
    ) -> Result<(&Clock, SpinMutexGuard<'_, ClockState>), ScmiStatus> {
        let clock = lookup(&self.clocks, clock_id)?;
        if !clock.permissions.allows(agent_id, required) {
            debug!("Agent {agent_id}: clock {clock_id} denied {required:?}");
            return Err(ScmiStatus::Denied);
        }
        let state = clock.state.lock();
        if !state.device().nonsecure_accessible() {
            debug!("Clock {clock_id} is reserved for the secure world");
            return Err(ScmiStatus::Denied);
        }
        Ok((clock, state))
    }

    fn clock_attributes(
        &self,
        message: &Message,
        response: &mut Response,
    ) -> Result<(), ScmiStatus> {
        let parameters: ClockIdParameters = message.parameters()?;
        let (clock, state) = self.access(
            message.agent_id,
            parameters.clock_id.get(),
            ClockPermissions::ATTRIBUTES,
        )?;
        let attributes = if state.agent_holds(message.agent_id) {
            ATTRIBUTES_ENABLED
        } else {
            0
        };
        response.push_u32(attributes)?;
        response.push_name(clock.name)
    }

    fn describe_rates(&self, message: &Message, response: &mut Response) -> Result<(), ScmiStatus> {
        let parameters: DescribeRatesParameters = message.parameters()?;
        let (_, state) = self.access(
            message.agent_id,
            parameters.clock_id.get(),
            ClockPermissions::DESCRIBE_RATES,
        )?;
        let device = state.device();

        let current;
        let table = if device.capabilities().contains(ClockCapabilities::DESCRIBE_RATES) {
            device.rates()?
        } else {
            current = [device.rate()?];
            RateTable::Discrete(&current)
        };

        match table {
            RateTable::Discrete(rates) => {
                let (returned, remaining) = page(
                    rates.len(),
                    parameters.rate_index.get(),
                    RATE_SIZE,
                    response.remaining().saturating_sub(4),
                )?;
                let start = rates.len() - returned - remaining;
                response.push_u32((remaining as u32) << RATES_REMAINING_SHIFT | returned as u32)?;
                for &rate in &rates[start..start + returned] {
                    response.push_u64(rate)?;
                }
            }
            RateTable::Range { min, max, step } => {
                response.push_u32(RATES_FORMAT_RANGE | 3)?;
                response.push_u64(min)?;
                response.push_u64(max)?;
                response.push_u64(step)?;
            }
        }
        Ok(())
    }

    fn rate_set(&self, message: &Message) -> Result<(), ScmiStatus> {
        let parameters: RateSetParameters = message.parameters()?;
        let (_, mut state) = self.access(
            message.agent_id,
            parameters.clock_id.get(),
            ClockPermissions::SET_RATE,
        )?;
        let flags = parameters.flags.get();
        if flags & RATE_SET_ASYNC != 0 {
            return Err(ScmiStatus::NotSupported);
        }
        if !state
            .device()
            .capabilities()
            .contains(ClockCapabilities::SET_RATE)
        {
            return Err(ScmiStatus::NotSupported);
        }

        let rounding = if flags & RATE_SET_ROUND_AUTO != 0 {
            RateRounding::Nearest
        } else if flags & RATE_SET_ROUND_UP != 0 {
            RateRounding::Up
        } else {
            RateRounding::Down
        };
        let rate = u64::from(parameters.rate_high.get()) << 32 | u64::from(parameters.rate_low.get());
        state.device_mut().set_rate(rate, rounding)?;
        Ok(())
    }

    fn rate_get(&self, message: &Message, response: &mut Response) -> Result<(), ScmiStatus> {
        let parameters: ClockIdParameters = message.parameters()?;
        let (_, state) = self.access(
            message.agent_id,
            parameters.clock_id.get(),
            ClockPermissions::GET_RATE,
        )?;
        response.push_u64(state.device().rate()?)
    }

    fn config_set(&self, message: &Message) -> Result<(), ScmiStatus> {
        let parameters: ConfigSetParameters = message.parameters()?;
        let (_, mut state) = self.access(
            message.agent_id,
            parameters.clock_id.get(),
            ClockPermissions::SET_CONFIG,
        )?;
        if parameters.attributes.get() & CONFIG_SET_ENABLE != 0 {
            state.agent_enable(message.agent_id)?;
        } else {
            state.agent_disable(message.agent_id)?;
        }
        Ok(())
    }
}

impl Module for ClockProtocol {
    fn id(&self) -> ModuleId {
        MODULE
    }

    fn init(&mut self, context: &FrameworkContext) -> Result<(), InitError> {
        check_names(MODULE, self.clocks.iter().map(|clock| clock.name))?;
        check_permissions(
            MODULE,
            self.clocks.iter().map(|clock| &clock.permissions),
            context,
        )
    }

    fn element_count(&self) -> usize {
        self.clocks.len()
    }

    fn element_init(&mut self, index: usize) -> Result<(), InitError> {
        self.clocks[index]
            .state
            .get_mut()
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
        for (index, clock) in self.clocks.iter_mut().enumerate() {
            let capabilities = clock.state.get_mut().device().capabilities();
            if !capabilities.contains(ClockCapabilities::REQUIRED) {
                return Err(InitError::MissingCapability {
                    module: MODULE,
                    index,
                });
            }
        }
        Ok(())
    }

    fn start(&mut self, _context: &FrameworkContext) -> Result<(), InitError> {
        for (index, clock) in self.clocks.iter_mut().enumerate() {
            if clock.enabled_at_boot {
                clock
                    .state
                    .get_mut()
                    .enable(Origin::Secure)
                    .map_err(|error| boot_reference_error(MODULE, index, error))?;
            }
        }
        info!("{} SCMI clocks", self.clocks.len());
        Ok(())
    }
}

impl Protocol for ClockProtocol {
    fn protocol_id(&self) -> ProtocolId {
        ProtocolId::Clock
    }

    fn version(&self) -> u32 {
        CLOCK_VERSION
    }

    fn attributes(&self, _agent_id: AgentId, response: &mut Response) -> Result<(), ScmiStatus> {
        // No asynchronous rate changes, so no pending ones.
        response.push_u32(self.clocks.len() as u32 & 0xffff)
    }

    fn supports_message(&self, message_id: u8) -> bool {
        (CLOCK_ATTRIBUTES..=CLOCK_CONFIG_SET).contains(&message_id)
    }

    fn handle(&self, message: &Message, response: &mut Response) -> Result<(), ScmiStatus> {
        match message.message_id {
            CLOCK_ATTRIBUTES => self.clock_attributes(message, response),
            CLOCK_DESCRIBE_RATES => self.describe_rates(message, response),
            CLOCK_RATE_SET => self.rate_set(message),
            CLOCK_RATE_GET => self.rate_get(message, response),
            CLOCK_CONFIG_SET => self.config_set(message),
            _ => Err(ScmiStatus::NotSupported),
        }
    }
}

// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The performance domain management protocol.

use super::{Message, Protocol, Response, check_names, check_permissions, lookup, page};
use crate::{
    AgentId,
    config::{AgentPermissions, PerfDomainConfig, PerfPermissions},
    devices::{Opp, PerfCapabilities, PerfDevice},
    framework::{BindRound, FrameworkContext, InitError, Module, ModuleId},
};
use alloc::{boxed::Box, vec::Vec};
use arm_scmi::{ProtocolId, ScmiStatus};
use log::{debug, info};
use spin::mutex::{SpinMutex, SpinMutexGuard};
use zerocopy::{FromBytes, Immutable, KnownLayout, little_endian::U32};

const PERF_VERSION: u32 = 0x0002_0000;

const PERFORMANCE_DOMAIN_ATTRIBUTES: u8 = 0x3;
const PERFORMANCE_DESCRIBE_LEVELS: u8 = 0x4;
const PERFORMANCE_LIMITS_SET: u8 = 0x5;
const PERFORMANCE_LIMITS_GET: u8 = 0x6;
const PERFORMANCE_LEVEL_SET: u8 = 0x7;
const PERFORMANCE_LEVEL_GET: u8 = 0x8;

const DOMAIN_SET_LIMITS: u32 = 1 << 31;
const DOMAIN_SET_LEVEL: u32 = 1 << 30;

const LEVELS_REMAINING_SHIFT: u32 = 16;
const RATE_LIMIT_MASK: u32 = 0xf_ffff;

/// Size of an operating point in a `PERFORMANCE_DESCRIBE_LEVELS` reply.
const OPP_SIZE: usize = 12;

const MODULE: ModuleId = ModuleId::Protocol(ProtocolId::Performance);

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
struct LimitsSetParameters {
    domain_id: U32,
    range_max: U32,
    range_min: U32,
}

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct LevelSetParameters {
    domain_id: U32,
    level: U32,
}

struct DomainState {
    device: Box<dyn PerfDevice>,
    min_limit: u32,
    max_limit: u32,
}

impl DomainState {
    fn has_opp(&self, level: u32) -> bool {
        self.device.opps().iter().any(|opp| opp.level == level)
    }

    /// Returns the operating point closest to `level` within the current limits.
    fn clamp(&self, level: u32) -> Option<u32> {
        let opps = self.device.opps().iter().map(|opp| opp.level);
        if level > self.max_limit {
            opps.filter(|&opp| opp <= self.max_limit && opp >= self.min_limit)
                .next_back()
        } else {
            opps.filter(|&opp| opp >= self.min_limit && opp <= self.max_limit)
                .next()
        }
    }
}

struct PerfDomain {
    name: &'static str,
    permissions: AgentPermissions<PerfPermissions>,
    rate_limit_us: u32,
    sustained_freq_khz: u32,
    sustained_level: u32,
    state: SpinMutex<DomainState>,
}

/// Handler of the performance domain management protocol.
pub struct PerfProtocol {
    domains: Vec<PerfDomain>,
}

impl PerfProtocol {
    /// Creates the handler for the given performance domains, indexed by domain ID.
    pub fn new(domains: Vec<PerfDomainConfig>) -> Self {
        Self {
            domains: domains
                .into_iter()
                .map(|config| PerfDomain {
                    name: config.name,
                    permissions: config.permissions,
                    rate_limit_us: config.rate_limit_us,
                    sustained_freq_khz: config.sustained_freq_khz,
                    sustained_level: config.sustained_level,
                    state: SpinMutex::new(DomainState {
                        device: config.device,
                        min_limit: 0,
                        max_limit: u32::MAX,
                    }),
                })
                .collect(),
        }
    }

    fn access(
        &self,
        agent_id: AgentId,
        domain_id: u32,
        required: PerfPermissions,
    ) -> Result<(&PerfDomain, SpinMutexGuard<'_, DomainState>), ScmiStatus> {
        let domain = lookup(&self.domains, domain_id)?;
        if !domain.permissions.allows(agent_id, required) {
            debug!("Agent {agent_id}: performance domain {domain_id} denied {required:?}");
            return Err(ScmiStatus::Denied);
        }
        let state = domain.state.lock();
        if !required.is_empty() && !state.device.nonsecure_accessible() {
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
        let (domain, state) = self.access(
            message.agent_id,
            parameters.domain_id.get(),
            PerfPermissions::empty(),
        )?;
        let permissions = domain.permissions.get(message.agent_id);
        let controllable = state.device.nonsecure_accessible();
        let mut attributes = 0;
        if controllable && permissions.contains(PerfPermissions::SET_LIMITS) {
            attributes |= DOMAIN_SET_LIMITS;
        }
        if controllable && permissions.contains(PerfPermissions::SET_LEVEL) {
            attributes |= DOMAIN_SET_LEVEL;
        }
        response.push_u32(attributes)?;
        response.push_u32(domain.rate_limit_us & RATE_LIMIT_MASK)?;
        response.push_u32(domain.sustained_freq_khz)?;
        response.push_u32(domain.sustained_level)?;
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
            PerfPermissions::empty(),
        )?;
        let opps = state.device.opps();
        let (returned, remaining) = page(
            opps.len(),
            parameters.level_index.get(),
            OPP_SIZE,
            response.remaining().saturating_sub(4),
        )?;
        let start = opps.len() - returned - remaining;
        response.push_u32((remaining as u32) << LEVELS_REMAINING_SHIFT | returned as u32)?;
        for opp in &opps[start..start + returned] {
            response.push_u32(opp.level)?;
            response.push_u32(opp.power_cost)?;
            response.push_u32(u32::from(opp.latency_us))?;
        }
        Ok(())
    }

    fn limits_set(&self, message: &Message) -> Result<(), ScmiStatus> {
        let parameters: LimitsSetParameters = message.parameters()?;
        let (_, mut state) = self.access(
            message.agent_id,
            parameters.domain_id.get(),
            PerfPermissions::SET_LIMITS,
        )?;
        let (min, max) = (parameters.range_min.get(), parameters.range_max.get());
        if min > max {
            return Err(ScmiStatus::InvalidParameters);
        }
        let opps = state.device.opps();
        let (Some(lowest), Some(highest)) = (opps.first(), opps.last()) else {
            return Err(ScmiStatus::GenericError);
        };
        if min < lowest.level || max > highest.level {
            return Err(ScmiStatus::OutOfRange);
        }
        if !opps.iter().any(|opp| opp.level >= min && opp.level <= max) {
            return Err(ScmiStatus::OutOfRange);
        }

        let current = state.device.level()?;
        let (old_min, old_max) = (state.min_limit, state.max_limit);
        state.min_limit = min;
        state.max_limit = max;
        if current < min || current > max {
            let result = match state.clamp(current) {
                Some(target) => state.device.set_level(target).map_err(ScmiStatus::from),
                None => Err(ScmiStatus::OutOfRange),
            };
            if let Err(status) = result {
                state.min_limit = old_min;
                state.max_limit = old_max;
                return Err(status);
            }
        }
        Ok(())
    }

    fn limits_get(&self, message: &Message, response: &mut Response) -> Result<(), ScmiStatus> {
        let parameters: DomainIdParameters = message.parameters()?;
        let (_, state) = self.access(
            message.agent_id,
            parameters.domain_id.get(),
            PerfPermissions::empty(),
        )?;
        response.push_u32(state.max_limit)?;
        response.push_u32(state.min_limit)
    }

    fn level_set(&self, message: &Message) -> Result<(), ScmiStatus> {
        let parameters: LevelSetParameters = message.parameters()?;
        let (_, mut state) = self.access(
            message.agent_id,
            parameters.domain_id.get(),
            PerfPermissions::SET_LEVEL,
        )?;
        let level = parameters.level.get();
        if !state.has_opp(level) || level < state.min_limit || level > state.max_limit {
            return Err(ScmiStatus::OutOfRange);
        }
        state.device.set_level(level)?;
        Ok(())
    }

    fn level_get(&self, message: &Message, response: &mut Response) -> Result<(), ScmiStatus> {
        let parameters: DomainIdParameters = message.parameters()?;
        let (_, state) = self.access(
            message.agent_id,
            parameters.domain_id.get(),
            PerfPermissions::empty(),
        )?;
        response.push_u32(state.device.level()?)
    }
}

fn opps_are_valid(opps: &[Opp]) -> bool {
    !opps.is_empty() && opps.windows(2).all(|pair| pair[0].level < pair[1].level)
}

impl Module for PerfProtocol {
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
        let state = self.domains[index].state.get_mut();
        state.device.init().map_err(|error| InitError::Device {
            module: MODULE,
            index,
            error,
        })?;
        let opps = state.device.opps();
        if !opps_are_valid(opps) {
            return Err(InitError::InvalidElement {
                module: MODULE,
                index,
            });
        }
        state.min_limit = opps[0].level;
        state.max_limit = opps[opps.len() - 1].level;
        Ok(())
    }

    fn bind(&mut self, round: BindRound, _context: &FrameworkContext) -> Result<(), InitError> {
        if round != BindRound::First {
            return Ok(());
        }
        for (index, domain) in self.domains.iter_mut().enumerate() {
            if !domain
                .state
                .get_mut()
                .device
                .capabilities()
                .contains(PerfCapabilities::REQUIRED)
            {
                return Err(InitError::MissingCapability {
                    module: MODULE,
                    index,
                });
            }
        }
        Ok(())
    }

    fn start(&mut self, _context: &FrameworkContext) -> Result<(), InitError> {
        info!("{} SCMI performance domains", self.domains.len());
        Ok(())
    }
}

impl Protocol for PerfProtocol {
    fn protocol_id(&self) -> ProtocolId {
        ProtocolId::Performance
    }

    fn version(&self) -> u32 {
        PERF_VERSION
    }

    fn attributes(&self, _agent_id: AgentId, response: &mut Response) -> Result<(), ScmiStatus> {
        // Power is in abstract units and there is no statistics region.
        response.push_u32(self.domains.len() as u32 & 0xffff)?;
        response.push_u32(0)?;
        response.push_u32(0)?;
        response.push_u32(0)
    }

    fn supports_message(&self, message_id: u8) -> bool {
        (PERFORMANCE_DOMAIN_ATTRIBUTES..=PERFORMANCE_LEVEL_GET).contains(&message_id)
    }

    fn handle(&self, message: &Message, response: &mut Response) -> Result<(), ScmiStatus> {
        match message.message_id {
            PERFORMANCE_DOMAIN_ATTRIBUTES => self.domain_attributes(message, response),
            PERFORMANCE_DESCRIBE_LEVELS => self.describe_levels(message, response),
            PERFORMANCE_LIMITS_SET => self.limits_set(message),
            PERFORMANCE_LIMITS_GET => self.limits_get(message, response),
            PERFORMANCE_LEVEL_SET => self.level_set(message),
            PERFORMANCE_LEVEL_GET => self.level_get(message, response),
            // Notifications and fast channels.
            _ => Err(ScmiStatus::NotSupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::platform::test::{TestBench, name_from_words};
    use arm_scmi::{ProtocolId, ScmiStatus};

    const PERF: u8 = ProtocolId::Performance as u8;

    const OSPM0: usize = 0;
    const OSPM1: usize = 2;

    const CPU: u32 = 0;

    #[test]
    fn protocol_attributes() {
        let bench = TestBench::new();
        assert_eq!(bench.send(OSPM0, PERF, 0x0, &[]).values, [0x0002_0000]);
        assert_eq!(bench.send(OSPM0, PERF, 0x1, &[]).values, [1, 0, 0, 0]);
    }

    #[test]
    fn domain_attributes() {
        let bench = TestBench::new();
        let reply = bench.send(OSPM0, PERF, 0x3, &[CPU]);
        assert_eq!(reply.status, 0);
        assert_eq!(reply.values[..4], [3 << 30, 1000, 650_000, 650]);
        assert_eq!(name_from_words(&reply.values[4..]), "cpu");

        let reply = bench.send(OSPM1, PERF, 0x3, &[CPU]);
        assert_eq!(reply.values[0], 0);
    }

    #[test]
    fn describe_levels() {
        let bench = TestBench::new();
        let reply = bench.send(OSPM0, PERF, 0x4, &[CPU, 1]);
        assert_eq!(reply.status, 0);
        assert_eq!(
            reply.values,
            [2, 650, 300, 100, 800, 500, 100]
        );
    }

    #[test]
    fn level_set_and_get() {
        let bench = TestBench::new();
        assert_eq!(bench.send(OSPM0, PERF, 0x7, &[CPU, 650]).status, 0);
        assert_eq!(bench.probes.cpu.level(), 650);
        assert_eq!(bench.send(OSPM1, PERF, 0x8, &[CPU]).values, [650]);
    }

    #[test]
    fn level_must_be_an_opp() {
        let bench = TestBench::new();
        let reply = bench.send(OSPM0, PERF, 0x7, &[CPU, 700]);
        assert_eq!(reply.status, ScmiStatus::OutOfRange as i32);
        assert_eq!(bench.probes.cpu.set_level_calls(), 0);
    }

    #[test]
    fn level_set_denied() {
        let bench = TestBench::new();
        let reply = bench.send(OSPM1, PERF, 0x7, &[CPU, 650]);
        assert_eq!(reply.status, ScmiStatus::Denied as i32);
        assert_eq!(reply.length, 8);
        assert_eq!(bench.probes.cpu.set_level_calls(), 0);
        assert_eq!(bench.probes.cpu.level(), 400);
    }

    #[test]
    fn limits() {
        let bench = TestBench::new();
        assert_eq!(bench.send(OSPM0, PERF, 0x6, &[CPU]).values, [800, 400]);

        assert_eq!(bench.send(OSPM0, PERF, 0x5, &[CPU, 800, 650]).status, 0);
        assert_eq!(bench.send(OSPM0, PERF, 0x6, &[CPU]).values, [800, 650]);
        // The current level is pulled into the new range.
        assert_eq!(bench.probes.cpu.level(), 650);

        let reply = bench.send(OSPM0, PERF, 0x7, &[CPU, 400]);
        assert_eq!(reply.status, ScmiStatus::OutOfRange as i32);

        let reply = bench.send(OSPM0, PERF, 0x5, &[CPU, 400, 650]);
        assert_eq!(reply.status, ScmiStatus::InvalidParameters as i32);
        let reply = bench.send(OSPM0, PERF, 0x5, &[CPU, 900, 400]);
        assert_eq!(reply.status, ScmiStatus::OutOfRange as i32);
    }

    #[test]
    fn failed_limits_set_keeps_limits() {
        let bench = TestBench::new();
        bench.probes.cpu.fail_reads(true);
        let reply = bench.send(OSPM0, PERF, 0x5, &[CPU, 800, 650]);
        assert_eq!(reply.status, ScmiStatus::HardwareError as i32);
        assert_eq!(bench.probes.cpu.set_level_calls(), 0);

        bench.probes.cpu.fail_reads(false);
        assert_eq!(bench.send(OSPM0, PERF, 0x6, &[CPU]).values, [800, 400]);
        assert_eq!(bench.send(OSPM0, PERF, 0x7, &[CPU, 400]).status, 0);
    }

    #[test]
    fn notifications_not_supported() {
        let bench = TestBench::new();
        let reply = bench.send(OSPM0, PERF, 0x9, &[CPU, 1]);
        assert_eq!(reply.status, ScmiStatus::NotSupported as i32);
        let reply = bench.send(OSPM0, PERF, 0x2, &[0xb]);
        assert_eq!(reply.status, ScmiStatus::NotFound as i32);
    }
}

// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The reset domain management protocol.

use super::{Message, Protocol, Response, check_names, check_permissions, lookup};
use crate::{
    AgentId,
    config::{AgentPermissions, ResetDomainConfig, ResetPermissions},
    devices::{ResetCapabilities, ResetDevice},
    framework::{BindRound, FrameworkContext, InitError, Module, ModuleId},
};
use alloc::{boxed::Box, vec::Vec};
use arm_scmi::{ProtocolId, ScmiStatus};
use core::time::Duration;
use log::{debug, warn};
use spin::mutex::{SpinMutex, SpinMutexGuard};
use zerocopy::{FromBytes, Immutable, KnownLayout, little_endian::U32};

const RESET_DOMAIN_VERSION: u32 = 0x0001_0000;

const RESET_DOMAIN_ATTRIBUTES: u8 = 0x3;
const RESET: u8 = 0x4;

const RESET_AUTONOMOUS: u32 = 1 << 0;
const RESET_EXPLICIT_ASSERT: u32 = 1 << 1;
const RESET_ASYNC: u32 = 1 << 2;

/// Architectural full reset, the only reset type performed autonomously.
const ARCH_RESET_STATE: u32 = 0;

const LATENCY_UNKNOWN: u32 = 0x7fff_ffff;

/// How long each edge of a reset may take before the hardware is considered stuck.
const RESET_TIMEOUT: Duration = Duration::from_millis(1);

const MODULE: ModuleId = ModuleId::Protocol(ProtocolId::ResetDomain);

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct AttributesParameters {
    domain_id: U32,
}

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct ResetParameters {
    domain_id: U32,
    flags: U32,
    reset_state: U32,
}

struct ResetDomain {
    name: &'static str,
    permissions: AgentPermissions<ResetPermissions>,
    device: SpinMutex<Box<dyn ResetDevice>>,
}

/// Handler of the reset domain management protocol.
pub struct ResetDomainProtocol {
    domains: Vec<ResetDomain>,
}

impl ResetDomainProtocol {
    /// Creates the handler for the given reset domains, indexed by domain ID.
    pub fn new(domains: Vec<ResetDomainConfig>) -> Self {
        Self {
            domains: domains
                .into_iter()
                .map(|config| ResetDomain {
                    name: config.name,
                    permissions: config.permissions,
                    device: SpinMutex::new(config.device),
                })
                .collect(),
        }
    }

    fn access(
        &self,
        agent_id: AgentId,
        domain_id: u32,
        required: ResetPermissions,
    ) -> Result<(&ResetDomain, SpinMutexGuard<'_, Box<dyn ResetDevice>>), ScmiStatus> {
        let domain = lookup(&self.domains, domain_id)?;
        if !domain.permissions.allows(agent_id, required) {
            debug!("Agent {agent_id}: reset domain {domain_id} denied {required:?}");
            return Err(ScmiStatus::Denied);
        }
        let device = domain.device.lock();
        if !device.nonsecure_accessible() {
            return Err(ScmiStatus::Denied);
        }
        Ok((domain, device))
    }

    fn domain_attributes(
        &self,
        message: &Message,
        response: &mut Response,
    ) -> Result<(), ScmiStatus> {
        let parameters: AttributesParameters = message.parameters()?;
        let (domain, _) = self.access(
            message.agent_id,
            parameters.domain_id.get(),
            ResetPermissions::ATTRIBUTES,
        )?;
        // Neither asynchronous resets nor notifications are supported.
        response.push_u32(0)?;
        response.push_u32(LATENCY_UNKNOWN)?;
        response.push_name(domain.name)
    }

    fn reset(&self, message: &Message) -> Result<(), ScmiStatus> {
        let parameters: ResetParameters = message.parameters()?;
        let domain_id = parameters.domain_id.get();
        let (_, mut device) = self.access(message.agent_id, domain_id, ResetPermissions::RESET)?;
        let flags = parameters.flags.get();
        if flags & RESET_ASYNC != 0 {
            return Err(ScmiStatus::NotSupported);
        }

        if flags & RESET_AUTONOMOUS != 0 {
            if parameters.reset_state.get() != ARCH_RESET_STATE {
                return Err(ScmiStatus::NotSupported);
            }
            device.assert(RESET_TIMEOUT).inspect_err(|e| {
                warn!("Reset domain {domain_id}: assert failed: {e}");
            })?;
            device.deassert(RESET_TIMEOUT).inspect_err(|e| {
                warn!("Reset domain {domain_id}: deassert failed: {e}");
            })?;
        } else if flags & RESET_EXPLICIT_ASSERT != 0 {
            device.assert(RESET_TIMEOUT)?;
        } else {
            device.deassert(RESET_TIMEOUT)?;
        }
        Ok(())
    }
}

impl Module for ResetDomainProtocol {
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
            .device
            .get_mut()
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
        match self.domains.iter_mut().position(|domain| {
            !domain
                .device
                .get_mut()
                .capabilities()
                .contains(ResetCapabilities::REQUIRED)
        }) {
            Some(index) => Err(InitError::MissingCapability {
                module: MODULE,
                index,
            }),
            None => Ok(()),
        }
    }
}

impl Protocol for ResetDomainProtocol {
    fn protocol_id(&self) -> ProtocolId {
        ProtocolId::ResetDomain
    }

    fn version(&self) -> u32 {
        RESET_DOMAIN_VERSION
    }

    fn attributes(&self, _agent_id: AgentId, response: &mut Response) -> Result<(), ScmiStatus> {
        response.push_u32(self.domains.len() as u32 & 0xffff)
    }

    fn supports_message(&self, message_id: u8) -> bool {
        matches!(message_id, RESET_DOMAIN_ATTRIBUTES | RESET)
    }

    fn handle(&self, message: &Message, response: &mut Response) -> Result<(), ScmiStatus> {
        match message.message_id {
            RESET_DOMAIN_ATTRIBUTES => self.domain_attributes(message, response),
            RESET => self.reset(message),
            _ => Err(ScmiStatus::NotSupported),
        }
    }
}

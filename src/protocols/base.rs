// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The base protocol, through which agents discover the implementation.

use super::{Message, Protocol, Response, check_names};
use crate::{
    AgentId,
    config::{AgentTable, MAX_AGENTS},
    framework::{BindRound, FrameworkContext, InitError, Module, ModuleId},
};
use arm_scmi::{ProtocolId, ScmiStatus};
use arrayvec::ArrayVec;
use zerocopy::{FromBytes, Immutable, KnownLayout, little_endian::U32};

const BASE_VERSION: u32 = 0x0002_0000;

const DISCOVER_VENDOR: u8 = 0x3;
const DISCOVER_SUB_VENDOR: u8 = 0x4;
const DISCOVER_IMPLEMENTATION_VERSION: u8 = 0x5;
const DISCOVER_LIST_PROTOCOLS: u8 = 0x6;
const DISCOVER_AGENT: u8 = 0x7;

const MODULE: ModuleId = ModuleId::Protocol(ProtocolId::Base);

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct ListProtocolsParameters {
    skip: U32,
}

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct DiscoverAgentParameters {
    agent_id: U32,
}

/// Handler of the base protocol.
pub struct BaseProtocol {
    vendor: &'static str,
    sub_vendor: &'static str,
    implementation_version: u32,
    agents: AgentTable,
    /// Other registered protocols, in ascending order.
    protocols: ArrayVec<ProtocolId, { super::MAX_PROTOCOLS }>,
}

impl BaseProtocol {
    /// Creates the handler for the given vendor identification and agents.
    pub fn new(
        vendor: &'static str,
        sub_vendor: &'static str,
        implementation_version: u32,
        agents: AgentTable,
    ) -> Self {
        Self {
            vendor,
            sub_vendor,
            implementation_version,
            agents,
            protocols: ArrayVec::new(),
        }
    }

    fn list_protocols(&self, message: &Message, response: &mut Response) -> Result<(), ScmiStatus> {
        let parameters: ListProtocolsParameters = message.parameters()?;
        let skip = usize::try_from(parameters.skip.get()).unwrap_or(usize::MAX);
        let Some(listed) = self.protocols.get(skip..) else {
            return Err(ScmiStatus::InvalidParameters);
        };

        // One byte per protocol, padded to whole words.
        let capacity = response.remaining().saturating_sub(4) & !3;
        let listed = &listed[..listed.len().min(capacity)];
        response.push_u32(listed.len() as u32)?;
        for chunk in listed.chunks(4) {
            let mut word = [0u8; 4];
            for (byte, protocol) in word.iter_mut().zip(chunk) {
                *byte = (*protocol).into();
            }
            response.push_bytes(&word)?;
        }
        Ok(())
    }

    fn discover_agent(&self, message: &Message, response: &mut Response) -> Result<(), ScmiStatus> {
        let parameters: DiscoverAgentParameters = message.parameters()?;
        let agent_id = match parameters.agent_id.get() {
            0 => message.agent_id,
            agent_id => agent_id,
        };
        let agent = self.agents.get(agent_id).ok_or(ScmiStatus::NotFound)?;
        response.push_name(agent.name)
    }
}

impl Module for BaseProtocol {
    fn id(&self) -> ModuleId {
        MODULE
    }

    fn dependencies(&self) -> &'static [ModuleId] {
        &[
            ModuleId::Protocol(ProtocolId::Performance),
            ModuleId::Protocol(ProtocolId::Clock),
            ModuleId::Protocol(ProtocolId::ResetDomain),
            ModuleId::Protocol(ProtocolId::VoltageDomain),
        ]
    }

    fn init(&mut self, context: &FrameworkContext) -> Result<(), InitError> {
        if context.agents.len() > MAX_AGENTS {
            return Err(InitError::TooManyAgents);
        }
        check_names(MODULE, [self.vendor, self.sub_vendor].into_iter())?;
        check_names(
            MODULE,
            (1..=context.agents.len() as AgentId)
                .filter_map(|id| context.agents.get(id))
                .map(|agent| agent.name),
        )
    }

    fn bind(&mut self, round: BindRound, context: &FrameworkContext) -> Result<(), InitError> {
        if round == BindRound::First {
            self.protocols = context
                .protocols
                .iter()
                .copied()
                .filter(|&protocol| protocol != ProtocolId::Base)
                .collect();
        }
        Ok(())
    }
}

impl Protocol for BaseProtocol {
    fn protocol_id(&self) -> ProtocolId {
        ProtocolId::Base
    }

    fn version(&self) -> u32 {
        BASE_VERSION
    }

    fn attributes(&self, _agent_id: AgentId, response: &mut Response) -> Result<(), ScmiStatus> {
        response.push_u32((self.agents.len() as u32) << 8 | self.protocols.len() as u32)
    }

    fn supports_message(&self, message_id: u8) -> bool {
        (DISCOVER_VENDOR..=DISCOVER_AGENT).contains(&message_id)
    }

    fn handle(&self, message: &Message, response: &mut Response) -> Result<(), ScmiStatus> {
        match message.message_id {
            DISCOVER_VENDOR => {
                message.expect_empty()?;
                response.push_name(self.vendor)
            }
            DISCOVER_SUB_VENDOR => {
                message.expect_empty()?;
                response.push_name(self.sub_vendor)
            }
            DISCOVER_IMPLEMENTATION_VERSION => {
                message.expect_empty()?;
                response.push_u32(self.implementation_version)
            }
            DISCOVER_LIST_PROTOCOLS => self.list_protocols(message, response),
            DISCOVER_AGENT => self.discover_agent(message, response),
            _ => Err(ScmiStatus::NotSupported),
        }
    }
}

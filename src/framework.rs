// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Start-up of the server's modules.
//!
//! Every module goes through the same phases: module init, element init, two bind rounds and start.
//! Each phase runs over all modules before the next begins, in an order where a module comes after
//! every module it depends on. The first failure stops start-up and leaves the server dead.

use crate::{
    AgentId, ChannelId,
    config::AgentTable,
    devices::DriverError,
};
use arm_scmi::ProtocolId;
use arrayvec::ArrayVec;
use log::{debug, error, info};
use thiserror::Error;

/// Maximum number of modules the framework can start.
pub const MAX_MODULES: usize = 8;

/// Identifies a module of the server.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModuleId {
    /// The shared memory transport.
    Smt,
    /// The handler of an SCMI protocol.
    Protocol(ProtocolId),
}

/// The bind rounds, in the order they run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BindRound {
    /// Modules check the devices and services they use directly.
    First,
    /// Modules check what depends on other modules having bound.
    Second,
}

/// Where the server is in its lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServerState {
    /// Nothing has run yet.
    Uninit,
    /// Module init is running.
    ModuleInit,
    /// Element init is running.
    ElementInit,
    /// The first bind round is running.
    BindFirst,
    /// The second bind round is running.
    BindSecond,
    /// Start is running.
    Start,
    /// Start-up completed, messages are served.
    Ready,
    /// Start-up failed, every message is answered with `PROTOCOL_ERROR`.
    Dead,
}

/// Reasons start-up can fail.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum InitError {
    /// The modules' dependencies form a cycle.
    #[error("Module dependencies form a cycle")]
    DependencyCycle,
    /// More modules were registered than the framework supports.
    #[error("Too many modules")]
    TooManyModules,
    /// More agents were configured than are supported.
    #[error("Too many agents")]
    TooManyAgents,
    /// A mailbox is too small to hold a message header.
    #[error("Channel {channel}: mailbox of {size} bytes is too small")]
    MailboxTooSmall {
        /// The channel.
        channel: ChannelId,
        /// Size of its mailbox.
        size: usize,
    },
    /// A secure channel's mailbox is in non-secure memory.
    #[error("Channel {channel}: secure channel uses a non-secure mailbox")]
    InsecureMailbox {
        /// The channel.
        channel: ChannelId,
    },
    /// A resource or channel refers to an agent which is not configured.
    #[error("{module:?} element {index}: unknown agent {agent}")]
    UnknownAgent {
        /// The module owning the element.
        module: ModuleId,
        /// The element.
        index: usize,
        /// The agent ID it refers to.
        agent: AgentId,
    },
    /// A name does not fit in an SCMI name field, or is not unique.
    #[error("{module:?} element {index}: invalid name")]
    InvalidName {
        /// The module owning the element.
        module: ModuleId,
        /// The element.
        index: usize,
    },
    /// A device lacks an operation the protocol needs.
    #[error("{module:?} element {index}: device lacks required capabilities")]
    MissingCapability {
        /// The module owning the element.
        module: ModuleId,
        /// The element.
        index: usize,
    },
    /// An element's configuration is inconsistent.
    #[error("{module:?} element {index}: invalid configuration")]
    InvalidElement {
        /// The module owning the element.
        module: ModuleId,
        /// The element.
        index: usize,
    },
    /// A device failed to initialise.
    #[error("{module:?} element {index}: device error {error}")]
    Device {
        /// The module owning the element.
        module: ModuleId,
        /// The element.
        index: usize,
        /// What the driver reported.
        error: DriverError,
    },
}

/// Read-only facts about the whole server, available to modules during start-up.
#[derive(Debug)]
pub struct FrameworkContext<'a> {
    /// The configured agents.
    pub agents: &'a AgentTable,
    /// The protocols with a registered handler, in ascending order, including the base protocol.
    pub protocols: &'a [ProtocolId],
}

/// A unit of the server which takes part in start-up.
///
/// All hooks default to doing nothing.
pub trait Module {
    /// Returns the module's identifier.
    fn id(&self) -> ModuleId;

    /// Returns the modules which must complete each phase before this one. Modules which are not
    /// registered are ignored.
    fn dependencies(&self) -> &'static [ModuleId] {
        &[]
    }

    /// Validates the module's configuration.
    fn init(&mut self, _context: &FrameworkContext) -> Result<(), InitError> {
        Ok(())
    }

    /// Returns the number of elements, i.e. resources or channels, the module owns.
    fn element_count(&self) -> usize {
        0
    }

    /// Initialises element `index`.
    fn element_init(&mut self, _index: usize) -> Result<(), InitError> {
        Ok(())
    }

    /// Checks the module's relations with other modules and devices.
    fn bind(&mut self, _round: BindRound, _context: &FrameworkContext) -> Result<(), InitError> {
        Ok(())
    }

    /// Puts the module into service.
    fn start(&mut self, _context: &FrameworkContext) -> Result<(), InitError> {
        Ok(())
    }
}

/// Runs every phase of start-up over `modules`, updating `state` as it goes.
///
/// On failure `state` is left as [`ServerState::Dead`].
pub fn start_modules(
    modules: &mut [&mut dyn Module],
    context: &FrameworkContext,
    state: &mut ServerState,
) -> Result<(), InitError> {
    let result = run_phases(modules, context, state);
    match &result {
        Ok(()) => {
            *state = ServerState::Ready;
            info!("Started {} modules", modules.len());
        }
        Err(e) => {
            error!("Start-up failed in state {state:?}: {e}");
            *state = ServerState::Dead;
        }
    }
    result
}

fn run_phases(
    modules: &mut [&mut dyn Module],
    context: &FrameworkContext,
    state: &mut ServerState,
) -> Result<(), InitError> {
    let order = init_order(modules)?;
    debug!(
        "Module order: {:?}",
        order.iter().map(|&i| modules[i].id()).collect::<ArrayVec<_, MAX_MODULES>>()
    );

    *state = ServerState::ModuleInit;
    for &i in &order {
        modules[i].init(context)?;
    }

    *state = ServerState::ElementInit;
    for &i in &order {
        for index in 0..modules[i].element_count() {
            modules[i].element_init(index)?;
        }
    }

    *state = ServerState::BindFirst;
    for &i in &order {
        modules[i].bind(BindRound::First, context)?;
    }

    *state = ServerState::BindSecond;
    for &i in &order {
        modules[i].bind(BindRound::Second, context)?;
    }

    *state = ServerState::Start;
    for &i in &order {
        modules[i].start(context)?;
    }

    Ok(())
}

/// Sorts the modules so that each comes after the modules it depends on.
fn init_order(modules: &[&mut dyn Module]) -> Result<ArrayVec<usize, MAX_MODULES>, InitError> {
    if modules.len() > MAX_MODULES {
        return Err(InitError::TooManyModules);
    }
    let ids: ArrayVec<ModuleId, MAX_MODULES> = modules.iter().map(|module| module.id()).collect();
    let mut order = ArrayVec::<usize, MAX_MODULES>::new();
    while order.len() < modules.len() {
        let ready = (0..modules.len()).find(|&i| {
            !order.contains(&i)
                && modules[i].dependencies().iter().all(|dependency| {
                    match ids.iter().position(|id| id == dependency) {
                        Some(j) => order.contains(&j),
                        None => true,
                    }
                })
        });
        match ready {
            Some(i) => order.push(i),
            None => return Err(InitError::DependencyCycle),
        }
    }
    Ok(order)
}

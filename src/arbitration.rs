// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Sharing of on/off resources between the secure world and SCMI agents.
//!
//! A resource stays physically enabled while either world holds a reference to it. SCMI commands
//! always act for the non-secure world, and each agent holds at most one reference.

use crate::{
    AgentId,
    devices::{DriverError, Gate},
};
use arm_scmi::ScmiStatus;
use log::warn;
use thiserror::Error;

/// The world on whose behalf a resource is enabled or disabled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Origin {
    /// Secure world firmware, through [`crate::SecureAccess`].
    Secure,
    /// An SCMI agent.
    NonSecure,
}

/// Errors from changing a reference count.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum ArbitrationError {
    /// The caller does not hold a reference to release, or holds too many to take another.
    #[error("Reference count would leave its range")]
    Denied,
    /// The device failed to switch.
    #[error("Device failed to switch: {0}")]
    Device(DriverError),
}

impl From<ArbitrationError> for ScmiStatus {
    fn from(error: ArbitrationError) -> Self {
        match error {
            ArbitrationError::Denied => Self::Denied,
            ArbitrationError::Device(_) => Self::HardwareError,
        }
    }
}

/// A device switched on while any secure or non-secure reference to it is held.
#[derive(Debug)]
pub struct Arbitrated<D> {
    device: D,
    secure_refcount: u32,
    nonsecure_refcount: u32,
    /// Bit n is set while agent n holds a non-secure reference.
    agent_holders: u64,
}

impl<D: Gate> Arbitrated<D> {
    /// Wraps a device which is currently off.
    pub const fn new(device: D) -> Self {
        Self {
            device,
            secure_refcount: 0,
            nonsecure_refcount: 0,
            agent_holders: 0,
        }
    }

    /// Returns the wrapped device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Returns the wrapped device, for operations other than switching it on and off.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Returns whether the device is enabled, i.e. some reference is held.
    pub fn is_enabled(&self) -> bool {
        self.secure_refcount != 0 || self.nonsecure_refcount != 0
    }

    /// Returns the number of references held by `origin`.
    pub fn refcount(&self, origin: Origin) -> u32 {
        match origin {
            Origin::Secure => self.secure_refcount,
            Origin::NonSecure => self.nonsecure_refcount,
        }
    }

    /// Takes a reference for `origin`, switching the device on if it was off.
    ///
    /// If the device fails to switch on the reference is not taken.
    pub fn enable(&mut self, origin: Origin) -> Result<(), ArbitrationError> {
        let was_enabled = self.is_enabled();
        let count = self.count_mut(origin);
        let Some(incremented) = count.checked_add(1) else {
            return Err(ArbitrationError::Denied);
        };
        if !was_enabled {
            self.device.enable().map_err(ArbitrationError::Device)?;
        }
        *self.count_mut(origin) = incremented;
        Ok(())
    }

    /// Releases a reference held by `origin`, switching the device off if it was the last one.
    ///
    /// Fails without side effects if `origin` holds no reference. If the device fails to switch off
    /// the reference is kept.
    pub fn disable(&mut self, origin: Origin) -> Result<(), ArbitrationError> {
        let count = self.count_mut(origin);
        if *count == 0 {
            return Err(ArbitrationError::Denied);
        }
        *count -= 1;
        if !self.is_enabled() {
            if let Err(e) = self.device.disable() {
                warn!("Failed to disable device, keeping reference: {e}");
                *self.count_mut(origin) += 1;
                return Err(ArbitrationError::Device(e));
            }
        }
        Ok(())
    }

    /// Returns whether `agent` holds a reference.
    pub fn agent_holds(&self, agent: AgentId) -> bool {
        Self::agent_bit(agent) & self.agent_holders != 0
    }

    /// Takes a non-secure reference for `agent` unless it already holds one.
    pub fn agent_enable(&mut self, agent: AgentId) -> Result<(), ArbitrationError> {
        if self.agent_holds(agent) {
            return Ok(());
        }
        self.enable(Origin::NonSecure)?;
        self.agent_holders |= Self::agent_bit(agent);
        Ok(())
    }

    /// Releases the non-secure reference held by `agent`.
    ///
    /// Fails with [`ArbitrationError::Denied`] if the agent holds no reference.
    pub fn agent_disable(&mut self, agent: AgentId) -> Result<(), ArbitrationError> {
        if !self.agent_holds(agent) {
            return Err(ArbitrationError::Denied);
        }
        self.disable(Origin::NonSecure)?;
        self.agent_holders &= !Self::agent_bit(agent);
        Ok(())
    }

    fn count_mut(&mut self, origin: Origin) -> &mut u32 {
        match origin {
            Origin::Secure => &mut self.secure_refcount,
            Origin::NonSecure => &mut self.nonsecure_refcount,
        }
    }

    fn agent_bit(agent: AgentId) -> u64 {
        1u64.checked_shl(agent).unwrap_or(0)
    }
}

// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Interfaces to the platform drivers which back the SCMI resources.
//!
//! Each resource class has a device trait. A device advertises what it can do through a
//! capabilities set, which the protocol handlers check while the server starts, so that a
//! misconfigured platform is detected before any agent talks to it.

use arm_scmi::ScmiStatus;
use bitflags::bitflags;
use core::time::Duration;
use thiserror::Error;

/// Errors reported by a device driver.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// The device does not implement the operation.
    #[error("Operation not supported")]
    NotSupported,
    /// The device rejected a parameter.
    #[error("Invalid parameter")]
    InvalidParameter,
    /// A requested value is outside the range the device supports.
    #[error("Value out of range")]
    OutOfRange,
    /// The device may not be accessed by the caller.
    #[error("Access denied")]
    Access,
    /// The hardware did not complete the operation in time.
    #[error("Timed out")]
    Timeout,
    /// The device is temporarily unavailable.
    #[error("Busy")]
    Busy,
    /// The hardware reported a failure.
    #[error("Hardware failure")]
    Hardware,
}

impl From<DriverError> for ScmiStatus {
    fn from(error: DriverError) -> Self {
        match error {
            DriverError::NotSupported => Self::NotSupported,
            DriverError::InvalidParameter => Self::InvalidParameters,
            DriverError::OutOfRange => Self::OutOfRange,
            DriverError::Access => Self::Denied,
            DriverError::Timeout | DriverError::Hardware => Self::HardwareError,
            DriverError::Busy => Self::Busy,
        }
    }
}

/// A device which can be switched on and off.
pub trait Gate {
    /// Switches the device on.
    fn enable(&mut self) -> Result<(), DriverError>;

    /// Switches the device off.
    fn disable(&mut self) -> Result<(), DriverError>;
}

impl<G: Gate + ?Sized> Gate for alloc::boxed::Box<G> {
    fn enable(&mut self) -> Result<(), DriverError> {
        (**self).enable()
    }

    fn disable(&mut self) -> Result<(), DriverError> {
        (**self).disable()
    }
}

bitflags! {
    /// Operations implemented by a [`ClockDevice`].
    #[derive(Debug, Eq, PartialEq, Clone, Copy)]
    #[repr(transparent)]
    pub struct ClockCapabilities: u32 {
        /// [`ClockDevice::rate`].
        const GET_RATE = 1 << 0;
        /// [`ClockDevice::set_rate`].
        const SET_RATE = 1 << 1;
        /// [`Gate::enable`] and [`Gate::disable`].
        const SET_STATE = 1 << 2;
        /// [`ClockDevice::rates`].
        const DESCRIBE_RATES = 1 << 3;
    }
}

impl ClockCapabilities {
    /// Capabilities every clock must have to be exposed over SCMI.
    pub const REQUIRED: Self = Self::GET_RATE.union(Self::SET_STATE);
}

/// How a requested clock rate is rounded to one the clock supports.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RateRounding {
    /// Round down to the nearest supported rate.
    Down,
    /// Round up to the nearest supported rate.
    Up,
    /// Round to the closest supported rate.
    Nearest,
}

/// The rates a clock supports, in Hz.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RateTable<'a> {
    /// An explicit list of rates, in ascending order.
    Discrete(&'a [u64]),
    /// Every rate from `min` to `max` inclusive, in increments of `step`.
    Range {
        /// Lowest rate.
        min: u64,
        /// Highest rate.
        max: u64,
        /// Distance between supported rates.
        step: u64,
    },
}

/// A clock driver.
pub trait ClockDevice: Gate + Send {
    /// Returns the operations this clock implements.
    fn capabilities(&self) -> ClockCapabilities;

    /// Prepares the device while the server starts.
    fn init(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    /// Returns the current rate in Hz.
    fn rate(&self) -> Result<u64, DriverError>;

    /// Changes the rate.
    fn set_rate(&mut self, _rate: u64, _rounding: RateRounding) -> Result<(), DriverError> {
        Err(DriverError::NotSupported)
    }

    /// Returns the supported rates.
    fn rates(&self) -> Result<RateTable<'_>, DriverError> {
        Err(DriverError::NotSupported)
    }

    /// Returns whether the clock may currently be controlled from the non-secure world.
    fn nonsecure_accessible(&self) -> bool {
        true
    }
}

bitflags! {
    /// Operations implemented by a [`ResetDevice`].
    #[derive(Debug, Eq, PartialEq, Clone, Copy)]
    #[repr(transparent)]
    pub struct ResetCapabilities: u32 {
        /// [`ResetDevice::assert`].
        const ASSERT = 1 << 0;
        /// [`ResetDevice::deassert`].
        const DEASSERT = 1 << 1;
    }
}

impl ResetCapabilities {
    /// Capabilities every reset domain must have to be exposed over SCMI.
    pub const REQUIRED: Self = Self::ASSERT.union(Self::DEASSERT);
}

/// A reset line driver.
pub trait ResetDevice: Send {
    /// Returns the operations this reset line implements.
    fn capabilities(&self) -> ResetCapabilities;

    /// Prepares the device while the server starts.
    fn init(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    /// Puts the domain into reset, waiting at most `timeout` for the hardware to acknowledge.
    fn assert(&mut self, timeout: Duration) -> Result<(), DriverError>;

    /// Takes the domain out of reset, waiting at most `timeout` for the hardware to acknowledge.
    fn deassert(&mut self, timeout: Duration) -> Result<(), DriverError>;

    /// Returns whether the reset line may currently be controlled from the non-secure world.
    fn nonsecure_accessible(&self) -> bool {
        true
    }
}

bitflags! {
    /// Operations implemented by a [`VoltageDevice`].
    #[derive(Debug, Eq, PartialEq, Clone, Copy)]
    #[repr(transparent)]
    pub struct VoltageCapabilities: u32 {
        /// [`VoltageDevice::level`].
        const GET_LEVEL = 1 << 0;
        /// [`VoltageDevice::set_level`].
        const SET_LEVEL = 1 << 1;
        /// [`Gate::enable`] and [`Gate::disable`].
        const SET_STATE = 1 << 2;
        /// [`VoltageDevice::levels`].
        const DESCRIBE_LEVELS = 1 << 3;
        /// [`VoltageDevice::set_vendor_mode`].
        const VENDOR_MODES = 1 << 4;
    }
}

impl VoltageCapabilities {
    /// Capabilities every voltage domain must have to be exposed over SCMI.
    pub const REQUIRED: Self = Self::GET_LEVEL
        .union(Self::SET_STATE)
        .union(Self::DESCRIBE_LEVELS);
}

/// The levels a voltage domain supports, in microvolts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LevelTable<'a> {
    /// An explicit list of levels, in ascending order.
    Discrete(&'a [i32]),
    /// Every level from `min` to `max` inclusive, in increments of `step`.
    Range {
        /// Lowest level.
        min: i32,
        /// Highest level.
        max: i32,
        /// Distance between supported levels.
        step: i32,
    },
}

/// A regulator driver.
pub trait VoltageDevice: Gate + Send {
    /// Returns the operations this regulator implements.
    fn capabilities(&self) -> VoltageCapabilities;

    /// Prepares the device while the server starts.
    fn init(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    /// Returns the current output level in microvolts.
    fn level(&self) -> Result<i32, DriverError>;

    /// Changes the output level. `level_uv` is always one of the supported levels.
    fn set_level(&mut self, _level_uv: i32) -> Result<(), DriverError> {
        Err(DriverError::NotSupported)
    }

    /// Returns the supported levels.
    fn levels(&self) -> Result<LevelTable<'_>, DriverError>;

    /// Switches to an implementation defined operating mode.
    fn set_vendor_mode(&mut self, _mode: u32) -> Result<(), DriverError> {
        Err(DriverError::NotSupported)
    }

    /// Returns whether the regulator may currently be controlled from the non-secure world.
    fn nonsecure_accessible(&self) -> bool {
        true
    }
}

bitflags! {
    /// Operations implemented by a [`PerfDevice`].
    #[derive(Debug, Eq, PartialEq, Clone, Copy)]
    #[repr(transparent)]
    pub struct PerfCapabilities: u32 {
        /// [`PerfDevice::level`].
        const GET_LEVEL = 1 << 0;
        /// [`PerfDevice::set_level`].
        const SET_LEVEL = 1 << 1;
    }
}

impl PerfCapabilities {
    /// Capabilities every performance domain must have to be exposed over SCMI.
    pub const REQUIRED: Self = Self::GET_LEVEL.union(Self::SET_LEVEL);
}

/// An operating performance point.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Opp {
    /// Abstract performance level.
    pub level: u32,
    /// Power cost of running at this level, in the platform's power unit.
    pub power_cost: u32,
    /// Worst case transition latency into this level, in microseconds.
    pub latency_us: u16,
}

/// A DVFS driver for a performance domain.
pub trait PerfDevice: Send {
    /// Returns the operations this domain implements.
    fn capabilities(&self) -> PerfCapabilities;

    /// Prepares the device while the server starts.
    fn init(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    /// Returns the operating points, in ascending order of level.
    fn opps(&self) -> &[Opp];

    /// Returns the current performance level.
    fn level(&self) -> Result<u32, DriverError>;

    /// Switches to the operating point with the given level.
    fn set_level(&mut self, level: u32) -> Result<(), DriverError>;

    /// Returns whether the domain may currently be controlled from the non-secure world.
    fn nonsecure_accessible(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_status() {
        assert_eq!(ScmiStatus::from(DriverError::Access), ScmiStatus::Denied);
        assert_eq!(
            ScmiStatus::from(DriverError::Timeout),
            ScmiStatus::HardwareError
        );
        assert_eq!(
            ScmiStatus::from(DriverError::Hardware),
            ScmiStatus::HardwareError
        );
        assert_eq!(
            ScmiStatus::from(DriverError::OutOfRange),
            ScmiStatus::OutOfRange
        );
    }

    #[test]
    fn required_capabilities() {
        assert!(ClockCapabilities::all().contains(ClockCapabilities::REQUIRED));
        assert!(!ClockCapabilities::GET_RATE.contains(ClockCapabilities::REQUIRED));
        assert_eq!(
            ResetCapabilities::REQUIRED,
            ResetCapabilities::ASSERT | ResetCapabilities::DEASSERT
        );
    }
}

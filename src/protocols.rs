// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! SCMI protocol handlers and the dispatcher which routes commands to them.

pub mod base;
pub mod clock;
pub mod perf;
pub mod reset_domain;
pub mod voltage_domain;

use self::{
    base::BaseProtocol, clock::ClockProtocol, perf::PerfProtocol,
    reset_domain::ResetDomainProtocol, voltage_domain::VoltageDomainProtocol,
};
use crate::{
    AgentId,
    arbitration::ArbitrationError,
    config::{
        AgentPermissions, ClockConfig, PerfDomainConfig, ResetDomainConfig,
        VoltageDomainConfig,
    },
    devices::DriverError,
    framework::{FrameworkContext, InitError, MAX_MODULES, Module, ModuleId},
};
use alloc::vec::Vec;
use arm_scmi::{
    MessageHeader, MessageType, NAME_LENGTH, PROTOCOL_ATTRIBUTES, PROTOCOL_MESSAGE_ATTRIBUTES,
    PROTOCOL_VERSION, ProtocolId, ScmiStatus, encode_name,
};
use arrayvec::ArrayVec;
use bitflags::Flags;
use log::debug;
use zerocopy::{FromBytes, Immutable, KnownLayout, little_endian::U32};

/// Maximum number of protocols, including the base protocol.
pub const MAX_PROTOCOLS: usize = 5;

/// A command addressed to a protocol.
#[derive(Clone, Copy, Debug)]
pub struct Message<'a> {
    /// The agent which owns the channel the command arrived on.
    pub agent_id: AgentId,
    /// The message ID from the header.
    pub message_id: u8,
    /// The parameters following the header.
    pub payload: &'a [u8],
}

impl Message<'_> {
    /// Decodes the payload as `T`. The payload must be exactly the size of `T`.
    pub fn parameters<T: FromBytes>(&self) -> Result<T, ScmiStatus> {
        T::read_from_bytes(self.payload).map_err(|_| {
            debug!(
                "Message {:#x}: payload of {} bytes, expected {}",
                self.message_id,
                self.payload.len(),
                size_of::<T>()
            );
            ScmiStatus::ProtocolError
        })
    }

    /// Checks that the message has no parameters.
    pub fn expect_empty(&self) -> Result<(), ScmiStatus> {
        if self.payload.is_empty() {
            Ok(())
        } else {
            Err(ScmiStatus::ProtocolError)
        }
    }
}

/// The return values of a command, following the status word.
#[derive(Debug)]
pub struct Response<'a> {
    buffer: &'a mut [u8],
    len: usize,
}

impl<'a> Response<'a> {
    /// Creates an empty response which can grow to the size of `buffer`.
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, len: 0 }
    }

    /// Returns the number of bytes written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of bytes which can still be written.
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.len
    }

    /// Returns the bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    /// Appends raw bytes.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), ScmiStatus> {
        let end = self.len + bytes.len();
        let Some(dest) = self.buffer.get_mut(self.len..end) else {
            return Err(ScmiStatus::GenericError);
        };
        dest.copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    /// Appends a little-endian word.
    pub fn push_u32(&mut self, value: u32) -> Result<(), ScmiStatus> {
        self.push_bytes(&value.to_le_bytes())
    }

    /// Appends a signed little-endian word.
    pub fn push_i32(&mut self, value: i32) -> Result<(), ScmiStatus> {
        self.push_bytes(&value.to_le_bytes())
    }

    /// Appends a 64-bit value as its low word followed by its high word.
    pub fn push_u64(&mut self, value: u64) -> Result<(), ScmiStatus> {
        self.push_bytes(&value.to_le_bytes())
    }

    /// Appends a NUL-padded name field.
    pub fn push_name(&mut self, name: &str) -> Result<(), ScmiStatus> {
        let field = encode_name(name).map_err(|_| ScmiStatus::GenericError)?;
        self.push_bytes(&field)
    }

    /// Discards everything written so far.
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

/// The handler of one SCMI protocol.
///
/// The messages common to every protocol are answered by the [`Dispatcher`] using
/// [`Protocol::version`], [`Protocol::attributes`] and [`Protocol::supports_message`]; everything
/// else is passed to [`Protocol::handle`].
pub trait Protocol: Module + Send + Sync {
    /// Returns the protocol identifier.
    fn protocol_id(&self) -> ProtocolId;

    /// Returns the protocol version reported by `PROTOCOL_VERSION`.
    fn version(&self) -> u32;

    /// Writes the return values of `PROTOCOL_ATTRIBUTES` for `agent_id`.
    fn attributes(&self, agent_id: AgentId, response: &mut Response) -> Result<(), ScmiStatus>;

    /// Returns true if the protocol specific message `message_id` is implemented.
    fn supports_message(&self, message_id: u8) -> bool;

    /// Handles a protocol specific message, writing its return values to `response`.
    fn handle(&self, message: &Message, response: &mut Response) -> Result<(), ScmiStatus>;
}

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct MessageAttributesParameters {
    message_id: U32,
}

/// Routes commands to the registered protocol handlers.
pub struct Dispatcher {
    base: BaseProtocol,
    clock: Option<ClockProtocol>,
    reset_domain: Option<ResetDomainProtocol>,
    voltage_domain: Option<VoltageDomainProtocol>,
    perf: Option<PerfProtocol>,
}

impl Dispatcher {
    /// Creates handlers for every protocol with at least one configured resource.
    pub fn new(
        base: BaseProtocol,
        clocks: Vec<ClockConfig>,
        reset_domains: Vec<ResetDomainConfig>,
        voltage_domains: Vec<VoltageDomainConfig>,
        perf_domains: Vec<PerfDomainConfig>,
    ) -> Self {
        Self {
            base,
            clock: (!clocks.is_empty()).then(|| ClockProtocol::new(clocks)),
            reset_domain: (!reset_domains.is_empty())
                .then(|| ResetDomainProtocol::new(reset_domains)),
            voltage_domain: (!voltage_domains.is_empty())
                .then(|| VoltageDomainProtocol::new(voltage_domains)),
            perf: (!perf_domains.is_empty()).then(|| PerfProtocol::new(perf_domains)),
        }
    }

    /// Returns the registered protocols in ascending order of ID.
    pub fn protocol_ids(&self) -> ArrayVec<ProtocolId, MAX_PROTOCOLS> {
        let mut ids: ArrayVec<ProtocolId, MAX_PROTOCOLS> =
            self.protocols().map(|protocol| protocol.protocol_id()).collect();
        ids.sort_unstable();
        ids
    }

    /// Returns the handler for `protocol_id`, if it is registered.
    pub fn protocol(&self, protocol_id: u8) -> Option<&dyn Protocol> {
        self.protocols()
            .find(|protocol| u8::from(protocol.protocol_id()) == protocol_id)
    }

    /// Returns the clock protocol handler, if registered.
    pub fn clock(&self) -> Option<&ClockProtocol> {
        self.clock.as_ref()
    }

    /// Returns the voltage domain protocol handler, if registered.
    pub fn voltage_domain(&self) -> Option<&VoltageDomainProtocol> {
        self.voltage_domain.as_ref()
    }

    /// Returns every handler as a module for start-up.
    pub fn modules_mut(&mut self) -> ArrayVec<&mut dyn Module, MAX_MODULES> {
        let Self {
            base,
            clock,
            reset_domain,
            voltage_domain,
            perf,
        } = self;
        let mut modules = ArrayVec::<&mut dyn Module, MAX_MODULES>::new();
        modules.push(base);
        if let Some(clock) = clock {
            modules.push(clock);
        }
        if let Some(reset_domain) = reset_domain {
            modules.push(reset_domain);
        }
        if let Some(voltage_domain) = voltage_domain {
            modules.push(voltage_domain);
        }
        if let Some(perf) = perf {
            modules.push(perf);
        }
        modules
    }

    /// Handles the command with the given header and payload from `agent_id`.
    ///
    /// On success the return values have been written to `response`. On failure the caller
    /// replies with the returned status alone.
    pub fn dispatch(
        &self,
        header: MessageHeader,
        agent_id: AgentId,
        payload: &[u8],
        response: &mut Response,
    ) -> Result<(), ScmiStatus> {
        let Some(protocol) = self.protocol(header.protocol_id()) else {
            debug!("Agent {agent_id}: unsupported protocol in {header:?}");
            return Err(ScmiStatus::NotSupported);
        };
        if header.message_type() != u8::from(MessageType::Command) {
            return Err(ScmiStatus::NotSupported);
        }

        let message = Message {
            agent_id,
            message_id: header.message_id(),
            payload,
        };
        let result = match message.message_id {
            PROTOCOL_VERSION => message
                .expect_empty()
                .and_then(|()| response.push_u32(protocol.version())),
            PROTOCOL_ATTRIBUTES => message
                .expect_empty()
                .and_then(|()| protocol.attributes(agent_id, response)),
            PROTOCOL_MESSAGE_ATTRIBUTES => {
                let parameters: MessageAttributesParameters = message.parameters()?;
                match u8::try_from(parameters.message_id.get()) {
                    Ok(id) if id <= PROTOCOL_MESSAGE_ATTRIBUTES || protocol.supports_message(id) => {
                        response.push_u32(0)
                    }
                    _ => Err(ScmiStatus::NotFound),
                }
            }
            _ => protocol.handle(&message, response),
        };
        if result.is_err() {
            response.clear();
        }
        result
    }

    fn protocols(&self) -> impl Iterator<Item = &dyn Protocol> {
        [
            Some(&self.base as &dyn Protocol),
            self.clock.as_ref().map(|p| p as &dyn Protocol),
            self.reset_domain.as_ref().map(|p| p as &dyn Protocol),
            self.voltage_domain.as_ref().map(|p| p as &dyn Protocol),
            self.perf.as_ref().map(|p| p as &dyn Protocol),
        ]
        .into_iter()
        .flatten()
    }
}

/// Checks that every name fits an SCMI name field and that no two are equal.
pub(crate) fn check_names<'a>(
    module: ModuleId,
    names: impl Iterator<Item = &'a str> + Clone,
) -> Result<(), InitError> {
    for (index, name) in names.clone().enumerate() {
        if name.is_empty()
            || name.len() >= NAME_LENGTH
            || names.clone().take(index).any(|other| other == name)
        {
            return Err(InitError::InvalidName { module, index });
        }
    }
    Ok(())
}

/// Checks that every agent named in the permission tables exists.
pub(crate) fn check_permissions<'a, P: Flags + Copy + 'a>(
    module: ModuleId,
    permissions: impl Iterator<Item = &'a AgentPermissions<P>>,
    context: &FrameworkContext,
) -> Result<(), InitError> {
    for (index, permissions) in permissions.enumerate() {
        if let Some(agent) = permissions.invalid_agent(context.agents) {
            return Err(InitError::UnknownAgent {
                module,
                index,
                agent,
            });
        }
    }
    Ok(())
}

/// Turns a failure to take a resource's boot-time secure reference into a start-up error.
pub(crate) fn boot_reference_error(
    module: ModuleId,
    index: usize,
    error: ArbitrationError,
) -> InitError {
    InitError::Device {
        module,
        index,
        error: match error {
            ArbitrationError::Device(error) => error,
            ArbitrationError::Denied => DriverError::Hardware,
        },
    }
}

/// Returns the resource at `id`, or `NOT_FOUND`.
pub(crate) fn lookup<T>(resources: &[T], id: u32) -> Result<&T, ScmiStatus> {
    usize::try_from(id)
        .ok()
        .and_then(|index| resources.get(index))
        .ok_or(ScmiStatus::NotFound)
}

/// Returns how many of `total - start` entries of `entry_size` bytes fit in `available` bytes, and
/// how many are left over.
///
/// Fails with `INVALID_PARAMETERS` if `start` is past the end.
pub(crate) fn page(
    total: usize,
    start: u32,
    entry_size: usize,
    available: usize,
) -> Result<(usize, usize), ScmiStatus> {
    let start = usize::try_from(start).map_err(|_| ScmiStatus::InvalidParameters)?;
    let left = total
        .checked_sub(start)
        .ok_or(ScmiStatus::InvalidParameters)?;
    // The count field of paged replies is 12 bits wide.
    let returned = left.min(available / entry_size).min(0xfff);
    Ok((returned, left - returned))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_bounds() {
        let mut buffer = [0u8; 8];
        let mut response = Response::new(&mut buffer);
        response.push_u32(0x1234_5678).unwrap();
        assert_eq!(response.remaining(), 4);
        assert_eq!(response.push_u64(1), Err(ScmiStatus::GenericError));
        response.push_i32(-2).unwrap();
        assert_eq!(response.as_bytes(), &[0x78, 0x56, 0x34, 0x12, 0xfe, 0xff, 0xff, 0xff]);
        response.clear();
        assert!(response.is_empty());
    }

    #[test]
    fn parameters_need_exact_size() {
        let message = Message {
            agent_id: 1,
            message_id: 3,
            payload: &[1, 0, 0, 0, 0],
        };
        assert_eq!(
            message.parameters::<MessageAttributesParameters>().err(),
            Some(ScmiStatus::ProtocolError)
        );
        let message = Message {
            payload: &[1, 0, 0, 0],
            ..message
        };
        assert_eq!(
            message
                .parameters::<MessageAttributesParameters>()
                .unwrap()
                .message_id
                .get(),
            1
        );
        assert_eq!(message.expect_empty(), Err(ScmiStatus::ProtocolError));
    }

    #[test]
    fn names_are_checked() {
        let module = ModuleId::Protocol(ProtocolId::Clock);
        assert_eq!(check_names(module, ["a", "b"].into_iter()), Ok(()));
        assert_eq!(
            check_names(module, ["a", "b", "a"].into_iter()),
            Err(InitError::InvalidName { module, index: 2 })
        );
        assert_eq!(
            check_names(module, ["sixteen-chars-xx"].into_iter()),
            Err(InitError::InvalidName { module, index: 0 })
        );
    }

    #[test]
    fn boot_reference_errors() {
        let module = ModuleId::Protocol(ProtocolId::VoltageDomain);
        assert_eq!(
            boot_reference_error(module, 1, ArbitrationError::Device(DriverError::Timeout)),
            InitError::Device {
                module,
                index: 1,
                error: DriverError::Timeout
            }
        );
        assert_eq!(
            boot_reference_error(module, 0, ArbitrationError::Denied),
            InitError::Device {
                module,
                index: 0,
                error: DriverError::Hardware
            }
        );
    }

    #[test]
    fn paging() {
        assert_eq!(page(10, 0, 8, 40), Ok((5, 5)));
        assert_eq!(page(10, 8, 8, 40), Ok((2, 0)));
        assert_eq!(page(10, 10, 8, 40), Ok((0, 0)));
        assert_eq!(page(10, 11, 8, 40), Err(ScmiStatus::InvalidParameters));
    }

    #[test]
    fn lookup_out_of_range() {
        assert_eq!(lookup(&[1, 2], 1), Ok(&2));
        assert_eq!(lookup(&[1, 2], 0xffff), Err(ScmiStatus::NotFound));
    }
}

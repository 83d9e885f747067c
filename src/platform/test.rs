// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! A software platform for unit tests, modelled on an STM32MP1 board.
//!
//! Every fake device shares a probe with the test, through which the test can observe the calls
//! the server made and inject failures.

use super::Host;
use crate::{
    AgentId, ChannelId, ScmiServer,
    config::{
        AgentConfig, AgentPermissions, AgentType, ChannelConfig, ClockConfig, ClockPermissions,
        PerfDomainConfig, PerfPermissions, ResetDomainConfig, ResetPermissions, ServerConfig,
        VoltageDomainConfig, VoltagePermissions,
    },
    devices::{
        ClockCapabilities, ClockDevice, DriverError, Gate, LevelTable, Opp, PerfCapabilities,
        PerfDevice, RateRounding, RateTable, ResetCapabilities, ResetDevice, VoltageCapabilities,
        VoltageDevice,
    },
    logger::{self, LogSink},
    mailbox::{MailboxMapping, SharedMailbox},
};
use arm_scmi::{
    MessageHeader,
    smt::{
        FLAGS_OFFSET, HEADER_SIZE, LENGTH_OFFSET, MESSAGE_HEADER_OFFSET, MESSAGE_HEADER_SIZE,
        MailboxFlags,
    },
};
use core::{fmt, time::Duration};
use spin::mutex::SpinMutex;
use std::{
    io::{Write, stdout},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering},
    },
};

const OSPM0: AgentId = 1;
const PSCI: AgentId = 2;
const OSPM1: AgentId = 3;

/// Size of each test mailbox, in words.
const MAILBOX_WORDS: usize = 32;

const MPU_RATES: [u64; 3] = [400_000_000, 650_000_000, 800_000_000];
const SD_LEVELS: [i32; 3] = [1_800_000, 2_900_000, 3_300_000];
const REG11_LEVELS: [i32; 1] = [1_100_000];

/// Log sink writing to standard output.
pub struct StdOutSink;

impl LogSink for StdOutSink {
    fn write_fmt(&self, args: fmt::Arguments) {
        stdout().write_fmt(args).unwrap();
    }

    fn flush(&self) {
        stdout().flush().unwrap();
    }
}

/// A host which records the interrupts raised by the server.
#[derive(Debug, Default)]
pub struct TestHost {
    interrupts: SpinMutex<Vec<ChannelId>>,
}

impl TestHost {
    /// Returns the channels interrupts were raised for, in order.
    pub fn interrupts(&self) -> Vec<ChannelId> {
        self.interrupts.lock().clone()
    }
}

impl Host for TestHost {
    fn raise_interrupt(&self, channel_id: ChannelId) {
        self.interrupts.lock().push(channel_id);
    }
}

/// Observes and controls a [`FakeClock`].
#[derive(Debug, Default)]
pub struct ClockProbe {
    rate: AtomicU64,
    on: AtomicBool,
    fail_next_switch: AtomicBool,
    enable_calls: AtomicU32,
    disable_calls: AtomicU32,
    set_rate_calls: AtomicU32,
}

impl ClockProbe {
    fn new(rate: u64) -> Arc<Self> {
        Arc::new(Self {
            rate: AtomicU64::new(rate),
            ..Default::default()
        })
    }

    pub fn rate(&self) -> u64 {
        self.rate.load(Ordering::SeqCst)
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    pub fn enable_calls(&self) -> u32 {
        self.enable_calls.load(Ordering::SeqCst)
    }

    pub fn disable_calls(&self) -> u32 {
        self.disable_calls.load(Ordering::SeqCst)
    }

    pub fn set_rate_calls(&self) -> u32 {
        self.set_rate_calls.load(Ordering::SeqCst)
    }

    /// Makes the next enable or disable fail with a hardware error.
    pub fn fail_next_switch(&self) {
        self.fail_next_switch.store(true, Ordering::SeqCst);
    }

    fn switch(&self, on: bool) -> Result<(), DriverError> {
        if self.fail_next_switch.swap(false, Ordering::SeqCst) {
            return Err(DriverError::Hardware);
        }
        if on {
            self.enable_calls.fetch_add(1, Ordering::SeqCst);
        } else {
            self.disable_calls.fetch_add(1, Ordering::SeqCst);
        }
        self.on.store(on, Ordering::SeqCst);
        Ok(())
    }
}

/// A clock with a fixed set of supported rates.
pub struct FakeClock {
    probe: Arc<ClockProbe>,
    capabilities: ClockCapabilities,
    rates: RateTable<'static>,
    secure_only: bool,
}

fn round_rate(table: RateTable, rate: u64, rounding: RateRounding) -> Result<u64, DriverError> {
    let supported: Vec<u64> = match table {
        RateTable::Discrete(rates) => rates.to_vec(),
        RateTable::Range { min, max, step } => (min..=max).step_by(step as usize).collect(),
    };
    let below = supported.iter().copied().filter(|&r| r <= rate).max();
    let above = supported.iter().copied().filter(|&r| r >= rate).min();
    match rounding {
        RateRounding::Down => below,
        RateRounding::Up => above,
        RateRounding::Nearest => match (below, above) {
            (Some(below), Some(above)) if rate - below <= above - rate => Some(below),
            (below, above) => above.or(below),
        },
    }
    .ok_or(DriverError::OutOfRange)
}

impl Gate for FakeClock {
    fn enable(&mut self) -> Result<(), DriverError> {
        self.probe.switch(true)
    }

    fn disable(&mut self) -> Result<(), DriverError> {
        self.probe.switch(false)
    }
}

impl ClockDevice for FakeClock {
    fn capabilities(&self) -> ClockCapabilities {
        self.capabilities
    }

    fn rate(&self) -> Result<u64, DriverError> {
        Ok(self.probe.rate())
    }

    fn set_rate(&mut self, rate: u64, rounding: RateRounding) -> Result<(), DriverError> {
        self.probe.set_rate_calls.fetch_add(1, Ordering::SeqCst);
        let rate = round_rate(self.rates, rate, rounding)?;
        self.probe.rate.store(rate, Ordering::SeqCst);
        Ok(())
    }

    fn rates(&self) -> Result<RateTable<'_>, DriverError> {
        if self.capabilities.contains(ClockCapabilities::DESCRIBE_RATES) {
            Ok(self.rates)
        } else {
            Err(DriverError::NotSupported)
        }
    }

    fn nonsecure_accessible(&self) -> bool {
        !self.secure_only
    }
}

/// Observes and controls a [`FakeReset`].
#[derive(Debug, Default)]
pub struct ResetProbe {
    asserted: AtomicBool,
    latency_ns: AtomicU64,
    assert_calls: AtomicU32,
    deassert_calls: AtomicU32,
}

impl ResetProbe {
    pub fn is_asserted(&self) -> bool {
        self.asserted.load(Ordering::SeqCst)
    }

    pub fn assert_calls(&self) -> u32 {
        self.assert_calls.load(Ordering::SeqCst)
    }

    pub fn deassert_calls(&self) -> u32 {
        self.deassert_calls.load(Ordering::SeqCst)
    }

    /// Sets how long the hardware takes to acknowledge each edge.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ns
            .store(latency.as_nanos() as u64, Ordering::SeqCst);
    }

    fn edge(&self, asserted: bool, timeout: Duration) -> Result<(), DriverError> {
        if Duration::from_nanos(self.latency_ns.load(Ordering::SeqCst)) > timeout {
            return Err(DriverError::Timeout);
        }
        self.asserted.store(asserted, Ordering::SeqCst);
        Ok(())
    }
}

/// A reset line which acknowledges after a configurable latency.
pub struct FakeReset {
    probe: Arc<ResetProbe>,
    secure_only: bool,
}

impl ResetDevice for FakeReset {
    fn capabilities(&self) -> ResetCapabilities {
        ResetCapabilities::REQUIRED
    }

    fn assert(&mut self, timeout: Duration) -> Result<(), DriverError> {
        self.probe.assert_calls.fetch_add(1, Ordering::SeqCst);
        self.probe.edge(true, timeout)
    }

    fn deassert(&mut self, timeout: Duration) -> Result<(), DriverError> {
        self.probe.deassert_calls.fetch_add(1, Ordering::SeqCst);
        self.probe.edge(false, timeout)
    }

    fn nonsecure_accessible(&self) -> bool {
        !self.secure_only
    }
}

/// Observes a [`FakeRegulator`].
#[derive(Debug, Default)]
pub struct RegulatorProbe {
    level: AtomicI32,
    on: AtomicBool,
    disable_calls: AtomicU32,
    set_level_calls: AtomicU32,
}

impl RegulatorProbe {
    fn new(level: i32) -> Arc<Self> {
        Arc::new(Self {
            level: AtomicI32::new(level),
            ..Default::default()
        })
    }

    pub fn level(&self) -> i32 {
        self.level.load(Ordering::SeqCst)
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    pub fn disable_calls(&self) -> u32 {
        self.disable_calls.load(Ordering::SeqCst)
    }

    pub fn set_level_calls(&self) -> u32 {
        self.set_level_calls.load(Ordering::SeqCst)
    }
}

/// A regulator.
pub struct FakeRegulator {
    probe: Arc<RegulatorProbe>,
    capabilities: VoltageCapabilities,
    levels: LevelTable<'static>,
}

impl Gate for FakeRegulator {
    fn enable(&mut self) -> Result<(), DriverError> {
        self.probe.on.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disable(&mut self) -> Result<(), DriverError> {
        self.probe.disable_calls.fetch_add(1, Ordering::SeqCst);
        self.probe.on.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl VoltageDevice for FakeRegulator {
    fn capabilities(&self) -> VoltageCapabilities {
        self.capabilities
    }

    fn level(&self) -> Result<i32, DriverError> {
        Ok(self.probe.level())
    }

    fn set_level(&mut self, level_uv: i32) -> Result<(), DriverError> {
        self.probe.set_level_calls.fetch_add(1, Ordering::SeqCst);
        self.probe.level.store(level_uv, Ordering::SeqCst);
        Ok(())
    }

    fn levels(&self) -> Result<LevelTable<'_>, DriverError> {
        Ok(self.levels)
    }
}

/// Observes a [`FakePerf`].
#[derive(Debug, Default)]
pub struct PerfProbe {
    level: AtomicU32,
    fail_reads: AtomicBool,
    set_level_calls: AtomicU32,
}

impl PerfProbe {
    pub fn level(&self) -> u32 {
        self.level.load(Ordering::SeqCst)
    }

    pub fn set_level_calls(&self) -> u32 {
        self.set_level_calls.load(Ordering::SeqCst)
    }

    /// Makes reading the current level fail with a hardware error.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

/// A DVFS domain.
pub struct FakePerf {
    probe: Arc<PerfProbe>,
    opps: Vec<Opp>,
}

impl PerfDevice for FakePerf {
    fn capabilities(&self) -> PerfCapabilities {
        PerfCapabilities::REQUIRED
    }

    fn opps(&self) -> &[Opp] {
        &self.opps
    }

    fn level(&self) -> Result<u32, DriverError> {
        if self.probe.fail_reads.load(Ordering::SeqCst) {
            return Err(DriverError::Hardware);
        }
        Ok(self.probe.level())
    }

    fn set_level(&mut self, level: u32) -> Result<(), DriverError> {
        self.probe.set_level_calls.fetch_add(1, Ordering::SeqCst);
        if !self.opps.iter().any(|opp| opp.level == level) {
            return Err(DriverError::OutOfRange);
        }
        self.probe.level.store(level, Ordering::SeqCst);
        Ok(())
    }
}

/// Probes of the devices tests look at.
pub struct Probes {
    pub hse: Arc<ClockProbe>,
    pub mpu: Arc<ClockProbe>,
    pub i2c6: Arc<ResetProbe>,
    pub reg11: Arc<RegulatorProbe>,
    pub vdd_sd: Arc<RegulatorProbe>,
    pub cpu: Arc<PerfProbe>,
}

/// The decoded reply in a mailbox.
#[derive(Debug)]
pub struct Reply {
    pub header: MessageHeader,
    pub status: i32,
    /// Return values following the status.
    pub values: Vec<u32>,
    /// The length word of the mailbox.
    pub length: u32,
    pub channel_status: u32,
}

/// A server running on the test platform.
///
/// Channel 0 belongs to agent `OSPM0`, channel 1 to `PSCI` and channel 2 to `OSPM1`.
pub struct TestBench {
    pub server: ScmiServer<TestHost>,
    pub probes: Probes,
}

impl TestBench {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Creates a server from the test configuration after letting `customise` change it.
    pub fn with_config(customise: impl FnOnce(&mut ServerConfig)) -> Self {
        // Only the first test to get here installs the logger.
        let _ = logger::init(&StdOutSink);

        let probes = Probes {
            hse: ClockProbe::new(24_000_000),
            mpu: ClockProbe::new(MPU_RATES[0]),
            i2c6: Arc::default(),
            reg11: RegulatorProbe::new(REG11_LEVELS[0]),
            vdd_sd: RegulatorProbe::new(SD_LEVELS[2]),
            cpu: Arc::new(PerfProbe {
                level: AtomicU32::new(400),
                ..Default::default()
            }),
        };
        let mut config = test_config(&probes);
        customise(&mut config);
        Self {
            server: ScmiServer::new(config, TestHost::default()),
            probes,
        }
    }

    pub fn host(&self) -> &TestHost {
        self.server.host()
    }

    /// Writes a command into a channel's mailbox and hands the mailbox to the server, asking for
    /// an interrupt.
    pub fn post(&self, channel: ChannelId, header: MessageHeader, payload: &[u32]) {
        let mailbox = self.mailbox(channel);
        for (i, word) in payload.iter().enumerate() {
            mailbox.write_u32(HEADER_SIZE + 4 * i, *word);
        }
        mailbox.write_u32(MESSAGE_HEADER_OFFSET, header.0);
        mailbox.write_u32(
            LENGTH_OFFSET,
            (MESSAGE_HEADER_SIZE + 4 * payload.len()) as u32,
        );
        mailbox.write_u32(FLAGS_OFFSET, MailboxFlags::INTERRUPT_ENABLE.bits());
        mailbox.write_channel_status(0);
    }

    /// Reads the reply from a channel's mailbox.
    pub fn reply(&self, channel: ChannelId) -> Reply {
        let mailbox = self.mailbox(channel);
        let length = mailbox.read_u32(LENGTH_OFFSET);
        let words = (length as usize).saturating_sub(MESSAGE_HEADER_SIZE) / 4;
        Reply {
            header: MessageHeader(mailbox.read_u32(MESSAGE_HEADER_OFFSET)),
            status: if words > 0 {
                mailbox.read_u32(HEADER_SIZE) as i32
            } else {
                0
            },
            values: (1..words)
                .map(|i| mailbox.read_u32(HEADER_SIZE + 4 * i))
                .collect(),
            length,
            channel_status: mailbox.channel_status(),
        }
    }

    /// Sends a command with the given header and returns the reply.
    pub fn send_header(&self, channel: ChannelId, header: MessageHeader, payload: &[u32]) -> Reply {
        self.post(channel, header, payload);
        self.server.process(channel).unwrap();
        self.reply(channel)
    }

    /// Sends a command and returns the reply.
    pub fn send(&self, channel: ChannelId, protocol: u8, message: u8, payload: &[u32]) -> Reply {
        self.send_header(channel, MessageHeader::new(protocol, message, 0, 0), payload)
    }

    fn mailbox(&self, channel: ChannelId) -> &SharedMailbox {
        self.server.mailbox(channel).unwrap()
    }
}

/// Decodes a NUL-padded name field from reply words.
pub fn name_from_words(words: &[u32]) -> String {
    let bytes: Vec<u8> = words
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .take_while(|&byte| byte != 0)
        .collect();
    String::from_utf8(bytes).unwrap()
}

fn mailbox(mapping: MailboxMapping) -> SharedMailbox {
    SharedMailbox::from_static(
        Box::leak(vec![0u32; MAILBOX_WORDS].into_boxed_slice()),
        mapping,
    )
}

fn clock(
    name: &'static str,
    probe: Arc<ClockProbe>,
    capabilities: ClockCapabilities,
    rates: RateTable<'static>,
) -> ClockConfig {
    FakeClock {
        probe,
        capabilities,
        rates,
        secure_only: false,
    }
    .named(name)
}

impl FakeClock {
    fn named(self, name: &'static str) -> ClockConfig {
        ClockConfig {
            name,
            permissions: AgentPermissions::new().allow(OSPM0, ClockPermissions::all()),
            enabled_at_boot: false,
            device: Box::new(self),
        }
    }
}

fn test_config(probes: &Probes) -> ServerConfig {
    let basic_clock = ClockCapabilities::REQUIRED;

    let hse = ClockConfig {
        enabled_at_boot: true,
        ..clock(
            "clk-hse",
            probes.hse.clone(),
            basic_clock,
            RateTable::Discrete(&[24_000_000]),
        )
    };
    let hsi = clock(
        "clk-hsi",
        ClockProbe::new(64_000_000),
        basic_clock | ClockCapabilities::DESCRIBE_RATES,
        RateTable::Range {
            min: 4_000_000,
            max: 64_000_000,
            step: 4_000_000,
        },
    );
    let mut mpu = clock(
        "ck_mpu",
        probes.mpu.clone(),
        ClockCapabilities::all(),
        RateTable::Discrete(&MPU_RATES),
    );
    mpu.permissions = mpu.permissions.allow(
        OSPM1,
        ClockPermissions::ATTRIBUTES | ClockPermissions::SET_CONFIG,
    );
    let rtc = FakeClock {
        probe: ClockProbe::new(32_768),
        capabilities: basic_clock,
        rates: RateTable::Discrete(&[32_768]),
        secure_only: true,
    }
    .named("ck_rtc");

    let reset = |name: &'static str, probe: Arc<ResetProbe>, secure_only: bool| {
        ResetDomainConfig {
            name,
            permissions: AgentPermissions::new().allow(OSPM0, ResetPermissions::all()),
            device: Box::new(FakeReset { probe, secure_only }),
        }
    };

    let regulator = |name, probe, capabilities, levels, enabled_at_boot| VoltageDomainConfig {
        name,
        permissions: AgentPermissions::new().allow(OSPM0, VoltagePermissions::all()),
        enabled_at_boot,
        device: Box::new(FakeRegulator {
            probe,
            capabilities,
            levels,
        }),
    };
    let settable = VoltageCapabilities::REQUIRED | VoltageCapabilities::SET_LEVEL;

    ServerConfig {
        vendor: "ST",
        sub_vendor: "STM32MP1",
        implementation_version: 0x0001_0000,
        agents: vec![
            AgentConfig {
                name: "OSPM0",
                agent_type: AgentType::Ospm,
            },
            AgentConfig {
                name: "PSCI",
                agent_type: AgentType::Psci,
            },
            AgentConfig {
                name: "OSPM1",
                agent_type: AgentType::Ospm,
            },
        ],
        channels: vec![
            ChannelConfig {
                mailbox: mailbox(MailboxMapping::NonSecure),
                agent_id: OSPM0,
                secure: false,
                requires_init: true,
            },
            ChannelConfig {
                mailbox: mailbox(MailboxMapping::Secure),
                agent_id: PSCI,
                secure: true,
                requires_init: true,
            },
            ChannelConfig {
                mailbox: mailbox(MailboxMapping::NonSecure),
                agent_id: OSPM1,
                secure: false,
                requires_init: true,
            },
        ],
        clocks: vec![hse, hsi, mpu, rtc],
        reset_domains: vec![
            reset("spi6", Arc::default(), true),
            reset("i2c4", Arc::default(), false),
            reset("i2c6", probes.i2c6.clone(), false),
        ],
        voltage_domains: vec![
            regulator(
                "reg11",
                probes.reg11.clone(),
                VoltageCapabilities::REQUIRED,
                LevelTable::Discrete(&REG11_LEVELS),
                true,
            ),
            regulator(
                "vdd_sd",
                probes.vdd_sd.clone(),
                settable,
                LevelTable::Discrete(&SD_LEVELS),
                false,
            ),
            regulator(
                "vdd_cpu",
                RegulatorProbe::new(1_200_000),
                settable,
                LevelTable::Range {
                    min: 800_000,
                    max: 1_300_000,
                    step: 50_000,
                },
                false,
            ),
        ],
        perf_domains: vec![PerfDomainConfig {
            name: "cpu",
            permissions: AgentPermissions::new().allow(OSPM0, PerfPermissions::all()),
            rate_limit_us: 1000,
            sustained_freq_khz: 650_000,
            sustained_level: 650,
            device: Box::new(FakePerf {
                probe: probes.cpu.clone(),
                opps: vec![
                    Opp {
                        level: 400,
                        power_cost: 200,
                        latency_us: 100,
                    },
                    Opp {
                        level: 650,
                        power_cost: 300,
                        latency_us: 100,
                    },
                    Opp {
                        level: 800,
                        power_cost: 500,
                        latency_us: 100,
                    },
                ],
            }),
        }],
    }
}

mod tests {
    use super::*;

    #[test]
    fn fake_clock_rounding() {
        let rates = RateTable::Discrete(&MPU_RATES);
        assert_eq!(
            round_rate(rates, 700_000_000, RateRounding::Up),
            Ok(800_000_000)
        );
        assert_eq!(
            round_rate(rates, 700_000_000, RateRounding::Down),
            Ok(650_000_000)
        );
        assert_eq!(
            round_rate(rates, 700_000_000, RateRounding::Nearest),
            Ok(650_000_000)
        );
        assert_eq!(
            round_rate(rates, 300_000_000, RateRounding::Down),
            Err(DriverError::OutOfRange)
        );
    }

    #[test]
    fn names_decode() {
        assert_eq!(name_from_words(&[u32::from_le_bytes(*b"ck_m"), 0x7570]), "ck_mpu");
    }
}

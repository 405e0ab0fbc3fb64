#![allow(dead_code)]

use core::cell::Cell;
use core::time::Duration;

use heapless::Vec as HeaplessVec;
use pulse_core::controller::{DeviceSession, HoldOutcome, HoldTimer, PreviewRenderer};
use pulse_core::registers::{DataType, Register, RegisterWrite};
use pulse_core::telemetry::TelemetryInstant;
use pulse_core::waveform::WaveformPreview;

pub const LOG_CAPACITY: usize = 64;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct MockInstant(u64);

impl MockInstant {
    pub const fn micros(value: u64) -> Self {
        Self(value)
    }
}

impl TelemetryInstant for MockInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MockError {
    LinkDown,
}

impl core::fmt::Display for MockError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("link down")
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Logged {
    Register(RegisterWrite),
    Address {
        address: u16,
        data_type: DataType,
        value: u32,
    },
    Read(Register),
}

/// Session that applies writes to a tiny model of the output state.
#[derive(Debug, Default)]
pub struct MockSession {
    pub log: HeaplessVec<Logged, LOG_CAPACITY>,
    /// Error handed over by a teardown issued while a run unwound.
    pub unwound: Option<MockError>,
    fail_from: Option<usize>,
    reject: Option<(usize, RegisterWrite)>,
    fail_reads: bool,
    counter_value: u32,
    attempted: usize,
    clock_enabled: bool,
    output_feature_enabled: bool,
    line_high: bool,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write from the `index`-th attempt onward fails.
    pub fn failing_from(mut self, index: usize) -> Self {
        self.fail_from = Some(index);
        self
    }

    /// `write` fails from the `index`-th attempt onward; other writes go through.
    pub fn rejecting_from(mut self, index: usize, write: RegisterWrite) -> Self {
        self.reject = Some((index, write));
        self
    }

    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn with_counter(mut self, value: u32) -> Self {
        self.counter_value = value;
        self
    }

    /// Returns `true` when the output would still be driving a signal.
    pub fn energized(&self) -> bool {
        self.line_high || (self.clock_enabled && self.output_feature_enabled)
    }

    pub fn register_writes(&self) -> impl Iterator<Item = &RegisterWrite> {
        self.log.iter().filter_map(|entry| match entry {
            Logged::Register(write) => Some(write),
            _ => None,
        })
    }

    fn attempt(&mut self) -> Result<(), MockError> {
        let index = self.attempted;
        self.attempted += 1;
        match self.fail_from {
            Some(first) if index >= first => Err(MockError::LinkDown),
            _ => Ok(()),
        }
    }

    fn rejects(&self, index: usize, write: &RegisterWrite) -> bool {
        self.reject
            .is_some_and(|(first, rejected)| index >= first && rejected == *write)
    }

    fn apply(&mut self, register: Register, value: u32) {
        match register {
            Register::ClockEnable(_) => self.clock_enabled = value != 0,
            Register::FeatureEnable(dio) if dio.number() == 0 => {
                self.output_feature_enabled = value != 0;
            }
            Register::DigitalState(dio) if dio.number() == 0 => self.line_high = value != 0,
            _ => {}
        }
    }
}

impl DeviceSession for MockSession {
    type Error = MockError;

    fn write_registers(&mut self, writes: &[RegisterWrite]) -> Result<(), Self::Error> {
        for write in writes {
            let index = self.attempted;
            self.attempt()?;
            if self.rejects(index, write) {
                return Err(MockError::LinkDown);
            }
            self.log.push(Logged::Register(*write)).expect("log capacity");
            self.apply(write.register, write.value);
        }
        Ok(())
    }

    fn write_address(
        &mut self,
        address: u16,
        data_type: DataType,
        value: u32,
    ) -> Result<(), Self::Error> {
        self.attempt()?;
        self.log
            .push(Logged::Address {
                address,
                data_type,
                value,
            })
            .expect("log capacity");
        if address == 2_000 {
            self.line_high = value != 0;
        }
        Ok(())
    }

    fn read_register(&mut self, register: Register) -> Result<u32, Self::Error> {
        self.log.push(Logged::Read(register)).expect("log capacity");
        if self.fail_reads {
            return Err(MockError::LinkDown);
        }
        Ok(self.counter_value)
    }

    fn unwound_teardown_failed(&mut self, error: Self::Error) {
        self.unwound = Some(error);
    }
}

/// Timer that advances instantly by each requested hold.
#[derive(Debug, Default)]
pub struct MockTimer {
    now: Cell<u64>,
    pub holds: HeaplessVec<Duration, 4>,
    interrupt: bool,
}

impl MockTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupting() -> Self {
        Self {
            interrupt: true,
            ..Self::default()
        }
    }
}

impl HoldTimer for MockTimer {
    type Instant = MockInstant;

    fn now(&self) -> Self::Instant {
        let now = self.now.get();
        self.now.set(now + 1);
        MockInstant::micros(now)
    }

    fn hold(&mut self, duration: Duration) -> HoldOutcome {
        self.holds.push(duration).expect("hold capacity");
        if self.interrupt {
            self.now.set(self.now.get() + 10);
            return HoldOutcome::Interrupted;
        }
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.now.set(self.now.get().saturating_add(micros));
        HoldOutcome::Elapsed
    }
}

/// Timer whose hold panics, standing in for a bug while the output is armed.
#[derive(Debug, Default)]
pub struct PanickingTimer;

impl HoldTimer for PanickingTimer {
    type Instant = MockInstant;

    fn now(&self) -> Self::Instant {
        MockInstant::micros(0)
    }

    fn hold(&mut self, _: Duration) -> HoldOutcome {
        panic!("hold failed while armed");
    }
}

/// Renderer that remembers what it was asked to draw.
#[derive(Debug, Default)]
pub struct RecordingPreview {
    pub rendered: HeaplessVec<WaveformPreview, 2>,
    fail: bool,
}

impl RecordingPreview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl PreviewRenderer for RecordingPreview {
    type Error = &'static str;

    fn render(&mut self, preview: &WaveformPreview) -> Result<(), Self::Error> {
        if self.fail {
            return Err("no terminal");
        }
        self.rendered.push(*preview).expect("preview capacity");
        Ok(())
    }
}

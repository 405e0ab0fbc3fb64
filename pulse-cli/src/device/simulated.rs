//! In-process stand-in for a T7.
//!
//! Keeps a register file, tracks whether the output line is energized, counts
//! output edges on the counter channel from wall-clock time, and can fail
//! every write after a set number to exercise teardown paths.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use pulse_core::controller::{DeviceSession, OutputConfig};
use pulse_core::registers::{ChannelLayout, DataType, FeatureIndex, Register, RegisterWrite};
use tracing::{debug, error, warn};

use crate::error::CommError;

const NANOS_PER_SECOND: u128 = 1_000_000_000;

pub struct SimulatedSession {
    config: OutputConfig,
    layout: ChannelLayout,
    registers: HashMap<u16, u32>,
    /// When the output feature was last enabled.
    armed_at: Option<Instant>,
    fail_after: Option<usize>,
    writes: usize,
    transcript: Option<Transcript>,
}

impl SimulatedSession {
    #[must_use]
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            config: *config,
            layout: config.layout(),
            registers: HashMap::new(),
            armed_at: None,
            fail_after: None,
            writes: 0,
            transcript: None,
        }
    }

    /// Every write after the first `writes` fails without taking effect.
    #[must_use]
    pub fn failing_after(mut self, writes: usize) -> Self {
        self.fail_after = Some(writes);
        self
    }

    /// Appends every write and read to `path`, truncating it first.
    ///
    /// # Errors
    ///
    /// Returns the error from creating the file.
    pub fn with_transcript(mut self, path: &Path) -> io::Result<Self> {
        self.transcript = Some(Transcript::create(path)?);
        Ok(self)
    }

    #[must_use]
    pub fn value(&self, address: u16) -> u32 {
        self.registers.get(&address).copied().unwrap_or(0)
    }

    fn register(&self, register: Register) -> u32 {
        self.value(register.address())
    }

    /// Returns `true` while the output line would be driving a signal.
    #[must_use]
    pub fn energized(&self) -> bool {
        let output = self.layout.output;
        let line_high = self.register(Register::DigitalState(output)) != 0;
        let clocked = self.register(Register::ClockEnable(self.layout.clock)) != 0
            && self.register(Register::FeatureEnable(output)) != 0;
        line_high || clocked
    }

    #[must_use]
    pub const fn writes(&self) -> usize {
        self.writes
    }

    /// Output periods completed `elapsed` after the output was enabled.
    fn edges(&self, elapsed: Duration) -> u32 {
        let clock = self.layout.clock;
        let output = self.layout.output;
        let divisor = u128::from(self.register(Register::ClockDivisor(clock)));
        let roll = u128::from(self.register(Register::ClockRollValue(clock)));
        if divisor == 0 || roll == 0 {
            return 0;
        }

        let ticks_per_period = divisor * roll * NANOS_PER_SECOND;
        let periods = elapsed.as_nanos() * u128::from(self.config.core_clock_hz) / ticks_per_period;
        let periods = u32::try_from(periods).unwrap_or(u32::MAX);

        if self.register(Register::FeatureSelect(output)) == FeatureIndex::PulseOut.value() {
            periods.min(self.register(Register::ConfigC(output)))
        } else {
            periods
        }
    }

    fn attempt(&mut self) -> Result<(), CommError> {
        if let Some(limit) = self.fail_after.filter(|limit| self.writes >= *limit) {
            return Err(CommError::InjectedFault { writes: limit });
        }
        self.writes += 1;
        Ok(())
    }

    fn store(&mut self, address: u16, label: &str, value: u32) {
        if address == Register::FeatureEnable(self.layout.output).address() {
            self.armed_at = (value != 0).then(Instant::now);
        }
        self.registers.insert(address, value);
        self.log(&format!("W {label} ({address}) = {value}"));
    }

    fn log(&mut self, line: &str) {
        let Some(transcript) = self.transcript.as_mut() else {
            return;
        };
        if let Err(error) = transcript.append_line(line) {
            warn!(%error, "transcript disabled");
            self.transcript = None;
        }
    }
}

impl DeviceSession for SimulatedSession {
    type Error = CommError;

    fn write_registers(&mut self, writes: &[RegisterWrite]) -> Result<(), Self::Error> {
        for write in writes {
            self.attempt()?;
            let register = write.register;
            self.store(register.address(), &register.name(), write.value);
        }
        Ok(())
    }

    fn write_address(
        &mut self,
        address: u16,
        data_type: DataType,
        value: u32,
    ) -> Result<(), Self::Error> {
        super::value_words(data_type, value)?;
        self.attempt()?;
        self.store(address, "address", value);
        Ok(())
    }

    fn read_register(&mut self, register: Register) -> Result<u32, Self::Error> {
        let counting = self.layout.counter.is_some_and(|counter| {
            register == Register::ReadA(counter)
                && self.register(Register::FeatureEnable(counter)) != 0
        });
        let value = match (counting, self.armed_at) {
            (true, Some(armed_at)) => self.edges(armed_at.elapsed()),
            (true, None) => 0,
            (false, _) => self.register(register),
        };
        debug!(%register, value, "simulated read");
        self.log(&format!("R {register} ({}) = {value}", register.address()));
        Ok(value)
    }

    fn unwound_teardown_failed(&mut self, error: Self::Error) {
        error!(
            %error,
            energized = self.energized(),
            "simulated teardown failed while unwinding"
        );
        self.log(&format!("! teardown failed: {error}"));
    }
}

struct Transcript {
    writer: BufWriter<File>,
    started_at: Instant,
}

impl Transcript {
    fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut transcript = Self {
            writer: BufWriter::new(file),
            started_at: Instant::now(),
        };
        writeln!(transcript.writer, "# pulsegen simulated device transcript")?;
        writeln!(
            transcript.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        transcript.writer.flush()?;
        Ok(transcript)
    }

    fn append_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {line}",
            self.started_at.elapsed().as_millis()
        )?;
        self.writer.flush()
    }
}

//! Device-side settings that stay fixed across runs.

use core::cmp::Ordering;
use core::fmt;

use crate::registers::{ChannelLayout, ClockSource, DioChannel};
use crate::timing::{DEFAULT_CLOCK_DIVISOR, SUPPORTED_DIVISORS, T7_CORE_CLOCK_HZ};
use crate::waveform::{DEFAULT_OVERSAMPLE, OutputLevels};

/// Output channel wiring and clocking used by every run of a controller.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OutputConfig {
    pub core_clock_hz: u32,
    pub clock_divisor: u32,
    /// Index of the shared `DIO_EF_CLOCK#` source.
    pub clock_source: u8,
    pub output_dio: u8,
    /// High-speed counter line sampling the output, if wired.
    pub counter_dio: Option<u8>,
    pub levels: OutputLevels,
    /// Preview samples per output period.
    pub oversample: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            core_clock_hz: T7_CORE_CLOCK_HZ,
            clock_divisor: DEFAULT_CLOCK_DIVISOR,
            clock_source: 0,
            output_dio: 0,
            counter_dio: Some(18),
            levels: OutputLevels::default(),
            oversample: DEFAULT_OVERSAMPLE,
        }
    }
}

impl OutputConfig {
    #[must_use]
    pub const fn layout(&self) -> ChannelLayout {
        let counter = match self.counter_dio {
            Some(dio) => Some(DioChannel::new(dio)),
            None => None,
        };
        ChannelLayout::new(
            ClockSource::new(self.clock_source),
            DioChannel::new(self.output_dio),
            counter,
        )
    }

    /// Checks the settings against the device's capabilities.
    ///
    /// # Errors
    ///
    /// Returns the first [`OutputConfigError`] found.
    pub fn validate(&self) -> Result<(), OutputConfigError> {
        if self.core_clock_hz == 0 {
            return Err(OutputConfigError::ZeroCoreClock);
        }
        if !SUPPORTED_DIVISORS.contains(&self.clock_divisor) {
            return Err(OutputConfigError::UnsupportedDivisor(self.clock_divisor));
        }
        if !ClockSource::new(self.clock_source).exists() {
            return Err(OutputConfigError::UnknownClockSource(self.clock_source));
        }

        let output = DioChannel::new(self.output_dio);
        if !output.supports_pulse_output() {
            return Err(OutputConfigError::OutputNotPulseCapable(output));
        }
        if let Some(counter) = self.counter_dio.map(DioChannel::new) {
            if counter == output {
                return Err(OutputConfigError::CounterSharesOutput(counter));
            }
            if !counter.supports_high_speed_counter() {
                return Err(OutputConfigError::CounterNotHighSpeed(counter));
            }
        }

        let ordering = self.levels.on_volts.partial_cmp(&self.levels.off_volts);
        if !matches!(ordering, Some(Ordering::Greater | Ordering::Equal)) {
            return Err(OutputConfigError::InvertedLevels);
        }
        Ok(())
    }
}

/// Reasons an [`OutputConfig`] cannot drive the device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputConfigError {
    ZeroCoreClock,
    UnsupportedDivisor(u32),
    UnknownClockSource(u8),
    OutputNotPulseCapable(DioChannel),
    CounterNotHighSpeed(DioChannel),
    CounterSharesOutput(DioChannel),
    /// The on level is below the off level (or either is NaN).
    InvertedLevels,
}

impl fmt::Display for OutputConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputConfigError::ZeroCoreClock => f.write_str("core clock must be greater than 0 Hz"),
            OutputConfigError::UnsupportedDivisor(divisor) => write!(
                f,
                "clock divisor {divisor} is not one of 1, 2, 4, 8, 16, 32, 64, 256"
            ),
            OutputConfigError::UnknownClockSource(index) => write!(
                f,
                "clock source {index} does not exist (0..{})",
                ClockSource::COUNT
            ),
            OutputConfigError::OutputNotPulseCapable(dio) => {
                write!(f, "{dio} cannot emit pulses (use DIO0, DIO2, DIO3, DIO4 or DIO5)")
            }
            OutputConfigError::CounterNotHighSpeed(dio) => {
                write!(f, "{dio} is not a high-speed counter line (use DIO16..DIO19)")
            }
            OutputConfigError::CounterSharesOutput(dio) => {
                write!(f, "counter and output cannot both use {dio}")
            }
            OutputConfigError::InvertedLevels => {
                f.write_str("on level must be greater than or equal to the off level")
            }
        }
    }
}

impl core::error::Error for OutputConfigError {}

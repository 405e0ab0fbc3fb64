//! Clock parameter solver shared by the run controller and the preview.
//!
//! The DIO_EF clock divides the device core clock by an integer pre-scaler and
//! counts a whole number of ticks per output period. Both the period (roll
//! value) and the on-time (config A) are therefore truncated to integers, so
//! every caller reads the achieved frequency and duty cycle back from the
//! [`ClockPlan`] instead of assuming the request was met exactly.

use core::fmt;
use core::time::Duration;

/// Core oscillator frequency of the T7.
pub const T7_CORE_CLOCK_HZ: u32 = 80_000_000;

/// Divisor used when the configuration does not override it.
pub const DEFAULT_CLOCK_DIVISOR: u32 = 8;

/// Pre-scaler values accepted by `DIO_EF_CLOCK#_DIVISOR`.
pub const SUPPORTED_DIVISORS: [u32; 8] = [1, 2, 4, 8, 16, 32, 64, 256];

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Integer tick parameters derived from a frequency/duty-cycle request.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClockPlan {
    pub core_clock_hz: u32,
    pub clock_divisor: u32,
    /// Divided-clock ticks per output period.
    pub roll_value_ticks: u32,
    /// Divided-clock ticks the output stays high each period.
    pub on_ticks: u32,
    pub achieved_frequency_hz: f64,
    pub achieved_duty_cycle_percent: f64,
}

impl ClockPlan {
    /// Frequency of the divided clock feeding the period counter.
    #[must_use]
    pub fn clock_frequency_hz(&self) -> f64 {
        f64::from(self.core_clock_hz) / f64::from(self.clock_divisor)
    }

    /// Length of one output period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.train_duration(1)
    }

    /// Exact time needed to emit `pulses` full periods.
    ///
    /// Computed from the tick counts in integer nanoseconds so that, e.g.,
    /// seven pulses at 10 kHz come out as exactly 700 µs.
    #[must_use]
    pub fn train_duration(&self, pulses: u32) -> Duration {
        let ticks = u128::from(pulses)
            * u128::from(self.roll_value_ticks)
            * u128::from(self.clock_divisor);
        duration_from_nanos(ticks * NANOS_PER_SEC / u128::from(self.core_clock_hz))
    }
}

/// Reasons a request is rejected before any arithmetic or hardware contact.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestError {
    ZeroFrequency,
    DutyCycleOutOfRange,
    ZeroDivisor,
    ZeroCoreClock,
    /// Continuous modulation or hold-high was selected without a run duration.
    MissingDuration,
    ZeroDuration,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::ZeroFrequency => f.write_str("frequency must be greater than 0 Hz"),
            RequestError::DutyCycleOutOfRange => {
                f.write_str("duty cycle must be between 0 and 100 percent")
            }
            RequestError::ZeroDivisor => f.write_str("clock divisor must be at least 1"),
            RequestError::ZeroCoreClock => f.write_str("core clock must be greater than 0 Hz"),
            RequestError::MissingDuration => {
                f.write_str("continuous (0 pulses) and hold-high (1 pulse at 100%) runs require a duration")
            }
            RequestError::ZeroDuration => f.write_str("duration must be greater than zero"),
        }
    }
}

impl core::error::Error for RequestError {}

/// The requested frequency needs less than one divided-clock tick per period.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UnrepresentableTiming {
    pub requested_frequency_hz: u32,
    pub clock_divisor: u32,
    /// Fastest output the current divisor can produce (a roll value of 1).
    pub max_frequency_hz: f64,
    /// Largest supported divisor that would make the request representable.
    pub suggested_divisor: Option<u32>,
}

impl UnrepresentableTiming {
    fn new(core_clock_hz: u32, clock_divisor: u32, requested_frequency_hz: u32) -> Self {
        let suggested_divisor = SUPPORTED_DIVISORS
            .iter()
            .rev()
            .copied()
            .find(|divisor| {
                u64::from(*divisor) * u64::from(requested_frequency_hz)
                    <= u64::from(core_clock_hz)
            });

        Self {
            requested_frequency_hz,
            clock_divisor,
            max_frequency_hz: f64::from(core_clock_hz) / f64::from(clock_divisor),
            suggested_divisor,
        }
    }
}

impl fmt::Display for UnrepresentableTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz is shorter than one clock tick at divisor {}; fastest representable output is {} Hz",
            self.requested_frequency_hz, self.clock_divisor, self.max_frequency_hz
        )?;
        if let Some(divisor) = self.suggested_divisor {
            write!(f, " (divisor {divisor} would fit)")?;
        }
        Ok(())
    }
}

impl core::error::Error for UnrepresentableTiming {}

/// Failure reported by [`solve`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SolveError {
    InvalidRequest(RequestError),
    Unrepresentable(UnrepresentableTiming),
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveError::InvalidRequest(err) => write!(f, "invalid request: {err}"),
            SolveError::Unrepresentable(err) => write!(f, "unrepresentable timing: {err}"),
        }
    }
}

impl core::error::Error for SolveError {}

impl From<RequestError> for SolveError {
    fn from(error: RequestError) -> Self {
        SolveError::InvalidRequest(error)
    }
}

impl From<UnrepresentableTiming> for SolveError {
    fn from(error: UnrepresentableTiming) -> Self {
        SolveError::Unrepresentable(error)
    }
}

/// Returns `true` when `duty_cycle_percent` lies in `[0, 100]` (NaN is rejected).
#[must_use]
pub fn duty_cycle_in_range(duty_cycle_percent: f64) -> bool {
    (0.0..=100.0).contains(&duty_cycle_percent)
}

/// Converts a frequency/duty-cycle request into integer clock ticks.
///
/// # Errors
///
/// Returns [`SolveError::InvalidRequest`] for a zero frequency, divisor or core
/// clock and for a duty cycle outside `[0, 100]`, and
/// [`SolveError::Unrepresentable`] when the period would be zero ticks.
pub fn solve(
    core_clock_hz: u32,
    clock_divisor: u32,
    frequency_hz: u32,
    duty_cycle_percent: f64,
) -> Result<ClockPlan, SolveError> {
    if frequency_hz == 0 {
        return Err(RequestError::ZeroFrequency.into());
    }
    if !duty_cycle_in_range(duty_cycle_percent) {
        return Err(RequestError::DutyCycleOutOfRange.into());
    }
    if clock_divisor == 0 {
        return Err(RequestError::ZeroDivisor.into());
    }
    if core_clock_hz == 0 {
        return Err(RequestError::ZeroCoreClock.into());
    }

    // floor((core / divisor) / frequency) == floor(core / (divisor * frequency))
    let roll = u64::from(core_clock_hz) / (u64::from(clock_divisor) * u64::from(frequency_hz));
    if roll == 0 {
        return Err(UnrepresentableTiming::new(core_clock_hz, clock_divisor, frequency_hz).into());
    }
    let roll_value_ticks = u32::try_from(roll).unwrap_or(u32::MAX);
    let on_ticks = on_ticks_for(duty_cycle_percent, roll_value_ticks);

    let clock_frequency = f64::from(core_clock_hz) / f64::from(clock_divisor);
    let roll_f = f64::from(roll_value_ticks);

    Ok(ClockPlan {
        core_clock_hz,
        clock_divisor,
        roll_value_ticks,
        on_ticks,
        achieved_frequency_hz: clock_frequency / roll_f,
        achieved_duty_cycle_percent: f64::from(on_ticks) * 100.0 / roll_f,
    })
}

fn on_ticks_for(duty_cycle_percent: f64, roll_value_ticks: u32) -> u32 {
    let roll = f64::from(roll_value_ticks);
    let mut on = truncate_ticks(duty_cycle_percent * roll / 100.0).min(roll_value_ticks);

    // Floating-point rounding in the product may land one tick high; the
    // achieved duty cycle must never exceed the request.
    while on > 0 && f64::from(on) * 100.0 / roll > duty_cycle_percent {
        on -= 1;
    }
    on
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn truncate_ticks(value: f64) -> u32 {
    // `as` saturates and truncates toward zero, which is the floor for
    // the non-negative values produced above.
    value as u32
}

fn duration_from_nanos(nanos: u128) -> Duration {
    let secs = u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX);
    let subsec = u32::try_from(nanos % NANOS_PER_SEC).unwrap_or(0);
    Duration::new(secs, subsec)
}

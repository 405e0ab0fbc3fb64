//! Run requests and the pure choice of output strategy.

use core::fmt;
use core::time::Duration;

use crate::registers::OutputFeature;
use crate::timing::{ClockPlan, RequestError, SolveError, duty_cycle_in_range, solve};
use crate::waveform::{self, OutputLevels, WaveformPreview};

use super::config::OutputConfig;

/// What the operator asked the output to do.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PulseRequest {
    pub frequency_hz: u32,
    pub duty_cycle_percent: f64,
    /// Number of pulses; zero selects continuous modulation.
    pub pulse_count: u32,
    pub duration: Option<Duration>,
}

impl PulseRequest {
    #[must_use]
    pub const fn new(frequency_hz: u32, duty_cycle_percent: f64, pulse_count: u32) -> Self {
        Self {
            frequency_hz,
            duty_cycle_percent,
            pulse_count,
            duration: None,
        }
    }

    #[must_use]
    pub const fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Checks the request shape without selecting a mode.
    ///
    /// # Errors
    ///
    /// Returns the first [`RequestError`] found.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.frequency_hz == 0 {
            return Err(RequestError::ZeroFrequency);
        }
        if !duty_cycle_in_range(self.duty_cycle_percent) {
            return Err(RequestError::DutyCycleOutOfRange);
        }
        if self.duration == Some(Duration::ZERO) {
            return Err(RequestError::ZeroDuration);
        }
        Ok(())
    }
}

/// Output strategy, without its solved parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunModeKind {
    HoldHigh,
    ContinuousModulation,
    FiniteTrain,
}

impl fmt::Display for RunModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunModeKind::HoldHigh => "hold-high",
            RunModeKind::ContinuousModulation => "continuous",
            RunModeKind::FiniteTrain => "finite-train",
        })
    }
}

/// Selects the output strategy for `request`.
///
/// A single pulse at 100 % duty is a plain high level; zero pulses means
/// modulate until the duration runs out; anything else is a counted train.
///
/// # Errors
///
/// Returns a [`RequestError`] for a malformed request, including a continuous
/// or hold-high request without a duration.
#[allow(clippy::float_cmp)]
pub fn select_mode(request: &PulseRequest) -> Result<RunModeKind, RequestError> {
    request.validate()?;

    let kind = if request.pulse_count == 1 && request.duty_cycle_percent == 100.0 {
        RunModeKind::HoldHigh
    } else if request.pulse_count == 0 {
        RunModeKind::ContinuousModulation
    } else {
        RunModeKind::FiniteTrain
    };
    if kind != RunModeKind::FiniteTrain && request.duration.is_none() {
        return Err(RequestError::MissingDuration);
    }
    Ok(kind)
}

/// A selected strategy together with everything needed to execute it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RunMode {
    HoldHigh { hold: Duration },
    ContinuousModulation { clock: ClockPlan, duration: Duration },
    FiniteTrain { clock: ClockPlan, pulse_count: u32 },
}

impl RunMode {
    #[must_use]
    pub const fn kind(&self) -> RunModeKind {
        match self {
            RunMode::HoldHigh { .. } => RunModeKind::HoldHigh,
            RunMode::ContinuousModulation { .. } => RunModeKind::ContinuousModulation,
            RunMode::FiniteTrain { .. } => RunModeKind::FiniteTrain,
        }
    }

    /// Solved clock parameters; `None` for a hold, which never touches the clock.
    #[must_use]
    pub const fn clock(&self) -> Option<&ClockPlan> {
        match self {
            RunMode::HoldHigh { .. } => None,
            RunMode::ContinuousModulation { clock, .. } | RunMode::FiniteTrain { clock, .. } => {
                Some(clock)
            }
        }
    }

    /// How long the controller blocks with the output armed.
    #[must_use]
    pub fn hold_duration(&self) -> Duration {
        match self {
            RunMode::HoldHigh { hold } => *hold,
            RunMode::ContinuousModulation { duration, .. } => *duration,
            RunMode::FiniteTrain { clock, pulse_count } => clock.train_duration(*pulse_count),
        }
    }

    /// DIO_EF feature the output channel runs, if any.
    #[must_use]
    pub const fn output_feature(&self) -> Option<OutputFeature> {
        match self {
            RunMode::HoldHigh { .. } => None,
            RunMode::ContinuousModulation { .. } => Some(OutputFeature::Continuous),
            RunMode::FiniteTrain { pulse_count, .. } => Some(OutputFeature::FiniteTrain {
                pulse_count: *pulse_count,
            }),
        }
    }

    /// Expected output of this run.
    #[must_use]
    pub fn preview(&self, oversample: u32, levels: OutputLevels) -> WaveformPreview {
        match self {
            RunMode::HoldHigh { hold } => waveform::predict_hold(*hold, oversample, levels),
            RunMode::ContinuousModulation { clock, duration } => {
                waveform::predict_continuous(clock, *duration, oversample, levels)
            }
            RunMode::FiniteTrain { clock, pulse_count } => {
                waveform::predict(clock, *pulse_count, oversample, levels)
            }
        }
    }
}

/// Selects the mode for `request` and solves its clock parameters.
///
/// # Errors
///
/// Returns [`SolveError::InvalidRequest`] for a malformed request and
/// [`SolveError::Unrepresentable`] when the frequency does not fit the clock.
pub fn plan_mode(request: &PulseRequest, config: &OutputConfig) -> Result<RunMode, SolveError> {
    let kind = select_mode(request)?;

    let mode = match kind {
        RunModeKind::HoldHigh => RunMode::HoldHigh {
            hold: request.duration.ok_or(RequestError::MissingDuration)?,
        },
        RunModeKind::ContinuousModulation => RunMode::ContinuousModulation {
            clock: solve_for(request, config)?,
            duration: request.duration.ok_or(RequestError::MissingDuration)?,
        },
        RunModeKind::FiniteTrain => RunMode::FiniteTrain {
            clock: solve_for(request, config)?,
            pulse_count: request.pulse_count,
        },
    };
    Ok(mode)
}

fn solve_for(request: &PulseRequest, config: &OutputConfig) -> Result<ClockPlan, SolveError> {
    solve(
        config.core_clock_hz,
        config.clock_divisor,
        request.frequency_hz,
        request.duty_cycle_percent,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::UnrepresentableTiming;

    #[test]
    fn single_full_pulse_holds_high_at_any_frequency() {
        for frequency in [1, 10_000, 90_000_000, u32::MAX] {
            let request =
                PulseRequest::new(frequency, 100.0, 1).with_duration(Duration::from_secs(1));
            assert_eq!(select_mode(&request), Ok(RunModeKind::HoldHigh));
        }
    }

    #[test]
    fn zero_pulses_with_duration_is_continuous() {
        let request = PulseRequest::new(10_000, 50.0, 0).with_duration(Duration::from_secs(5));
        assert_eq!(select_mode(&request), Ok(RunModeKind::ContinuousModulation));
    }

    #[test]
    fn continuous_without_duration_is_rejected() {
        let request = PulseRequest::new(10_000, 50.0, 0);
        assert_eq!(select_mode(&request), Err(RequestError::MissingDuration));
    }

    #[test]
    fn full_duty_train_stays_finite() {
        let request = PulseRequest::new(10_000, 100.0, 4);
        assert_eq!(select_mode(&request), Ok(RunModeKind::FiniteTrain));

        let mode = plan_mode(&request, &OutputConfig::default()).expect("plan");
        let clock = mode.clock().expect("solved clock");
        assert_eq!(clock.on_ticks, clock.roll_value_ticks);
    }

    #[test]
    fn malformed_requests_fail_validation() {
        let cases = [
            (PulseRequest::new(0, 50.0, 3), RequestError::ZeroFrequency),
            (PulseRequest::new(1_000, 101.0, 3), RequestError::DutyCycleOutOfRange),
            (PulseRequest::new(1_000, -1.0, 1), RequestError::DutyCycleOutOfRange),
            (
                PulseRequest::new(1_000, 50.0, 0).with_duration(Duration::ZERO),
                RequestError::ZeroDuration,
            ),
        ];
        for (request, expected) in cases {
            assert_eq!(select_mode(&request), Err(expected), "{request:?}");
        }
    }

    #[test]
    fn finite_train_holds_for_whole_train() {
        let request = PulseRequest::new(10_000, 10.0, 7);
        let mode = plan_mode(&request, &OutputConfig::default()).expect("plan");

        assert_eq!(mode.kind(), RunModeKind::FiniteTrain);
        assert_eq!(mode.hold_duration(), Duration::from_micros(700));
        assert!((mode.hold_duration().as_secs_f64() - 0.0007).abs() < 1e-12);
        assert_eq!(
            mode.output_feature(),
            Some(OutputFeature::FiniteTrain { pulse_count: 7 })
        );
    }

    #[test]
    fn hold_without_duration_is_rejected() {
        let request = PulseRequest::new(4, 100.0, 1);
        assert_eq!(select_mode(&request), Err(RequestError::MissingDuration));
        assert_eq!(
            plan_mode(&request, &OutputConfig::default()),
            Err(SolveError::InvalidRequest(RequestError::MissingDuration))
        );

        let timed = request.with_duration(Duration::from_secs(2));
        let mode = plan_mode(&timed, &OutputConfig::default()).expect("plan");
        assert_eq!(mode, RunMode::HoldHigh {
            hold: Duration::from_secs(2)
        });
        assert_eq!(mode.clock(), None);
        assert_eq!(mode.output_feature(), None);
    }

    #[test]
    fn continuous_holds_for_requested_duration() {
        let request = PulseRequest::new(1_000, 25.0, 0).with_duration(Duration::from_millis(1_500));
        let mode = plan_mode(&request, &OutputConfig::default()).expect("plan");

        assert_eq!(mode.kind(), RunModeKind::ContinuousModulation);
        assert_eq!(mode.hold_duration(), Duration::from_millis(1_500));
        assert_eq!(mode.output_feature(), Some(OutputFeature::Continuous));
    }

    #[test]
    fn unrepresentable_frequency_surfaces_from_solver() {
        let config = OutputConfig {
            clock_divisor: 1,
            ..OutputConfig::default()
        };
        let request = PulseRequest::new(90_000_000, 50.0, 3);

        match plan_mode(&request, &config) {
            Err(SolveError::Unrepresentable(UnrepresentableTiming {
                requested_frequency_hz,
                ..
            })) => assert_eq!(requested_frequency_hz, 90_000_000),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

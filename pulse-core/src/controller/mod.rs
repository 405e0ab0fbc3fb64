//! Run controller: selects a mode, arms the output, holds, and tears down.
//!
//! One run walks `Idle -> Configuring -> Running -> Stopping -> Idle`. A
//! request that cannot be planned goes `Configuring -> Failed` without any
//! device traffic. Once the start writes begin, the output is held by an
//! [`armed::Armed`] guard, so the stop plan is issued on every exit from
//! `Running`: after the hold, after an interrupt, and after a communication
//! failure.

use core::fmt;
use core::time::Duration;

use crate::registers::{
    ChannelLayout, DioChannel, Register, RegisterPlan, build_start_plan, build_stop_plan,
};
use crate::telemetry::{RunEventKind, RunTelemetry};
use crate::timing::{ClockPlan, RequestError, SolveError, UnrepresentableTiming};

mod armed;
pub mod config;
pub mod mode;
pub mod session;

use armed::{Armed, Teardown};

pub use config::{OutputConfig, OutputConfigError};
pub use mode::{PulseRequest, RunMode, RunModeKind, plan_mode, select_mode};
pub use session::{DeviceSession, HoldOutcome, HoldTimer, NoPreview, PreviewRenderer};

/// Lifecycle of a single run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunState {
    Idle,
    Configuring,
    Running,
    Stopping,
    Failed,
}

impl RunState {
    /// Returns `true` when the controller may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Idle | RunState::Failed, RunState::Configuring)
                | (RunState::Configuring, RunState::Running | RunState::Failed)
                | (RunState::Running, RunState::Stopping)
                | (RunState::Stopping, RunState::Idle | RunState::Failed)
        )
    }

    /// Returns `true` when no run is in flight.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, RunState::Idle | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Idle => "idle",
            RunState::Configuring => "configuring",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Failed => "failed",
        })
    }
}

/// Device access that failed while the output was armed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommStage {
    StartPlan,
    HoldHighWrite,
    CounterRead,
}

impl fmt::Display for CommStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommStage::StartPlan => "start plan",
            CommStage::HoldHighWrite => "hold-high write",
            CommStage::CounterRead => "counter read",
        })
    }
}

/// Failure of a run. `E` is the device session's error type.
///
/// Every variant raised after the output was armed carries the teardown
/// outcome, so a failed teardown is never hidden behind the original error.
#[derive(Debug, PartialEq)]
pub enum RunError<E> {
    InvalidRequest(RequestError),
    UnrepresentableTiming(UnrepresentableTiming),
    Comm {
        stage: CommStage,
        error: E,
        /// Teardown error, if the teardown failed as well.
        teardown: Option<E>,
    },
    Interrupted {
        teardown: Option<E>,
    },
    /// The run completed but the teardown failed.
    Teardown(E),
}

impl<E> RunError<E> {
    /// Teardown error carried by this failure, if any.
    #[must_use]
    pub fn teardown_error(&self) -> Option<&E> {
        match self {
            RunError::Comm { teardown, .. } | RunError::Interrupted { teardown } => {
                teardown.as_ref()
            }
            RunError::Teardown(error) => Some(error),
            RunError::InvalidRequest(_) | RunError::UnrepresentableTiming(_) => None,
        }
    }

    /// Returns `true` when the device was never contacted.
    #[must_use]
    pub const fn before_hardware(&self) -> bool {
        matches!(
            self,
            RunError::InvalidRequest(_) | RunError::UnrepresentableTiming(_)
        )
    }
}

impl<E> From<SolveError> for RunError<E> {
    fn from(error: SolveError) -> Self {
        match error {
            SolveError::InvalidRequest(cause) => RunError::InvalidRequest(cause),
            SolveError::Unrepresentable(detail) => RunError::UnrepresentableTiming(detail),
        }
    }
}

impl<E> fmt::Display for RunError<E>
where
    E: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::InvalidRequest(cause) => write!(f, "invalid request: {cause}"),
            RunError::UnrepresentableTiming(detail) => write!(f, "unrepresentable timing: {detail}"),
            RunError::Comm {
                stage,
                error,
                teardown,
            } => {
                write!(f, "communication failed during {stage}: {error}")?;
                if let Some(teardown) = teardown {
                    write!(f, "; teardown also failed: {teardown}")?;
                }
                Ok(())
            }
            RunError::Interrupted { teardown } => {
                f.write_str("run interrupted")?;
                if let Some(teardown) = teardown {
                    write!(f, "; teardown failed: {teardown}")?;
                }
                Ok(())
            }
            RunError::Teardown(error) => write!(f, "teardown failed: {error}"),
        }
    }
}

impl<E> core::error::Error for RunError<E>
where
    E: fmt::Debug + fmt::Display,
{
}

/// Whether the expected-output preview was shown.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PreviewStatus {
    NotRequested,
    Shown,
    Failed,
}

/// Summary of a completed run.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RunReport {
    pub mode: RunModeKind,
    pub clock: Option<ClockPlan>,
    pub hold: Duration,
    /// Edges counted by the counter channel when one is wired.
    pub counter: Option<u32>,
    pub preview: PreviewStatus,
    pub start_writes: usize,
    pub teardown_writes: usize,
}

enum StartAction {
    DriveHigh(DioChannel),
    Plan(RegisterPlan),
}

struct Execution {
    start_writes: usize,
    interrupted: bool,
    counter: Option<u32>,
}

/// Drives runs against a borrowed [`DeviceSession`].
pub struct RunController<T, P = NoPreview>
where
    T: HoldTimer,
    P: PreviewRenderer,
{
    config: OutputConfig,
    layout: ChannelLayout,
    timer: T,
    preview: Option<P>,
    preview_error: Option<P::Error>,
    state: RunState,
    telemetry: RunTelemetry<T::Instant>,
}

impl<T> RunController<T, NoPreview>
where
    T: HoldTimer,
{
    /// Creates a controller without a preview renderer.
    ///
    /// # Errors
    ///
    /// Returns the [`OutputConfigError`] found by [`OutputConfig::validate`].
    pub fn new(config: OutputConfig, timer: T) -> Result<Self, OutputConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            layout: config.layout(),
            timer,
            preview: None,
            preview_error: None,
            state: RunState::Idle,
            telemetry: RunTelemetry::new(),
        })
    }
}

impl<T, P> RunController<T, P>
where
    T: HoldTimer,
    P: PreviewRenderer,
{
    /// Renders the expected output before every run.
    #[must_use]
    pub fn with_preview<Q>(self, renderer: Q) -> RunController<T, Q>
    where
        Q: PreviewRenderer,
    {
        RunController {
            config: self.config,
            layout: self.layout,
            timer: self.timer,
            preview: Some(renderer),
            preview_error: None,
            state: self.state,
            telemetry: self.telemetry,
        }
    }

    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    #[must_use]
    pub const fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Events recorded by the most recent run.
    #[must_use]
    pub const fn telemetry(&self) -> &RunTelemetry<T::Instant> {
        &self.telemetry
    }

    #[must_use]
    pub const fn timer(&self) -> &T {
        &self.timer
    }

    /// Takes the rendering error of the most recent run, if the preview failed.
    pub fn take_preview_error(&mut self) -> Option<P::Error> {
        self.preview_error.take()
    }

    /// Executes `request` on `session`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::InvalidRequest`] or [`RunError::UnrepresentableTiming`]
    /// before any device access, and the communication, interrupt or teardown
    /// variants after the stop plan has been issued.
    pub fn run<S>(
        &mut self,
        session: &mut S,
        request: &PulseRequest,
    ) -> Result<RunReport, RunError<S::Error>>
    where
        S: DeviceSession,
    {
        self.telemetry.clear();
        self.preview_error = None;

        self.transition(RunState::Configuring);
        let mode = match plan_mode(request, &self.config) {
            Ok(mode) => mode,
            Err(error) => {
                self.transition(RunState::Failed);
                return Err(error.into());
            }
        };
        self.record(RunEventKind::ModeSelected(mode.kind()));

        let (start, teardown) = self.plan_writes(&mode);
        let preview = self.render_preview(&mode);

        self.transition(RunState::Running);
        let mut armed = Armed::new(session, teardown);
        let execution = self.execute(&mut armed, &mode, &start);

        self.transition(RunState::Stopping);
        let teardown = armed.release();
        let teardown_writes = match &teardown {
            Ok(writes) => {
                self.record(RunEventKind::TeardownIssued { writes: *writes });
                *writes
            }
            Err(_) => {
                self.record(RunEventKind::TeardownFailed);
                0
            }
        };
        let teardown_error = teardown.err();

        let result = match execution {
            Err((stage, error)) => Err(RunError::Comm {
                stage,
                error,
                teardown: teardown_error,
            }),
            Ok(execution) if execution.interrupted => Err(RunError::Interrupted {
                teardown: teardown_error,
            }),
            Ok(execution) => match teardown_error {
                Some(error) => Err(RunError::Teardown(error)),
                None => Ok(RunReport {
                    mode: mode.kind(),
                    clock: mode.clock().copied(),
                    hold: mode.hold_duration(),
                    counter: execution.counter,
                    preview,
                    start_writes: execution.start_writes,
                    teardown_writes,
                }),
            },
        };

        self.transition(if result.is_ok() {
            RunState::Idle
        } else {
            RunState::Failed
        });
        result
    }

    fn plan_writes(&self, mode: &RunMode) -> (StartAction, Teardown) {
        let stop = build_stop_plan(&self.layout);
        match (mode.clock(), mode.output_feature()) {
            (Some(clock), Some(feature)) => (
                StartAction::Plan(build_start_plan(clock, feature, &self.layout)),
                Teardown {
                    drive_low: None,
                    stop,
                },
            ),
            _ => (
                StartAction::DriveHigh(self.layout.output),
                Teardown {
                    drive_low: Some(self.layout.output),
                    stop,
                },
            ),
        }
    }

    fn render_preview(&mut self, mode: &RunMode) -> PreviewStatus {
        let Some(renderer) = self.preview.as_mut() else {
            return PreviewStatus::NotRequested;
        };

        let preview = mode.preview(self.config.oversample, self.config.levels);
        match renderer.render(&preview) {
            Ok(()) => {
                self.record(RunEventKind::PreviewShown);
                PreviewStatus::Shown
            }
            Err(error) => {
                self.preview_error = Some(error);
                self.record(RunEventKind::PreviewFailed);
                PreviewStatus::Failed
            }
        }
    }

    fn execute<S>(
        &mut self,
        armed: &mut Armed<'_, S>,
        mode: &RunMode,
        start: &StartAction,
    ) -> Result<Execution, (CommStage, S::Error)>
    where
        S: DeviceSession,
    {
        let start_writes = match start {
            StartAction::DriveHigh(line) => {
                let register = Register::DigitalState(*line);
                armed
                    .session()
                    .write_address(register.address(), register.data_type(), 1)
                    .map_err(|error| self.comm_failed(CommStage::HoldHighWrite, error))?;
                1
            }
            StartAction::Plan(plan) => {
                armed
                    .session()
                    .write_registers(plan.as_slice())
                    .map_err(|error| self.comm_failed(CommStage::StartPlan, error))?;
                plan.len()
            }
        };
        self.record(RunEventKind::PlanIssued {
            writes: start_writes,
        });

        let hold = mode.hold_duration();
        self.record(RunEventKind::HoldStarted(hold));
        if self.timer.hold(hold) == HoldOutcome::Interrupted {
            self.record(RunEventKind::HoldInterrupted);
            return Ok(Execution {
                start_writes,
                interrupted: true,
                counter: None,
            });
        }
        self.record(RunEventKind::HoldElapsed);

        let counter = match (mode.kind(), self.layout.counter) {
            (RunModeKind::HoldHigh, _) | (_, None) => None,
            (_, Some(line)) => {
                let count = armed
                    .session()
                    .read_register(Register::ReadA(line))
                    .map_err(|error| self.comm_failed(CommStage::CounterRead, error))?;
                self.record(RunEventKind::CounterRead(count));
                Some(count)
            }
        };

        Ok(Execution {
            start_writes,
            interrupted: false,
            counter,
        })
    }

    fn comm_failed<E>(&mut self, stage: CommStage, error: E) -> (CommStage, E) {
        self.record(RunEventKind::CommFailed(stage));
        (stage, error)
    }

    fn transition(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid run transition {} -> {next}",
            self.state
        );
        self.record(RunEventKind::StateChanged {
            from: self.state,
            to: next,
        });
        self.state = next;
    }

    fn record(&mut self, event: RunEventKind) {
        let now = self.timer.now();
        self.telemetry.record(event, now);
    }
}

//! Collaborators the run controller drives but does not own.

use core::convert::Infallible;
use core::time::Duration;

use crate::registers::{DataType, Register, RegisterWrite};
use crate::telemetry::TelemetryInstant;
use crate::waveform::WaveformPreview;

/// Open connection to the device, borrowed for the length of one run.
///
/// The device does not apply a multi-register write atomically; an error may
/// arrive after some of `writes` have already taken effect.
pub trait DeviceSession {
    type Error;

    /// Writes every entry of `writes` in order.
    ///
    /// # Errors
    ///
    /// Returns the transport or device error that stopped the sequence.
    fn write_registers(&mut self, writes: &[RegisterWrite]) -> Result<(), Self::Error>;

    /// Writes a raw address; used to drive a plain digital line.
    ///
    /// # Errors
    ///
    /// Returns the transport or device error.
    fn write_address(
        &mut self,
        address: u16,
        data_type: DataType,
        value: u32,
    ) -> Result<(), Self::Error>;

    /// Reads the current value of `register`.
    ///
    /// # Errors
    ///
    /// Returns the transport or device error.
    fn read_register(&mut self, register: Register) -> Result<u32, Self::Error>;

    /// Receives the error of a teardown issued while a run was unwinding.
    ///
    /// The run never returns in that case, so this is the only place the
    /// failure surfaces.
    fn unwound_teardown_failed(&mut self, error: Self::Error);
}

/// How the blocking hold ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HoldOutcome {
    Elapsed,
    /// The operator cut the hold short.
    Interrupted,
}

/// Clock and blocking wait used while the output is running.
pub trait HoldTimer {
    type Instant: TelemetryInstant;

    fn now(&self) -> Self::Instant;

    /// Blocks for `duration` unless interrupted.
    fn hold(&mut self, duration: Duration) -> HoldOutcome;
}

/// Surface that shows the expected output before the run starts.
pub trait PreviewRenderer {
    type Error;

    /// Shows `preview`, blocking until the operator dismisses it.
    ///
    /// # Errors
    ///
    /// Returns the rendering failure; the run continues regardless.
    fn render(&mut self, preview: &WaveformPreview) -> Result<(), Self::Error>;
}

/// Renderer used when no preview was requested.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoPreview;

impl PreviewRenderer for NoPreview {
    type Error = Infallible;

    fn render(&mut self, _: &WaveformPreview) -> Result<(), Self::Error> {
        Ok(())
    }
}

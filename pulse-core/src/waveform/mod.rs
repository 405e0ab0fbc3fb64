//! Expected-output prediction for the preview plot.
//!
//! A [`WaveformPreview`] is a small description of the signal; its samples are
//! generated on demand, so a preview of a long continuous run costs nothing
//! until a renderer asks for points. Prediction only reads the solved
//! [`ClockPlan`] and never feeds back into register plans.

use core::time::Duration;

use crate::timing::ClockPlan;

/// Samples generated per output period unless configured otherwise.
pub const DEFAULT_OVERSAMPLE: u32 = 100;

/// Voltages the output line is drawn at.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OutputLevels {
    pub on_volts: f64,
    pub off_volts: f64,
}

impl OutputLevels {
    #[must_use]
    pub const fn new(on_volts: f64, off_volts: f64) -> Self {
        Self {
            on_volts,
            off_volts,
        }
    }
}

impl Default for OutputLevels {
    fn default() -> Self {
        Self::new(5.0, 0.0)
    }
}

/// One point of the predicted output.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WaveformSample {
    pub time_seconds: f64,
    pub level_volts: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Shape {
    Train {
        pulse_count: u32,
        frequency_hz: f64,
        roll_value_ticks: u32,
        on_ticks: u32,
    },
    Flat {
        duration_seconds: f64,
    },
}

/// Lazily sampled prediction of one run's output.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WaveformPreview {
    shape: Shape,
    oversample: u32,
    levels: OutputLevels,
}

impl WaveformPreview {
    /// Number of samples [`samples`](Self::samples) yields.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self.shape {
            Shape::Train { pulse_count, .. } => u64::from(pulse_count) * u64::from(self.oversample),
            Shape::Flat { .. } => u64::from(self.oversample) + 1,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time spanned by the prediction.
    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        match self.shape {
            Shape::Train {
                pulse_count,
                frequency_hz,
                ..
            } => f64::from(pulse_count) / frequency_hz,
            Shape::Flat { duration_seconds } => duration_seconds,
        }
    }

    #[must_use]
    pub const fn levels(&self) -> OutputLevels {
        self.levels
    }

    #[must_use]
    pub const fn oversample(&self) -> u32 {
        self.oversample
    }

    /// Random access to sample `index`, `None` past the end.
    #[must_use]
    pub fn sample(&self, index: u64) -> Option<WaveformSample> {
        if index >= self.len() {
            return None;
        }
        let oversample = u64::from(self.oversample);
        let sample = match self.shape {
            Shape::Train {
                frequency_hz,
                roll_value_ticks,
                on_ticks,
                ..
            } => {
                // Slot j of a period is high while j / oversample < on / roll.
                let slot = index % oversample;
                let high = slot * u64::from(roll_value_ticks) < u64::from(on_ticks) * oversample;
                WaveformSample {
                    time_seconds: to_f64(index) / (to_f64(oversample) * frequency_hz),
                    level_volts: self.level(high),
                }
            }
            Shape::Flat { duration_seconds } => WaveformSample {
                time_seconds: duration_seconds * to_f64(index) / to_f64(oversample),
                level_volts: self.levels.on_volts,
            },
        };
        Some(sample)
    }

    /// Restartable iterator over every sample in time order.
    #[must_use]
    pub fn samples(&self) -> Samples {
        Samples {
            preview: *self,
            next: 0,
            end: self.len(),
        }
    }

    fn level(&self, high: bool) -> f64 {
        if high {
            self.levels.on_volts
        } else {
            self.levels.off_volts
        }
    }
}

/// Iterator returned by [`WaveformPreview::samples`].
#[derive(Clone, Debug)]
pub struct Samples {
    preview: WaveformPreview,
    next: u64,
    end: u64,
}

impl Iterator for Samples {
    type Item = WaveformSample;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let sample = self.preview.sample(self.next);
        self.next += 1;
        sample
    }

    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        let skip = u64::try_from(n).unwrap_or(u64::MAX);
        self.next = self.next.saturating_add(skip).min(self.end);
        self.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next;
        match usize::try_from(remaining) {
            Ok(remaining) => (remaining, Some(remaining)),
            Err(_) => (usize::MAX, None),
        }
    }
}

impl DoubleEndedIterator for Samples {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        self.end -= 1;
        self.preview.sample(self.end)
    }
}

/// Predicts `pulse_count` periods of the solved waveform.
///
/// An `oversample` of zero falls back to [`DEFAULT_OVERSAMPLE`].
#[must_use]
pub fn predict(
    clock: &ClockPlan,
    pulse_count: u32,
    oversample: u32,
    levels: OutputLevels,
) -> WaveformPreview {
    WaveformPreview {
        shape: Shape::Train {
            pulse_count,
            frequency_hz: clock.achieved_frequency_hz,
            roll_value_ticks: clock.roll_value_ticks,
            on_ticks: clock.on_ticks,
        },
        oversample: effective_oversample(oversample),
        levels,
    }
}

/// Predicts a continuous run: as many whole periods as fit in `duration`.
#[must_use]
pub fn predict_continuous(
    clock: &ClockPlan,
    duration: Duration,
    oversample: u32,
    levels: OutputLevels,
) -> WaveformPreview {
    let periods = whole_periods(duration.as_secs_f64() * clock.achieved_frequency_hz);
    predict(clock, periods, oversample, levels)
}

/// Predicts a line held at the on level for `duration`.
#[must_use]
pub fn predict_hold(duration: Duration, oversample: u32, levels: OutputLevels) -> WaveformPreview {
    WaveformPreview {
        shape: Shape::Flat {
            duration_seconds: duration.as_secs_f64(),
        },
        oversample: effective_oversample(oversample),
        levels,
    }
}

fn effective_oversample(oversample: u32) -> u32 {
    if oversample == 0 {
        DEFAULT_OVERSAMPLE
    } else {
        oversample
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(value: u64) -> f64 {
    value as f64
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_periods(value: f64) -> u32 {
    value as u32
}

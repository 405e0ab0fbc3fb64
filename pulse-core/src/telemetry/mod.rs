//! Bounded run telemetry recorded by the controller.
//!
//! The core has no logger. Instead every run leaves a short, timestamped trail
//! in a fixed-size ring that the host drains into its own log after the run.

use core::{fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::controller::{CommStage, RunModeKind, RunState};

/// Total number of telemetry entries retained per run.
pub const TELEMETRY_RING_CAPACITY: usize = 32;

/// Identifier assigned to each record, monotonically increasing within a run.
pub type EventId = u32;

/// Trait implemented by monotonic instant wrappers used for telemetry tracking.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

#[cfg(feature = "std")]
impl TelemetryInstant for std::time::Instant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        std::time::Instant::saturating_duration_since(self, earlier)
    }
}

/// Events emitted while a run progresses.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RunEventKind {
    StateChanged { from: RunState, to: RunState },
    ModeSelected(RunModeKind),
    /// A start plan (or the single hold-high write) reached the session.
    PlanIssued { writes: usize },
    HoldStarted(Duration),
    HoldElapsed,
    HoldInterrupted,
    CounterRead(u32),
    PreviewShown,
    PreviewFailed,
    CommFailed(CommStage),
    TeardownIssued { writes: usize },
    TeardownFailed,
}

impl fmt::Display for RunEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunEventKind::StateChanged { from, to } => write!(f, "state {from} -> {to}"),
            RunEventKind::ModeSelected(kind) => write!(f, "mode {kind}"),
            RunEventKind::PlanIssued { writes } => write!(f, "plan-issued writes={writes}"),
            RunEventKind::HoldStarted(duration) => write!(f, "hold-started {duration:?}"),
            RunEventKind::HoldElapsed => f.write_str("hold-elapsed"),
            RunEventKind::HoldInterrupted => f.write_str("hold-interrupted"),
            RunEventKind::CounterRead(count) => write!(f, "counter-read {count}"),
            RunEventKind::PreviewShown => f.write_str("preview-shown"),
            RunEventKind::PreviewFailed => f.write_str("preview-failed"),
            RunEventKind::CommFailed(stage) => write!(f, "comm-failed during {stage}"),
            RunEventKind::TeardownIssued { writes } => write!(f, "teardown-issued writes={writes}"),
            RunEventKind::TeardownFailed => f.write_str("teardown-failed"),
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RunRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: RunEventKind,
    /// Time since the first record of the run.
    pub since_start: Duration,
}

/// Records run events into a fixed-size ring buffer.
pub struct RunTelemetry<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: HistoryBuf<RunRecord<TInstant>, CAPACITY>,
    started_at: Option<TInstant>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> RunTelemetry<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    /// Creates a recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            started_at: None,
            next_event_id: 0,
        }
    }

    /// Forgets the previous run.
    pub fn clear(&mut self) {
        self.ring.clear();
        self.started_at = None;
        self.next_event_id = 0;
    }

    /// Records `event`; the first record after [`clear`](Self::clear) marks the run start.
    pub fn record(&mut self, event: RunEventKind, timestamp: TInstant) -> EventId {
        let started_at = *self.started_at.get_or_insert(timestamp);
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(RunRecord {
            id,
            timestamp,
            event,
            since_start: timestamp.saturating_duration_since(started_at),
        });

        id
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, RunRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&RunRecord<TInstant>> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Returns `true` when any retained record matches `predicate`.
    pub fn contains(&self, mut predicate: impl FnMut(&RunEventKind) -> bool) -> bool {
        self.ring.oldest_ordered().any(|record| predicate(&record.event))
    }
}

impl<TInstant, const CAPACITY: usize> Default for RunTelemetry<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

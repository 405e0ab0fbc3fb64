//! Host hold timer that the operator can cut short from the keyboard or with
//! SIGINT/SIGTERM.

use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use pulse_core::controller::{HoldOutcome, HoldTimer};
use tracing::{debug, warn};

/// Upper bound on one keyboard poll or sleep slice so the deadline is never
/// overshot by much and a signal is noticed promptly.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Raised by the process signal handler, consumed by the next hold.
#[derive(Clone, Debug, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    /// Routes SIGINT and SIGTERM (Ctrl-C on Windows) into a new flag.
    ///
    /// # Errors
    ///
    /// Returns the error from registering the handler, e.g. when one is
    /// already installed.
    pub fn install() -> Result<Self, ctrlc::Error> {
        let flag = Self::default();
        let handler = flag.clone();
        ctrlc::set_handler(move || handler.raise())?;
        Ok(flag)
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Returns `true` for Ctrl-C, Esc or `q`.
#[must_use]
pub fn is_interrupt(key: &KeyEvent) -> bool {
    if key.kind == KeyEventKind::Release {
        return false;
    }
    match key.code {
        KeyCode::Esc | KeyCode::Char('q' | 'Q') => true,
        KeyCode::Char('c' | 'C') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Blocks for the hold while watching the keyboard and the interrupt flag.
///
/// Without a terminal on stdin only the flag can end the hold early.
#[derive(Debug)]
pub struct TerminalHoldTimer {
    interactive: bool,
    interrupt: InterruptFlag,
}

impl TerminalHoldTimer {
    #[must_use]
    pub fn new(interrupt: InterruptFlag) -> Self {
        Self {
            interactive: io::stdin().is_terminal(),
            interrupt,
        }
    }

    fn interrupted(&self) -> bool {
        let interrupted = self.interrupt.take();
        if interrupted {
            debug!("hold interrupted by signal");
        }
        interrupted
    }

    fn watch(&self, deadline: Instant) -> io::Result<HoldOutcome> {
        let _raw = RawMode::enable()?;
        loop {
            if self.interrupted() {
                return Ok(HoldOutcome::Interrupted);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(HoldOutcome::Elapsed);
            }
            if !event::poll(remaining.min(POLL_INTERVAL))? {
                continue;
            }
            if matches!(event::read()?, Event::Key(key) if is_interrupt(&key)) {
                debug!("hold interrupted from keyboard");
                return Ok(HoldOutcome::Interrupted);
            }
        }
    }

    fn sleep_until(&self, deadline: Instant) -> HoldOutcome {
        loop {
            if self.interrupted() {
                return HoldOutcome::Interrupted;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return HoldOutcome::Elapsed;
            }
            thread::sleep(remaining.min(POLL_INTERVAL));
        }
    }
}

impl HoldTimer for TerminalHoldTimer {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn hold(&mut self, duration: Duration) -> HoldOutcome {
        let deadline = Instant::now() + duration;
        if self.interactive {
            match self.watch(deadline) {
                Ok(outcome) => return outcome,
                Err(error) => {
                    warn!(%error, "keyboard unavailable, holding with signal interrupt only");
                    self.interactive = false;
                }
            }
        }
        self.sleep_until(deadline)
    }
}

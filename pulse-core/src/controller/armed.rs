//! Scoped ownership of an energized output.

use crate::registers::{DataType, DioChannel, Register, RegisterPlan};

use super::session::DeviceSession;

/// Writes that return the output to a safe, de-energized state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Teardown {
    /// Plain digital line to drive low before the stop plan (hold-high runs).
    pub drive_low: Option<DioChannel>,
    pub stop: RegisterPlan,
}

impl Teardown {
    /// Issues every teardown write, continuing past failures.
    ///
    /// Returns the number of writes attempted.
    ///
    /// # Errors
    ///
    /// Returns the first write error seen.
    pub fn issue<S>(&self, session: &mut S) -> Result<usize, S::Error>
    where
        S: DeviceSession,
    {
        let mut first_error = None;
        let mut attempted = 0;

        if let Some(line) = self.drive_low {
            let register = Register::DigitalState(line);
            attempted += 1;
            if let Err(error) = session.write_address(register.address(), DataType::Uint16, 0) {
                first_error = Some(error);
            }
        }

        for write in &self.stop {
            attempted += 1;
            if let Err(error) = session.write_registers(core::slice::from_ref(write)) {
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(attempted),
        }
    }
}

/// Guard held while the output may be energized.
///
/// [`release`](Self::release) issues the teardown and reports its result. If
/// the guard is dropped without being released (a panic while holding), the
/// teardown is still issued and a failure goes to
/// [`DeviceSession::unwound_teardown_failed`].
pub struct Armed<'s, S>
where
    S: DeviceSession,
{
    session: &'s mut S,
    teardown: Teardown,
    released: bool,
}

impl<'s, S> Armed<'s, S>
where
    S: DeviceSession,
{
    #[must_use]
    pub fn new(session: &'s mut S, teardown: Teardown) -> Self {
        Self {
            session,
            teardown,
            released: false,
        }
    }

    pub fn session(&mut self) -> &mut S {
        self.session
    }

    /// Issues the teardown.
    ///
    /// # Errors
    ///
    /// Returns the first write error seen while tearing down.
    pub fn release(mut self) -> Result<usize, S::Error> {
        self.released = true;
        self.teardown.issue(self.session)
    }
}

impl<S> Drop for Armed<'_, S>
where
    S: DeviceSession,
{
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(error) = self.teardown.issue(self.session) {
            self.session.unwound_teardown_failed(error);
        }
    }
}

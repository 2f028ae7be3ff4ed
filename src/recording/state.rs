//! Session state machine.
//!
//! `Idle -> Starting -> Running -> Stopping -> Idle`. A worker that reaches
//! its bound moves itself to `Stopping` while it finalizes; a failed start
//! moves `Starting -> Idle`.

use crate::error::{RecordingError, RecordingResult};
use parking_lot::Mutex;
use std::fmt;

/// Where the recording session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingState {
    /// No session
    #[default]
    Idle,
    /// Worker dispatched, writers opening
    Starting,
    /// Worker loop running
    Running,
    /// Stop requested, worker finalizing
    Stopping,
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordingState::Idle => "idle",
            RecordingState::Starting => "starting",
            RecordingState::Running => "running",
            RecordingState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Shared, lock-protected [`RecordingState`].
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    state: Mutex<RecordingState>,
}

impl SessionState {
    pub(crate) fn get(&self) -> RecordingState {
        *self.state.lock()
    }

    /// `Idle -> Starting`, the only way into a session. `on_begin` runs
    /// under the state lock, ordered against [`SessionState::request_stop`].
    pub(crate) fn begin(&self, on_begin: impl FnOnce()) -> RecordingResult<()> {
        let mut state = self.state.lock();
        if *state != RecordingState::Idle {
            return Err(RecordingError::AlreadyActive);
        }
        *state = RecordingState::Starting;
        on_begin();
        Ok(())
    }

    /// Move `from -> to` if the state is still `from`.
    pub(crate) fn advance(&self, from: RecordingState, to: RecordingState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    /// Mark a live session as stopping and run `on_stop` under the lock.
    /// Returns false, without running `on_stop`, when already idle.
    pub(crate) fn request_stop(&self, on_stop: impl FnOnce()) -> bool {
        let mut state = self.state.lock();
        if *state == RecordingState::Idle {
            return false;
        }
        *state = RecordingState::Stopping;
        on_stop();
        true
    }

    pub(crate) fn reset(&self) {
        *self.state.lock() = RecordingState::Idle;
    }
}

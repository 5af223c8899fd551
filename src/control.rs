//! Cooperative pause/stop signalling between the caller and the worker.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};

/// Lifecycle of one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DriverState {
    Idle = 0,
    Running = 1,
    Paused = 2,
    Completed = 3,
    Stopped = 4,
}

impl DriverState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => DriverState::Running,
            2 => DriverState::Paused,
            3 => DriverState::Completed,
            4 => DriverState::Stopped,
            _ => DriverState::Idle,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DriverState::Completed | DriverState::Stopped)
    }
}

#[derive(Debug, Default)]
struct Flags {
    paused: AtomicBool,
    stopped: AtomicBool,
    state: AtomicU8,
}

/// Cloneable handle for pausing, resuming and stopping a batch run and for
/// watching its state from another thread.
///
/// Stop is one-way: once set it is never cleared, and a stopped run cannot
/// be resumed.
#[derive(Debug, Clone, Default)]
pub struct ControlHandle {
    flags: Arc<Flags>,
}

impl ControlHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.flags.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.flags.paused.store(false, Ordering::SeqCst);
    }

    /// Flip the pause flag; returns the new value.
    pub fn toggle_pause(&self) -> bool {
        !self.flags.paused.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.flags.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.flags.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.stopped.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> DriverState {
        DriverState::from_u8(self.flags.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: DriverState) {
        self.flags.state.store(state as u8, Ordering::SeqCst);
    }

    /// Block while paused, polling every `poll`. Returns
    /// [`ConvertError::Stopped`] as soon as a stop is observed.
    pub fn checkpoint(&self, poll: Duration) -> Result<()> {
        if self.is_stopped() {
            return Err(ConvertError::Stopped);
        }
        if !self.is_paused() {
            return Ok(());
        }

        let resume_to = self.state();
        self.set_state(DriverState::Paused);
        tracing::info!("conversion paused");
        while self.is_paused() && !self.is_stopped() {
            thread::sleep(poll);
        }
        if self.is_stopped() {
            return Err(ConvertError::Stopped);
        }
        self.set_state(if resume_to == DriverState::Paused {
            DriverState::Running
        } else {
            resume_to
        });
        tracing::info!("conversion resumed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    const POLL: Duration = Duration::from_millis(5);

    #[test]
    fn toggle_reports_new_value() {
        let control = ControlHandle::new();
        assert!(control.toggle_pause());
        assert!(control.is_paused());
        assert!(!control.toggle_pause());
        assert!(!control.is_paused());
    }

    #[test]
    fn checkpoint_passes_when_running() {
        let control = ControlHandle::new();
        control.checkpoint(POLL).unwrap();
    }

    #[test]
    fn checkpoint_fails_after_stop_even_if_resumed() {
        let control = ControlHandle::new();
        control.stop();
        control.resume();
        assert!(matches!(control.checkpoint(POLL), Err(ConvertError::Stopped)));
    }

    #[test]
    fn checkpoint_waits_for_resume() {
        let control = ControlHandle::new();
        control.set_state(DriverState::Running);
        control.pause();

        let remote = control.clone();
        let waker = thread::spawn(move || {
            while remote.state() != DriverState::Paused {
                thread::sleep(POLL);
            }
            thread::sleep(Duration::from_millis(50));
            remote.resume();
        });

        let started = Instant::now();
        control.checkpoint(POLL).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(control.state(), DriverState::Running);
        waker.join().unwrap();
    }

    #[test]
    fn stop_wakes_a_paused_checkpoint() {
        let control = ControlHandle::new();
        control.set_state(DriverState::Running);
        control.pause();

        let remote = control.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.stop();
        });

        assert!(matches!(control.checkpoint(POLL), Err(ConvertError::Stopped)));
        stopper.join().unwrap();
    }
}

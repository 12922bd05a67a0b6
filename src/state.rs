/*
  cabinet-sentry, a telecom/battery cabinet supervisory controller.
  Copyright (C) 2024 The cabinet-sentry Authors.

  cabinet-sentry is free software: you can redistribute it and/or modify
  it under the terms of the GNU General Public License as published by
  the Free Software Foundation, either version 3 of the License, or
  (at your option) any later version.

  cabinet-sentry is distributed in the hope that it will be useful,
  but WITHOUT ANY WARRANTY; without even the implied warranty of
  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
  GNU General Public License for more details.

  You should have received a copy of the GNU General Public License
  along with this program.  If not, see <http://www.gnu.org/licenses/>.
*/

//! The single lock-protected runtime state snapshot (§3 "RuntimeState", §4.4).

use std::sync::Mutex;
use std::time::Instant;

use crate::hardware::{DoorState, FloodState};
use crate::sensors::SensorSnapshot;
use crate::OutputSet;

/// The maximum number of doors a board can have wired (§3: "at most 6 doors").
pub const MAX_DOORS: usize = 6;
/// The maximum number of flood sensors a board can have wired (§3: "at most ... 2 floods").
pub const MAX_FLOODS: usize = 2;

#[derive(Debug)]
/// Errors arising from working with a `Guard`.
pub enum Error {
    /// The guard's lock was poisoned, implying a panicked thread owned it.
    Poison,
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::Poison
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Poison => write!(f, "the runtime state lock was poisoned"),
        }
    }
}

impl std::error::Error for Error {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The conditioned state of every door and flood input, indexed by id - 1.
pub struct InputSnapshot {
    /// `doors[i]` is the debounced state of `door_{i+1}`.
    pub doors: [DoorState; MAX_DOORS],
    /// `floods[i]` is the anti-flapped state of `flood_{i+1}`.
    pub floods: [FloodState; MAX_FLOODS],
}

impl Default for InputSnapshot {
    fn default() -> Self {
        InputSnapshot {
            doors: [DoorState::Closed; MAX_DOORS],
            floods: [FloodState::Ok; MAX_FLOODS],
        }
    }
}

impl InputSnapshot {
    #[must_use]
    /// Whether any configured door is open.
    pub fn any_door_open(&self) -> bool {
        self.doors.iter().any(|d| *d == DoorState::Open)
    }

    #[must_use]
    /// Whether any configured flood sensor reads flood.
    pub fn any_flood(&self) -> bool {
        self.floods.iter().any(|f| *f == FloodState::Flood)
    }
}

#[derive(Clone, Debug, PartialEq)]
/// A single consistent snapshot of the controller's world: the last conditioned inputs, the
/// last-known sensor readings, the last committed outputs, and bookkeeping flags.
///
/// Mutated exclusively by the Control Loop (§3 "Lifecycle"); read by external callers through
/// `Guard::read`, which always returns an owned copy — no pointer into the guarded state ever
/// escapes the lock.
pub struct RuntimeState {
    /// The most recently conditioned inputs.
    pub inputs: InputSnapshot,
    /// The most recently read sensors.
    pub sensors: SensorSnapshot,
    /// The outputs as last committed to hardware (post polarity inversion, logical sense).
    pub outputs: OutputSet,
    /// Human-readable reason for the current output state, if the logic evaluator produced one.
    pub alarm_reason: Option<String>,
    /// Whether the buzzer is muted regardless of alarm state.
    pub buzzer_muted: bool,
    /// The latest expiry among any active strikes, or `None` if no strike is active.
    pub strike_active_until: Option<Instant>,
    /// When this snapshot was last updated.
    pub last_updated: Instant,
    /// The most recent error recorded by the control loop, if any.
    pub error: Option<String>,
    /// Whether manual mode is enabled.
    pub manual_mode: bool,
    /// The manual-mode override state, applied verbatim to outputs while `manual_mode` is set.
    pub manual_overrides: OutputSet,
}

impl RuntimeState {
    #[must_use]
    /// Construct the initial runtime state: all outputs off, no errors, manual mode disabled.
    pub fn initial(now: Instant) -> RuntimeState {
        RuntimeState {
            inputs: InputSnapshot::default(),
            sensors: SensorSnapshot::default(),
            outputs: OutputSet::all_off(),
            alarm_reason: None,
            buzzer_muted: false,
            strike_active_until: None,
            last_updated: now,
            error: None,
            manual_mode: false,
            manual_overrides: OutputSet::all_off(),
        }
    }
}

/// A lock-protected handle to the single `RuntimeState` instance.
///
/// `read` and `update` are the only ways in or out: `read` is a cheap clone under a read-style
/// lock, `update` applies a closure under the lock and refreshes `last_updated` once the closure
/// returns — mirroring the Python original's `StateContainer.update(**fields)`, but as a typed
/// setter instead of a keyword-argument merge (Design Notes: "`update(**fields)` becomes typed
/// setters"). No I/O is ever performed while the lock is held.
pub struct Guard {
    state: Mutex<RuntimeState>,
}

impl Guard {
    #[must_use]
    /// Construct a new `Guard` wrapping the given initial state.
    pub fn new(initial: RuntimeState) -> Guard {
        Guard {
            state: Mutex::new(initial),
        }
    }

    /// Obtain an owned copy of the current state.
    ///
    /// # Errors
    ///
    /// Returns `Error::Poison` if the internal lock is poisoned.
    pub fn read(&self) -> Result<RuntimeState, Error> {
        Ok(self.state.lock()?.clone())
    }

    /// Apply `f` to the state under the lock, then refresh `last_updated` to `now`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Poison` if the internal lock is poisoned.
    pub fn update(&self, now: Instant, f: impl FnOnce(&mut RuntimeState)) -> Result<(), Error> {
        let mut guard = self.state.lock()?;
        f(&mut guard);
        guard.last_updated = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_returns_independent_copy() {
        let guard = Guard::new(RuntimeState::initial(Instant::now()));
        let mut snapshot = guard.read().unwrap();
        snapshot.buzzer_muted = true;
        assert!(!guard.read().unwrap().buzzer_muted);
    }

    #[test]
    fn update_refreshes_last_updated() {
        let t0 = Instant::now();
        let guard = Guard::new(RuntimeState::initial(t0));
        std::thread::sleep(std::time::Duration::from_millis(5));
        let t1 = Instant::now();
        guard.update(t1, |s| s.buzzer_muted = true).unwrap();
        let snapshot = guard.read().unwrap();
        assert!(snapshot.buzzer_muted);
        assert_eq!(snapshot.last_updated, t1);
    }

    #[test]
    fn any_door_open_detects_single_open_door() {
        let mut inputs = InputSnapshot::default();
        assert!(!inputs.any_door_open());
        inputs.doors[2] = DoorState::Open;
        assert!(inputs.any_door_open());
    }
}

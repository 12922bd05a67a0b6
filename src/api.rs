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

//! The consumer contract external callers drive the controller through (§6).
//!
//! Grounded on `original_source/.../api/v1.py`'s handler surface and on the teacher's
//! `execution.rs::handle_command` dispatch idiom, but as plain fallible methods: the out-of-scope
//! HTTP layer (or a CLI, or a test) calls these directly and maps the results to whatever status
//! codes or responses it needs. This module never touches the expander bus or sensors, only the
//! already-initialised `RuntimeState`, `StrikeTimers`, and `ConfigHandle`.

use std::fmt;
use std::io::Write;
use std::time::Instant;

use crate::config::ConfigHandle;
use crate::console::{EventKind, EventLog};
use crate::state::{Guard, RuntimeState};
use crate::strike::{self, Timers};
use crate::{CabinetError, LogicalOutput};

#[derive(Debug)]
/// Errors specific to the consumer contract, beyond what the underlying modules already report.
pub enum Error {
    /// `set_manual_override` was given a name outside the closed `LogicalOutput` set (§6:
    /// "rejects unknown names").
    UnknownOutput(String),
    /// A lock somewhere beneath this call was poisoned.
    State(CabinetError),
    /// `trigger_strike` could not be accepted; carries the exact reason the out-of-scope HTTP
    /// layer is expected to map to a status code (§6: `not_configured`→404,
    /// `transistor_unavailable`→503).
    Strike(strike::Error),
}

impl From<strike::Error> for Error {
    fn from(err: strike::Error) -> Self {
        Error::Strike(err)
    }
}

impl From<CabinetError> for Error {
    fn from(err: CabinetError) -> Self {
        Error::State(err)
    }
}

impl From<crate::state::Error> for Error {
    fn from(err: crate::state::Error) -> Self {
        Error::State(CabinetError::from(err))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownOutput(name) => write!(f, "unknown logical output {name}"),
            Error::State(e) => write!(f, "{e}"),
            Error::Strike(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {}

/// A handle through which an external collaborator (HTTP layer, CLI, test) drives the running
/// controller without touching hardware directly.
pub struct Api<'a, WEvent: Write> {
    config: &'a ConfigHandle,
    state: &'a Guard,
    timers: &'a Timers,
    events: &'a EventLog<WEvent>,
}

impl<'a, WEvent: Write> Api<'a, WEvent> {
    #[must_use]
    /// Construct a view over an already-running controller's collaborators.
    pub fn new(
        config: &'a ConfigHandle,
        state: &'a Guard,
        timers: &'a Timers,
        events: &'a EventLog<WEvent>,
    ) -> Api<'a, WEvent> {
        Api {
            config,
            state,
            timers,
            events,
        }
    }

    /// Read a consistent snapshot of the current runtime state (§6 `RuntimeState.read`).
    ///
    /// # Errors
    ///
    /// Returns `Error` if the state lock is poisoned.
    pub fn read(&self) -> Result<RuntimeState, Error> {
        Ok(self.state.read()?)
    }

    /// Enable or disable manual mode. Takes effect at the next commit; does not itself force a
    /// commit (§6 `set_manual_mode`).
    ///
    /// # Errors
    ///
    /// Returns `Error` if the state lock is poisoned.
    pub fn set_manual_mode(&self, enabled: bool, now: Instant) -> Result<(), Error> {
        self.state.update(now, |s| s.manual_mode = enabled)?;
        Ok(())
    }

    /// Force a single logical output's manual-mode state. Has no visible effect unless manual
    /// mode is also enabled (§6 `set_manual_override`).
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownOutput` if `output_name` is not one of the closed `LogicalOutput`
    /// names, or `Error::State` if the state lock is poisoned.
    pub fn set_manual_override(&self, output_name: &str, on: bool, now: Instant) -> Result<(), Error> {
        let output = LogicalOutput::parse(output_name)
            .ok_or_else(|| Error::UnknownOutput(output_name.to_string()))?;
        self.state
            .update(now, |s| s.manual_overrides.set(output, on))?;
        Ok(())
    }

    /// Trigger a strike release (§6 `trigger_strike`). On failure the returned `Error::Strike`
    /// variant is exactly what the out-of-scope HTTP layer is expected to map to a status code
    /// (`NotConfigured`→404, `TransistorUnavailable`→503).
    ///
    /// # Errors
    ///
    /// Returns `Error::Strike` if the strike id has no transistor assignment, or the assignment
    /// is not a transistor channel. Returns `Error::State` if configuration cannot be read.
    pub fn trigger_strike(&self, strike_id: &str, now: Instant) -> Result<(), Error> {
        let config = self.config.current()?;
        self.timers.trigger(&config, strike_id, now)?;
        let _ = self
            .events
            .record(EventKind::Strike, format!("{strike_id} triggered"));
        Ok(())
    }

    /// Mute or unmute the alarm buzzer. Effective at the next commit (§6 `mute_buzzer`).
    ///
    /// # Errors
    ///
    /// Returns `Error` if the state lock is poisoned.
    pub fn mute_buzzer(&self, muted: bool, now: Instant) -> Result<(), Error> {
        self.state.update(now, |s| s.buzzer_muted = muted)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::state::RuntimeState;
    use std::io::Cursor;

    fn config() -> Configuration {
        let json = r##"{
            "thresholds": { "heater_c": 5.0, "cooler_c": 25.0, "fan_c": 30.0, "hysteresis_c": 1.0 },
            "loops": { "fast_tick_ms": 250, "logic_tick_seconds": 60 },
            "inputs": {
                "door_channels": [], "flood_channels": [],
                "polarities": { "door_open_is_high": true, "flood_low_is_flood": true, "dip_on_is_high": true },
                "anti_glitch_ms": 150, "anti_flap_seconds": 3.0, "flood_refresh_seconds": 120.0
            },
            "outputs": {
                "polarities": { "relays_active_low": false, "transistors_active_low": false },
                "mapping": [
                    { "output": "alarm", "channels": ["K1"] },
                    { "output": "cooler", "channels": ["K2"] },
                    { "output": "light", "channels": ["K3"] },
                    { "output": "heater", "channels": ["K4"] },
                    { "output": "fan_48v", "channels": ["K5"] },
                    { "output": "fan_230v", "channels": ["K6"] }
                ]
            },
            "sensors": { "dht11": { "enabled": true, "battery_probe": 0, "cabinet_probe": 1 } },
            "strike": { "default_duration_seconds": 10.0, "assignments": [{ "strike_id": "strike_1", "transistor": "T3" }] },
            "manual": { "enabled": false, "overrides": [] },
            "log_buffer_size": 64
        }"##;
        Configuration::parse(&mut Cursor::new(json)).unwrap()
    }

    #[test]
    fn set_manual_mode_then_read_reflects_change() {
        let config_handle = ConfigHandle::new(config());
        let state = Guard::new(RuntimeState::initial(Instant::now()));
        let timers = Timers::new();
        let events = EventLog::new(Cursor::new(Vec::new()), 64);
        let api = Api::new(&config_handle, &state, &timers, &events);

        api.set_manual_mode(true, Instant::now()).unwrap();
        assert!(api.read().unwrap().manual_mode);
    }

    #[test]
    fn set_manual_override_rejects_unknown_output() {
        let config_handle = ConfigHandle::new(config());
        let state = Guard::new(RuntimeState::initial(Instant::now()));
        let timers = Timers::new();
        let events = EventLog::new(Cursor::new(Vec::new()), 64);
        let api = Api::new(&config_handle, &state, &timers, &events);

        let err = api
            .set_manual_override("siren", true, Instant::now())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownOutput(_)));
    }

    #[test]
    fn set_manual_override_applies_to_state() {
        let config_handle = ConfigHandle::new(config());
        let state = Guard::new(RuntimeState::initial(Instant::now()));
        let timers = Timers::new();
        let events = EventLog::new(Cursor::new(Vec::new()), 64);
        let api = Api::new(&config_handle, &state, &timers, &events);

        api.set_manual_override("heater", true, Instant::now()).unwrap();
        assert!(api.read().unwrap().manual_overrides.get(LogicalOutput::Heater));
    }

    #[test]
    fn trigger_strike_unknown_id_reports_not_configured() {
        let config_handle = ConfigHandle::new(config());
        let state = Guard::new(RuntimeState::initial(Instant::now()));
        let timers = Timers::new();
        let events = EventLog::new(Cursor::new(Vec::new()), 64);
        let api = Api::new(&config_handle, &state, &timers, &events);

        let err = api.trigger_strike("strike_nope", Instant::now()).unwrap_err();
        assert!(matches!(err, Error::Strike(strike::Error::NotConfigured)));
    }

    #[test]
    fn trigger_strike_configured_id_succeeds() {
        let config_handle = ConfigHandle::new(config());
        let state = Guard::new(RuntimeState::initial(Instant::now()));
        let timers = Timers::new();
        let events = EventLog::new(Cursor::new(Vec::new()), 64);
        let api = Api::new(&config_handle, &state, &timers, &events);

        api.trigger_strike("strike_1", Instant::now()).unwrap();
    }

    #[test]
    fn mute_buzzer_updates_state() {
        let config_handle = ConfigHandle::new(config());
        let state = Guard::new(RuntimeState::initial(Instant::now()));
        let timers = Timers::new();
        let events = EventLog::new(Cursor::new(Vec::new()), 64);
        let api = Api::new(&config_handle, &state, &timers, &events);

        api.mute_buzzer(true, Instant::now()).unwrap();
        assert!(api.read().unwrap().buzzer_muted);
    }
}

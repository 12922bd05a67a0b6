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

#![warn(clippy::pedantic)]

//! `cabinet-sentry`: the supervisory controller for a telecom/battery
//! cabinet.
//!
//! Reads environmental and intrusion sensors over a pair of MCP23S17 GPIO
//! expanders, evaluates safety rules against configurable thresholds, and
//! drives relay/transistor outputs controlling alarm, climate and door
//! strikes. Structured as a dual-rate control loop (fast input scan, slow
//! logic/sensor cycle) sharing a single hardware bus and a single
//! mutex-guarded runtime snapshot.

pub mod api;
pub mod config;
pub mod console;
pub mod control;
pub mod hardware;
pub mod input;
pub mod logic;
pub mod runtime;
pub mod sensors;
pub mod state;
pub mod strike;

use std::sync::PoisonError;

#[derive(Debug)]
/// The top-level error type for the cabinet controller.
///
/// Most errors are handled locally (§7 of the design): a transient bus
/// failure just skips a commit, a missing sensor degrades to `None`. This
/// type exists for the small set of failures that can reach all the way up
/// to `main`, namely startup failures.
pub enum CabinetError {
    /// No command-line argument was given where one was required.
    Args(&'static str),
    /// An I/O error occurred (reading the configuration file, creating log
    /// files, etc).
    Io(std::io::Error),
    /// The configuration file failed to parse or validate.
    Config(config::Error),
    /// A lock was poisoned, implying a panicked thread owned it.
    Poison,
    /// The expander bus did not respond at startup and simulation mode was
    /// explicitly disabled.
    BusUnavailable,
    /// A hardware driver error reached the top level (startup only; the
    /// control loop absorbs these per §7).
    Hardware(hardware::Error),
}

impl From<hardware::Error> for CabinetError {
    fn from(err: hardware::Error) -> Self {
        CabinetError::Hardware(err)
    }
}

impl From<state::Error> for CabinetError {
    fn from(err: state::Error) -> Self {
        match err {
            state::Error::Poison => CabinetError::Poison,
        }
    }
}

impl From<std::io::Error> for CabinetError {
    fn from(err: std::io::Error) -> Self {
        CabinetError::Io(err)
    }
}

impl From<config::Error> for CabinetError {
    fn from(err: config::Error) -> Self {
        CabinetError::Config(err)
    }
}

impl<T> From<PoisonError<T>> for CabinetError {
    fn from(_: PoisonError<T>) -> Self {
        CabinetError::Poison
    }
}

impl std::fmt::Display for CabinetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CabinetError::Args(msg) => write!(f, "{msg}"),
            CabinetError::Io(e) => write!(f, "I/O error: {e}"),
            CabinetError::Config(e) => write!(f, "configuration error: {e}"),
            CabinetError::Poison => write!(f, "a lock was poisoned"),
            CabinetError::BusUnavailable => {
                write!(f, "expander bus unavailable and simulation mode disabled")
            }
            CabinetError::Hardware(e) => write!(f, "hardware error: {e}"),
        }
    }
}

impl std::error::Error for CabinetError {}

/// The closed set of logical outputs the controller can drive.
///
/// Replaces a dynamic dictionary keyed by output name with a dense
/// enumeration: every place that would have looked up a name now indexes an
/// array of six known slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogicalOutput {
    /// Audible/visual alarm.
    Alarm,
    /// Cabinet air conditioning.
    Cooler,
    /// Cabinet interior lighting.
    Light,
    /// Cabinet heater.
    Heater,
    /// 48V DC exhaust fan.
    Fan48v,
    /// 230V AC exhaust fan.
    Fan230v,
}

impl LogicalOutput {
    /// All logical outputs, in a fixed, stable order.
    pub const ALL: [LogicalOutput; 6] = [
        LogicalOutput::Alarm,
        LogicalOutput::Cooler,
        LogicalOutput::Light,
        LogicalOutput::Heater,
        LogicalOutput::Fan48v,
        LogicalOutput::Fan230v,
    ];

    #[must_use]
    /// The stable string name of this output, as used in configuration and
    /// in the external consumer contract (`set_manual_override`, etc).
    pub fn name(self) -> &'static str {
        match self {
            LogicalOutput::Alarm => "alarm",
            LogicalOutput::Cooler => "cooler",
            LogicalOutput::Light => "light",
            LogicalOutput::Heater => "heater",
            LogicalOutput::Fan48v => "fan_48v",
            LogicalOutput::Fan230v => "fan_230v",
        }
    }

    #[must_use]
    /// Parse a logical output name, rejecting anything outside the closed
    /// set (§6: "rejects unknown names").
    pub fn parse(name: &str) -> Option<LogicalOutput> {
        LogicalOutput::ALL.into_iter().find(|o| o.name() == name)
    }
}

impl std::fmt::Display for LogicalOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A fixed-size map from every `LogicalOutput` to a boolean state.
///
/// Used instead of a `HashMap<String, bool>` so that lookups are array
/// indexing, not hashing, and so that "unknown output" cannot be represented.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct OutputSet([bool; 6]);

impl OutputSet {
    #[must_use]
    /// Construct an `OutputSet` with every output off.
    pub fn all_off() -> OutputSet {
        OutputSet([false; 6])
    }

    #[must_use]
    /// Read the state of a single output.
    pub fn get(&self, output: LogicalOutput) -> bool {
        self.0[output as usize]
    }

    /// Set the state of a single output.
    pub fn set(&mut self, output: LogicalOutput, state: bool) {
        self.0[output as usize] = state;
    }

    /// Iterate over every `(LogicalOutput, bool)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (LogicalOutput, bool)> + '_ {
        LogicalOutput::ALL.into_iter().map(|o| (o, self.get(o)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_round_trip() {
        for output in LogicalOutput::ALL {
            assert_eq!(LogicalOutput::parse(output.name()), Some(output));
        }
    }

    #[test]
    fn parse_rejects_unknown() {
        assert_eq!(LogicalOutput::parse("not_a_real_output"), None);
    }

    #[test]
    fn output_set_defaults_all_off() {
        let set = OutputSet::all_off();
        for output in LogicalOutput::ALL {
            assert!(!set.get(output));
        }
    }
}

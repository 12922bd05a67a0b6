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

//! The Strike Scheduler (§4.7): time-bounded force-on overrides composed onto output commits.
//!
//! Deliberately not a per-strike background thread: `services/strike.py` in the original source
//! spawns a daemon `Thread` per trigger, but the Control Loop already wakes up every fast tick, so
//! a strike is just a data entry polled at commit time (Design Notes: "No per-strike tasks are
//! spawned").

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::Configuration;
use crate::hardware::OutputChannel;

#[derive(Debug)]
/// Errors returned to a caller of `trigger`.
pub enum Error {
    /// The strike id has no transistor assignment in configuration.
    NotConfigured,
    /// The assigned transistor is not a legal strike target (not `T2..T8`, enforced at config
    /// load time, so this should not occur for a validated `Configuration`).
    TransistorUnavailable,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotConfigured => write!(f, "strike is not configured"),
            Error::TransistorUnavailable => write!(f, "assigned transistor is unavailable"),
        }
    }
}

/// Time-bounded force-on overrides, keyed by transistor. At most one entry per transistor (§3
/// "StrikeTimers").
pub struct Timers {
    active: Mutex<HashMap<OutputChannel, Instant>>,
}

impl Default for Timers {
    fn default() -> Self {
        Timers {
            active: Mutex::new(HashMap::new()),
        }
    }
}

impl Timers {
    #[must_use]
    /// Construct an empty timer set.
    pub fn new() -> Timers {
        Timers::default()
    }

    /// Resolve `strike_id` via `config` and, if configured, set its expiry to
    /// `now + default_duration_seconds`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConfigured` if the strike has no assignment, or
    /// `Error::TransistorUnavailable` if the assignment is not a transistor channel (defensive;
    /// a validated `Configuration` never has one).
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn trigger(
        &self,
        config: &Configuration,
        strike_id: &str,
        now: Instant,
    ) -> Result<(), Error> {
        let transistor = config.strike_transistor(strike_id).ok_or(Error::NotConfigured)?;
        if !matches!(transistor, OutputChannel::Transistor(_)) {
            return Err(Error::TransistorUnavailable);
        }
        let expiry = now + Duration::from_secs_f64(config.strike.default_duration_seconds.max(0.0));
        self.active.lock().unwrap().insert(transistor, expiry);
        Ok(())
    }

    /// Remove any entries that have expired as of `now`, returning the transistors that were
    /// released this call (for a release log entry, §4.7).
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn expire(&self, now: Instant) -> Vec<OutputChannel> {
        let mut active = self.active.lock().unwrap();
        let expired: Vec<OutputChannel> = active
            .iter()
            .filter(|&(_, &expiry)| now >= expiry)
            .map(|(&channel, _)| channel)
            .collect();
        for channel in &expired {
            active.remove(channel);
        }
        expired
    }

    #[must_use]
    /// The transistors currently force-asserted, after garbage-collecting expired entries.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn active_labels(&self, now: Instant) -> Vec<OutputChannel> {
        self.expire(now);
        self.active.lock().unwrap().keys().copied().collect()
    }

    #[must_use]
    /// The maximum expiry among active timers, or `None` if none are active (§3:
    /// "`strike_active_until` is non-null iff StrikeTimers is non-empty").
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn active_until(&self, now: Instant) -> Option<Instant> {
        self.expire(now);
        self.active.lock().unwrap().values().copied().max()
    }

    #[must_use]
    /// Whether any timer is currently tracked, without garbage-collecting expired entries. Lets a
    /// caller decide whether a commit is needed purely to assert or release a strike, even when
    /// nothing else changed this tick.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn is_tracking(&self) -> bool {
        !self.active.lock().unwrap().is_empty()
    }
}

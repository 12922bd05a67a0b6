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

//! Logging: a levelled, ANSI-coloured `UserLog` for humans, and a buffered, periodically-flushed
//! `EventLog` for the structured event stream (§A.2 of `SPEC_FULL.md`).

use std::{fmt::Display, io::Write, sync::Mutex, time::SystemTime};

/// A log for data displayed to the user.
/// The data sent to the user log need not be machine-readable.
/// The user log will handle saving this data and annotating it with timestamps.
pub struct UserLog<W: Write> {
    /// The buffer to which user log information will be written.
    log_buffer: Mutex<W>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
/// The levels for logging.
enum LogLevel {
    /// The lowest log level.
    /// Used exclusively for displaying random garbage to help the developer debug their problems.
    Debug = 0,
    /// The second-lowest log level.
    /// Used for information which might be useful to have after an event occurs.
    Info = 1,
    /// The second-highest log level.
    /// Used for notifying the user of potential problems, but which are nonfatal.
    Warn = 2,
    /// The highest log level.
    /// Used for notifying the user of absolutely critical information which is fatal to the system.
    Critical = 3,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                LogLevel::Debug => "DEBUG",
                LogLevel::Info => "INFO",
                LogLevel::Warn => "WARN",
                LogLevel::Critical => "CRITICAL",
            }
        )
    }
}

impl<W: Write> UserLog<W> {
    /// Construct a new `UserLog`.
    ///
    /// Information written to the log will be copied over to `buf` as well.
    pub fn new(buf: W) -> UserLog<W> {
        UserLog {
            log_buffer: Mutex::new(buf),
        }
    }

    #[allow(clippy::missing_errors_doc)]
    /// Log some debug information for the user.
    pub fn debug(&self, string: &str) -> std::io::Result<()> {
        self.write(LogLevel::Debug, string)
    }

    #[allow(clippy::missing_errors_doc)]
    /// Log some information for the user.
    pub fn info(&self, string: &str) -> std::io::Result<()> {
        self.write(LogLevel::Info, string)
    }

    #[allow(clippy::missing_errors_doc)]
    /// Write a warning for the user.
    pub fn warn(&self, string: &str) -> std::io::Result<()> {
        self.write(LogLevel::Warn, string)
    }

    #[allow(clippy::missing_errors_doc)]
    /// Log critical information to the user.
    pub fn critical(&self, string: &str) -> std::io::Result<()> {
        self.write(LogLevel::Critical, string)
    }

    /// Log some information.
    ///
    /// # Errors
    ///
    /// This function will return an `Error` if we are unable to write to the log buffer.
    ///
    /// # Panics
    ///
    /// This function will panic if the current time is before the UNIX epoch.
    fn write(&self, level: LogLevel, string: &str) -> std::io::Result<()> {
        let log_time_nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_nanos();

        match level {
            LogLevel::Critical => print!("\x1b[31m"), // red
            LogLevel::Warn => print!("\x1b[33m"),     // yellow
            LogLevel::Info => (),
            LogLevel::Debug => print!("\x1b[90m"), // faded
        };
        println!("[{log_time_nanos}] [{level}] {string}");
        print!("\x1b[0m");
        writeln!(
            self.log_buffer.lock().unwrap(),
            "[{log_time_nanos}] [{level}] {string}"
        )?;
        Ok(())
    }
}

/// The closed set of structured event kinds (§A.2; `SPEC_FULL.md` picks the closed-enum variant
/// over `logging.py`'s validated-string-tag `EVENT_TYPES` set, since malformed kinds then become
/// a compile-time impossibility rather than a runtime `ValueError`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// A conditioned input (door/flood) change.
    Input,
    /// A committed output change.
    Output,
    /// A sensor read, successful or not.
    Sensor,
    /// A configuration load or save.
    Config,
    /// A strike trigger or release.
    Strike,
    /// An internal/service condition (lock poisoning, assertion breach, simulation fallback).
    Internal,
}

impl Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                EventKind::Input => "INPUT",
                EventKind::Output => "OUTPUT",
                EventKind::Sensor => "SENSOR",
                EventKind::Config => "CONFIG",
                EventKind::Strike => "STRIKE",
                EventKind::Internal => "INTERNAL",
            }
        )
    }
}

/// A single structured event, timestamped in nanoseconds since the epoch to match `UserLog`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// When the event occurred.
    pub time_nanos: u128,
    /// The event's kind.
    pub kind: EventKind,
    /// A human-readable message.
    pub message: String,
}

/// A buffered event log: events accumulate in memory and are written out to `W` either once the
/// buffer reaches its configured size, or on an explicit `flush` call made at a cycle boundary
/// (§A.2: "buffered writes with periodic flush", the stricter of the two documented variants).
pub struct EventLog<W: Write> {
    sink: Mutex<W>,
    buffer: Mutex<Vec<Event>>,
    capacity: usize,
}

impl<W: Write> EventLog<W> {
    #[must_use]
    /// Construct an `EventLog` that forces a flush once `capacity` events have accumulated.
    pub fn new(sink: W, capacity: usize) -> EventLog<W> {
        EventLog {
            sink: Mutex::new(sink),
            buffer: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Record an event, flushing immediately if the buffer has reached capacity.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a forced flush fails to write.
    ///
    /// # Panics
    ///
    /// Panics if the current time is before the UNIX epoch, or if an internal lock is poisoned.
    pub fn record(&self, kind: EventKind, message: impl Into<String>) -> std::io::Result<()> {
        let time_nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let event = Event {
            time_nanos,
            kind,
            message: message.into(),
        };

        let should_flush = {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.push(event);
            buffer.len() >= self.capacity
        };

        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Write every buffered event out to the sink and clear the buffer.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if any write fails; already-flushed events are not re-buffered.
    ///
    /// # Panics
    ///
    /// Panics if an internal lock is poisoned.
    pub fn flush(&self) -> std::io::Result<()> {
        let mut buffer = self.buffer.lock().unwrap();
        let mut sink = self.sink.lock().unwrap();
        for event in buffer.drain(..) {
            writeln!(sink, "[{}] [{}] {}", event.time_nanos, event.kind, event.message)?;
        }
        Ok(())
    }

    #[must_use]
    /// The number of events currently buffered, unflushed.
    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    #[must_use]
    /// Whether the buffer currently holds no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn user_log_writes_timestamped_line() {
        let log = UserLog::new(Cursor::new(Vec::new()));
        log.info("hello").unwrap();
    }

    #[test]
    fn event_log_buffers_until_capacity() {
        let log = EventLog::new(Cursor::new(Vec::new()), 2);
        log.record(EventKind::Input, "door_1 open").unwrap();
        assert_eq!(log.len(), 1);
        log.record(EventKind::Input, "door_1 closed").unwrap();
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn event_log_explicit_flush_writes_buffered_events() {
        let log = EventLog::new(Cursor::new(Vec::new()), 64);
        log.record(EventKind::Strike, "strike_1 asserted").unwrap();
        assert!(!log.is_empty());
        log.flush().unwrap();
        assert!(log.is_empty());
    }
}

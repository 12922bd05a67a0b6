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

//! The Input Conditioner (§4.5): door debounce, flood anti-flap, and the global door-glitch
//! guard, grounded on `original_source/.../core/control_loop.py::_read_inputs`.

use std::time::{Duration, Instant};

use crate::config::InputConfig;
use crate::hardware::{DoorState, FloodState};
use crate::state::{InputSnapshot, MAX_DOORS, MAX_FLOODS};

/// Window within which a simultaneous all-doors flip is treated as a bus glitch rather than a
/// real event (§4.5 "Global door glitch").
const GLOBAL_GLITCH_HOLD: Duration = Duration::from_millis(250);

#[derive(Clone, Copy, Debug)]
struct PendingDoor {
    candidate: DoorState,
    since: Instant,
}

/// Stateful conditioner: owns the pending-transition bookkeeping for every door and flood
/// channel across fast-loop ticks.
pub struct Conditioner {
    stable_doors: [DoorState; MAX_DOORS],
    pending_doors: [Option<PendingDoor>; MAX_DOORS],
    global_glitch_since: Option<Instant>,

    stable_floods: [FloodState; MAX_FLOODS],
    flood_last_change: [Option<Instant>; MAX_FLOODS],
    flood_last_sampled: Option<Instant>,
}

impl Default for Conditioner {
    fn default() -> Self {
        Conditioner {
            stable_doors: [DoorState::Closed; MAX_DOORS],
            pending_doors: [None; MAX_DOORS],
            global_glitch_since: None,
            stable_floods: [FloodState::Ok; MAX_FLOODS],
            flood_last_change: [None; MAX_FLOODS],
            flood_last_sampled: None,
        }
    }
}

impl Conditioner {
    #[must_use]
    /// Construct a conditioner with all doors closed and all floods clear.
    pub fn new() -> Conditioner {
        Conditioner::default()
    }

    /// Apply one fast-tick's worth of raw door readings, returning the conditioned snapshot's
    /// door half and whether any door's *published* state changed this tick.
    pub fn condition_doors(
        &mut self,
        config: &InputConfig,
        raw: &[DoorState; MAX_DOORS],
        now: Instant,
    ) -> ([DoorState; MAX_DOORS], bool) {
        let configured: Vec<usize> = config
            .door_channels
            .iter()
            .map(|d| usize::from(d.id) - 1)
            .collect();

        // Global glitch guard: if every configured door simultaneously flipped relative to the
        // last stable reading, hold the previous states until the flip has persisted beyond the
        // hold window.
        let all_flipped = !configured.is_empty()
            && configured
                .iter()
                .all(|&idx| raw[idx] != self.stable_doors[idx]);

        if all_flipped {
            match self.global_glitch_since {
                None => {
                    self.global_glitch_since = Some(now);
                    return (self.stable_doors, false);
                }
                Some(since) if now.duration_since(since) < GLOBAL_GLITCH_HOLD => {
                    return (self.stable_doors, false);
                }
                Some(_) => {
                    // persisted past the hold window: fall through and let per-door debounce
                    // confirm the new state normally.
                }
            }
        } else {
            self.global_glitch_since = None;
        }

        let anti_glitch = Duration::from_millis(u64::from(config.anti_glitch_ms));
        let mut changed = false;

        for &idx in &configured {
            let raw_state = raw[idx];
            if raw_state == self.stable_doors[idx] {
                self.pending_doors[idx] = None;
                continue;
            }
            match self.pending_doors[idx] {
                Some(pending) if pending.candidate == raw_state => {
                    if now.duration_since(pending.since) >= anti_glitch {
                        self.stable_doors[idx] = raw_state;
                        self.pending_doors[idx] = None;
                        changed = true;
                    }
                }
                _ => {
                    self.pending_doors[idx] = Some(PendingDoor {
                        candidate: raw_state,
                        since: now,
                    });
                }
            }
        }

        (self.stable_doors, changed)
    }

    /// Apply one fast-tick's worth of raw flood readings, returning the conditioned snapshot's
    /// flood half and whether any flood's published state changed this tick.
    ///
    /// Floods are only re-sampled at most once per `flood_refresh_seconds`; between samples the
    /// last published value is republished unconditionally.
    pub fn condition_floods(
        &mut self,
        config: &InputConfig,
        raw: &[FloodState; MAX_FLOODS],
        now: Instant,
    ) -> ([FloodState; MAX_FLOODS], bool) {
        let refresh = Duration::from_secs_f64(config.flood_refresh_seconds.max(0.0));
        if let Some(last_sampled) = self.flood_last_sampled {
            if now.duration_since(last_sampled) < refresh {
                return (self.stable_floods, false);
            }
        }
        self.flood_last_sampled = Some(now);

        let anti_flap = Duration::from_secs_f64(config.anti_flap_seconds.max(0.0));
        let mut changed = false;

        for flood in &config.flood_channels {
            let idx = usize::from(flood.id) - 1;
            let raw_state = raw[idx];
            if raw_state == self.stable_floods[idx] {
                continue;
            }
            let may_change = match self.flood_last_change[idx] {
                None => true,
                Some(last) => now.duration_since(last) >= anti_flap,
            };
            if may_change {
                self.stable_floods[idx] = raw_state;
                self.flood_last_change[idx] = Some(now);
                changed = true;
            }
        }

        (self.stable_floods, changed)
    }

    #[must_use]
    /// The current published snapshot without sampling anything new.
    pub fn snapshot(&self) -> InputSnapshot {
        InputSnapshot {
            doors: self.stable_doors,
            floods: self.stable_floods,
        }
    }

    /// Force the flood refresh timer to elapse immediately, so the next `condition_floods` call
    /// always re-samples. Called by the slow task after it performs its own fresh read (§4.8:
    /// "Resets the flood refresh timestamp").
    pub fn reset_flood_refresh(&mut self) {
        self.flood_last_sampled = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DoorAssignment, FloodAssignment, InputPolarities};

    fn config() -> InputConfig {
        InputConfig {
            door_channels: vec![
                DoorAssignment {
                    id: 1,
                    channel: "A0".parse().unwrap(),
                },
                DoorAssignment {
                    id: 2,
                    channel: "A1".parse().unwrap(),
                },
            ],
            flood_channels: vec![FloodAssignment {
                id: 1,
                channel: "A6".parse().unwrap(),
            }],
            polarities: InputPolarities::default(),
            anti_glitch_ms: 150,
            anti_flap_seconds: 3.0,
            flood_refresh_seconds: 120.0,
        }
    }

    #[test]
    fn debounce_filters_single_tick_glitch() {
        let config = config();
        let mut cond = Conditioner::new();
        let t0 = Instant::now();
        let tick = Duration::from_millis(250);

        let mut raw = [DoorState::Closed; MAX_DOORS];
        raw[0] = DoorState::Open;
        let (snap, _) = cond.condition_doors(&config, &raw, t0);
        assert_eq!(snap[0], DoorState::Closed);

        raw[0] = DoorState::Closed;
        let (snap, _) = cond.condition_doors(&config, &raw, t0 + tick);
        assert_eq!(snap[0], DoorState::Closed);

        let (snap, _) = cond.condition_doors(&config, &raw, t0 + tick * 2);
        assert_eq!(snap[0], DoorState::Closed);

        let (snap, _) = cond.condition_doors(&config, &raw, t0 + tick * 3);
        assert_eq!(snap[0], DoorState::Closed);
    }

    #[test]
    fn debounce_confirms_after_anti_glitch_window() {
        let config = config();
        let mut cond = Conditioner::new();
        let t0 = Instant::now();

        let mut raw = [DoorState::Closed; MAX_DOORS];
        raw[0] = DoorState::Open;
        let (snap, changed) = cond.condition_doors(&config, &raw, t0);
        assert_eq!(snap[0], DoorState::Closed);
        assert!(!changed);

        let (snap, changed) =
            cond.condition_doors(&config, &raw, t0 + Duration::from_millis(200));
        assert_eq!(snap[0], DoorState::Open);
        assert!(changed);
    }

    #[test]
    fn global_glitch_holds_simultaneous_all_door_flip() {
        let config = config();
        let mut cond = Conditioner::new();
        let t0 = Instant::now();

        let raw = [DoorState::Open; MAX_DOORS];
        let (snap, changed) = cond.condition_doors(&config, &raw, t0);
        // only door ids 1,2 are configured; both flipped simultaneously relative to Closed
        assert_eq!(snap, [DoorState::Closed; MAX_DOORS]);
        assert!(!changed);

        let (snap, changed) =
            cond.condition_doors(&config, &raw, t0 + Duration::from_millis(260));
        assert_eq!(snap[0], DoorState::Closed);
        assert!(!changed);
    }

    #[test]
    fn flood_anti_flap_rejects_rapid_reflip() {
        let config = config();
        let mut cond = Conditioner::new();
        let t0 = Instant::now();

        let mut raw = [FloodState::Ok; MAX_FLOODS];
        raw[0] = FloodState::Flood;
        let (snap, changed) = cond.condition_floods(&config, &raw, t0);
        assert_eq!(snap[0], FloodState::Flood);
        assert!(changed);

        raw[0] = FloodState::Ok;
        cond.reset_flood_refresh();
        let (snap, changed) =
            cond.condition_floods(&config, &raw, t0 + Duration::from_millis(500));
        assert_eq!(snap[0], FloodState::Flood);
        assert!(!changed);
    }

    #[test]
    fn flood_not_resampled_within_refresh_window() {
        let config = config();
        let mut cond = Conditioner::new();
        let t0 = Instant::now();

        let raw = [FloodState::Ok; MAX_FLOODS];
        cond.condition_floods(&config, &raw, t0);

        let mut raw2 = raw;
        raw2[0] = FloodState::Flood;
        let (snap, changed) = cond.condition_floods(&config, &raw2, t0 + Duration::from_secs(1));
        assert_eq!(snap[0], FloodState::Ok);
        assert!(!changed);
    }
}

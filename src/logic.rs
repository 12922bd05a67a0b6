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

//! The pure logic evaluator (§4.6): `(config, inputs, sensors, manual) -> (outputs, reason)`.
//!
//! No I/O, no locking, no clock reads — every branch is a deterministic function of its
//! arguments, which is what makes the end-to-end scenarios in §8 exercisable as plain unit tests.

use crate::config::Configuration;
use crate::state::InputSnapshot;
use crate::{LogicalOutput, OutputSet};

/// Evaluate the control rules for one cycle.
///
/// `manual_mode`/`manual_overrides` reflect `RuntimeState`, not the static configuration: a config
/// file only seeds their initial value at startup (`config::ManualConfig::to_output_set`), and
/// `set_manual_mode`/`set_manual_override` (§6) mutate them live without a config reload.
///
/// Returns the resulting output state and, if any rule fired a non-default state, a reason
/// string describing why (joined with `+` when more than one condition applies, e.g.
/// `"flood+overheat"`).
#[must_use]
pub fn evaluate(
    config: &Configuration,
    inputs: &InputSnapshot,
    temp_cab: Option<f64>,
    manual_mode: bool,
    manual_overrides: OutputSet,
    previous: OutputSet,
) -> (OutputSet, Option<String>) {
    if manual_mode {
        return (manual_overrides, Some("MANUAL".to_string()));
    }

    let mut outputs = OutputSet::all_off();
    let mut reasons: Vec<&'static str> = Vec::new();

    // Rule 1: any door open overrides every other rule and returns immediately (§4.6,
    // redesigned explicitly from the source's more ambiguous behaviour; see DESIGN.md).
    if inputs.any_door_open() {
        outputs.set(LogicalOutput::Alarm, true);
        outputs.set(LogicalOutput::Light, true);
        if inputs.any_flood() {
            return (outputs, Some("door_open+flood".to_string()));
        }
        return (outputs, Some("door_open".to_string()));
    }

    // Rule 2: flood sets the alarm but does not stop climate evaluation below.
    if inputs.any_flood() {
        outputs.set(LogicalOutput::Alarm, true);
        reasons.push("flood");
    }

    let Some(temp_cab) = temp_cab else {
        // Rule 3: unknown cabinet temperature keeps heater/cooler off (safe mode) but still
        // carries forward the flood alarm and reason accumulated above.
        let reason = reasons_to_reason(&reasons);
        return (outputs, reason);
    };

    let thresholds = config.thresholds;
    let h = thresholds.hysteresis_c;

    let heater_was_on = previous.get(LogicalOutput::Heater);
    let heater_on = if heater_was_on {
        temp_cab < thresholds.heater_c + h
    } else {
        temp_cab <= thresholds.heater_c
    };

    let cooler_was_on = previous.get(LogicalOutput::Cooler);
    let cooler_on = if cooler_was_on {
        temp_cab > thresholds.cooler_c - h
    } else {
        temp_cab >= thresholds.cooler_c
    };

    let fans_were_on = previous.get(LogicalOutput::Fan48v) || previous.get(LogicalOutput::Fan230v);
    let overheat = if fans_were_on {
        temp_cab > thresholds.fan_c - h
    } else {
        temp_cab >= thresholds.fan_c
    };

    if overheat {
        outputs.set(LogicalOutput::Alarm, true);
        outputs.set(LogicalOutput::Fan48v, true);
        outputs.set(LogicalOutput::Fan230v, true);
        outputs.set(LogicalOutput::Cooler, false);
        outputs.set(LogicalOutput::Heater, false);
        reasons.push("overheat");
    } else if heater_on {
        outputs.set(LogicalOutput::Heater, true);
    } else if cooler_on {
        outputs.set(LogicalOutput::Cooler, true);
    }

    let reason = reasons_to_reason(&reasons);
    (outputs, reason)
}

fn reasons_to_reason(reasons: &[&'static str]) -> Option<String> {
    if reasons.is_empty() {
        None
    } else {
        Some(reasons.join("+"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::hardware::{DoorState, FloodState};
    use crate::LogicalOutput;
    use std::io::Cursor;

    fn config() -> Configuration {
        let json = r##"{
            "thresholds": { "heater_c": 5.0, "cooler_c": 25.0, "fan_c": 30.0, "hysteresis_c": 1.0 },
            "loops": { "fast_tick_ms": 250, "logic_tick_seconds": 60 },
            "inputs": {
                "door_channels": [{ "id": 1, "channel": "A0" }, { "id": 2, "channel": "A1" }],
                "flood_channels": [{ "id": 1, "channel": "A6" }],
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
    fn scenario_baseline_cool() {
        let config = config();
        let inputs = InputSnapshot::default();
        let (outputs, reason) = evaluate(
            &config,
            &inputs,
            Some(22.0),
            false,
            OutputSet::all_off(),
            OutputSet::all_off(),
        );
        assert_eq!(outputs, OutputSet::all_off());
        assert_eq!(reason, None);
    }

    #[test]
    fn scenario_cold_snap() {
        let config = config();
        let inputs = InputSnapshot::default();
        let (outputs, _) = evaluate(
            &config,
            &inputs,
            Some(3.0),
            false,
            OutputSet::all_off(),
            OutputSet::all_off(),
        );
        assert!(outputs.get(LogicalOutput::Heater));
        assert!(!outputs.get(LogicalOutput::Cooler));
        assert!(!outputs.get(LogicalOutput::Fan48v));
        assert!(!outputs.get(LogicalOutput::Alarm));
    }

    #[test]
    fn scenario_overtemp_with_flood() {
        let config = config();
        let mut inputs = InputSnapshot::default();
        inputs.floods[0] = FloodState::Flood;
        let (outputs, reason) = evaluate(
            &config,
            &inputs,
            Some(31.0),
            false,
            OutputSet::all_off(),
            OutputSet::all_off(),
        );
        assert!(outputs.get(LogicalOutput::Alarm));
        assert!(outputs.get(LogicalOutput::Fan48v));
        assert!(outputs.get(LogicalOutput::Fan230v));
        assert!(!outputs.get(LogicalOutput::Heater));
        assert!(!outputs.get(LogicalOutput::Cooler));
        assert!(!outputs.get(LogicalOutput::Light));
        let reason = reason.unwrap();
        assert!(reason.contains("flood"));
        assert!(reason.contains("overheat"));
    }

    #[test]
    fn scenario_door_overrides_all() {
        let config = config();
        let mut inputs = InputSnapshot::default();
        inputs.doors[1] = DoorState::Open;
        let (outputs, reason) = evaluate(
            &config,
            &inputs,
            Some(31.0),
            false,
            OutputSet::all_off(),
            OutputSet::all_off(),
        );
        assert!(outputs.get(LogicalOutput::Alarm));
        assert!(outputs.get(LogicalOutput::Light));
        assert!(!outputs.get(LogicalOutput::Heater));
        assert!(!outputs.get(LogicalOutput::Cooler));
        assert!(!outputs.get(LogicalOutput::Fan48v));
        assert!(!outputs.get(LogicalOutput::Fan230v));
        assert_eq!(reason, Some("door_open".to_string()));
    }

    #[test]
    fn unknown_temperature_forces_safe_mode() {
        let config = config();
        let inputs = InputSnapshot::default();
        let (outputs, _) = evaluate(
            &config,
            &inputs,
            None,
            false,
            OutputSet::all_off(),
            OutputSet::all_off(),
        );
        assert!(!outputs.get(LogicalOutput::Heater));
        assert!(!outputs.get(LogicalOutput::Cooler));
    }

    #[test]
    fn hysteresis_keeps_heater_on_past_threshold_until_off_edge() {
        let config = config();
        let inputs = InputSnapshot::default();
        let mut previous = OutputSet::all_off();
        previous.set(LogicalOutput::Heater, true);

        // at exactly heater_c + H - epsilon, heater stays on because it was already on
        let (outputs, _) = evaluate(
            &config,
            &inputs,
            Some(5.9),
            false,
            OutputSet::all_off(),
            previous,
        );
        assert!(outputs.get(LogicalOutput::Heater));

        // at heater_c + H it releases
        let (outputs, _) = evaluate(
            &config,
            &inputs,
            Some(6.0),
            false,
            OutputSet::all_off(),
            previous,
        );
        assert!(!outputs.get(LogicalOutput::Heater));
    }

    #[test]
    fn manual_mode_short_circuits_everything() {
        let config = config();
        let inputs = InputSnapshot::default();
        let mut overrides = OutputSet::all_off();
        overrides.set(LogicalOutput::Heater, true);
        let (outputs, reason) = evaluate(
            &config,
            &inputs,
            Some(31.0),
            true,
            overrides,
            OutputSet::all_off(),
        );
        assert!(outputs.get(LogicalOutput::Heater));
        assert!(!outputs.get(LogicalOutput::Fan48v));
        assert_eq!(reason, Some("MANUAL".to_string()));
    }
}

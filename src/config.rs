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

//! Loading and validating configuration for the cabinet controller.

use std::collections::HashSet;
use std::fmt;
use std::io::Read;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::hardware::{Bank, InputChannel, OutputChannel};
use crate::LogicalOutput;

fn default_fast_tick_ms() -> u32 {
    250
}
fn default_logic_tick_seconds() -> u32 {
    60
}
fn default_anti_glitch_ms() -> u32 {
    150
}
fn default_anti_flap_seconds() -> f64 {
    3.0
}
fn default_flood_refresh_seconds() -> f64 {
    120.0
}
fn default_strike_duration_seconds() -> f64 {
    10.0
}
fn default_log_buffer_size() -> usize {
    64
}
fn default_hysteresis() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}
fn default_spi_frequency_hz() -> u32 {
    500_000
}
fn default_w1_base_path() -> String {
    "/sys/bus/w1/devices".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
/// Top-level configuration for the controller.
///
/// Loaded once at startup and replaced wholesale by `ConfigHandle::save`; never mutated
/// field-by-field mid-cycle (§3, "Lifecycle").
pub struct Configuration {
    /// Temperature thresholds and the shared hysteresis band.
    pub thresholds: Thresholds,
    /// Loop timing and input-filter tuning.
    pub loops: LoopConfig,
    /// Input polarity and channel assignment.
    pub inputs: InputConfig,
    /// Output polarity and logical-to-physical channel mapping.
    pub outputs: OutputConfig,
    /// Sensor probes and their tuning.
    pub sensors: SensorConfig,
    /// Strike-to-transistor assignments.
    #[serde(default)]
    pub strike: StrikeConfig,
    /// Manual-mode configuration.
    #[serde(default)]
    pub manual: ManualConfig,
    /// The size of the buffered event log ring, in events, before a forced flush (reused, like
    /// the teacher's own field, from a sensor-batching concept repurposed for event batching).
    #[serde(default = "default_log_buffer_size")]
    pub log_buffer_size: usize,
    /// Physical GPIO line assignments for the expander bus and buzzer pin, in the teacher's own
    /// flat `spi_clk`/`spi_mosi`/`spi_miso`/`adc_cs` style. Defaulted to placeholder zeros so a
    /// config that only ever drives `bin/dummy` need not set them; a real deployment must.
    #[serde(default)]
    pub gpio: GpioConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
/// Physical GPIO line numbers for the shared bit-banged SPI bus, the two expanders' chip-select
/// lines, and the buzzer pin. Not named in the design's data model (§3 only speaks of logical
/// channels); required only by the real-hardware binary, never by the logic this crate tests.
pub struct GpioConfig {
    /// Clock line, shared by both expanders.
    #[serde(default)]
    pub spi_clk: u32,
    /// Master-out line, shared by both expanders.
    #[serde(default)]
    pub spi_mosi: u32,
    /// Master-in line, shared by both expanders.
    #[serde(default)]
    pub spi_miso: u32,
    /// Bit-bang clock frequency, in Hz.
    #[serde(default = "default_spi_frequency_hz")]
    pub spi_frequency_hz: u32,
    /// Chip-select line for the output (relay/transistor) expander.
    #[serde(default)]
    pub output_cs: u32,
    /// Chip-select line for the input (door/flood/DIP) expander.
    #[serde(default)]
    pub input_cs: u32,
    /// Discrete buzzer drive line.
    #[serde(default)]
    pub buzzer: u32,
}

impl Default for GpioConfig {
    fn default() -> Self {
        GpioConfig {
            spi_clk: 0,
            spi_mosi: 0,
            spi_miso: 0,
            spi_frequency_hz: default_spi_frequency_hz(),
            output_cs: 0,
            input_cs: 0,
            buzzer: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
/// Temperature thresholds and shared hysteresis band (§3, §4.6).
pub struct Thresholds {
    /// Heater on/off threshold, degrees Celsius.
    pub heater_c: f64,
    /// Cooler on/off threshold, degrees Celsius.
    pub cooler_c: f64,
    /// Overtemperature fan threshold, degrees Celsius.
    pub fan_c: f64,
    /// Hysteresis band applied around each threshold above.
    #[serde(default = "default_hysteresis")]
    pub hysteresis_c: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
/// Tuning for the fast and slow control loop tasks (§4.8, §4.5).
pub struct LoopConfig {
    /// Period of the fast input-scan task, in milliseconds.
    #[serde(default = "default_fast_tick_ms")]
    pub fast_tick_ms: u32,
    /// Period of the slow logic/sensor task, in seconds.
    #[serde(default = "default_logic_tick_seconds")]
    pub logic_tick_seconds: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
/// Input polarity flags (§3 "Config").
pub struct InputPolarities {
    /// Whether a door being open reads as a logic-high input.
    #[serde(default = "default_true")]
    pub door_open_is_high: bool,
    /// Whether a flood condition reads as a logic-low input.
    #[serde(default = "default_true")]
    pub flood_low_is_flood: bool,
    /// Whether a DIP switch being "on" reads as logic-high.
    #[serde(default = "default_true")]
    pub dip_on_is_high: bool,
}

impl Default for InputPolarities {
    fn default() -> Self {
        InputPolarities {
            door_open_is_high: true,
            flood_low_is_flood: true,
            dip_on_is_high: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
/// Input channel assignment and debounce/anti-flap tuning (§3, §4.5).
pub struct InputConfig {
    /// Maps door identifiers 1..=6 to an input-expander port A channel.
    pub door_channels: Vec<DoorAssignment>,
    /// Maps flood identifiers 1..=2 to an input-expander port A channel.
    pub flood_channels: Vec<FloodAssignment>,
    /// Input polarity flags.
    #[serde(default)]
    pub polarities: InputPolarities,
    /// Minimum time a raw door reading must hold before being accepted.
    #[serde(default = "default_anti_glitch_ms")]
    pub anti_glitch_ms: u32,
    /// Minimum spacing between accepted flood state changes, in seconds.
    #[serde(default = "default_anti_flap_seconds")]
    pub anti_flap_seconds: f64,
    /// Minimum spacing between flood re-samples, in seconds.
    #[serde(default = "default_flood_refresh_seconds")]
    pub flood_refresh_seconds: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// A single door's channel assignment.
pub struct DoorAssignment {
    /// The door identifier, 1..=6.
    pub id: u8,
    /// The input-expander channel.
    pub channel: InputChannel,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// A single flood sensor's channel assignment.
pub struct FloodAssignment {
    /// The flood identifier, 1..=2.
    pub id: u8,
    /// The input-expander channel.
    pub channel: InputChannel,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
/// Output polarity flags, per bank (§3 "Config").
pub struct OutputPolarities {
    /// Whether "on" is encoded as a logic-low relay output.
    #[serde(default)]
    pub relays_active_low: bool,
    /// Whether "on" is encoded as a logic-low transistor output.
    #[serde(default)]
    pub transistors_active_low: bool,
}

impl Default for OutputPolarities {
    fn default() -> Self {
        OutputPolarities {
            relays_active_low: false,
            transistors_active_low: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
/// The logical-output-to-physical-channel mapping and output polarity.
pub struct OutputConfig {
    /// Output polarity flags.
    #[serde(default)]
    pub polarities: OutputPolarities,
    /// For each logical output, the set of physical channels it drives. Every logical output
    /// must map to at least one channel (§3 invariants).
    pub mapping: Vec<OutputMapping>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// One logical output's set of driven physical channels.
pub struct OutputMapping {
    /// The logical output name (must be one of the closed `LogicalOutput` set).
    pub output: String,
    /// The physical channels this output drives. All channels for one output must share a bank
    /// (§3 invariants: "K*→A, T*→B").
    pub channels: Vec<OutputChannel>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
/// DHT11-style battery/cabinet temperature+humidity probe configuration.
pub struct Dht11Config {
    /// Whether this probe pair is enabled.
    pub enabled: bool,
    /// Logical probe index for the battery-compartment sensor.
    pub battery_probe: u8,
    /// Logical probe index for the cabinet-compartment sensor.
    pub cabinet_probe: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
/// DS18B20-style 1-Wire cabinet temperature probe configuration (supplemented from
/// `original_source`, see `SPEC_FULL.md` §B).
pub struct Ds18b20Config {
    /// Whether this probe is enabled and authoritative for `temp_cab`.
    pub enabled: bool,
    /// The 1-Wire device identifier to read.
    pub sensor_id: String,
    /// The sysfs directory the `w1_slave` file for `sensor_id` is found under.
    #[serde(default = "default_w1_base_path")]
    pub base_path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
/// Sensor probe configuration.
pub struct SensorConfig {
    /// DHT11 battery/cabinet pair.
    pub dht11: Dht11Config,
    /// Optional DS18B20 cabinet probe. When enabled it is authoritative for `temp_cab`, and the
    /// DHT11 cabinet channel is read only for `hum_cab` (see `DESIGN.md` for why only one source
    /// is authoritative per field).
    #[serde(default)]
    pub ds18b20: Option<Ds18b20Config>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
/// Strike assignments and default duration (§3, §4.7).
pub struct StrikeConfig {
    /// Default strike-assertion duration, in seconds.
    #[serde(default = "default_strike_duration_seconds")]
    pub default_duration_seconds: f64,
    /// Strike id to transistor assignments. A strike with no entry here is `not_configured`.
    #[serde(default)]
    pub assignments: Vec<StrikeAssignment>,
}

impl Default for StrikeConfig {
    fn default() -> Self {
        StrikeConfig {
            default_duration_seconds: default_strike_duration_seconds(),
            assignments: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// A single strike's assigned transistor.
pub struct StrikeAssignment {
    /// The strike identifier, e.g. `"strike_1"`.
    pub strike_id: String,
    /// The transistor channel driving the release. Must be `T2..T8`; `T1` is reserved (§3
    /// invariants).
    pub transistor: OutputChannel,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
/// Manual-mode configuration: a global enable flag and a set of per-output overrides applied
/// when enabled (§4.6).
pub struct ManualConfig {
    /// Whether manual mode is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Per-output override state, applied verbatim when `enabled`.
    #[serde(default)]
    pub overrides: Vec<ManualOverride>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// A single manual-mode output override.
pub struct ManualOverride {
    /// The logical output name.
    pub output: String,
    /// The state to force it to while manual mode is enabled.
    pub state: bool,
}

impl ManualConfig {
    #[must_use]
    /// Convert the per-output override list into a dense `OutputSet`, for seeding
    /// `RuntimeState.manual_overrides` at startup. Unknown names cannot occur here since
    /// `Configuration::validate` already rejects them.
    pub fn to_output_set(&self) -> crate::OutputSet {
        let mut set = crate::OutputSet::all_off();
        for over in &self.overrides {
            if let Some(output) = LogicalOutput::parse(&over.output) {
                set.set(output, over.state);
            }
        }
        set
    }
}

#[derive(Debug)]
/// The set of errors that can occur when validating a configuration.
pub enum Error {
    /// The configuration was malformed JSON or did not match the schema.
    Malformed(serde_json::Error),
    /// The same input channel was assigned to more than one door or flood.
    DuplicateInputChannel(InputChannel),
    /// A logical-output mapping referenced an unknown output name.
    UnknownOutput(String),
    /// A logical output's channels were not all on the bank appropriate for that kind of output.
    BadBank(LogicalOutput, OutputChannel),
    /// A logical output had no channels mapped to it.
    UnmappedOutput(String),
    /// A door identifier outside 1..=6 was used.
    BadDoorId(u8),
    /// A flood identifier outside 1..=2 was used.
    BadFloodId(u8),
    /// A strike was assigned to T1, which is reserved.
    StrikeTransistorReserved,
    /// A strike was assigned to a relay channel instead of a transistor.
    StrikeNotATransistor(OutputChannel),
    /// A manual override referenced an unknown output name.
    UnknownManualOverride(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Malformed(e) => write!(f, "failed to parse configuration JSON: {e}"),
            Error::DuplicateInputChannel(ch) => {
                write!(f, "input channel {ch} is assigned to more than one door/flood")
            }
            Error::UnknownOutput(name) => {
                write!(f, "output mapping refers to unknown logical output {name}")
            }
            Error::BadBank(output, ch) => {
                write!(f, "output {output} maps to channel {ch} on the wrong bank")
            }
            Error::UnmappedOutput(name) => write!(f, "output {name} has no channels mapped"),
            Error::BadDoorId(id) => write!(f, "door id {id} out of range (must be 1..=6)"),
            Error::BadFloodId(id) => write!(f, "flood id {id} out of range (must be 1..=2)"),
            Error::StrikeTransistorReserved => {
                write!(f, "a strike cannot be assigned to T1 (reserved)")
            }
            Error::StrikeNotATransistor(ch) => {
                write!(f, "a strike must be assigned to a transistor, not {ch}")
            }
            Error::UnknownManualOverride(name) => {
                write!(f, "manual override refers to unknown logical output {name}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl Configuration {
    /// Parse and validate a configuration from a readable JSON source.
    ///
    /// # Errors
    ///
    /// Returns `Error` on malformed JSON or on any violated invariant from §3 of the design
    /// (unique input channels, output-to-bank consistency, strike transistor range).
    pub fn parse(source: &mut impl Read) -> Result<Configuration, Error> {
        let config: Configuration = serde_json::from_reader(source).map_err(Error::Malformed)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate this configuration's internal consistency without altering it. Used both by
    /// `parse` and by `ConfigHandle::save`, so that a rejected save never partially applies (§7:
    /// "the in-memory config is unchanged").
    ///
    /// # Errors
    ///
    /// Returns `Error` on the first violated invariant found.
    pub fn validate(&self) -> Result<(), Error> {
        let mut input_channels_used: HashSet<InputChannel> = HashSet::new();

        for door in &self.inputs.door_channels {
            if !(1..=6).contains(&door.id) {
                return Err(Error::BadDoorId(door.id));
            }
            if !input_channels_used.insert(door.channel) {
                return Err(Error::DuplicateInputChannel(door.channel));
            }
        }
        for flood in &self.inputs.flood_channels {
            if !(1..=2).contains(&flood.id) {
                return Err(Error::BadFloodId(flood.id));
            }
            if !input_channels_used.insert(flood.channel) {
                return Err(Error::DuplicateInputChannel(flood.channel));
            }
        }

        for output in LogicalOutput::ALL {
            if self.channels_for(output).is_empty() {
                return Err(Error::UnmappedOutput(output.name().to_string()));
            }
        }

        for mapping in &self.outputs.mapping {
            let Some(output) = LogicalOutput::parse(&mapping.output) else {
                return Err(Error::UnknownOutput(mapping.output.clone()));
            };
            let expected_bank = bank_for(output);
            for &channel in &mapping.channels {
                if channel.bank() != expected_bank {
                    return Err(Error::BadBank(output, channel));
                }
            }
        }

        for assignment in &self.strike.assignments {
            match assignment.transistor {
                OutputChannel::Relay(_) => {
                    return Err(Error::StrikeNotATransistor(assignment.transistor))
                }
                OutputChannel::Transistor(1) => return Err(Error::StrikeTransistorReserved),
                OutputChannel::Transistor(_) => {}
            }
        }

        for over in &self.manual.overrides {
            if LogicalOutput::parse(&over.output).is_none() {
                return Err(Error::UnknownManualOverride(over.output.clone()));
            }
        }

        Ok(())
    }

    #[must_use]
    /// Look up the physical channels driving a logical output, if configured.
    pub fn channels_for(&self, output: LogicalOutput) -> &[OutputChannel] {
        self.outputs
            .mapping
            .iter()
            .find(|m| LogicalOutput::parse(&m.output) == Some(output))
            .map_or(&[], |m| m.channels.as_slice())
    }

    #[must_use]
    /// Look up the transistor assigned to a strike id, if any.
    pub fn strike_transistor(&self, strike_id: &str) -> Option<OutputChannel> {
        self.strike
            .assignments
            .iter()
            .find(|a| a.strike_id == strike_id)
            .map(|a| a.transistor)
    }
}

/// The bank a logical output's channels must live on. Every current logical output drives relays
/// (K*); none are wired to the transistor bank, which is reserved for strikes.
fn bank_for(_output: LogicalOutput) -> Bank {
    Bank::Relays
}

/// A shared, swappable configuration handle.
///
/// Config is loaded once at startup and reloaded only by an explicit, validated `save` (§3
/// "Lifecycle": "never mutated mid-cycle"). The control loop reads through `current()` once per
/// cycle rather than holding a reference across the cycle, so a save taking effect never tears a
/// single commit between old and new values.
pub struct ConfigHandle {
    inner: RwLock<Configuration>,
}

impl ConfigHandle {
    #[must_use]
    /// Construct a handle wrapping an already-validated configuration.
    pub fn new(config: Configuration) -> ConfigHandle {
        ConfigHandle {
            inner: RwLock::new(config),
        }
    }

    /// Obtain a clone of the current configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn current(&self) -> Result<Configuration, crate::CabinetError> {
        Ok(self.inner.read()?.clone())
    }

    /// Validate and install a replacement configuration.
    ///
    /// On validation failure the existing configuration is left untouched and the error is
    /// returned to the caller (§7 `ConfigInvalid` policy).
    ///
    /// # Errors
    ///
    /// Returns `Error` if the replacement configuration is invalid, or `CabinetError::Poison` if
    /// the internal lock is poisoned.
    pub fn save(&self, replacement: Configuration) -> Result<(), crate::CabinetError> {
        replacement.validate()?;
        *self.inner.write()? = replacement;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn sample_json() -> String {
        r##"{
            "thresholds": { "heater_c": 5.0, "cooler_c": 25.0, "fan_c": 30.0, "hysteresis_c": 1.0 },
            "loops": { "fast_tick_ms": 250, "logic_tick_seconds": 60 },
            "inputs": {
                "door_channels": [
                    { "id": 1, "channel": "A0" },
                    { "id": 2, "channel": "A1" }
                ],
                "flood_channels": [
                    { "id": 1, "channel": "A6" }
                ],
                "polarities": { "door_open_is_high": true, "flood_low_is_flood": true, "dip_on_is_high": true },
                "anti_glitch_ms": 150,
                "anti_flap_seconds": 3.0,
                "flood_refresh_seconds": 120.0
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
            "sensors": {
                "dht11": { "enabled": true, "battery_probe": 0, "cabinet_probe": 1 }
            },
            "strike": {
                "default_duration_seconds": 10.0,
                "assignments": [
                    { "strike_id": "strike_1", "transistor": "T3" }
                ]
            },
            "manual": { "enabled": false, "overrides": [] },
            "log_buffer_size": 64
        }"##
            .to_string()
    }

    #[test]
    fn parses_valid_config() {
        let mut cursor = Cursor::new(sample_json());
        let config = Configuration::parse(&mut cursor).unwrap();
        assert_eq!(config.thresholds.heater_c, 5.0);
        assert_eq!(config.inputs.door_channels.len(), 2);
    }

    #[test]
    fn rejects_duplicate_input_channel() {
        let bad = sample_json().replace(r#""id": 2, "channel": "A1""#, r#""id": 2, "channel": "A0""#);
        let mut cursor = Cursor::new(bad);
        assert!(matches!(
            Configuration::parse(&mut cursor),
            Err(Error::DuplicateInputChannel(_))
        ));
    }

    #[test]
    fn rejects_strike_on_t1() {
        let bad = sample_json().replace(r#""transistor": "T3""#, r#""transistor": "T1""#);
        let mut cursor = Cursor::new(bad);
        assert!(matches!(
            Configuration::parse(&mut cursor),
            Err(Error::StrikeTransistorReserved)
        ));
    }

    #[test]
    fn rejects_strike_on_relay_channel() {
        let bad = sample_json().replace(r#""transistor": "T3""#, r#""transistor": "K3""#);
        let mut cursor = Cursor::new(bad);
        assert!(matches!(
            Configuration::parse(&mut cursor),
            Err(Error::StrikeNotATransistor(_))
        ));
    }

    #[test]
    fn rejects_unknown_output_mapping() {
        let bad = sample_json().replace(r#""output": "alarm""#, r#""output": "siren""#);
        let mut cursor = Cursor::new(bad);
        assert!(matches!(
            Configuration::parse(&mut cursor),
            Err(Error::UnknownOutput(_) | Error::UnmappedOutput(_))
        ));
    }

    #[test]
    fn rejects_output_on_wrong_bank() {
        let bad = sample_json().replace(r#""output": "alarm", "channels": ["K1"]"#, r#""output": "alarm", "channels": ["T1"]"#);
        let mut cursor = Cursor::new(bad);
        assert!(matches!(
            Configuration::parse(&mut cursor),
            Err(Error::BadBank(_, _))
        ));
    }

    #[test]
    fn handle_save_rejects_invalid_without_mutating() {
        let mut cursor = Cursor::new(sample_json());
        let config = Configuration::parse(&mut cursor).unwrap();
        let handle = ConfigHandle::new(config.clone());

        let mut bad = config.clone();
        bad.outputs.mapping[0].output = "nonexistent".into();

        assert!(handle.save(bad).is_err());
        assert_eq!(handle.current().unwrap(), config);
    }
}

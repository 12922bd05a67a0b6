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

//! The Control Loop (§4.8): two cooperating periodic tasks sharing the Hardware Interface
//! serially, grounded on the teacher's thread-scoped dual-loop shape (`data.rs`) and on
//! `original_source/.../core/control_loop.py`'s `_fast_loop`/`_logic_loop` split.

use std::io::Write as IoWrite;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::config::ConfigHandle;
use crate::console::{EventKind, EventLog, UserLog};
use crate::hardware::{GpioPin, HardwareInterface};
use crate::input::Conditioner;
use crate::sensors::{OneWireProbe, SensorReader, TempHumidityProbe};
use crate::state::{Guard, InputSnapshot, MAX_DOORS, MAX_FLOODS};
use crate::strike::Timers;
use crate::{logic, CabinetError, LogicalOutput, OutputSet};

/// Shared machinery for both loop tasks: the hardware bus (serialised by its own mutex so fast
/// and slow tasks never race on a commit, §5), the runtime state, strike timers, the input
/// conditioner, and the sensor reader.
pub struct Controller<'a, P, B, C, D, WLog, WEvent>
where
    P: GpioPin,
    B: TempHumidityProbe,
    C: TempHumidityProbe,
    D: OneWireProbe,
    WLog: IoWrite,
    WEvent: IoWrite,
{
    config: &'a ConfigHandle,
    hardware: Mutex<HardwareInterface<'a, P>>,
    state: Guard,
    timers: Timers,
    conditioner: Mutex<Conditioner>,
    sensors: Mutex<SensorReader<B, C, D>>,
    log: &'a UserLog<WLog>,
    events: &'a EventLog<WEvent>,
}

impl<'a, P, B, C, D, WLog, WEvent> Controller<'a, P, B, C, D, WLog, WEvent>
where
    P: GpioPin,
    B: TempHumidityProbe,
    C: TempHumidityProbe,
    D: OneWireProbe,
    WLog: IoWrite,
    WEvent: IoWrite,
{
    /// Construct a controller over already-initialised collaborators, seeding `RuntimeState`'s
    /// manual-mode fields from the configuration's `manual` block (§6: a config file only seeds
    /// their initial value; `set_manual_mode`/`set_manual_override` then mutate them live).
    ///
    /// # Errors
    ///
    /// Returns `CabinetError` if the configuration handle's lock is poisoned.
    pub fn new(
        config: &'a ConfigHandle,
        hardware: HardwareInterface<'a, P>,
        sensors: SensorReader<B, C, D>,
        log: &'a UserLog<WLog>,
        events: &'a EventLog<WEvent>,
        now: Instant,
    ) -> Result<Controller<'a, P, B, C, D, WLog, WEvent>, CabinetError> {
        let initial_config = config.current()?;
        let mut state = crate::state::RuntimeState::initial(now);
        state.manual_mode = initial_config.manual.enabled;
        state.manual_overrides = initial_config.manual.to_output_set();

        Ok(Controller {
            config,
            hardware: Mutex::new(hardware),
            state: Guard::new(state),
            timers: Timers::new(),
            conditioner: Mutex::new(Conditioner::new()),
            sensors: Mutex::new(sensors),
            log,
            events,
        })
    }

    #[must_use]
    /// The shared runtime state handle, for external consumers (§6).
    pub fn state(&self) -> &Guard {
        &self.state
    }

    #[must_use]
    /// The strike timer set, for external consumers (§6 `trigger_strike`).
    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    #[must_use]
    /// The shared configuration handle, for external consumers (§6 config reload).
    pub fn config(&self) -> &ConfigHandle {
        self.config
    }

    /// One fast-task iteration (§4.8): read inputs, condition them, and commit if conditioning
    /// produced a new door or flood state, or a strike timer is active or has just expired
    /// (§4.7: a strike's assert/release must not wait on an unrelated input change).
    ///
    /// # Errors
    ///
    /// Returns `CabinetError` only if a lock was poisoned; a transient bus failure is absorbed
    /// per §7 and reported through `RuntimeState.error` instead.
    pub fn fast_tick(&self, now: Instant) -> Result<(), CabinetError> {
        match self.fast_tick_inner(now) {
            Ok(()) => Ok(()),
            Err(CabinetError::Poison) => Err(CabinetError::Poison),
            Err(e) => {
                self.state.update(now, |s| s.error = Some(e.to_string()))?;
                let _ = self.events.record(EventKind::Internal, e.to_string());
                Ok(())
            }
        }
    }

    fn fast_tick_inner(&self, now: Instant) -> Result<(), CabinetError> {
        let config = self.config.current()?;
        let mut hardware = self.hardware.lock()?;

        let read_dip = false;
        let (port_a, _) = hardware.read_inputs_raw(read_dip)?;

        let mut raw_doors = [crate::hardware::DoorState::Closed; MAX_DOORS];
        for door in &config.inputs.door_channels {
            raw_doors[usize::from(door.id) - 1] = hardware.decode_door(port_a, door.channel);
        }
        let mut raw_floods = [crate::hardware::FloodState::Ok; MAX_FLOODS];
        for flood in &config.inputs.flood_channels {
            raw_floods[usize::from(flood.id) - 1] = hardware.decode_flood(port_a, flood.channel);
        }

        let mut conditioner = self.conditioner.lock()?;
        let (doors, doors_changed) = conditioner.condition_doors(&config.inputs, &raw_doors, now);
        let (floods, floods_changed) =
            conditioner.condition_floods(&config.inputs, &raw_floods, now);
        drop(conditioner);

        if !doors_changed && !floods_changed && !self.timers.is_tracking() {
            return Ok(());
        }

        let inputs = InputSnapshot { doors, floods };
        let previous = self.state.read()?;
        let (outputs, reason) = logic::evaluate(
            &config,
            &inputs,
            previous.sensors.temp_cab,
            previous.manual_mode,
            previous.manual_overrides,
            previous.outputs,
        );

        self.commit(&config, &mut hardware, &inputs, &previous.sensors, outputs, reason, now)?;
        if doors_changed || floods_changed {
            let _ = self
                .events
                .record(EventKind::Input, "fast-tick input change committed");
        }
        Ok(())
    }

    /// One slow-task iteration (§4.8): read sensors, perform a fresh input read, evaluate logic,
    /// commit, and reset the flood refresh timer so the next fast tick samples flood fresh.
    ///
    /// # Errors
    ///
    /// See `fast_tick`.
    pub fn slow_tick(&self, now: Instant) -> Result<(), CabinetError> {
        match self.slow_tick_inner(now) {
            Ok(()) => Ok(()),
            Err(CabinetError::Poison) => Err(CabinetError::Poison),
            Err(e) => {
                self.state.update(now, |s| s.error = Some(e.to_string()))?;
                let _ = self.events.record(EventKind::Internal, e.to_string());
                Ok(())
            }
        }
    }

    fn slow_tick_inner(&self, now: Instant) -> Result<(), CabinetError> {
        let config = self.config.current()?;

        let reading = self.sensors.lock()?.read_all(now);
        for error in &reading.errors {
            let _ = self.events.record(EventKind::Sensor, error.clone());
        }

        let mut hardware = self.hardware.lock()?;
        let (port_a, port_b) = hardware.read_inputs_raw(true)?;

        let mut raw_doors = [crate::hardware::DoorState::Closed; MAX_DOORS];
        for door in &config.inputs.door_channels {
            raw_doors[usize::from(door.id) - 1] = hardware.decode_door(port_a, door.channel);
        }
        let mut raw_floods = [crate::hardware::FloodState::Ok; MAX_FLOODS];
        for flood in &config.inputs.flood_channels {
            raw_floods[usize::from(flood.id) - 1] = hardware.decode_flood(port_a, flood.channel);
        }
        let _ = port_b;

        let mut conditioner = self.conditioner.lock()?;
        let (doors, _) = conditioner.condition_doors(&config.inputs, &raw_doors, now);
        let (floods, _) = conditioner.condition_floods(&config.inputs, &raw_floods, now);
        conditioner.reset_flood_refresh();
        drop(conditioner);

        let inputs = InputSnapshot { doors, floods };
        let previous = self.state.read()?;
        let (outputs, reason) = logic::evaluate(
            &config,
            &inputs,
            reading.snapshot.temp_cab,
            previous.manual_mode,
            previous.manual_overrides,
            previous.outputs,
        );

        self.commit(&config, &mut hardware, &inputs, &reading.snapshot, outputs, reason, now)?;
        let _ = self
            .events
            .record(EventKind::Sensor, "slow-tick sensor+logic cycle committed");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn commit(
        &self,
        config: &crate::config::Configuration,
        hardware: &mut HardwareInterface<'a, P>,
        inputs: &InputSnapshot,
        sensors: &crate::sensors::SensorSnapshot,
        outputs: OutputSet,
        reason: Option<String>,
        now: Instant,
    ) -> Result<(), CabinetError> {
        let released = self.timers.expire(now);
        let (relays, transistors) = compose_commit(config, outputs);
        let force_on = self.timers.active_labels(now);
        hardware.commit_outputs(&relays, &transistors, &force_on)?;

        let buzzer_on = outputs.get(LogicalOutput::Alarm);
        let strike_until = self.timers.active_until(now);

        let muted = self.state.read()?.buzzer_muted;
        hardware.set_buzzer(buzzer_on && !muted)?;

        self.state.update(now, |s| {
            s.inputs = *inputs;
            s.sensors = *sensors;
            s.outputs = outputs;
            s.alarm_reason = reason;
            s.strike_active_until = strike_until;
            s.error = None;
        })?;

        for channel in &released {
            let _ = self
                .events
                .record(EventKind::Strike, format!("{channel} released"));
        }

        // Flush at every cycle boundary so a record never waits on the ring to fill (§5).
        self.events.flush()?;

        Ok(())
    }

    /// Run the fast task until `stop` is set, sleeping `fast_tick_ms` between iterations.
    pub fn run_fast(&self, stop: &AtomicBool) {
        loop {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            let tick_ms = self
                .config
                .current()
                .map(|c| c.loops.fast_tick_ms)
                .unwrap_or(250);
            if let Err(e) = self.fast_tick(Instant::now()) {
                let _ = self.log.warn(&format!("fast task error: {e}"));
            }
            sleep(Duration::from_millis(u64::from(tick_ms)));
        }
    }

    /// Run the slow task until `stop` is set, sleeping `logic_tick_seconds` between iterations.
    pub fn run_slow(&self, stop: &AtomicBool) {
        loop {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            let tick_s = self
                .config
                .current()
                .map(|c| c.loops.logic_tick_seconds)
                .unwrap_or(60);
            if let Err(e) = self.slow_tick(Instant::now()) {
                let _ = self.log.warn(&format!("slow task error: {e}"));
            }
            sleep(Duration::from_secs(u64::from(tick_s)));
        }
    }
}

/// Split an `OutputSet` into the `(bit, state)` pairs for the relay bank and the transistor
/// bank, per each logical output's configured channel mapping.
fn compose_commit(
    config: &crate::config::Configuration,
    outputs: OutputSet,
) -> (Vec<(u8, bool)>, Vec<(u8, bool)>) {
    let mut relays = Vec::new();
    let mut transistors = Vec::new();
    for (output, state) in outputs.iter() {
        for &channel in config.channels_for(output) {
            match channel {
                crate::hardware::OutputChannel::Relay(_) => relays.push((channel.bit(), state)),
                crate::hardware::OutputChannel::Transistor(_) => {
                    transistors.push((channel.bit(), state));
                }
            }
        }
    }
    (relays, transistors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::hardware::{Expander, ListenerPin, Polarities};
    use crate::hardware::spi::{Bus, Device};
    use crate::sensors::RetryPolicy;
    use std::io::Cursor;
    use std::sync::Mutex as StdMutex;

    fn config() -> Configuration {
        let json = r##"{
            "thresholds": { "heater_c": 5.0, "cooler_c": 25.0, "fan_c": 30.0, "hysteresis_c": 1.0 },
            "loops": { "fast_tick_ms": 250, "logic_tick_seconds": 60 },
            "inputs": {
                "door_channels": [{ "id": 1, "channel": "A0" }],
                "flood_channels": [{ "id": 1, "channel": "A6" }],
                "polarities": { "door_open_is_high": true, "flood_low_is_flood": true, "dip_on_is_high": true },
                "anti_glitch_ms": 0, "anti_flap_seconds": 0.0, "flood_refresh_seconds": 0.0
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

    struct AlwaysOk;
    impl TempHumidityProbe for AlwaysOk {
        fn read(&mut self) -> Result<(f64, f64), String> {
            Ok((22.0, 40.0))
        }
    }
    impl OneWireProbe for AlwaysOk {
        fn read(&mut self) -> Result<f64, String> {
            Ok(22.0)
        }
    }

    fn make_hardware() -> HardwareInterface<'static, ListenerPin> {
        let out_bus: &'static StdMutex<Bus<ListenerPin>> =
            Box::leak(Box::new(StdMutex::new(Bus {
                period: Duration::from_nanos(1),
                pin_clk: ListenerPin::new(false),
                pin_mosi: ListenerPin::new(false),
                pin_miso: ListenerPin::new(false),
            })));
        let in_bus: &'static StdMutex<Bus<ListenerPin>> =
            Box::leak(Box::new(StdMutex::new(Bus {
                period: Duration::from_nanos(1),
                pin_clk: ListenerPin::new(false),
                pin_mosi: ListenerPin::new(false),
                pin_miso: ListenerPin::new(false),
            })));
        let out_device = Device::new(out_bus, ListenerPin::new(true));
        let in_device = Device::new(in_bus, ListenerPin::new(true));
        let output = Expander::new_output(out_device).unwrap();
        let input = Expander::new_input(in_device).unwrap();
        HardwareInterface::new(output, input, Polarities::default(), ListenerPin::new(false))
    }

    #[test]
    fn slow_tick_commits_baseline_cool_as_all_off() {
        let config = ConfigHandle::new(config());
        let hardware = make_hardware();
        let sensors = SensorReader::new(AlwaysOk, AlwaysOk, None::<AlwaysOk>)
            .with_policy(RetryPolicy { attempts: 1, pacing: Duration::ZERO });
        let log = UserLog::new(Cursor::new(Vec::new()));
        let events = EventLog::new(Cursor::new(Vec::new()), 64);

        let controller =
            Controller::new(&config, hardware, sensors, &log, &events, Instant::now()).unwrap();
        controller.slow_tick(Instant::now()).unwrap();

        let state = controller.state().read().unwrap();
        assert_eq!(state.outputs, OutputSet::all_off());
        assert_eq!(state.sensors.temp_cab, Some(22.0));
    }
}

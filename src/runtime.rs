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

//! Process wiring: turn a configuration file and a `MakeHardware` dependency injector into a
//! running `Controller`, two threads, and nothing else.
//!
//! Grounded on `server.rs::{MakeHardware, run}`, stripped of everything downstream of the
//! Hardware Interface: no TCP listener, no dashboard protocol, no per-client thread. The control
//! loop is the whole program; an external HTTP process is expected to drive it through `Api`
//! (out of scope here, per §1).

use std::fs::{create_dir_all, File};
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use gpio_cdev::{Chip, LineHandle, LineRequestFlags};

use crate::config::{Configuration, ConfigHandle};
use crate::console::{EventLog, UserLog};
use crate::control::Controller;
use crate::hardware::spi::{Bus, Device};
use crate::hardware::{Expander, GpioPin, HardwareInterface, ListenerPin, Polarities};
use crate::sensors::{GpioDht11Probe, SensorReader, SysfsOneWireProbe};
use crate::CabinetError;

/// A dependency injector for the GPIO pins and chip handle the controller needs, so the same
/// wiring code runs against either real hardware or an in-memory stand-in.
pub trait MakeHardware {
    /// The chip handle pins are requested from.
    type Chip;
    /// The pin type this injector produces.
    type Pin: GpioPin + Send + Sync;

    /// Acquire a chip handle.
    ///
    /// # Errors
    ///
    /// Returns `CabinetError` if the chip cannot be opened.
    fn chip() -> Result<Self::Chip, CabinetError>;

    /// Acquire a single named pin as an output, initialised to `default`.
    ///
    /// # Errors
    ///
    /// Returns `CabinetError` if the line cannot be requested.
    fn output_pin(chip: &mut Self::Chip, line: u32, default: bool) -> Result<Self::Pin, CabinetError>;

    /// Acquire a single named pin as an input.
    ///
    /// # Errors
    ///
    /// Returns `CabinetError` if the line cannot be requested.
    fn input_pin(chip: &mut Self::Chip, line: u32) -> Result<Self::Pin, CabinetError>;
}

/// Wires against the real `/dev/gpiochip0` via `gpio-cdev`.
pub struct RaspberryPi;

impl MakeHardware for RaspberryPi {
    type Chip = Chip;
    type Pin = LineHandle;

    fn chip() -> Result<Chip, CabinetError> {
        Ok(Chip::new("/dev/gpiochip0").map_err(crate::hardware::Error::from)?)
    }

    fn output_pin(chip: &mut Chip, line: u32, default: bool) -> Result<LineHandle, CabinetError> {
        Ok(chip
            .get_line(line)
            .map_err(crate::hardware::Error::from)?
            .request(LineRequestFlags::OUTPUT, u8::from(default), "cabinet-sentry")
            .map_err(crate::hardware::Error::from)?)
    }

    fn input_pin(chip: &mut Chip, line: u32) -> Result<LineHandle, CabinetError> {
        Ok(chip
            .get_line(line)
            .map_err(crate::hardware::Error::from)?
            .request(LineRequestFlags::INPUT, 0, "cabinet-sentry")
            .map_err(crate::hardware::Error::from)?)
    }
}

/// Wires every pin to an in-memory `ListenerPin`, for development off real hardware.
pub struct Dummy;

impl MakeHardware for Dummy {
    type Chip = ();
    type Pin = ListenerPin;

    fn chip() -> Result<(), CabinetError> {
        Ok(())
    }

    fn output_pin(_chip: &mut (), _line: u32, default: bool) -> Result<ListenerPin, CabinetError> {
        Ok(ListenerPin::new(default))
    }

    fn input_pin(_chip: &mut (), _line: u32) -> Result<ListenerPin, CabinetError> {
        Ok(ListenerPin::new(false))
    }
}

/// Parse arguments, load configuration, build the hardware and sensor stack via `M`, and run the
/// fast and slow control loop tasks to completion (they never return under normal operation).
///
/// # Errors
///
/// Returns `CabinetError` on a startup failure: missing arguments, unreadable/invalid
/// configuration, or an unavailable GPIO chip.
///
/// # Panics
///
/// Panics if `Box::leak`ed bus state cannot be locked, which only happens if a prior panic
/// poisoned it.
pub fn run<M: MakeHardware>() -> Result<(), CabinetError> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let json_path = args
        .first()
        .ok_or(CabinetError::Args("no configuration JSON path given"))?;
    let logs_path = args
        .get(1)
        .ok_or(CabinetError::Args("no logs path given"))?;

    create_dir_all(logs_path)?;
    let user_log = UserLog::new(File::create(PathBuf::from_iter([logs_path, "console.txt"]))?);
    user_log.debug("parsing configuration file")?;

    let config_file = File::open(json_path)?;
    let config = Configuration::parse(&mut BufReader::new(config_file)).map_err(|e| {
        let _ = user_log.critical(&format!("failed to parse configuration: {e}"));
        e
    })?;
    let config_handle = ConfigHandle::new(config.clone());

    let events = EventLog::new(
        File::create(PathBuf::from_iter([logs_path, "events.csv"]))?,
        config.log_buffer_size,
    );

    user_log.debug("acquiring GPIO")?;
    let mut chip = M::chip()?;

    let spi_bus: &'static Mutex<Bus<M::Pin>> = Box::leak(Box::new(Mutex::new(Bus {
        period: Duration::from_secs(1) / config.gpio.spi_frequency_hz.max(1),
        pin_clk: M::output_pin(&mut chip, config.gpio.spi_clk, false)?,
        pin_mosi: M::output_pin(&mut chip, config.gpio.spi_mosi, false)?,
        pin_miso: M::input_pin(&mut chip, config.gpio.spi_miso)?,
    })));

    let output_cs = M::output_pin(&mut chip, config.gpio.output_cs, true)?;
    let input_cs = M::output_pin(&mut chip, config.gpio.input_cs, true)?;
    let buzzer = M::output_pin(&mut chip, config.gpio.buzzer, false)?;

    let output_expander = Expander::new_output(Device::new(spi_bus, output_cs))?;
    let input_expander = Expander::new_input(Device::new(spi_bus, input_cs))?;

    let polarities = Polarities {
        relays_active_low: config.outputs.polarities.relays_active_low,
        transistors_active_low: config.outputs.polarities.transistors_active_low,
        door_open_is_high: config.inputs.polarities.door_open_is_high,
        flood_low_is_flood: config.inputs.polarities.flood_low_is_flood,
        dip_on_is_high: config.inputs.polarities.dip_on_is_high,
    };
    let hardware = HardwareInterface::new(output_expander, input_expander, polarities, buzzer);
    if hardware.simulating() {
        user_log.warn("one or both expanders did not respond; running in simulation mode")?;
    }

    let battery_probe = GpioDht11Probe::new(M::output_pin(&mut chip, config.sensors.dht11.battery_probe.into(), false)?);
    let cabinet_probe = GpioDht11Probe::new(M::output_pin(&mut chip, config.sensors.dht11.cabinet_probe.into(), false)?);
    let ds18b20_probe = config.sensors.ds18b20.as_ref().filter(|d| d.enabled).map(|d| {
        SysfsOneWireProbe::new(d.base_path.clone(), d.sensor_id.clone())
    });
    let sensors = SensorReader::new(battery_probe, cabinet_probe, ds18b20_probe);

    let controller = Controller::new(
        &config_handle,
        hardware,
        sensors,
        &user_log,
        &events,
        Instant::now(),
    )?;

    user_log.info("starting control loop")?;
    let stop = AtomicBool::new(false);
    std::thread::scope(|s| {
        s.spawn(|| controller.run_fast(&stop));
        s.spawn(|| controller.run_slow(&stop));
    });

    // Either task loop returning (stop having been set) marks a cycle boundary; make sure
    // nothing buffered is left stranded in memory (§5 Cancellation).
    events.flush()?;

    Ok(())
}

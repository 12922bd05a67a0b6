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

//! Temperature/humidity acquisition with retry and staleness tracking (§4.3).
//!
//! Sensor failures never surface as `Result::Err` to the rest of the system (§7: a `SensorRead`
//! failure degrades to `None` in the snapshot plus a logged message); this module's only public
//! fallible-looking type is `SensorReading`, whose `errors` field is purely informational.

use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::hardware::GpioPin;

/// A snapshot of every temperature/humidity reading the system knows about. `None` means
/// "unreadable this cycle"; a caller that wants "last known good" should consult `RuntimeState`
/// instead, since `SensorReader` only caches across the short staleness window (§4.3), not
/// indefinitely.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct SensorSnapshot {
    /// Battery-compartment temperature, degrees Celsius.
    pub temp_batt: Option<f64>,
    /// Battery-compartment relative humidity, percent.
    pub hum_batt: Option<f64>,
    /// Cabinet-compartment temperature, degrees Celsius. This is the `Tc` the logic evaluator
    /// consumes (§4.6).
    pub temp_cab: Option<f64>,
    /// Cabinet-compartment relative humidity, percent.
    pub hum_cab: Option<f64>,
}

/// The result of a full sensor sweep: the snapshot plus any error messages accumulated along the
/// way (one per probe that exhausted its retries).
#[derive(Clone, Debug, PartialEq, Default)]
pub struct SensorReading {
    /// The best available snapshot this cycle.
    pub snapshot: SensorSnapshot,
    /// Human-readable errors from probes that failed after all retries.
    pub errors: Vec<String>,
}

/// A temperature+humidity probe, such as a DHT11.
pub trait TempHumidityProbe {
    /// Perform a single read attempt, returning `(temperature_c, humidity_pct)`.
    ///
    /// # Errors
    ///
    /// Returns an error message on a failed or out-of-range reading.
    fn read(&mut self) -> Result<(f64, f64), String>;
}

/// A single-value 1-Wire-style probe, such as a DS18B20 (supplemented feature, `SPEC_FULL.md`
/// §B).
pub trait OneWireProbe {
    /// Perform a single read attempt, returning the temperature in degrees Celsius.
    ///
    /// # Errors
    ///
    /// Returns an error message on a failed read or a CRC mismatch.
    fn read(&mut self) -> Result<f64, String>;
}

/// Retry policy shared by every probe kind: attempt up to 3 times, pacing retries by a
/// configurable duration (default 2s, per §4.3). Exposed as a field (not a constant) so tests can
/// run the retry path without real delay.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts per read.
    pub attempts: u32,
    /// Time to wait between attempts.
    pub pacing: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            pacing: Duration::from_secs(2),
        }
    }
}

fn read_with_retry<T>(
    policy: RetryPolicy,
    mut attempt: impl FnMut() -> Result<T, String>,
) -> Result<T, String> {
    let mut last_err = String::new();
    for i in 0..policy.attempts {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_err = e;
                if i + 1 < policy.attempts {
                    sleep(policy.pacing);
                }
            }
        }
    }
    Err(last_err)
}

/// A single cached value with a staleness window: a cheap sensor re-queried within the window
/// republishes its last good reading instead of re-probing (§4.3: "suppressing rate-limit
/// failures of cheap sensors").
struct Cached<T> {
    value: Option<T>,
    read_at: Option<Instant>,
}

impl<T: Copy> Cached<T> {
    fn new() -> Cached<T> {
        Cached {
            value: None,
            read_at: None,
        }
    }

    fn get_or_read(
        &mut self,
        now: Instant,
        staleness: Duration,
        read: impl FnOnce() -> Result<T, String>,
    ) -> Result<T, String> {
        if let (Some(value), Some(read_at)) = (self.value, self.read_at) {
            if now.duration_since(read_at) < staleness {
                return Ok(value);
            }
        }
        let result = read();
        if let Ok(value) = result {
            self.value = Some(value);
            self.read_at = Some(now);
        }
        result
    }
}

/// Duration within which a successful reading is reused instead of re-probed (§4.3).
const STALENESS_WINDOW: Duration = Duration::from_secs(2);

/// Reads the battery and cabinet DHT11 pair, plus an optional DS18B20 cabinet probe, applying
/// retry and staleness policy to each.
pub struct SensorReader<B, C, D> {
    battery: B,
    cabinet: C,
    ds18b20: Option<D>,
    policy: RetryPolicy,
    cached_batt: Cached<(f64, f64)>,
    cached_cab: Cached<(f64, f64)>,
    cached_ds18b20: Cached<f64>,
}

impl<B: TempHumidityProbe, C: TempHumidityProbe, D: OneWireProbe> SensorReader<B, C, D> {
    #[must_use]
    /// Construct a reader over the given probes. `ds18b20` is `None` when that probe is disabled
    /// in configuration; when present it is authoritative for `temp_cab` and the DHT11 cabinet
    /// channel only contributes `hum_cab` (see `DESIGN.md` for the rationale).
    pub fn new(battery: B, cabinet: C, ds18b20: Option<D>) -> SensorReader<B, C, D> {
        SensorReader {
            battery,
            cabinet,
            ds18b20,
            policy: RetryPolicy::default(),
            cached_batt: Cached::new(),
            cached_cab: Cached::new(),
            cached_ds18b20: Cached::new(),
        }
    }

    #[must_use]
    /// Override the retry policy (used by tests to avoid real sleeps).
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Read every configured probe, applying retry and the staleness cache to each.
    pub fn read_all(&mut self, now: Instant) -> SensorReading {
        let mut snapshot = SensorSnapshot::default();
        let mut errors = Vec::new();

        let policy = self.policy;
        let battery = &mut self.battery;
        match self
            .cached_batt
            .get_or_read(now, STALENESS_WINDOW, || {
                read_with_retry(policy, || battery.read())
            }) {
            Ok((temp, hum)) => {
                snapshot.temp_batt = Some(temp);
                snapshot.hum_batt = Some(hum);
            }
            Err(e) => errors.push(format!("battery probe: {e}")),
        }

        let cabinet = &mut self.cabinet;
        let cabinet_reading = self
            .cached_cab
            .get_or_read(now, STALENESS_WINDOW, || {
                read_with_retry(policy, || cabinet.read())
            });
        match cabinet_reading {
            Ok((temp, hum)) => {
                snapshot.temp_cab = Some(temp);
                snapshot.hum_cab = Some(hum);
            }
            Err(e) => errors.push(format!("cabinet probe: {e}")),
        }

        if let Some(ds18b20) = &mut self.ds18b20 {
            match self
                .cached_ds18b20
                .get_or_read(now, STALENESS_WINDOW, || {
                    read_with_retry(policy, || ds18b20.read())
                }) {
                Ok(temp) => snapshot.temp_cab = Some(temp),
                Err(e) => errors.push(format!("ds18b20 probe: {e}")),
            }
        }

        SensorReading { snapshot, errors }
    }
}

/// Reads a DS18B20-style 1-Wire sensor through its kernel `w1_slave`-shaped sysfs file: first
/// line ends in `YES` on a CRC match, second line carries a `t=<millidegrees>` marker (§B,
/// grounded on `original_source/.../sensors.py::read_ds18b20`).
pub struct SysfsOneWireProbe {
    contents: Box<dyn FnMut() -> std::io::Result<String> + Send>,
}

impl SysfsOneWireProbe {
    #[must_use]
    /// Construct a probe that reads `{base_path}/{sensor_id}/w1_slave` on every call.
    pub fn new(base_path: String, sensor_id: String) -> SysfsOneWireProbe {
        SysfsOneWireProbe {
            contents: Box::new(move || {
                std::fs::read_to_string(format!("{base_path}/{sensor_id}/w1_slave"))
            }),
        }
    }
}

impl OneWireProbe for SysfsOneWireProbe {
    fn read(&mut self) -> Result<f64, String> {
        let text = (self.contents)().map_err(|e| e.to_string())?;
        parse_w1_slave(&text)
    }
}

/// Bit-bangs the single-wire DHT11 protocol directly over a `GpioPin`.
///
/// `original_source/.../core/sensors.py::read_dht11` delegates to a platform sensor driver
/// (`adafruit_dht`) and degrades to an error string when that driver is unavailable; this crate
/// has no such driver dependency, so the protocol itself is bit-banged here the same way
/// `hardware::spi` bit-bangs SPI: a start pulse, then forty response bits timed by polling
/// `Instant::now()` between edges.
pub struct GpioDht11Probe<P> {
    pin: P,
}

impl<P: GpioPin> GpioDht11Probe<P> {
    #[must_use]
    /// Construct a probe over a single data pin.
    pub fn new(pin: P) -> GpioDht11Probe<P> {
        GpioDht11Probe { pin }
    }

    fn read_once(&mut self) -> Result<(f64, f64), String> {
        self.pin.write(false).map_err(|e| e.to_string())?;
        sleep(Duration::from_millis(18));
        self.pin.write(true).map_err(|e| e.to_string())?;

        // host releases the line; the sensor itself drives the next edges.
        self.wait_for_edge(true)?;
        self.wait_for_edge(false)?;
        self.wait_for_edge(true)?;

        let mut bits = [0u8; 40];
        for bit in &mut bits {
            self.wait_for_edge(false)?;
            let high_duration = self.wait_for_edge(true)?;
            *bit = u8::from(high_duration > Duration::from_micros(50));
        }

        let mut bytes = [0u8; 5];
        for (i, byte) in bytes.iter_mut().enumerate() {
            for b in &bits[i * 8..i * 8 + 8] {
                *byte = (*byte << 1) | b;
            }
        }
        let checksum = bytes[0]
            .wrapping_add(bytes[1])
            .wrapping_add(bytes[2])
            .wrapping_add(bytes[3]);
        if checksum != bytes[4] {
            return Err("DHT11 checksum mismatch".to_string());
        }

        Ok((f64::from(bytes[2]), f64::from(bytes[0])))
    }

    /// Busy-wait until the line reads as `level`, returning how long the *previous* level held.
    fn wait_for_edge(&mut self, level: bool) -> Result<Duration, String> {
        let start = Instant::now();
        while self.pin.read().map_err(|e| e.to_string())? != level {
            if start.elapsed() > Duration::from_millis(5) {
                return Err("DHT11 timeout waiting for pulse edge".to_string());
            }
        }
        Ok(start.elapsed())
    }
}

impl<P: GpioPin> TempHumidityProbe for GpioDht11Probe<P> {
    fn read(&mut self) -> Result<(f64, f64), String> {
        self.read_once()
    }
}

fn parse_w1_slave(text: &str) -> Result<f64, String> {
    let mut lines = text.lines();
    let first = lines.next().ok_or("empty w1_slave output")?;
    if !first.trim_end().ends_with("YES") {
        return Err("CRC check failed".to_string());
    }
    let second = lines.next().ok_or("missing temperature line")?;
    let marker = second
        .split("t=")
        .nth(1)
        .ok_or("missing t= marker")?
        .trim();
    let millidegrees: i64 = marker.parse().map_err(|_| "malformed t= marker".to_string())?;
    Ok(millidegrees as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted<T> {
        responses: Vec<Result<T, String>>,
    }

    impl<T: Clone> Scripted<T> {
        fn new(responses: Vec<Result<T, String>>) -> Scripted<T> {
            Scripted { responses }
        }
    }

    impl TempHumidityProbe for Scripted<(f64, f64)> {
        fn read(&mut self) -> Result<(f64, f64), String> {
            if self.responses.is_empty() {
                return Err("exhausted script".to_string());
            }
            self.responses.remove(0)
        }
    }

    impl OneWireProbe for Scripted<f64> {
        fn read(&mut self) -> Result<f64, String> {
            if self.responses.is_empty() {
                return Err("exhausted script".to_string());
            }
            self.responses.remove(0)
        }
    }

    #[test]
    fn successful_read_populates_snapshot() {
        let battery = Scripted::new(vec![Ok((4.0, 50.0))]);
        let cabinet = Scripted::new(vec![Ok((22.0, 40.0))]);
        let mut reader =
            SensorReader::<_, _, Scripted<f64>>::new(battery, cabinet, None)
                .with_policy(RetryPolicy { attempts: 3, pacing: Duration::ZERO });
        let reading = reader.read_all(Instant::now());
        assert_eq!(reading.snapshot.temp_batt, Some(4.0));
        assert_eq!(reading.snapshot.temp_cab, Some(22.0));
        assert!(reading.errors.is_empty());
    }

    #[test]
    fn exhausted_retries_yield_none_and_error() {
        let battery = Scripted::new(vec![Err("timeout".to_string()); 3]);
        let cabinet = Scripted::new(vec![Ok((22.0, 40.0))]);
        let mut reader =
            SensorReader::<_, _, Scripted<f64>>::new(battery, cabinet, None)
                .with_policy(RetryPolicy { attempts: 3, pacing: Duration::ZERO });
        let reading = reader.read_all(Instant::now());
        assert_eq!(reading.snapshot.temp_batt, None);
        assert_eq!(reading.errors.len(), 1);
    }

    #[test]
    fn staleness_window_reuses_last_good_value() {
        let battery = Scripted::new(vec![Ok((4.0, 50.0)), Err("should not be reached".into())]);
        let cabinet = Scripted::new(vec![Ok((22.0, 40.0)), Ok((22.0, 40.0))]);
        let mut reader =
            SensorReader::<_, _, Scripted<f64>>::new(battery, cabinet, None)
                .with_policy(RetryPolicy { attempts: 1, pacing: Duration::ZERO });
        let t0 = Instant::now();
        let first = reader.read_all(t0);
        assert_eq!(first.snapshot.temp_batt, Some(4.0));

        let second = reader.read_all(t0 + Duration::from_millis(500));
        assert_eq!(second.snapshot.temp_batt, Some(4.0));
        assert!(second.errors.is_empty());
    }

    #[test]
    fn ds18b20_overrides_temp_cab_when_present() {
        let battery = Scripted::new(vec![Ok((4.0, 50.0))]);
        let cabinet = Scripted::new(vec![Ok((20.0, 40.0))]);
        let ds18b20 = Scripted::new(vec![Ok(23.5)]);
        let mut reader = SensorReader::new(battery, cabinet, Some(ds18b20))
            .with_policy(RetryPolicy { attempts: 1, pacing: Duration::ZERO });
        let reading = reader.read_all(Instant::now());
        assert_eq!(reading.snapshot.temp_cab, Some(23.5));
        assert_eq!(reading.snapshot.hum_cab, Some(40.0));
    }

    #[test]
    fn parses_valid_w1_slave_contents() {
        let text = "a1 01 4b 46 7f ff 0c 10 2f : crc=2f YES\na1 01 4b 46 7f ff 0c 10 2f t=23562\n";
        assert_eq!(parse_w1_slave(text), Ok(23.562));
    }

    #[test]
    fn rejects_w1_slave_crc_failure() {
        let text = "a1 01 4b 46 7f ff 0c 10 2f : crc=2f NO\na1 01 4b 46 7f ff 0c 10 2f t=23562\n";
        assert!(parse_w1_slave(text).is_err());
    }
}

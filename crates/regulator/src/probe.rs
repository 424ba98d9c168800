//! Sensor probe handles. The `gpio` feature reads real hardware through the
//! kernel's sysfs interfaces (w1 for DS18B20, IIO for DHT-class sensors);
//! the default `sim` feature substitutes a stateful synthetic probe so the
//! full loop runs anywhere.
//!
//! Bus protocols live in the kernel drivers. This module only reads and
//! parses their sysfs files.

use anyhow::Result;

#[cfg(feature = "sim")]
use anyhow::bail;

#[cfg(any(test, feature = "gpio"))]
use anyhow::{ensure, Context};

#[cfg(feature = "gpio")]
use std::path::{Path, PathBuf};

use crate::config::HardwareConfig;

#[cfg(all(not(feature = "sim"), not(feature = "gpio")))]
compile_error!("enable at least one probe backend feature: `sim` (default) or `gpio`");

/// What one probe yielded on one read.  Either field may be absent: a
/// DS18B20 has no humidity channel, and a DHT can drop one channel while
/// the other still reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSample {
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
}

/// Which DHT-class channel a probe fills; selects sim presets and labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempChannel {
    T1,
    T2,
}

// ---------------------------------------------------------------------------
// Probe handle
// ---------------------------------------------------------------------------

pub enum Probe {
    #[cfg(feature = "sim")]
    Sim(SimProbe),
    #[cfg(feature = "gpio")]
    W1Therm(W1Therm),
    #[cfg(feature = "gpio")]
    Dht(DhtProbe),
}

impl Probe {
    /// One raw read.  May fail; the sensor bank normalizes failures.
    pub fn read(&mut self) -> Result<ProbeSample> {
        match self {
            #[cfg(feature = "sim")]
            Probe::Sim(p) => p.read(),
            #[cfg(feature = "gpio")]
            Probe::W1Therm(p) => p.read(),
            #[cfg(feature = "gpio")]
            Probe::Dht(p) => p.read(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            #[cfg(feature = "sim")]
            Probe::Sim(_) => "sim",
            #[cfg(feature = "gpio")]
            Probe::W1Therm(_) => "w1",
            #[cfg(feature = "gpio")]
            Probe::Dht(_) => "dht",
        }
    }
}

// ---------------------------------------------------------------------------
// Constructors (backend selected at compile time)
// ---------------------------------------------------------------------------

/// Build the probe backing a DHT-class temperature/humidity channel.
#[cfg(feature = "gpio")]
pub fn dht_probe(channel: TempChannel, pin: i64, hw: &HardwareConfig) -> Option<Probe> {
    match hw.dht_devices.get(&pin.to_string()) {
        Some(dir) => Some(Probe::Dht(DhtProbe::new(dir.clone()))),
        None => {
            tracing::warn!(?channel, pin, "no IIO device mapped for DHT pin, channel disabled");
            None
        }
    }
}

#[cfg(all(feature = "sim", not(feature = "gpio")))]
pub fn dht_probe(channel: TempChannel, _pin: i64, _hw: &HardwareConfig) -> Option<Probe> {
    // Basking side runs warmer than the cool side.
    let (base, humidity) = match channel {
        TempChannel::T1 => (28.0, Some(60.0)),
        TempChannel::T2 => (25.0, Some(55.0)),
    };
    Some(Probe::Sim(SimProbe::new(base, humidity)))
}

/// Build the one-wire control probe from its sensor id.
#[cfg(feature = "gpio")]
pub fn onewire_probe(sensor_id: &str, hw: &HardwareConfig) -> Option<Probe> {
    Some(Probe::W1Therm(W1Therm::new(&hw.w1_root, sensor_id)))
}

#[cfg(all(feature = "sim", not(feature = "gpio")))]
pub fn onewire_probe(_sensor_id: &str, _hw: &HardwareConfig) -> Option<Probe> {
    Some(Probe::Sim(SimProbe::new(27.5, None)))
}

// ---------------------------------------------------------------------------
// Synthetic probe (sim feature)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0, sigma) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
#[cfg(feature = "sim")]
fn noise(sigma: f32) -> f32 {
    let mut sum: f32 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f32();
    }
    (sum - 6.0) * sigma
}

/// Stateful synthetic probe: the "true" temperature evolves as a random walk
/// with mean reversion (temporal coherence), each reading adds electronic
/// noise, and a dropout probability makes reads fail like a flaky bus.
#[cfg(feature = "sim")]
pub struct SimProbe {
    base: f32,
    ambient: f32,
    mean_reversion: f32,
    walk_sigma: f32,
    noise_sigma: f32,
    humidity: Option<f32>,
    humidity_sigma: f32,
    dropout_prob: f32,
}

#[cfg(feature = "sim")]
impl SimProbe {
    pub fn new(base_temperature: f32, humidity: Option<f32>) -> Self {
        Self {
            base: base_temperature,
            ambient: base_temperature,
            mean_reversion: 0.05,
            walk_sigma: 0.08,
            noise_sigma: 0.15,
            humidity,
            humidity_sigma: 1.5,
            dropout_prob: 0.02,
        }
    }

    /// Deterministic probe: every read returns exactly these values.
    pub fn steady(temperature: f32, humidity: Option<f32>) -> Self {
        Self {
            base: temperature,
            ambient: temperature,
            mean_reversion: 0.0,
            walk_sigma: 0.0,
            noise_sigma: 0.0,
            humidity,
            humidity_sigma: 0.0,
            dropout_prob: 0.0,
        }
    }

    /// Probe that fails every read, like an unplugged sensor.
    pub fn offline() -> Self {
        Self {
            dropout_prob: 1.0,
            ..Self::steady(0.0, None)
        }
    }

    fn read(&mut self) -> Result<ProbeSample> {
        if fastrand::f32() < self.dropout_prob {
            bail!("simulated bus timeout");
        }

        // Evolve the true value, then add per-reading noise on top.
        let pull = self.mean_reversion * (self.ambient - self.base);
        self.base += pull + noise(self.walk_sigma);

        let temperature = self.base + noise(self.noise_sigma);
        let humidity = self
            .humidity
            .map(|h| (h + noise(self.humidity_sigma)).clamp(0.0, 100.0));

        Ok(ProbeSample {
            temperature: Some(temperature),
            humidity,
        })
    }
}

// ---------------------------------------------------------------------------
// sysfs parsers (hardware formats, unit-testable without hardware)
// ---------------------------------------------------------------------------

/// Parse the two-line `w1_slave` payload of a DS18B20.  The first line ends
/// in the CRC verdict; the second carries the raw reading after `t=` in
/// milli-degrees.
#[cfg(any(test, feature = "gpio"))]
fn parse_w1_slave(raw: &str) -> Result<f32> {
    let mut lines = raw.lines();
    let crc_line = lines.next().context("w1_slave payload is empty")?;
    ensure!(
        crc_line.trim_end().ends_with("YES"),
        "CRC check failed: {crc_line}"
    );
    let data_line = lines.next().context("w1_slave payload has no data line")?;
    let (_, milli) = data_line
        .rsplit_once("t=")
        .context("no t= field in w1_slave payload")?;
    let milli: i32 = milli
        .trim()
        .parse()
        .with_context(|| format!("bad milli-degree value '{}'", milli.trim()))?;
    Ok(milli as f32 / 1000.0)
}

/// Parse a kernel IIO `in_*_input` file: one integer in milli-units.
#[cfg(any(test, feature = "gpio"))]
fn parse_milli_units(raw: &str) -> Result<f32> {
    let v: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("bad milli-unit value '{}'", raw.trim()))?;
    Ok(v as f32 / 1000.0)
}

// ---------------------------------------------------------------------------
// Hardware probes (gpio feature)
// ---------------------------------------------------------------------------

/// DS18B20 handle.  The kernel w1 driver owns the bus; this reads its
/// `w1_slave` file.  DS18B20 devices enumerate under family code 28.
#[cfg(feature = "gpio")]
pub struct W1Therm {
    device: PathBuf,
}

#[cfg(feature = "gpio")]
impl W1Therm {
    pub fn new(w1_root: &Path, sensor_id: &str) -> Self {
        Self {
            device: w1_root.join(format!("28-{sensor_id}")).join("w1_slave"),
        }
    }

    fn read(&self) -> Result<ProbeSample> {
        let raw = std::fs::read_to_string(&self.device)
            .with_context(|| format!("failed to read {}", self.device.display()))?;
        Ok(ProbeSample {
            temperature: Some(parse_w1_slave(&raw)?),
            humidity: None,
        })
    }
}

/// DHT22/DHT11 handle behind the kernel IIO driver.  Each channel file can
/// fail independently (DHT reads miss sporadically); the probe only errors
/// when both do, and single-channel misses log at debug to keep the cycle
/// log readable.
#[cfg(feature = "gpio")]
pub struct DhtProbe {
    dir: PathBuf,
}

#[cfg(feature = "gpio")]
impl DhtProbe {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn read(&self) -> Result<ProbeSample> {
        let temperature = read_milli(&self.dir.join("in_temp_input"));
        let humidity = read_milli(&self.dir.join("in_humidityrelative_input"));

        if let (Err(t_err), Err(_)) = (&temperature, &humidity) {
            anyhow::bail!(
                "both DHT channels failed under {}: {t_err:#}",
                self.dir.display()
            );
        }
        if let Err(e) = &temperature {
            tracing::debug!(dir = %self.dir.display(), "temperature channel miss: {e:#}");
        }
        if let Err(e) = &humidity {
            tracing::debug!(dir = %self.dir.display(), "humidity channel miss: {e:#}");
        }

        Ok(ProbeSample {
            temperature: temperature.ok(),
            humidity: humidity.ok(),
        })
    }
}

#[cfg(feature = "gpio")]
fn read_milli(path: &Path) -> Result<f32> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_milli_units(&raw)
}

// ===========================================================================
// Tests
// ===========================================================================

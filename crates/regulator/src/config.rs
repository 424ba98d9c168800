//! TOML config file loading and validation for the regulation daemon.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub regulation: RegulationConfig,
    pub controller: ControllerConfig,
    #[serde(default)]
    pub trace: TraceConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
}

#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the remote terrarium service, scheme included.
    pub base_url: String,
    pub user_id: i64,
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
}

#[derive(Debug, Deserialize)]
pub struct RegulationConfig {
    /// Seconds between regulation cycles.
    #[serde(default = "default_sample_period_sec")]
    pub sample_period_sec: u64,
    /// Target temperature in °C.
    pub setpoint_c: f64,
    /// Terrarium name/type that qualifies for regulation (case-insensitive).
    #[serde(default = "default_lamp_type")]
    pub lamp_type: String,
}

/// Controller selection: one engine, two variants.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "variant", rename_all = "lowercase")]
pub enum ControllerConfig {
    /// PI with gains derived from the process step-response constants.
    Pi { time_constant: f64, dead_time: f64 },
    /// PID with direct gains and a fixed nominal sample period.
    Pid {
        kp: f64,
        ki: f64,
        kd: f64,
        #[serde(default = "default_nominal_dt_sec")]
        nominal_dt_sec: f64,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceConfig {
    /// Directory for per-unit control trace CSVs.  Absent = no traces.
    pub dir: Option<PathBuf>,
}

/// Local sysfs wiring for the `gpio` feature.  Parsed and validated in every
/// build so one config file serves both feature sets.
#[derive(Debug, Clone, Deserialize)]
pub struct HardwareConfig {
    /// Root of the kernel one-wire device tree.
    #[serde(default = "default_w1_root")]
    pub w1_root: PathBuf,
    /// BCM pin number → IIO device directory of the kernel DHT driver.
    #[serde(default)]
    pub dht_devices: HashMap<String, PathBuf>,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            w1_root: default_w1_root(),
            dht_devices: HashMap::new(),
        }
    }
}

fn default_timeout_sec() -> u64 {
    10
}

fn default_sample_period_sec() -> u64 {
    5
}

fn default_lamp_type() -> String {
    "lamp".to_string()
}

fn default_nominal_dt_sec() -> f64 {
    1.0
}

fn default_w1_root() -> PathBuf {
    PathBuf::from("/sys/bus/w1/devices")
}

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
pub(crate) const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

/// Allowed regulation period in seconds.
const SAMPLE_PERIOD_SEC_RANGE: std::ops::RangeInclusive<u64> = 5..=30;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_api(&mut errors);
        self.validate_regulation(&mut errors);
        self.validate_controller(&mut errors);
        self.validate_hardware(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_api(&self, errors: &mut Vec<String>) {
        let url = self.api.base_url.trim();
        if url.is_empty() {
            errors.push("api: base_url is empty".into());
        } else if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(format!(
                "api: base_url '{}' must start with http:// or https://",
                self.api.base_url
            ));
        }

        if self.api.user_id <= 0 {
            errors.push(format!(
                "api: user_id must be positive, got {}",
                self.api.user_id
            ));
        }
        if self.api.timeout_sec == 0 {
            errors.push("api: timeout_sec must be positive".into());
        }
    }

    fn validate_regulation(&self, errors: &mut Vec<String>) {
        let r = &self.regulation;
        if !SAMPLE_PERIOD_SEC_RANGE.contains(&r.sample_period_sec) {
            errors.push(format!(
                "regulation: sample_period_sec {} out of range [{}, {}]",
                r.sample_period_sec,
                SAMPLE_PERIOD_SEC_RANGE.start(),
                SAMPLE_PERIOD_SEC_RANGE.end()
            ));
        }
        if !r.setpoint_c.is_finite() {
            errors.push(format!(
                "regulation: setpoint_c must be finite, got {}",
                r.setpoint_c
            ));
        }
        if r.lamp_type.trim().is_empty() {
            errors.push("regulation: lamp_type is empty".into());
        }
    }

    fn validate_controller(&self, errors: &mut Vec<String>) {
        match &self.controller {
            ControllerConfig::Pi {
                time_constant,
                dead_time,
            } => {
                if !(time_constant.is_finite() && *time_constant > 0.0) {
                    errors.push(format!(
                        "controller: time_constant must be positive and finite, got {time_constant}"
                    ));
                }
                if !(dead_time.is_finite() && *dead_time > 0.0) {
                    errors.push(format!(
                        "controller: dead_time must be positive and finite, got {dead_time}"
                    ));
                }
            }
            ControllerConfig::Pid {
                kp,
                ki,
                kd,
                nominal_dt_sec,
            } => {
                for (name, gain) in [("kp", kp), ("ki", ki), ("kd", kd)] {
                    if !(gain.is_finite() && *gain >= 0.0) {
                        errors.push(format!(
                            "controller: {name} must be non-negative and finite, got {gain}"
                        ));
                    }
                }
                if !(nominal_dt_sec.is_finite() && *nominal_dt_sec > 0.0) {
                    errors.push(format!(
                        "controller: nominal_dt_sec must be positive and finite, got {nominal_dt_sec}"
                    ));
                }
            }
        }
    }

    fn validate_hardware(&self, errors: &mut Vec<String>) {
        if !self.hardware.w1_root.is_absolute() {
            errors.push(format!(
                "hardware: w1_root '{}' must be an absolute path",
                self.hardware.w1_root.display()
            ));
        }

        for (pin, dir) in &self.hardware.dht_devices {
            match pin.parse::<i64>() {
                Ok(n) if VALID_GPIO_PINS.contains(&n) => {}
                Ok(n) => errors.push(format!(
                    "hardware: dht_devices pin {n} is not a valid BCM GPIO pin (allowed: 2-27)"
                )),
                Err(_) => errors.push(format!(
                    "hardware: dht_devices key '{pin}' is not a pin number"
                )),
            }
            if !dir.is_absolute() {
                errors.push(format!(
                    "hardware: dht_devices['{pin}'] path '{}' must be absolute",
                    dir.display()
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- Helper: build a valid baseline config that passes validation ------

    fn valid_config() -> Config {
        Config {
            api: ApiConfig {
                base_url: "http://127.0.0.1:8080".into(),
                user_id: 1,
                timeout_sec: 10,
            },
            regulation: RegulationConfig {
                sample_period_sec: 5,
                setpoint_c: 31.0,
                lamp_type: "lamp".into(),
            },
            controller: ControllerConfig::Pi {
                time_constant: 750.0,
                dead_time: 64.0,
            },
            trace: TraceConfig::default(),
            hardware: HardwareConfig::default(),
        }
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_pi_config() {
        let toml_str = r#"
[api]
base_url = "http://212.47.71.180:8080"
user_id = 3

[regulation]
sample_period_sec = 30
setpoint_c = 29.0

[controller]
variant = "pi"
time_constant = 750.0
dead_time = 64.0

[trace]
dir = "traces"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api.user_id, 3);
        assert_eq!(config.api.timeout_sec, 10); // default
        assert_eq!(config.regulation.sample_period_sec, 30);
        assert_eq!(config.regulation.lamp_type, "lamp"); // default
        assert_eq!(
            config.controller,
            ControllerConfig::Pi {
                time_constant: 750.0,
                dead_time: 64.0
            }
        );
        assert_eq!(config.trace.dir, Some(PathBuf::from("traces")));
        config.validate().unwrap();
    }

    #[test]
    fn parse_pid_config_with_default_dt() {
        let toml_str = r#"
[api]
base_url = "http://127.0.0.1:8080"
user_id = 1

[regulation]
setpoint_c = 31.0

[controller]
variant = "pid"
kp = 0.0463
ki = 0.00333
kd = 0.0
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.controller,
            ControllerConfig::Pid {
                kp: 0.0463,
                ki: 0.00333,
                kd: 0.0,
                nominal_dt_sec: 1.0
            }
        );
        assert_eq!(config.regulation.sample_period_sec, 5); // default
        assert_eq!(config.trace.dir, None);
        config.validate().unwrap();
    }

    #[test]
    fn parse_hardware_section() {
        let toml_str = r#"
[api]
base_url = "http://127.0.0.1:8080"
user_id = 1

[regulation]
setpoint_c = 31.0

[controller]
variant = "pi"
time_constant = 750.0
dead_time = 64.0

[hardware]
w1_root = "/sys/bus/w1/devices"

[hardware.dht_devices]
17 = "/sys/bus/iio/devices/iio:device0"
27 = "/sys/bus/iio/devices/iio:device1"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.hardware.dht_devices.len(), 2);
        assert_eq!(
            config.hardware.dht_devices["17"],
            PathBuf::from("/sys/bus/iio/devices/iio:device0")
        );
        config.validate().unwrap();
    }

    #[test]
    fn unknown_controller_variant_fails_to_parse() {
        let toml_str = r#"
[api]
base_url = "http://127.0.0.1:8080"
user_id = 1

[regulation]
setpoint_c = 31.0

[controller]
variant = "fuzzy"
"#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    // -- Validation: valid configs pass -----------------------------------

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn sample_period_boundaries_accepted() {
        let mut cfg = valid_config();
        cfg.regulation.sample_period_sec = 5;
        cfg.validate().unwrap();
        cfg.regulation.sample_period_sec = 30;
        cfg.validate().unwrap();
    }

    // -- API --------------------------------------------------------------

    #[test]
    fn empty_base_url_rejected() {
        let mut cfg = valid_config();
        cfg.api.base_url = "  ".into();
        assert_validation_err(&cfg, "base_url is empty");
    }

    #[test]
    fn base_url_without_scheme_rejected() {
        let mut cfg = valid_config();
        cfg.api.base_url = "212.47.71.180:8080".into();
        assert_validation_err(&cfg, "must start with http:// or https://");
    }

    #[test]
    fn zero_user_id_rejected() {
        let mut cfg = valid_config();
        cfg.api.user_id = 0;
        assert_validation_err(&cfg, "user_id must be positive");
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut cfg = valid_config();
        cfg.api.timeout_sec = 0;
        assert_validation_err(&cfg, "timeout_sec must be positive");
    }

    // -- Regulation ---------------------------------------------------------

    #[test]
    fn sample_period_below_range_rejected() {
        let mut cfg = valid_config();
        cfg.regulation.sample_period_sec = 4;
        assert_validation_err(&cfg, "sample_period_sec 4 out of range [5, 30]");
    }

    #[test]
    fn sample_period_above_range_rejected() {
        let mut cfg = valid_config();
        cfg.regulation.sample_period_sec = 31;
        assert_validation_err(&cfg, "sample_period_sec 31 out of range [5, 30]");
    }

    #[test]
    fn non_finite_setpoint_rejected() {
        let mut cfg = valid_config();
        cfg.regulation.setpoint_c = f64::NAN;
        assert_validation_err(&cfg, "setpoint_c must be finite");
    }

    #[test]
    fn empty_lamp_type_rejected() {
        let mut cfg = valid_config();
        cfg.regulation.lamp_type = "".into();
        assert_validation_err(&cfg, "lamp_type is empty");
    }

    // -- Controller ---------------------------------------------------------

    #[test]
    fn pi_zero_time_constant_rejected() {
        let mut cfg = valid_config();
        cfg.controller = ControllerConfig::Pi {
            time_constant: 0.0,
            dead_time: 64.0,
        };
        assert_validation_err(&cfg, "time_constant must be positive");
    }

    #[test]
    fn pi_negative_dead_time_rejected() {
        let mut cfg = valid_config();
        cfg.controller = ControllerConfig::Pi {
            time_constant: 750.0,
            dead_time: -1.0,
        };
        assert_validation_err(&cfg, "dead_time must be positive");
    }

    #[test]
    fn pid_negative_gain_rejected() {
        let mut cfg = valid_config();
        cfg.controller = ControllerConfig::Pid {
            kp: 0.1,
            ki: -0.2,
            kd: 0.0,
            nominal_dt_sec: 1.0,
        };
        assert_validation_err(&cfg, "ki must be non-negative");
    }

    #[test]
    fn pid_zero_dt_rejected() {
        let mut cfg = valid_config();
        cfg.controller = ControllerConfig::Pid {
            kp: 0.1,
            ki: 0.0,
            kd: 0.0,
            nominal_dt_sec: 0.0,
        };
        assert_validation_err(&cfg, "nominal_dt_sec must be positive");
    }

    // -- Hardware -----------------------------------------------------------

    #[test]
    fn relative_w1_root_rejected() {
        let mut cfg = valid_config();
        cfg.hardware.w1_root = PathBuf::from("devices");
        assert_validation_err(&cfg, "must be an absolute path");
    }

    #[test]
    fn dht_pin_outside_whitelist_rejected() {
        let mut cfg = valid_config();
        cfg.hardware
            .dht_devices
            .insert("0".into(), PathBuf::from("/sys/bus/iio/devices/iio:device0"));
        assert_validation_err(&cfg, "not a valid BCM GPIO pin");
    }

    #[test]
    fn dht_non_numeric_pin_rejected() {
        let mut cfg = valid_config();
        cfg.hardware
            .dht_devices
            .insert("t1".into(), PathBuf::from("/sys/bus/iio/devices/iio:device0"));
        assert_validation_err(&cfg, "is not a pin number");
    }

    #[test]
    fn dht_relative_path_rejected() {
        let mut cfg = valid_config();
        cfg.hardware
            .dht_devices
            .insert("17".into(), PathBuf::from("iio:device0"));
        assert_validation_err(&cfg, "must be absolute");
    }

    // -- Multiple errors reported at once ---------------------------------

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = valid_config();
        cfg.api.base_url = "".into();
        cfg.api.user_id = -4;
        cfg.regulation.sample_period_sec = 120;
        cfg.controller = ControllerConfig::Pi {
            time_constant: -750.0,
            dead_time: 0.0,
        };

        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        // Should report every violation, not bail after the first
        assert!(msg.contains("base_url is empty"), "missing url error in: {msg}");
        assert!(msg.contains("user_id"), "missing user_id error in: {msg}");
        assert!(
            msg.contains("sample_period_sec"),
            "missing period error in: {msg}"
        );
        assert!(
            msg.contains("time_constant"),
            "missing time_constant error in: {msg}"
        );
        assert!(msg.contains("dead_time"), "missing dead_time error in: {msg}");
    }
}

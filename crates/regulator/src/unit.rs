//! Terrarium unit assembly. Turns the remote roster and pin assignments into
//! regulated units: probes wired to their roles, a lamp on the pwm pin, one
//! control law and one hourly buffer per terrarium.

use std::path::Path;

use tracing::{info, warn};

use crate::api::{PinAssignment, Terrarium};
use crate::config::{Config, VALID_GPIO_PINS};
use crate::control::ControlLaw;
use crate::lamp::HeatLamp;
use crate::probe::{self, TempChannel};
use crate::sensor::SensorBank;
use crate::telemetry::HourlyBuffer;
use crate::trace::ControlTrace;

/// Role a pin row assigns. The service's `function` column carries either a
/// fixed role name or a one-wire sensor id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinFunction {
    Temperature1,
    Temperature2,
    Lamp,
    OneWire(String),
}

impl PinFunction {
    /// `None` for an unrecognized function string; the role is then left
    /// unset instead of failing the unit.
    pub fn parse(function: &str) -> Option<Self> {
        match function {
            "t1" => Some(Self::Temperature1),
            "t2" => Some(Self::Temperature2),
            "pwm" => Some(Self::Lamp),
            other if is_onewire_id(other) => Some(Self::OneWire(other.to_ascii_lowercase())),
            _ => None,
        }
    }
}

/// One-wire ids as the service stores them: the 12 hex digits after the
/// family code, e.g. `3ce1d4433914`.
fn is_onewire_id(s: &str) -> bool {
    s.len() == 12 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// One regulated terrarium: probes, lamp, control state, telemetry buffer.
/// Owned exclusively by the regulation loop; nothing else mutates it.
pub struct TerrariumUnit {
    pub id: i64,
    pub name: String,
    pub sensors: SensorBank,
    pub lamp: Option<HeatLamp>,
    pub law: ControlLaw,
    pub buffer: HourlyBuffer,
    pub trace: Option<ControlTrace>,
}

/// Build one unit per terrarium whose name matches the configured lamp type.
/// Wiring faults degrade the unit (role unwired, lamp absent) but never drop
/// it; an empty result just means nothing qualifies for regulation.
pub fn build_units(
    terrariums: &[Terrarium],
    pins: &[PinAssignment],
    config: &Config,
) -> Vec<TerrariumUnit> {
    terrariums
        .iter()
        .filter(|t| t.name.eq_ignore_ascii_case(&config.regulation.lamp_type))
        .map(|t| build_unit(t, pins, config))
        .collect()
}

fn build_unit(terrarium: &Terrarium, pins: &[PinAssignment], config: &Config) -> TerrariumUnit {
    let hw = &config.hardware;

    let mut t1_pin: Option<i64> = None;
    let mut t2_pin: Option<i64> = None;
    let mut lamp_pin: Option<i64> = None;
    let mut onewire_id: Option<String> = None;

    for pin in pins.iter().filter(|p| p.terrarium_id == terrarium.id) {
        let Some(function) = PinFunction::parse(&pin.function) else {
            warn!(
                terrarium_id = terrarium.id,
                pin = pin.id,
                function = %pin.function,
                "unrecognized pin function, role left unset"
            );
            continue;
        };
        match function {
            PinFunction::Temperature1 => assign(&mut t1_pin, pin.id, "t1", terrarium.id),
            PinFunction::Temperature2 => assign(&mut t2_pin, pin.id, "t2", terrarium.id),
            PinFunction::Lamp => assign(&mut lamp_pin, pin.id, "pwm", terrarium.id),
            PinFunction::OneWire(id) => {
                if onewire_id.is_some() {
                    warn!(
                        terrarium_id = terrarium.id,
                        pin = pin.id,
                        "duplicate one-wire assignment ignored"
                    );
                } else {
                    onewire_id = Some(id);
                }
            }
        }
    }

    let t1 = t1_pin.and_then(|pin| probe::dht_probe(TempChannel::T1, pin, hw));
    let t2 = t2_pin.and_then(|pin| probe::dht_probe(TempChannel::T2, pin, hw));
    let control = onewire_id.as_deref().and_then(|id| probe::onewire_probe(id, hw));
    let sensors = SensorBank::new(t1, t2, control);

    let lamp = lamp_pin.and_then(|pin| attach_lamp(pin, terrarium.id));
    let law = ControlLaw::from_config(&config.controller);
    let trace = config
        .trace
        .dir
        .as_deref()
        .and_then(|dir| start_trace(dir, terrarium.id, &law));

    info!(
        terrarium_id = terrarium.id,
        name = %terrarium.name,
        sensors = %sensors.summary(),
        lamp = lamp.is_some(),
        law = law.variant_name(),
        "terrarium unit ready"
    );

    TerrariumUnit {
        id: terrarium.id,
        name: terrarium.name.clone(),
        sensors,
        lamp,
        law,
        buffer: HourlyBuffer::default(),
        trace,
    }
}

/// First assignment wins; the service should not hand out duplicates, but a
/// stale row must not steal a role that is already wired.
fn assign(slot: &mut Option<i64>, pin: i64, role: &str, terrarium_id: i64) {
    if slot.is_some() {
        warn!(terrarium_id, role, pin, "duplicate pin assignment ignored");
    } else {
        *slot = Some(pin);
    }
}

fn attach_lamp(pin: i64, terrarium_id: i64) -> Option<HeatLamp> {
    if !VALID_GPIO_PINS.contains(&pin) {
        warn!(
            terrarium_id,
            pin, "pwm pin outside the usable GPIO range, lamp unavailable"
        );
        return None;
    }
    match HeatLamp::new(pin as u8) {
        Ok(lamp) => Some(lamp),
        Err(e) => {
            warn!(terrarium_id, pin, "failed to attach heat lamp: {e:#}");
            None
        }
    }
}

fn start_trace(dir: &Path, terrarium_id: i64, law: &ControlLaw) -> Option<ControlTrace> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(
            terrarium_id,
            dir = %dir.display(),
            "failed to create trace directory: {e}"
        );
        return None;
    }
    let path = dir.join(format!("terrarium-{terrarium_id}-{}.csv", law.variant_name()));
    match ControlTrace::create(&path, law) {
        Ok(trace) => {
            info!(terrarium_id, path = %path.display(), "control trace started");
            Some(trace)
        }
        Err(e) => {
            warn!(terrarium_id, "control trace unavailable: {e:#}");
            None
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- PinFunction ----------------------------------------------------------

    #[test]
    fn parse_known_functions() {
        assert_eq!(PinFunction::parse("t1"), Some(PinFunction::Temperature1));
        assert_eq!(PinFunction::parse("t2"), Some(PinFunction::Temperature2));
        assert_eq!(PinFunction::parse("pwm"), Some(PinFunction::Lamp));
        assert_eq!(
            PinFunction::parse("3ce1d4433914"),
            Some(PinFunction::OneWire("3ce1d4433914".to_string()))
        );
    }

    #[test]
    fn onewire_id_is_normalized_to_lowercase() {
        assert_eq!(
            PinFunction::parse("3CE1D4433914"),
            Some(PinFunction::OneWire("3ce1d4433914".to_string()))
        );
    }

    #[test]
    fn parse_rejects_unknown_functions() {
        assert_eq!(PinFunction::parse("t3"), None);
        assert_eq!(PinFunction::parse("heater"), None);
        assert_eq!(PinFunction::parse(""), None);
        // too short and too long to be a one-wire id
        assert_eq!(PinFunction::parse("3ce1"), None);
        assert_eq!(PinFunction::parse("3ce1d44339140f"), None);
        // right length, not hex
        assert_eq!(PinFunction::parse("3ce1d443391z"), None);
    }

    // -- Unit assembly (sim probes, mock lamp) ---------------------------------

    #[cfg(all(feature = "sim", not(feature = "gpio")))]
    mod assembly {
        use super::*;
        use crate::config::{
            ApiConfig, ControllerConfig, HardwareConfig, RegulationConfig, TraceConfig,
        };

        fn test_config() -> Config {
            Config {
                api: ApiConfig {
                    base_url: "http://127.0.0.1:8080".into(),
                    user_id: 1,
                    timeout_sec: 10,
                },
                regulation: RegulationConfig {
                    sample_period_sec: 5,
                    setpoint_c: 34.0,
                    lamp_type: "lampa".into(),
                },
                controller: ControllerConfig::Pi {
                    time_constant: 750.0,
                    dead_time: 64.0,
                },
                trace: TraceConfig::default(),
                hardware: HardwareConfig::default(),
            }
        }

        fn terrarium(id: i64, name: &str) -> Terrarium {
            Terrarium {
                id,
                name: name.to_string(),
            }
        }

        fn pin(id: i64, terrarium_id: i64, function: &str) -> PinAssignment {
            PinAssignment {
                id,
                terrarium_id,
                function: function.to_string(),
            }
        }

        #[test]
        fn roster_is_filtered_by_lamp_type() {
            let terrariums = [terrarium(1, "Lampa"), terrarium(2, "fogger")];
            let units = build_units(&terrariums, &[], &test_config());
            assert_eq!(units.len(), 1);
            assert_eq!(units[0].id, 1);
        }

        #[test]
        fn filter_is_case_insensitive() {
            let terrariums = [terrarium(1, "LAMPA")];
            let units = build_units(&terrariums, &[], &test_config());
            assert_eq!(units.len(), 1);
        }

        #[test]
        fn roles_are_wired_from_pin_assignments() {
            let terrariums = [terrarium(1, "lampa")];
            let pins = [
                pin(17, 1, "t1"),
                pin(27, 1, "t2"),
                pin(18, 1, "pwm"),
                pin(0, 1, "3ce1d4433914"),
            ];
            let units = build_units(&terrariums, &pins, &test_config());
            assert_eq!(units[0].sensors.summary(), "t1=sim t2=sim control=sim");
            assert!(units[0].lamp.is_some());
        }

        #[test]
        fn duplicate_roles_keep_the_first_assignment() {
            let terrariums = [terrarium(1, "lampa")];
            let pins = [pin(18, 1, "pwm"), pin(99, 1, "pwm")];
            let units = build_units(&terrariums, &pins, &test_config());
            // second pwm row (invalid pin 99) must not displace the first
            assert!(units[0].lamp.is_some());
        }

        #[test]
        fn pwm_pin_outside_gpio_range_leaves_lamp_unset() {
            let terrariums = [terrarium(1, "lampa")];
            let pins = [pin(99, 1, "pwm")];
            let units = build_units(&terrariums, &pins, &test_config());
            assert!(units[0].lamp.is_none());
        }

        #[test]
        fn unrecognized_function_leaves_roles_unset() {
            let terrariums = [terrarium(1, "lampa")];
            let pins = [pin(17, 1, "t3")];
            let units = build_units(&terrariums, &pins, &test_config());
            assert_eq!(units[0].sensors.summary(), "t1=- t2=- control=-");
            assert!(units[0].lamp.is_none());
        }

        #[test]
        fn pins_of_other_terrariums_are_ignored() {
            let terrariums = [terrarium(1, "lampa")];
            let pins = [pin(17, 2, "t1"), pin(18, 2, "pwm")];
            let units = build_units(&terrariums, &pins, &test_config());
            assert_eq!(units[0].sensors.summary(), "t1=- t2=- control=-");
            assert!(units[0].lamp.is_none());
        }

        #[test]
        fn trace_file_created_when_dir_configured() {
            let dir = std::env::temp_dir().join(format!("regulator-unit-{}", std::process::id()));
            std::fs::create_dir_all(&dir).unwrap();

            let mut config = test_config();
            config.trace.dir = Some(dir.clone());
            let terrariums = [terrarium(4, "lampa")];
            let units = build_units(&terrariums, &[], &config);

            assert!(units[0].trace.is_some());
            assert!(dir.join("terrarium-4-pi.csv").exists());

            std::fs::remove_dir_all(&dir).ok();
        }

        #[test]
        fn missing_trace_dir_is_created() {
            // A fresh deployment configures a dir that does not exist yet.
            let root = std::env::temp_dir().join(format!("regulator-unit-fresh-{}", std::process::id()));
            let dir = root.join("traces");
            std::fs::remove_dir_all(&root).ok();
            assert!(!dir.exists());

            let mut config = test_config();
            config.trace.dir = Some(dir.clone());
            let terrariums = [terrarium(5, "lampa")];
            let units = build_units(&terrariums, &[], &config);

            assert!(units[0].trace.is_some());
            assert!(dir.join("terrarium-5-pi.csv").exists());

            std::fs::remove_dir_all(&root).ok();
        }
    }
}

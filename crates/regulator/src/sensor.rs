//! Per-terrarium sensor bank. Reads every wired probe once per cycle and
//! normalizes faults into absent readings so the loop never stops on a bad
//! sensor.

use tracing::warn;

use crate::probe::{Probe, ProbeSample};

/// One cycle of readings for a terrarium. `None` marks a channel that is
/// unwired or faulted this cycle; an absent value never reaches a mean or
/// a control computation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CycleReadings {
    pub temperature_1: Option<f32>,
    pub temperature_2: Option<f32>,
    pub humidity: Option<f32>,
    /// Temperature the control law regulates on.
    pub control_temperature: Option<f32>,
}

/// The probes wired to one terrarium. Any subset may be present.
#[derive(Default)]
pub struct SensorBank {
    t1: Option<Probe>,
    t2: Option<Probe>,
    control: Option<Probe>,
}

impl SensorBank {
    pub fn new(t1: Option<Probe>, t2: Option<Probe>, control: Option<Probe>) -> Self {
        Self { t1, t2, control }
    }

    /// Wiring summary for startup logs, like `t1=sim t2=sim control=-`.
    pub fn summary(&self) -> String {
        let kind = |p: &Option<Probe>| p.as_ref().map_or("-", Probe::kind);
        format!(
            "t1={} t2={} control={}",
            kind(&self.t1),
            kind(&self.t2),
            kind(&self.control)
        )
    }

    /// Read every wired probe once. A fault in one probe never suppresses
    /// the others; it is logged and its channels come back as `None`.
    pub fn read_all(&mut self, terrarium_id: i64) -> CycleReadings {
        let s1 = read_probe(self.t1.as_mut(), "t1", terrarium_id);
        let s2 = read_probe(self.t2.as_mut(), "t2", terrarium_id);

        let temperature_1 = s1.and_then(|s| s.temperature);
        let temperature_2 = s2.and_then(|s| s.temperature);
        // Humidity is one independent quantity per unit: the t2 channel's
        // when it reads, else t1's.
        let humidity = s2
            .and_then(|s| s.humidity)
            .or_else(|| s1.and_then(|s| s.humidity));

        // Regulation prefers the dedicated one-wire probe when one is wired;
        // otherwise the t1 channel doubles as the control input.
        let control_temperature = if self.control.is_some() {
            read_probe(self.control.as_mut(), "control", terrarium_id)
                .and_then(|s| s.temperature)
        } else {
            temperature_1
        };

        CycleReadings {
            temperature_1,
            temperature_2,
            humidity,
            control_temperature,
        }
    }
}

fn read_probe(probe: Option<&mut Probe>, role: &str, terrarium_id: i64) -> Option<ProbeSample> {
    let probe = probe?;
    match probe.read() {
        Ok(sample) => Some(sample),
        Err(e) => {
            warn!(
                terrarium_id,
                role,
                kind = probe.kind(),
                "sensor read failed: {e:#}"
            );
            None
        }
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::probe::SimProbe;

    fn steady(t: f32, h: Option<f32>) -> Option<Probe> {
        Some(Probe::Sim(SimProbe::steady(t, h)))
    }

    fn offline() -> Option<Probe> {
        Some(Probe::Sim(SimProbe::offline()))
    }

    #[test]
    fn full_bank_reads_every_channel() {
        let mut bank = SensorBank::new(
            steady(28.25, Some(61.0)),
            steady(24.5, Some(55.5)),
            steady(30.125, None),
        );
        let r = bank.read_all(1);
        assert_eq!(r.temperature_1, Some(28.25));
        assert_eq!(r.temperature_2, Some(24.5));
        assert_eq!(r.humidity, Some(55.5));
        assert_eq!(r.control_temperature, Some(30.125));
    }

    #[test]
    fn humidity_prefers_t2() {
        let mut bank = SensorBank::new(steady(28.0, Some(60.0)), steady(25.0, Some(55.0)), None);
        assert_eq!(bank.read_all(1).humidity, Some(55.0));
    }

    #[test]
    fn humidity_falls_back_to_t1_when_t2_has_none() {
        // Humidity-less t2 sample: t1's channel still reports.
        let mut bank = SensorBank::new(steady(28.0, Some(60.0)), steady(25.0, None), None);
        assert_eq!(bank.read_all(1).humidity, Some(60.0));

        // No t2 probe at all.
        let mut bank = SensorBank::new(steady(28.0, Some(60.0)), None, None);
        assert_eq!(bank.read_all(1).humidity, Some(60.0));
    }

    #[test]
    fn control_falls_back_to_t1_when_unwired() {
        let mut bank = SensorBank::new(steady(27.5, None), None, None);
        let r = bank.read_all(1);
        assert_eq!(r.control_temperature, Some(27.5));
    }

    #[test]
    fn wired_control_probe_fault_does_not_fall_back() {
        let mut bank = SensorBank::new(steady(27.5, None), None, offline());
        let r = bank.read_all(1);
        assert_eq!(r.temperature_1, Some(27.5));
        assert_eq!(r.control_temperature, None);
    }

    #[test]
    fn fault_in_one_probe_does_not_suppress_others() {
        let mut bank = SensorBank::new(offline(), steady(25.0, Some(50.0)), None);
        let r = bank.read_all(1);
        assert_eq!(r.temperature_1, None);
        assert_eq!(r.temperature_2, Some(25.0));
        assert_eq!(r.humidity, Some(50.0));
        assert_eq!(r.control_temperature, None);
    }

    #[test]
    fn empty_bank_reads_all_none() {
        let mut bank = SensorBank::default();
        assert_eq!(bank.read_all(1), CycleReadings::default());
    }

    #[test]
    fn summary_lists_wired_probes() {
        let bank = SensorBank::new(steady(28.0, None), None, None);
        assert_eq!(bank.summary(), "t1=sim t2=- control=-");
    }
}

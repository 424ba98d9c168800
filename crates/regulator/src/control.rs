//! PI / PID control law engine.
//!
//! One engine, two variants selected by configuration: a PI law whose gains
//! are derived once from the process step-response constants (T, L), and a
//! PID law driven by direct gains with a fixed nominal dt.  Both saturate
//! their output to the actuator range and keep integrating while saturated
//! (no anti-windup — the field tuning assumes it).

use std::time::Instant;

use crate::config::ControllerConfig;

/// Lower bound of the control output (percent of full heating demand).
pub const OUTPUT_MIN: f64 = 0.0;
/// Upper bound of the control output.
pub const OUTPUT_MAX: f64 = 100.0;

// ---------------------------------------------------------------------------
// Computed output
// ---------------------------------------------------------------------------

/// One control computation: the saturated output plus the raw components
/// that feed the trace file and debug logs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlOutput {
    /// Heating demand in `[OUTPUT_MIN, OUTPUT_MAX]`.
    pub output: f64,
    /// setpoint − measured, in the same unit as the measurement.
    pub error: f64,
    /// Proportional component (unclamped).
    pub p: f64,
    /// Integral component (unclamped).
    pub i: f64,
    /// Derivative component; `None` for the PI variant.
    pub d: Option<f64>,
}

impl ControlOutput {
    fn from_components(error: f64, p: f64, i: f64, d: Option<f64>) -> Self {
        let raw = p + i + d.unwrap_or(0.0);
        Self {
            output: raw.clamp(OUTPUT_MIN, OUTPUT_MAX),
            error,
            p,
            i,
            d,
        }
    }
}

// ---------------------------------------------------------------------------
// PI variant (gains derived from process identification)
// ---------------------------------------------------------------------------

/// PI law with Ziegler–Nichols open-loop tuning: `Kp = 0.9·T/L`,
/// `Ti = L/0.3`, where T is the process time constant and L the dead time,
/// both in seconds.  dt is measured wall-clock between computes.
#[derive(Debug)]
pub struct PiLaw {
    kp: f64,
    ti: f64,
    integral: f64,
    previous_sample: Option<Instant>,
}

impl PiLaw {
    pub fn from_process(time_constant: f64, dead_time: f64) -> Self {
        Self {
            kp: 0.9 * time_constant / dead_time,
            ti: dead_time / 0.3,
            integral: 0.0,
            previous_sample: None,
        }
    }

    /// The first compute after startup sees dt = 0, so the integral stays
    /// untouched and the output is purely proportional.  The previous-sample
    /// timestamp advances on every compute, saturated or not.
    fn compute(&mut self, setpoint: f64, measured: f64, now: Instant) -> ControlOutput {
        let error = setpoint - measured;
        let dt = self
            .previous_sample
            .map(|prev| now.duration_since(prev).as_secs_f64())
            .unwrap_or(0.0);

        self.integral += error * dt;
        self.previous_sample = Some(now);

        let p = self.kp * error;
        let i = (self.kp / self.ti) * self.integral;

        ControlOutput::from_components(error, p, i, None)
    }
}

// ---------------------------------------------------------------------------
// PID variant (direct gains, fixed nominal dt)
// ---------------------------------------------------------------------------

/// PID law with operator-supplied gains.  dt is the *nominal* sample period,
/// not measured time: the integral and derivative assume the loop runs on
/// schedule.  Derivative acts on the error.
#[derive(Debug)]
pub struct PidLaw {
    kp: f64,
    ki: f64,
    kd: f64,
    dt: f64,
    integral: f64,
    previous_error: f64,
}

impl PidLaw {
    pub fn new(kp: f64, ki: f64, kd: f64, nominal_dt: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            dt: nominal_dt,
            integral: 0.0,
            previous_error: 0.0,
        }
    }

    /// `previous_error` advances on every compute, saturated or not.
    fn compute(&mut self, setpoint: f64, measured: f64) -> ControlOutput {
        let error = setpoint - measured;

        self.integral += error * self.dt;
        let derivative = (error - self.previous_error) / self.dt;
        self.previous_error = error;

        let p = self.kp * error;
        let i = self.ki * self.integral;
        let d = self.kd * derivative;

        ControlOutput::from_components(error, p, i, Some(d))
    }
}

// ---------------------------------------------------------------------------
// Variant dispatch
// ---------------------------------------------------------------------------

/// Control law state for one terrarium.  Created once at startup from the
/// controller config and never reset while the process lives.
#[derive(Debug)]
pub enum ControlLaw {
    Pi(PiLaw),
    Pid(PidLaw),
}

impl ControlLaw {
    pub fn from_config(cfg: &ControllerConfig) -> Self {
        match *cfg {
            ControllerConfig::Pi {
                time_constant,
                dead_time,
            } => Self::Pi(PiLaw::from_process(time_constant, dead_time)),
            ControllerConfig::Pid {
                kp,
                ki,
                kd,
                nominal_dt_sec,
            } => Self::Pid(PidLaw::new(kp, ki, kd, nominal_dt_sec)),
        }
    }

    /// Run one control step against the measured temperature.  `now` feeds
    /// the PI variant's wall-clock dt; the PID variant ignores it.
    pub fn compute(&mut self, setpoint: f64, measured: f64, now: Instant) -> ControlOutput {
        match self {
            Self::Pi(law) => law.compute(setpoint, measured, now),
            Self::Pid(law) => law.compute(setpoint, measured),
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Pi(_) => "pi",
            Self::Pid(_) => "pid",
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

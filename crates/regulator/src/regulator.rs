//! Regulation loop: the single mutator of every terrarium unit's state.
//!
//! One task iterates over all managed units at a fixed period; sensor reads
//! and HTTP pushes run inline on the same task, so a slow collaborator
//! delays the next cycle's actuation rather than racing it.  Shutdown is
//! cooperative: the interrupt is observed between cycles and in-flight work
//! completes naturally.
//!
//! ## Lifecycle
//!
//! ```text
//! Initializing ──▶ Running ──[interrupt]──▶ ShuttingDown ──▶ Stopped
//! ```
//!
//! Transitions are strictly forward.  An interrupt before the first cycle
//! still passes through ShuttingDown so every acquired lamp is released.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate, Timelike};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::config::Config;
use crate::lamp;
use crate::sensor::CycleReadings;
use crate::telemetry::HourlyRecord;
use crate::unit::{build_units, TerrariumUnit};

/// Where the loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
}

pub struct Regulator {
    api: ApiClient,
    config: Config,
    units: Vec<TerrariumUnit>,
    state: LoopState,
    /// Loop start, origin of the trace file's elapsed-time column.
    started: Instant,
    /// Hour the last flush ran in; `None` until the first cycle sets the
    /// baseline, so startup never counts as a rollover.
    last_hour: Option<u32>,
}

impl Regulator {
    pub fn new(api: ApiClient, config: Config) -> Self {
        Self {
            api,
            config,
            units: Vec::new(),
            state: LoopState::Initializing,
            started: Instant::now(),
            last_hour: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Resolve the roster and pin assignments and build the managed units.
    /// A failed fetch degrades to an empty roster: the loop still runs, it
    /// just regulates nothing until the next restart.
    async fn initialize(&mut self) {
        let user_id = self.config.api.user_id;

        let terrariums = match self.api.fetch_terrariums(user_id).await {
            Ok(list) => list,
            Err(e) => {
                warn!(user_id, "terrarium roster fetch failed: {e:#}");
                Vec::new()
            }
        };
        let pins = match self.api.fetch_pins(user_id).await {
            Ok(list) => list,
            Err(e) => {
                warn!(user_id, "pin assignment fetch failed: {e:#}");
                Vec::new()
            }
        };

        self.units = build_units(&terrariums, &pins, &self.config);
        if self.units.is_empty() {
            warn!(
                lamp_type = %self.config.regulation.lamp_type,
                "no terrarium qualifies for regulation"
            );
        }

        self.state = LoopState::Running;
        // The trace clock starts with regulation, not with the roster fetch:
        // a slow or timed-out fetch must not offset every elapsed-time row.
        self.started = Instant::now();
        info!(
            units = self.units.len(),
            period_sec = self.config.regulation.sample_period_sec,
            setpoint_c = self.config.regulation.setpoint_c,
            "regulation loop running"
        );
    }

    /// Run until `shutdown` resolves.  Intended to be awaited from main with
    /// a ctrl-c future; tests pass a ready future to drive the loop straight
    /// through teardown.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        if self.state == LoopState::Initializing {
            self.initialize().await;
        }

        let period = Duration::from_secs(self.config.regulation.sample_period_sec);
        let mut ticker = tokio::time::interval(period);
        // A cycle that overruns the period postpones the next tick instead
        // of bursting to catch up; the control law sees the real dt either way.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);
        while self.state == LoopState::Running {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("interrupt received, shutting down");
                    self.state = LoopState::ShuttingDown;
                }
                _ = ticker.tick() => {
                    let wall = Local::now();
                    self.cycle(Instant::now(), wall.date_naive(), wall.hour()).await;
                }
            }
        }

        self.release_lamps();
        self.state = LoopState::Stopped;
        info!("regulation loop stopped");
    }

    /// One cycle over every managed unit, then the shared hour-rollover
    /// check.  `now` is monotonic (feeds the PI dt and the trace clock);
    /// `date`/`hour` are wall-clock and stamp the hourly record.
    async fn cycle(&mut self, now: Instant, date: NaiveDate, hour: u32) {
        let setpoint = self.config.regulation.setpoint_c;
        let elapsed = now.duration_since(self.started);

        for unit in &mut self.units {
            let readings = regulate(unit, setpoint, now, elapsed);
            unit.buffer.record(&readings);
            self.api.push_current(unit.id, &readings).await;
        }

        // One wall-clock transition flushes every unit on the same boundary.
        if self.last_hour.is_some() && self.last_hour != Some(hour) {
            self.flush_hourly(date, hour).await;
        }
        self.last_hour = Some(hour);
    }

    /// Aggregate and push each unit's buffer, then clear it unconditionally:
    /// a rejected push must not leak this hour's samples into the next.
    async fn flush_hourly(&mut self, date: NaiveDate, hour: u32) {
        for unit in &mut self.units {
            match unit.buffer.aggregate() {
                Some(agg) => {
                    let record = HourlyRecord::new(date, hour, unit.id, agg);
                    let outcome = self.api.push_hourly(&record).await;
                    info!(
                        terrarium_id = unit.id,
                        hour,
                        samples = unit.buffer.len(),
                        ?outcome,
                        "hourly aggregate flushed"
                    );
                }
                None => debug!(terrarium_id = unit.id, hour, "empty hour, nothing to push"),
            }
            unit.buffer.clear();
        }
    }

    fn release_lamps(&mut self) {
        for unit in &mut self.units {
            if let Some(lamp) = unit.lamp.as_mut() {
                lamp.release();
            }
        }
    }
}

/// Read one unit's sensors and, when the control temperature is valid, run
/// the law and drive the lamp.  An invalid reading skips control entirely:
/// the law's state stays untouched and the lamp holds its last duty.
fn regulate(
    unit: &mut TerrariumUnit,
    setpoint: f64,
    now: Instant,
    elapsed: Duration,
) -> CycleReadings {
    let readings = unit.sensors.read_all(unit.id);

    let Some(measured) = readings.control_temperature else {
        warn!(
            terrarium_id = unit.id,
            "no control temperature this cycle, lamp holds last duty"
        );
        return readings;
    };

    let out = unit.law.compute(setpoint, f64::from(measured), now);
    let duty = lamp::duty_for_output(out.output);
    debug!(
        terrarium_id = unit.id,
        measured,
        error = out.error,
        output = out.output,
        duty,
        "control computed"
    );

    if let Some(lamp) = unit.lamp.as_mut() {
        lamp.apply_duty(duty);
    }
    if let Some(trace) = unit.trace.as_mut() {
        if let Err(e) = trace.append(elapsed.as_secs_f64(), f64::from(measured), &out) {
            warn!(terrarium_id = unit.id, "trace write failed: {e:#}");
        }
    }

    readings
}

// ===========================================================================
// Tests
// ===========================================================================

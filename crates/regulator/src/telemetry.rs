//! Hourly telemetry aggregation. Every cycle's readings are buffered, valid
//! or not, and on an hour boundary each field is averaged over its valid
//! entries and packaged for the readings-history endpoint.

use chrono::NaiveDate;
use serde::Serialize;

use crate::sensor::CycleReadings;

/// One buffered cycle entry. Only the reported quantities are kept; the
/// control input is not telemetry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub temperature_1: Option<f32>,
    pub temperature_2: Option<f32>,
    pub humidity: Option<f32>,
}

impl From<&CycleReadings> for Sample {
    fn from(r: &CycleReadings) -> Self {
        Self {
            temperature_1: r.temperature_1,
            temperature_2: r.temperature_2,
            humidity: r.humidity,
        }
    }
}

/// Per-field means over the valid subset of one hour of samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub temperature_1: f32,
    pub temperature_2: f32,
    pub humidity: f32,
}

/// One terrarium's samples for the hour in progress.
#[derive(Debug, Default)]
pub struct HourlyBuffer {
    samples: Vec<Sample>,
}

impl HourlyBuffer {
    /// Append one cycle's readings, including entries where some or all
    /// fields are invalid.
    pub fn record(&mut self, readings: &CycleReadings) {
        self.samples.push(Sample::from(readings));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean of each field over its valid entries. `None` when nothing was
    /// buffered at all; a field with zero valid entries averages to 0, which
    /// is what the reporting service expects for a silent channel.
    pub fn aggregate(&self) -> Option<Aggregate> {
        if self.samples.is_empty() {
            return None;
        }
        Some(Aggregate {
            temperature_1: mean_of_valid(self.samples.iter().map(|s| s.temperature_1)),
            temperature_2: mean_of_valid(self.samples.iter().map(|s| s.temperature_2)),
            humidity: mean_of_valid(self.samples.iter().map(|s| s.humidity)),
        })
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

fn mean_of_valid(values: impl Iterator<Item = Option<f32>>) -> f32 {
    let mut sum = 0.0_f32;
    let mut n = 0_u32;
    for v in values.flatten() {
        sum += v;
        n += 1;
    }
    if n == 0 {
        0.0
    } else {
        sum / n as f32
    }
}

/// Wire shape of one hourly record for the readings-history endpoint.
#[derive(Debug, Serialize, PartialEq)]
pub struct HourlyRecord {
    pub date: NaiveDate,
    pub temperature_1: f32,
    pub temperature_2: f32,
    pub humidity: f32,
    pub terrarium_id: i64,
    pub hour: u32,
}

impl HourlyRecord {
    pub fn new(date: NaiveDate, hour: u32, terrarium_id: i64, agg: Aggregate) -> Self {
        Self {
            date,
            temperature_1: agg.temperature_1,
            temperature_2: agg.temperature_2,
            humidity: agg.humidity,
            terrarium_id,
            hour,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

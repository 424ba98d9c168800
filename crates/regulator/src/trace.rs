//! Per-unit control trace: a CSV file with one row per computed control
//! cycle, written for tuning runs and step-response plots. The header
//! depends on the control-law variant; rows are flushed as they are
//! appended so an interrupted run still leaves a usable file.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use csv::Writer;

use crate::control::{ControlLaw, ControlOutput};

const PI_HEADER: [&str; 6] = [
    "Time (s)",
    "Temperature (°C)",
    "Error",
    "PI Output",
    "P Component",
    "I Component",
];

const PID_HEADER: [&str; 7] = [
    "Time (s)",
    "Temperature (°C)",
    "Error",
    "PID Output",
    "P Component",
    "I Component",
    "D Component",
];

pub struct ControlTrace {
    writer: Writer<File>,
    path: PathBuf,
    with_derivative: bool,
}

impl ControlTrace {
    /// Create the trace file, truncating any previous run, and write the
    /// header row for this law variant.
    pub fn create(path: &Path, law: &ControlLaw) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create trace file {}", path.display()))?;
        let mut writer = Writer::from_writer(file);
        let with_derivative = matches!(law, ControlLaw::Pid(_));
        if with_derivative {
            writer.write_record(PID_HEADER)?;
        } else {
            writer.write_record(PI_HEADER)?;
        }
        writer
            .flush()
            .with_context(|| format!("failed to write trace header to {}", path.display()))?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            with_derivative,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one computed cycle.
    pub fn append(
        &mut self,
        elapsed_secs: f64,
        temperature: f64,
        out: &ControlOutput,
    ) -> Result<()> {
        let mut row = vec![
            elapsed_secs.to_string(),
            temperature.to_string(),
            out.error.to_string(),
            out.output.to_string(),
            out.p.to_string(),
            out.i.to_string(),
        ];
        if self.with_derivative {
            row.push(out.d.unwrap_or(0.0).to_string());
        }
        self.writer
            .write_record(&row)
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        self.writer
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

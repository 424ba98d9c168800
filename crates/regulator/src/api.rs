//! Client for the terrarium service. Fetches the terrarium roster and pin
//! assignments at startup and pushes readings back while regulating.
//!
//! Pushes are best effort: a failure is logged and surfaced as an outcome,
//! never as an error, so reporting can never disturb the control path.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::sensor::CycleReadings;
use crate::telemetry::HourlyRecord;

/// One terrarium row from the roster endpoint. The service has shipped this
/// field as both `name` and `type`; accept either.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Terrarium {
    pub id: i64,
    #[serde(alias = "type")]
    pub name: String,
}

/// One pin row: which physical pin serves which function for a terrarium.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PinAssignment {
    pub id: i64,
    pub terrarium_id: i64,
    pub function: String,
}

/// Result of a best-effort push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Sent,
    Failed,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn roster_url(&self, user_id: i64) -> String {
        format!("{}/terrariums/user/id/{user_id}", self.base_url)
    }

    fn pins_url(&self, user_id: i64) -> String {
        format!("{}/pins/pins/{user_id}", self.base_url)
    }

    fn update_url(&self, terrarium_id: i64) -> String {
        format!("{}/terrariums/update/{terrarium_id}", self.base_url)
    }

    fn readings_url(&self) -> String {
        format!("{}/readings", self.base_url)
    }

    /// Terrariums owned by the configured user.
    pub async fn fetch_terrariums(&self, user_id: i64) -> Result<Vec<Terrarium>> {
        let url = self.roster_url(user_id);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?
            .error_for_status()
            .with_context(|| format!("GET {url} returned an error status"))?;
        resp.json().await.context("invalid terrarium roster payload")
    }

    /// Pin/function assignments for the configured user, across all of
    /// their terrariums.
    pub async fn fetch_pins(&self, user_id: i64) -> Result<Vec<PinAssignment>> {
        let url = self.pins_url(user_id);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?
            .error_for_status()
            .with_context(|| format!("GET {url} returned an error status"))?;
        resp.json().await.context("invalid pin assignment payload")
    }

    /// Update a terrarium's current readings. Missing values are sent as the
    /// zero sentinel the service expects, not omitted.
    pub async fn push_current(
        &self,
        terrarium_id: i64,
        readings: &CycleReadings,
    ) -> ReportOutcome {
        let url = self.update_url(terrarium_id);
        let query = [
            ("current_temperature1", sentinel(readings.temperature_1)),
            ("current_temperature2", sentinel(readings.temperature_2)),
            ("current_hum", sentinel(readings.humidity)),
        ];
        match self.http.put(&url).query(&query).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => {
                debug!(terrarium_id, "current readings updated");
                ReportOutcome::Sent
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(terrarium_id, %status, body, "current readings push rejected");
                ReportOutcome::Failed
            }
            Err(e) => {
                warn!(terrarium_id, "current readings push failed: {e}");
                ReportOutcome::Failed
            }
        }
    }

    /// Store one hourly aggregate in the readings history.
    pub async fn push_hourly(&self, record: &HourlyRecord) -> ReportOutcome {
        let url = self.readings_url();
        match self.http.post(&url).json(record).send().await {
            Ok(resp)
                if resp.status() == StatusCode::OK || resp.status() == StatusCode::CREATED =>
            {
                debug!(
                    terrarium_id = record.terrarium_id,
                    hour = record.hour,
                    "hourly record stored"
                );
                ReportOutcome::Sent
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(
                    terrarium_id = record.terrarium_id,
                    %status,
                    body,
                    "hourly record push rejected"
                );
                ReportOutcome::Failed
            }
            Err(e) => {
                warn!(
                    terrarium_id = record.terrarium_id,
                    "hourly record push failed: {e}"
                );
                ReportOutcome::Failed
            }
        }
    }
}

fn sentinel(value: Option<f32>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "0".to_string(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

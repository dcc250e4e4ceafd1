//! Import of rows from the spreadsheet behind the external price form into
//! the `pending_submissions` queue.

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

use super::ServiceError;
use crate::config::{BackendConfig, SyncConfig};
use crate::domain::{parse_price_value, NewSubmission, StationKey, SubmissionQueue};
use crate::store::PriceStore;

const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// One form response as the sheet endpoint serves it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormRow {
    #[serde(rename = "Timestamp", default)]
    pub timestamp: Option<String>,
    #[serde(rename = "Station Name", default)]
    pub station_name: Option<String>,
    #[serde(rename = "Location", default)]
    pub location: Option<String>,
    #[serde(rename = "Petrol Price", default)]
    pub petrol_price: Option<serde_json::Value>,
    #[serde(rename = "Diesel Price", default)]
    pub diesel_price: Option<serde_json::Value>,
    #[serde(rename = "Kerosene Price", default)]
    pub kerosene_price: Option<serde_json::Value>,
    #[serde(rename = "Email", default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub fetched: usize,
    pub inserted: usize,
    pub skipped: usize,
}

/// `dd/mm/yyyy HH:MM:SS`, read as UTC
pub fn parse_form_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Zero and non-numeric prices count as not reported
fn form_price(value: &Option<serde_json::Value>) -> Option<f64> {
    value.as_ref().and_then(parse_price_value).filter(|p| *p != 0.0)
}

fn text(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

/// Rows newer than `after` become pending submissions; the rest are skipped
pub fn select_new_rows(rows: &[FormRow], after: Option<DateTime<Utc>>) -> (Vec<NewSubmission>, usize) {
    let mut fresh = Vec::new();
    let mut skipped = 0;
    for row in rows {
        let Some(at) = row.timestamp.as_deref().and_then(parse_form_timestamp) else {
            skipped += 1;
            continue;
        };
        if after.is_some_and(|mark| at <= mark) {
            skipped += 1;
            continue;
        }
        fresh.push(NewSubmission::pending(
            StationKey::new(text(&row.station_name), text(&row.location)),
            [
                form_price(&row.petrol_price),
                form_price(&row.diesel_price),
                form_price(&row.kerosene_price),
            ],
            row.email.clone(),
            at,
        ));
    }
    (fresh, skipped)
}

pub struct FormSync {
    store: Arc<dyn PriceStore>,
    client: ClientWithMiddleware,
    source_url: String,
}

impl FormSync {
    pub fn new(store: Arc<dyn PriceStore>, sync: &SyncConfig, backend: &BackendConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("naija-fuel-tracker/0.1"));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(backend.http_timeout_seconds))
            .default_headers(headers)
            .build()
            .context("building form sync client")?;
        let policy = ExponentialBackoff::builder().build_with_max_retries(backend.read_retries);
        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(policy))
            .build();
        Ok(Self {
            store,
            client,
            source_url: sync.source_url.clone(),
        })
    }

    async fn fetch_rows(&self) -> Result<Vec<FormRow>, ServiceError> {
        if self.source_url.trim().is_empty() {
            return Err(ServiceError::Unavailable("form sync source is not configured".to_string()));
        }
        let resp = self
            .client
            .get(&self.source_url)
            .send()
            .await
            .map_err(|e| ServiceError::Unavailable(format!("form sheet GET failed: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ServiceError::Unavailable(format!("form sheet read failed: {e}")))?;
        if !status.is_success() {
            return Err(ServiceError::Unavailable(format!("form sheet error: HTTP {status}")));
        }
        serde_json::from_str(&body).map_err(|e| ServiceError::Internal(format!("form sheet JSON parse failed: {e}")))
    }

    pub async fn run(&self) -> Result<SyncReport, ServiceError> {
        let queue = SubmissionQueue::PendingSubmissions;
        let mark = self.store.latest_submitted_at(queue).await?;
        let rows = self.fetch_rows().await?;
        let (fresh, skipped) = select_new_rows(&rows, mark);
        debug!(fetched = rows.len(), fresh = fresh.len(), ?mark, "form rows fetched");

        let inserted = if fresh.is_empty() {
            0
        } else {
            self.store.insert_submissions(queue, fresh).await?.len()
        };
        let report = SyncReport {
            fetched: rows.len(),
            inserted,
            skipped,
        };
        info!(
            fetched = report.fetched,
            inserted = report.inserted,
            skipped = report.skipped,
            "form sync finished"
        );
        Ok(report)
    }
}

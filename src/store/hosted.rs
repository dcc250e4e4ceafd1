use anyhow::Context;
use itertools::Itertools;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{transition_error, ChangeFeed, PriceStore, StoreError};
use crate::config::BackendConfig;
use crate::domain::{
    ApprovalOutcome, ChangeKind, FuelType, NewPriceRecord, NewSubmission, PendingSubmission, PriceChange,
    PriceRecord, Profile, StationKey, SubmissionQueue, SubmissionStatus,
};

const RETURN_REPRESENTATION: &str = "return=representation";

/// Tables served by the backend's PostgREST endpoint at `{url}/rest/v1`.
///
/// Reads go through a retrying client. Writes are sent once: a retried
/// insert that had already landed would duplicate rows.
#[derive(Clone)]
pub struct HostedStore {
    rest_url: String,
    reads: ClientWithMiddleware,
    writes: reqwest::Client,
    feed: ChangeFeed,
}

/// Price row as the hosted tables store it; the station id is recomputed on read
#[derive(Serialize)]
struct PriceRow<'a> {
    station_name: &'a str,
    station_location: &'a str,
    price: Option<f64>,
    tags: &'a [String],
    last_updated: DateTime<Utc>,
    effective_date: Option<NaiveDate>,
}

impl<'a> From<&'a NewPriceRecord> for PriceRow<'a> {
    fn from(r: &'a NewPriceRecord) -> Self {
        Self {
            station_name: &r.station_name,
            station_location: &r.station_location,
            price: r.price,
            tags: &r.tags,
            last_updated: r.last_updated,
            effective_date: r.effective_date,
        }
    }
}

#[derive(Serialize)]
struct ProfileRow<'a> {
    id: Uuid,
    first_name: &'a str,
    last_name: &'a str,
    email: &'a str,
}

pub(crate) fn backend_headers(anon_key: &str) -> anyhow::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static("naija-fuel-tracker/0.1"));
    headers.insert(
        HeaderName::from_static("apikey"),
        HeaderValue::from_str(anon_key).context("backend API key is not a valid header value")?,
    );
    Ok(headers)
}

/// Pull a human-readable message out of a backend error body
pub(crate) fn backend_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

fn station_filter(key: &StationKey) -> [(&'static str, String); 2] {
    [
        ("station_name", eq(&key.station_name)),
        ("station_location", eq(&key.station_location)),
    ]
}

impl HostedStore {
    pub fn new(cfg: &BackendConfig) -> anyhow::Result<Self> {
        let headers = backend_headers(&cfg.anon_key)?;
        let timeout = Duration::from_secs(cfg.http_timeout_seconds);
        let mut write_headers = headers.clone();
        write_headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", cfg.anon_key))
                .context("backend API key is not a valid header value")?,
        );

        let plain = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(write_headers)
            .build()?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(cfg.read_retries);
        let reads = ClientBuilder::new(plain.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            rest_url: format!("{}/rest/v1", cfg.url.trim_end_matches('/')),
            reads,
            writes: plain,
            feed: ChangeFeed::default(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.rest_url, table)
    }

    async fn get<T: DeserializeOwned>(&self, table: &str, query: &[(&str, String)]) -> Result<Vec<T>, StoreError> {
        let resp = self
            .reads
            .get(self.table_url(table))
            .query(query)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        decode(resp).await
    }

    async fn write<T: DeserializeOwned>(
        &self,
        method: Method,
        table: &str,
        query: &[(&str, String)],
        body: Option<Vec<u8>>,
    ) -> Result<Vec<T>, StoreError> {
        let mut req = self
            .writes
            .request(method, self.table_url(table))
            .query(query)
            .header("Prefer", RETURN_REPRESENTATION);
        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").body(body);
        }
        let resp = req.send().await.map_err(|e| StoreError::Transport(e.to_string()))?;
        decode(resp).await
    }

    async fn insert_rows<B: Serialize, T: DeserializeOwned>(
        &self,
        table: &str,
        rows: &B,
    ) -> Result<Vec<T>, StoreError> {
        let body = serde_json::to_vec(rows).map_err(|e| StoreError::Decode(e.to_string()))?;
        self.write(Method::POST, table, &[], Some(body)).await
    }

    async fn delete_ids(&self, fuel: FuelType, ids: &[i64]) -> Result<(), StoreError> {
        let list = ids.iter().join(",");
        self.write::<serde_json::Value>(Method::DELETE, fuel.table(), &[("id", format!("in.({list})"))], None)
            .await
            .map(|_| ())
    }

    /// Undo the price rows of a failed approval
    async fn compensate(&self, written: &[(FuelType, PriceRecord)]) {
        let by_table = written.iter().map(|(fuel, row)| (*fuel, row.id)).into_group_map();
        for (fuel, ids) in by_table {
            if let Err(e) = self.delete_ids(fuel, &ids).await {
                warn!(error = %e, table = fuel.table(), ?ids, "failed to roll back approval rows");
            }
        }
    }

    async fn set_status(
        &self,
        queue: SubmissionQueue,
        id: i64,
        to: SubmissionStatus,
    ) -> Result<Vec<PendingSubmission>, StoreError> {
        let body = serde_json::to_vec(&serde_json::json!({ "status": to }))
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let rows: Vec<PendingSubmission> = self
            .write(
                Method::PATCH,
                queue.table(),
                &[("id", eq(id)), ("status", eq(SubmissionStatus::Pending))],
                Some(body),
            )
            .await?;
        Ok(rows.into_iter().map(|s| PendingSubmission { queue, ..s }).collect())
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<Vec<T>, StoreError> {
    let status = resp.status();
    let body = resp.text().await.map_err(|e| StoreError::Transport(e.to_string()))?;
    if !status.is_success() {
        return Err(StoreError::Backend {
            status: status.as_u16(),
            message: backend_message(&body),
        });
    }
    if status == StatusCode::NO_CONTENT || body.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))
}

#[async_trait]
impl PriceStore for HostedStore {
    async fn list_prices(&self, fuel: FuelType) -> Result<Vec<PriceRecord>, StoreError> {
        let rows: Vec<PriceRecord> = self.get(fuel.table(), &[("select", "*".to_string())]).await?;
        Ok(rows.into_iter().map(PriceRecord::normalized).collect())
    }

    async fn insert_price(&self, fuel: FuelType, record: NewPriceRecord) -> Result<PriceRecord, StoreError> {
        let rows: Vec<PriceRecord> = self.insert_rows(fuel.table(), &[PriceRow::from(&record)]).await?;
        let row = rows
            .into_iter()
            .next()
            .map(PriceRecord::normalized)
            .ok_or_else(|| StoreError::Decode(format!("{} insert returned no row", fuel.table())))?;
        self.feed.publish(fuel, ChangeKind::Insert, row.clone());
        Ok(row)
    }

    async fn update_station_price(
        &self,
        fuel: FuelType,
        key: &StationKey,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Vec<PriceRecord>, StoreError> {
        let body = serde_json::to_vec(&serde_json::json!({ "price": price, "last_updated": at }))
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let rows: Vec<PriceRecord> = self
            .write(Method::PATCH, fuel.table(), &station_filter(key), Some(body))
            .await?;
        let rows: Vec<PriceRecord> = rows.into_iter().map(PriceRecord::normalized).collect();
        for row in &rows {
            self.feed.publish(fuel, ChangeKind::Update, row.clone());
        }
        Ok(rows)
    }

    async fn delete_station(&self, fuel: FuelType, key: &StationKey) -> Result<Vec<PriceRecord>, StoreError> {
        let rows: Vec<PriceRecord> = self
            .write(Method::DELETE, fuel.table(), &station_filter(key), None)
            .await?;
        let rows: Vec<PriceRecord> = rows.into_iter().map(PriceRecord::normalized).collect();
        for row in &rows {
            self.feed.publish(fuel, ChangeKind::Delete, row.clone());
        }
        Ok(rows)
    }

    async fn list_submissions(
        &self,
        queue: SubmissionQueue,
        status: Option<SubmissionStatus>,
    ) -> Result<Vec<PendingSubmission>, StoreError> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("order", "submitted_at.desc,id.desc".to_string()),
        ];
        if let Some(status) = status {
            query.push(("status", eq(status)));
        }
        let rows: Vec<PendingSubmission> = self.get(queue.table(), &query).await?;
        Ok(rows.into_iter().map(|s| PendingSubmission { queue, ..s }).collect())
    }

    async fn get_submission(&self, queue: SubmissionQueue, id: i64) -> Result<Option<PendingSubmission>, StoreError> {
        let rows: Vec<PendingSubmission> = self
            .get(queue.table(), &[("select", "*".to_string()), ("id", eq(id))])
            .await?;
        Ok(rows.into_iter().next().map(|s| PendingSubmission { queue, ..s }))
    }

    async fn insert_submissions(
        &self,
        queue: SubmissionQueue,
        submissions: Vec<NewSubmission>,
    ) -> Result<Vec<PendingSubmission>, StoreError> {
        if submissions.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<PendingSubmission> = self.insert_rows(queue.table(), &submissions).await?;
        Ok(rows.into_iter().map(|s| PendingSubmission { queue, ..s }).collect())
    }

    async fn approve_submission(
        &self,
        queue: SubmissionQueue,
        id: i64,
        effective_date: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, StoreError> {
        let submission = self
            .get_submission(queue, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("submission {id} in {queue}")))?;
        submission.status.transition(SubmissionStatus::Approved)?;

        let key = submission.key();
        let mut written = Vec::new();
        for entry in submission.price_entries() {
            let record = NewPriceRecord::new(&key, Some(entry.price), effective_date, at);
            let inserted: Result<Vec<PriceRecord>, StoreError> =
                self.insert_rows(entry.fuel.table(), &[PriceRow::from(&record)]).await;
            match inserted.map(|rows| rows.into_iter().next()) {
                Ok(Some(row)) => written.push((entry.fuel, row.normalized())),
                Ok(None) => {
                    self.compensate(&written).await;
                    return Err(StoreError::Decode(format!("{} insert returned no row", entry.fuel.table())));
                }
                Err(e) => {
                    warn!(error = %e, submission_id = id, fuel = %entry.fuel, "approval insert failed, rolling back");
                    self.compensate(&written).await;
                    return Err(e);
                }
            }
        }

        let updated = match self.set_status(queue, id, SubmissionStatus::Approved).await {
            Ok(rows) => rows,
            Err(StoreError::Transport(cause)) => {
                // the patch may have landed before the connection failed
                match self.get_submission(queue, id).await {
                    Ok(Some(current)) if current.status == SubmissionStatus::Approved => vec![current],
                    Ok(Some(current)) if current.status == SubmissionStatus::Pending => {
                        self.compensate(&written).await;
                        return Err(StoreError::Transport(cause));
                    }
                    Ok(current) => {
                        self.compensate(&written).await;
                        return Err(transition_error(queue, id, current.as_ref(), SubmissionStatus::Approved));
                    }
                    Err(e) => {
                        let ids: Vec<i64> = written.iter().map(|(_, row)| row.id).collect();
                        error!(
                            error = %e,
                            submission_id = id,
                            ?ids,
                            "approval status unknown, price rows kept for manual review"
                        );
                        return Err(StoreError::Transport(cause));
                    }
                }
            }
            Err(e) => {
                self.compensate(&written).await;
                return Err(e);
            }
        };
        let Some(submission) = updated.into_iter().next() else {
            // someone else moved it out of pending between our read and the patch
            self.compensate(&written).await;
            let current = self.get_submission(queue, id).await.ok().flatten();
            return Err(transition_error(queue, id, current.as_ref(), SubmissionStatus::Approved));
        };

        for (fuel, row) in &written {
            self.feed.publish(*fuel, ChangeKind::Insert, row.clone());
        }
        debug!(submission_id = id, written = written.len(), "submission approved");
        Ok(ApprovalOutcome { submission, written })
    }

    async fn reject_submission(&self, queue: SubmissionQueue, id: i64) -> Result<PendingSubmission, StoreError> {
        let updated = self.set_status(queue, id, SubmissionStatus::Rejected).await?;
        match updated.into_iter().next() {
            Some(s) => Ok(s),
            None => {
                let current = self.get_submission(queue, id).await?;
                Err(transition_error(queue, id, current.as_ref(), SubmissionStatus::Rejected))
            }
        }
    }

    async fn latest_submitted_at(&self, queue: SubmissionQueue) -> Result<Option<DateTime<Utc>>, StoreError> {
        #[derive(serde::Deserialize)]
        struct Latest {
            submitted_at: DateTime<Utc>,
        }
        let rows: Vec<Latest> = self
            .get(
                queue.table(),
                &[
                    ("select", "submitted_at".to_string()),
                    ("order", "submitted_at.desc".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next().map(|r| r.submitted_at))
    }

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, StoreError> {
        let rows: Vec<Profile> = self
            .get("profiles", &[("select", "*".to_string()), ("id", eq(id))])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_profile(&self, profile: &Profile) -> Result<Profile, StoreError> {
        let row = ProfileRow {
            id: profile.id,
            first_name: &profile.first_name,
            last_name: &profile.last_name,
            email: &profile.email,
        };
        let rows: Vec<Profile> = self.insert_rows("profiles", &[row]).await.map_err(|e| match e {
            StoreError::Backend { status: 409, message } => StoreError::Conflict(message),
            other => other,
        })?;
        Ok(rows.into_iter().next().unwrap_or_else(|| profile.clone()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let query = [("select", "id".to_string()), ("limit", "1".to_string())];
        self.get::<serde_json::Value>(FuelType::Petrol.table(), &query)
            .await
            .map(|_| ())
    }

    fn subscribe(&self) -> broadcast::Receiver<PriceChange> {
        self.feed.subscribe()
    }
}

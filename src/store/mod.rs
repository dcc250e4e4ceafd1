//! Persistence seam over the hosted backend's tables.
//!
//! Every implementation publishes a [`PriceChange`] for each price row it
//! writes, so websocket subscribers see inserts, updates and deletes in the
//! order the store applied them.

pub mod hosted;
pub mod memory;
#[cfg(feature = "db")]
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::{Config, StoreKind};
use crate::domain::{
    ApprovalOutcome, ChangeKind, DomainError, FuelType, NewPriceRecord, NewSubmission, PendingSubmission,
    PriceChange, PriceRecord, Profile, StationKey, SubmissionQueue, SubmissionStatus,
};

pub use hosted::HostedStore;
pub use memory::MemoryStore;

const CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("backend returned HTTP {status}: {message}")]
    Backend { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("database error: {0}")]
    Database(String),
}

impl From<DomainError> for StoreError {
    fn from(error: DomainError) -> Self {
        StoreError::Conflict(error.to_string())
    }
}

#[cfg(feature = "db")]
impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            other => StoreError::Database(other.to_string()),
        }
    }
}

#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn list_prices(&self, fuel: FuelType) -> Result<Vec<PriceRecord>, StoreError>;

    async fn insert_price(&self, fuel: FuelType, record: NewPriceRecord) -> Result<PriceRecord, StoreError>;

    /// Set the price on every row of `fuel` belonging to the station.
    /// Returns the updated rows; empty when the station has no row for `fuel`.
    async fn update_station_price(
        &self,
        fuel: FuelType,
        key: &StationKey,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Vec<PriceRecord>, StoreError>;

    /// Remove the station's rows from one fuel table, returning what was removed
    async fn delete_station(&self, fuel: FuelType, key: &StationKey) -> Result<Vec<PriceRecord>, StoreError>;

    /// Newest first
    async fn list_submissions(
        &self,
        queue: SubmissionQueue,
        status: Option<SubmissionStatus>,
    ) -> Result<Vec<PendingSubmission>, StoreError>;

    async fn get_submission(&self, queue: SubmissionQueue, id: i64) -> Result<Option<PendingSubmission>, StoreError>;

    async fn insert_submissions(
        &self,
        queue: SubmissionQueue,
        submissions: Vec<NewSubmission>,
    ) -> Result<Vec<PendingSubmission>, StoreError>;

    /// Write one price row per non-null fuel price and mark the submission
    /// approved, or change nothing.
    async fn approve_submission(
        &self,
        queue: SubmissionQueue,
        id: i64,
        effective_date: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, StoreError>;

    async fn reject_submission(&self, queue: SubmissionQueue, id: i64) -> Result<PendingSubmission, StoreError>;

    async fn latest_submitted_at(&self, queue: SubmissionQueue) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, StoreError>;

    async fn insert_profile(&self, profile: &Profile) -> Result<Profile, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<PriceChange>;
}

/// Broadcast side of the realtime channel shared by the store implementations
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<PriceChange>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { tx }
    }
}

impl ChangeFeed {
    pub fn publish(&self, fuel: FuelType, kind: ChangeKind, record: PriceRecord) {
        // no subscribers is not an error
        let _ = self.tx.send(PriceChange { fuel, kind, record });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PriceChange> {
        self.tx.subscribe()
    }
}

/// Current status of a submission, used to explain a refused transition
pub(crate) fn transition_error(
    queue: SubmissionQueue,
    id: i64,
    found: Option<&PendingSubmission>,
    to: SubmissionStatus,
) -> StoreError {
    match found {
        None => StoreError::NotFound(format!("submission {id} in {queue}")),
        Some(s) => match s.status.transition(to) {
            Err(e) => e.into(),
            Ok(_) => StoreError::Conflict(format!("submission {id} changed concurrently")),
        },
    }
}

pub async fn build_store(cfg: &Config) -> anyhow::Result<Arc<dyn PriceStore>> {
    match cfg.store.kind {
        StoreKind::Memory => {
            let store = if cfg.store.seed_demo {
                MemoryStore::with_demo_data()
            } else {
                MemoryStore::new()
            };
            Ok(Arc::new(store))
        }
        StoreKind::Hosted => Ok(Arc::new(HostedStore::new(&cfg.backend)?)),
        #[cfg(feature = "db")]
        StoreKind::Postgres => Ok(Arc::new(pg::PgStore::connect(&cfg.db).await?)),
        #[cfg(not(feature = "db"))]
        StoreKind::Postgres => {
            anyhow::bail!("store.kind = \"postgres\" requires building with the `db` feature")
        }
    }
}

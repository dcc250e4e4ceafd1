//! Self-hosted Postgres mirror of the backend tables.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, Transaction};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use super::{transition_error, ChangeFeed, PriceStore, StoreError};
use crate::config::DbConfig;
use crate::domain::{
    ApprovalOutcome, ChangeKind, FuelType, NewPriceRecord, NewSubmission, PendingSubmission, PriceChange,
    PriceRecord, Profile, Role, StationId, StationKey, SubmissionQueue, SubmissionStatus,
};

const PRICE_COLUMNS: &str = "id, station_id, station_name, station_location, price, tags, last_updated, effective_date";
const SUBMISSION_COLUMNS: &str = "id, station_name, station_location, petrol_price, diesel_price, kerosene_price, \
     submitted_by, status, submitted_at";

#[derive(FromRow)]
struct PriceRow {
    id: i64,
    station_id: Uuid,
    station_name: String,
    station_location: String,
    price: Option<f64>,
    tags: Vec<String>,
    last_updated: DateTime<Utc>,
    effective_date: Option<NaiveDate>,
}

impl From<PriceRow> for PriceRecord {
    fn from(r: PriceRow) -> Self {
        PriceRecord {
            id: r.id,
            station_id: StationId(r.station_id),
            station_name: r.station_name,
            station_location: r.station_location,
            price: r.price,
            tags: r.tags,
            last_updated: r.last_updated,
            effective_date: r.effective_date,
        }
        .normalized()
    }
}

#[derive(FromRow)]
struct SubmissionRow {
    id: i64,
    station_name: String,
    station_location: String,
    petrol_price: Option<f64>,
    diesel_price: Option<f64>,
    kerosene_price: Option<f64>,
    submitted_by: String,
    status: String,
    submitted_at: DateTime<Utc>,
}

impl SubmissionRow {
    fn into_submission(self, queue: SubmissionQueue) -> Result<PendingSubmission, StoreError> {
        let status = self
            .status
            .parse::<SubmissionStatus>()
            .map_err(|_| StoreError::Decode(format!("unknown submission status {:?}", self.status)))?;
        Ok(PendingSubmission {
            id: self.id,
            queue,
            station_name: self.station_name,
            station_location: self.station_location,
            petrol_price: self.petrol_price,
            diesel_price: self.diesel_price,
            kerosene_price: self.kerosene_price,
            submitted_by: self.submitted_by,
            status,
            submitted_at: self.submitted_at,
        })
    }
}

#[derive(FromRow)]
struct ProfileRow {
    id: Uuid,
    first_name: String,
    last_name: String,
    email: String,
    role: String,
}

impl From<ProfileRow> for Profile {
    fn from(r: ProfileRow) -> Self {
        Profile {
            id: r.id,
            first_name: r.first_name,
            last_name: r.last_name,
            email: r.email,
            role: r.role.parse().unwrap_or(Role::User),
        }
    }
}

pub struct PgStore {
    pool: PgPool,
    feed: ChangeFeed,
}

impl PgStore {
    pub async fn connect(cfg: &DbConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .connect(&cfg.url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("postgres store ready");
        Ok(Self {
            pool,
            feed: ChangeFeed::default(),
        })
    }

    async fn insert_price_tx(
        tx: &mut Transaction<'_, Postgres>,
        fuel: FuelType,
        record: &NewPriceRecord,
    ) -> Result<PriceRecord, StoreError> {
        let sql = format!(
            "INSERT INTO {} (station_id, station_name, station_location, price, tags, last_updated, effective_date) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {PRICE_COLUMNS}",
            fuel.table()
        );
        let row: PriceRow = sqlx::query_as(&sql)
            .bind(record.station_id.0)
            .bind(&record.station_name)
            .bind(&record.station_location)
            .bind(record.price)
            .bind(&record.tags)
            .bind(record.last_updated)
            .bind(record.effective_date)
            .fetch_one(&mut **tx)
            .await?;
        Ok(row.into())
    }

    async fn locked_submission(
        tx: &mut Transaction<'_, Postgres>,
        queue: SubmissionQueue,
        id: i64,
    ) -> Result<Option<PendingSubmission>, StoreError> {
        let sql = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM {} WHERE id = $1 FOR UPDATE",
            queue.table()
        );
        let row: Option<SubmissionRow> = sqlx::query_as(&sql).bind(id).fetch_optional(&mut **tx).await?;
        row.map(|r| r.into_submission(queue)).transpose()
    }

    async fn set_status_tx(
        tx: &mut Transaction<'_, Postgres>,
        queue: SubmissionQueue,
        id: i64,
        status: SubmissionStatus,
    ) -> Result<PendingSubmission, StoreError> {
        let sql = format!(
            "UPDATE {} SET status = $2 WHERE id = $1 RETURNING {SUBMISSION_COLUMNS}",
            queue.table()
        );
        let row: SubmissionRow = sqlx::query_as(&sql)
            .bind(id)
            .bind(status.to_string())
            .fetch_one(&mut **tx)
            .await?;
        row.into_submission(queue)
    }
}

#[async_trait]
impl PriceStore for PgStore {
    async fn list_prices(&self, fuel: FuelType) -> Result<Vec<PriceRecord>, StoreError> {
        let sql = format!("SELECT {PRICE_COLUMNS} FROM {} ORDER BY id", fuel.table());
        let rows: Vec<PriceRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_price(&self, fuel: FuelType, record: NewPriceRecord) -> Result<PriceRecord, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = Self::insert_price_tx(&mut tx, fuel, &record).await?;
        tx.commit().await?;
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
        let sql = format!(
            "UPDATE {} SET price = $3, last_updated = $4 \
             WHERE station_name = $1 AND station_location = $2 RETURNING {PRICE_COLUMNS}",
            fuel.table()
        );
        let rows: Vec<PriceRow> = sqlx::query_as(&sql)
            .bind(&key.station_name)
            .bind(&key.station_location)
            .bind(price)
            .bind(at)
            .fetch_all(&self.pool)
            .await?;
        let rows: Vec<PriceRecord> = rows.into_iter().map(Into::into).collect();
        for row in &rows {
            self.feed.publish(fuel, ChangeKind::Update, row.clone());
        }
        Ok(rows)
    }

    async fn delete_station(&self, fuel: FuelType, key: &StationKey) -> Result<Vec<PriceRecord>, StoreError> {
        let sql = format!(
            "DELETE FROM {} WHERE station_name = $1 AND station_location = $2 RETURNING {PRICE_COLUMNS}",
            fuel.table()
        );
        let rows: Vec<PriceRow> = sqlx::query_as(&sql)
            .bind(&key.station_name)
            .bind(&key.station_location)
            .fetch_all(&self.pool)
            .await?;
        let rows: Vec<PriceRecord> = rows.into_iter().map(Into::into).collect();
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
        let sql = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM {} WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY submitted_at DESC, id DESC",
            queue.table()
        );
        let rows: Vec<SubmissionRow> = sqlx::query_as(&sql)
            .bind(status.map(|s| s.to_string()))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|r| r.into_submission(queue)).collect()
    }

    async fn get_submission(&self, queue: SubmissionQueue, id: i64) -> Result<Option<PendingSubmission>, StoreError> {
        let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM {} WHERE id = $1", queue.table());
        let row: Option<SubmissionRow> = sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(|r| r.into_submission(queue)).transpose()
    }

    async fn insert_submissions(
        &self,
        queue: SubmissionQueue,
        submissions: Vec<NewSubmission>,
    ) -> Result<Vec<PendingSubmission>, StoreError> {
        let sql = format!(
            "INSERT INTO {} (station_name, station_location, petrol_price, diesel_price, kerosene_price, \
             submitted_by, status, submitted_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {SUBMISSION_COLUMNS}",
            queue.table()
        );
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(submissions.len());
        for s in &submissions {
            let row: SubmissionRow = sqlx::query_as(&sql)
                .bind(&s.station_name)
                .bind(&s.station_location)
                .bind(s.petrol_price)
                .bind(s.diesel_price)
                .bind(s.kerosene_price)
                .bind(&s.submitted_by)
                .bind(s.status.to_string())
                .bind(s.submitted_at)
                .fetch_one(&mut *tx)
                .await?;
            inserted.push(row.into_submission(queue)?);
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn approve_submission(
        &self,
        queue: SubmissionQueue,
        id: i64,
        effective_date: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let submission = match Self::locked_submission(&mut tx, queue, id).await? {
            Some(s) if s.status == SubmissionStatus::Pending => s,
            other => return Err(transition_error(queue, id, other.as_ref(), SubmissionStatus::Approved)),
        };

        let key = submission.key();
        let mut written = Vec::new();
        for entry in submission.price_entries() {
            let record = NewPriceRecord::new(&key, Some(entry.price), effective_date, at);
            written.push((entry.fuel, Self::insert_price_tx(&mut tx, entry.fuel, &record).await?));
        }
        let submission = Self::set_status_tx(&mut tx, queue, id, SubmissionStatus::Approved).await?;
        tx.commit().await?;

        for (fuel, row) in &written {
            self.feed.publish(*fuel, ChangeKind::Insert, row.clone());
        }
        debug!(submission_id = id, written = written.len(), "submission approved");
        Ok(ApprovalOutcome { submission, written })
    }

    async fn reject_submission(&self, queue: SubmissionQueue, id: i64) -> Result<PendingSubmission, StoreError> {
        let mut tx = self.pool.begin().await?;
        let current = Self::locked_submission(&mut tx, queue, id).await?;
        match current {
            Some(s) if s.status == SubmissionStatus::Pending => {
                let updated = Self::set_status_tx(&mut tx, queue, id, SubmissionStatus::Rejected).await?;
                tx.commit().await?;
                Ok(updated)
            }
            other => Err(transition_error(queue, id, other.as_ref(), SubmissionStatus::Rejected)),
        }
    }

    async fn latest_submitted_at(&self, queue: SubmissionQueue) -> Result<Option<DateTime<Utc>>, StoreError> {
        let sql = format!("SELECT MAX(submitted_at) FROM {}", queue.table());
        let (latest,): (Option<DateTime<Utc>>,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(latest)
    }

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, StoreError> {
        let row: Option<ProfileRow> =
            sqlx::query_as("SELECT id, first_name, last_name, email, role FROM profiles WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn insert_profile(&self, profile: &Profile) -> Result<Profile, StoreError> {
        let row: Option<ProfileRow> = sqlx::query_as(
            "INSERT INTO profiles (id, first_name, last_name, email, role) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO NOTHING RETURNING id, first_name, last_name, email, role",
        )
        .bind(profile.id)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.email)
        .bind(profile.role.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into)
            .ok_or_else(|| StoreError::Conflict(format!("profile {} already exists", profile.id)))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PriceChange> {
        self.feed.subscribe()
    }
}

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::{transition_error, ChangeFeed, PriceStore, StoreError};
use crate::domain::{
    ApprovalOutcome, ChangeKind, FuelType, NewPriceRecord, NewSubmission, PendingSubmission, PriceChange,
    PriceRecord, Profile, StationKey, SubmissionQueue, SubmissionStatus,
};

#[derive(Default)]
struct Tables {
    prices: HashMap<FuelType, Vec<PriceRecord>>,
    submissions: HashMap<SubmissionQueue, Vec<PendingSubmission>>,
    profiles: HashMap<Uuid, Profile>,
    next_price_id: i64,
    next_submission_id: i64,
}

impl Tables {
    fn insert_price(&mut self, fuel: FuelType, record: NewPriceRecord) -> PriceRecord {
        self.next_price_id += 1;
        let row = record.into_record(self.next_price_id);
        self.prices.entry(fuel).or_default().push(row.clone());
        row
    }
}

/// In-process tables behind one lock. Every write, including an approval's
/// multi-table fan-out, happens inside a single write guard.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with rows, ids assigned in order
    pub fn with_prices(
        petrol: Vec<NewPriceRecord>,
        diesel: Vec<NewPriceRecord>,
        kerosene: Vec<NewPriceRecord>,
    ) -> Self {
        let mut tables = Tables::default();
        for (fuel, rows) in [
            (FuelType::Petrol, petrol),
            (FuelType::Diesel, diesel),
            (FuelType::Kerosene, kerosene),
        ] {
            for row in rows {
                tables.insert_price(fuel, row);
            }
        }
        Self {
            tables: RwLock::new(tables),
            feed: ChangeFeed::default(),
        }
    }

    /// Sample Lagos stations for local development
    pub fn with_demo_data() -> Self {
        let day = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap_or_default();
        let stamp = |h: u32, m: u32| {
            Utc.with_ymd_and_hms(2025, 3, 9, h, m, 0)
                .single()
                .unwrap_or_else(Utc::now)
        };
        let stations = [
            ("Total Filling Station", "Victoria Island, Lagos", 617.0, 625.0, stamp(10, 0)),
            ("MRS Oil", "Lekki Phase 1, Lagos", 615.0, 630.0, stamp(9, 30)),
            ("Mobil", "Ikeja, Lagos", 610.0, 620.0, stamp(8, 45)),
            ("NNPC Retail", "Surulere, Lagos", 605.0, 618.0, stamp(11, 15)),
            ("Conoil", "Ajah, Lagos", 619.0, 628.0, stamp(10, 30)),
            ("Oando", "Maryland, Lagos", 612.0, 622.0, stamp(9, 15)),
        ];

        let mut petrol = Vec::new();
        let mut diesel = Vec::new();
        for (name, location, petrol_price, diesel_price, at) in stations {
            let key = StationKey::new(name, location);
            petrol.push(NewPriceRecord::new(&key, Some(petrol_price), day, at));
            diesel.push(NewPriceRecord::new(&key, Some(diesel_price), day, at));
        }
        Self::with_prices(petrol, diesel, Vec::new())
    }

    fn publish_all(&self, fuel: FuelType, kind: ChangeKind, rows: &[PriceRecord]) {
        for row in rows {
            self.feed.publish(fuel, kind, row.clone());
        }
    }
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn list_prices(&self, fuel: FuelType) -> Result<Vec<PriceRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.prices.get(&fuel).cloned().unwrap_or_default())
    }

    async fn insert_price(&self, fuel: FuelType, record: NewPriceRecord) -> Result<PriceRecord, StoreError> {
        let row = self.tables.write().await.insert_price(fuel, record);
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
        let updated: Vec<PriceRecord> = {
            let mut tables = self.tables.write().await;
            tables
                .prices
                .entry(fuel)
                .or_default()
                .iter_mut()
                .filter(|r| r.matches(key))
                .map(|r| {
                    r.price = Some(price);
                    r.last_updated = at;
                    r.clone()
                })
                .collect()
        };
        self.publish_all(fuel, ChangeKind::Update, &updated);
        Ok(updated)
    }

    async fn delete_station(&self, fuel: FuelType, key: &StationKey) -> Result<Vec<PriceRecord>, StoreError> {
        let removed: Vec<PriceRecord> = {
            let mut tables = self.tables.write().await;
            let rows = tables.prices.entry(fuel).or_default();
            let (removed, kept): (Vec<_>, Vec<_>) = rows.drain(..).partition(|r| r.matches(key));
            *rows = kept;
            removed
        };
        self.publish_all(fuel, ChangeKind::Delete, &removed);
        Ok(removed)
    }

    async fn list_submissions(
        &self,
        queue: SubmissionQueue,
        status: Option<SubmissionStatus>,
    ) -> Result<Vec<PendingSubmission>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<PendingSubmission> = tables
            .submissions
            .get(&queue)
            .map(|rows| {
                rows.iter()
                    .filter(|s| status.map_or(true, |st| s.status == st))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn get_submission(&self, queue: SubmissionQueue, id: i64) -> Result<Option<PendingSubmission>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .submissions
            .get(&queue)
            .and_then(|rows| rows.iter().find(|s| s.id == id))
            .cloned())
    }

    async fn insert_submissions(
        &self,
        queue: SubmissionQueue,
        submissions: Vec<NewSubmission>,
    ) -> Result<Vec<PendingSubmission>, StoreError> {
        let mut tables = self.tables.write().await;
        let mut inserted = Vec::with_capacity(submissions.len());
        for submission in submissions {
            tables.next_submission_id += 1;
            let row = submission.into_submission(tables.next_submission_id, queue);
            tables.submissions.entry(queue).or_default().push(row.clone());
            inserted.push(row);
        }
        Ok(inserted)
    }

    async fn approve_submission(
        &self,
        queue: SubmissionQueue,
        id: i64,
        effective_date: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, StoreError> {
        let outcome = {
            let mut tables = self.tables.write().await;
            let submission = tables
                .submissions
                .get(&queue)
                .and_then(|rows| rows.iter().find(|s| s.id == id))
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("submission {id} in {queue}")))?;
            let status = submission.status.transition(SubmissionStatus::Approved)?;

            let key = submission.key();
            let written: Vec<(FuelType, PriceRecord)> = submission
                .price_entries()
                .into_iter()
                .map(|entry| {
                    let record = NewPriceRecord::new(&key, Some(entry.price), effective_date, at);
                    (entry.fuel, tables.insert_price(entry.fuel, record))
                })
                .collect();

            let mut submission = submission;
            submission.status = status;
            if let Some(row) = tables
                .submissions
                .get_mut(&queue)
                .and_then(|rows| rows.iter_mut().find(|s| s.id == id))
            {
                *row = submission.clone();
            }
            ApprovalOutcome { submission, written }
        };

        for (fuel, row) in &outcome.written {
            self.feed.publish(*fuel, ChangeKind::Insert, row.clone());
        }
        debug!(submission_id = id, written = outcome.written.len(), "submission approved");
        Ok(outcome)
    }

    async fn reject_submission(&self, queue: SubmissionQueue, id: i64) -> Result<PendingSubmission, StoreError> {
        let mut tables = self.tables.write().await;
        let row = tables
            .submissions
            .get_mut(&queue)
            .and_then(|rows| rows.iter_mut().find(|s| s.id == id));
        match row {
            Some(row) => {
                row.status = row.status.transition(SubmissionStatus::Rejected)?;
                Ok(row.clone())
            }
            None => Err(transition_error(queue, id, None, SubmissionStatus::Rejected)),
        }
    }

    async fn latest_submitted_at(&self, queue: SubmissionQueue) -> Result<Option<DateTime<Utc>>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .submissions
            .get(&queue)
            .and_then(|rows| rows.iter().map(|s| s.submitted_at).max()))
    }

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, StoreError> {
        Ok(self.tables.read().await.profiles.get(&id).cloned())
    }

    async fn insert_profile(&self, profile: &Profile) -> Result<Profile, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.profiles.contains_key(&profile.id) {
            return Err(StoreError::Conflict(format!("profile {} already exists", profile.id)));
        }
        tables.profiles.insert(profile.id, profile.clone());
        Ok(profile.clone())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PriceChange> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Role, StationId};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    async fn submit(store: &MemoryStore, prices: [Option<f64>; 3]) -> PendingSubmission {
        let new = NewSubmission::pending(StationKey::new("A", "X"), prices, None, Utc::now());
        store
            .insert_submissions(SubmissionQueue::Submissions, vec![new])
            .await
            .unwrap()
            .remove(0)
    }

    async fn total_rows(store: &MemoryStore) -> usize {
        let mut n = 0;
        for fuel in FuelType::all() {
            n += store.list_prices(fuel).await.unwrap().len();
        }
        n
    }

    #[tokio::test]
    async fn test_approve_all_three_prices_writes_three_rows() {
        let store = MemoryStore::new();
        let s = submit(&store, [Some(600.0), Some(650.0), Some(400.0)]).await;

        let outcome = store
            .approve_submission(SubmissionQueue::Submissions, s.id, today(), Utc::now())
            .await
            .unwrap();

        assert_eq!(outcome.written.len(), 3);
        assert_eq!(outcome.submission.status, SubmissionStatus::Approved);
        assert_eq!(total_rows(&store).await, 3);

        let kerosene = store.list_prices(FuelType::Kerosene).await.unwrap();
        assert_eq!(kerosene[0].price, Some(400.0));
        assert_eq!(kerosene[0].station_id, StationId::derive("A", "X"));
        assert_eq!(kerosene[0].effective_date, Some(today()));
    }

    #[tokio::test]
    async fn test_approve_petrol_only_writes_one_row() {
        let store = MemoryStore::new();
        let s = submit(&store, [Some(600.0), None, None]).await;
        store
            .approve_submission(SubmissionQueue::Submissions, s.id, today(), Utc::now())
            .await
            .unwrap();
        assert_eq!(total_rows(&store).await, 1);
        assert_eq!(store.list_prices(FuelType::Petrol).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_approval_is_conflict_and_writes_nothing() {
        let store = MemoryStore::new();
        let s = submit(&store, [Some(600.0), None, None]).await;
        store
            .approve_submission(SubmissionQueue::Submissions, s.id, today(), Utc::now())
            .await
            .unwrap();
        let again = store
            .approve_submission(SubmissionQueue::Submissions, s.id, today(), Utc::now())
            .await;
        assert!(matches!(again, Err(StoreError::Conflict(_))));
        assert_eq!(total_rows(&store).await, 1);
    }

    #[tokio::test]
    async fn test_reject_only_changes_status() {
        let store = MemoryStore::new();
        let s = submit(&store, [Some(600.0), Some(650.0), None]).await;
        let rejected = store
            .reject_submission(SubmissionQueue::Submissions, s.id)
            .await
            .unwrap();
        assert_eq!(rejected.status, SubmissionStatus::Rejected);
        assert_eq!(total_rows(&store).await, 0);

        let approve = store
            .approve_submission(SubmissionQueue::Submissions, s.id, today(), Utc::now())
            .await;
        assert!(matches!(approve, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_unknown_submission_is_not_found() {
        let store = MemoryStore::new();
        let r = store.reject_submission(SubmissionQueue::PendingSubmissions, 42).await;
        assert!(matches!(r, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_writes_are_published() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        let key = StationKey::new("A", "X");
        store
            .insert_price(FuelType::Diesel, NewPriceRecord::new(&key, Some(650.0), today(), Utc::now()))
            .await
            .unwrap();
        store
            .update_station_price(FuelType::Diesel, &key, 660.0, Utc::now())
            .await
            .unwrap();
        store.delete_station(FuelType::Diesel, &key).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Insert);
        let update = rx.recv().await.unwrap();
        assert_eq!(update.kind, ChangeKind::Update);
        assert_eq!(update.record.price, Some(660.0));
        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Delete);
    }

    #[tokio::test]
    async fn test_delete_matches_name_and_location() {
        let store = MemoryStore::with_prices(
            vec![
                NewPriceRecord::new(&StationKey::new("A", "X"), Some(1.0), today(), Utc::now()),
                NewPriceRecord::new(&StationKey::new("A", "Y"), Some(2.0), today(), Utc::now()),
            ],
            vec![],
            vec![],
        );
        let removed = store
            .delete_station(FuelType::Petrol, &StationKey::new("A", "X"))
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        let left = store.list_prices(FuelType::Petrol).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].station_location, "Y");
    }

    #[tokio::test]
    async fn test_submissions_newest_first_with_status_filter() {
        let store = MemoryStore::new();
        let first = submit(&store, [Some(1.0), None, None]).await;
        let second = submit(&store, [Some(2.0), None, None]).await;
        store
            .reject_submission(SubmissionQueue::Submissions, first.id)
            .await
            .unwrap();

        let all = store.list_submissions(SubmissionQueue::Submissions, None).await.unwrap();
        assert_eq!(all[0].id, second.id);

        let pending = store
            .list_submissions(SubmissionQueue::Submissions, Some(SubmissionStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
        assert_eq!(
            store.latest_submitted_at(SubmissionQueue::Submissions).await.unwrap(),
            Some(second.submitted_at.max(first.submitted_at))
        );
    }

    #[tokio::test]
    async fn test_profiles() {
        let store = MemoryStore::new();
        let profile = Profile {
            id: Uuid::new_v4(),
            first_name: "Ada".into(),
            last_name: "Obi".into(),
            email: "ada@example.com".into(),
            role: Role::User,
        };
        store.insert_profile(&profile).await.unwrap();
        assert_eq!(store.get_profile(profile.id).await.unwrap(), Some(profile.clone()));
        assert!(matches!(
            store.insert_profile(&profile).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_demo_data() {
        let store = MemoryStore::with_demo_data();
        assert_eq!(store.list_prices(FuelType::Petrol).await.unwrap().len(), 6);
        assert_eq!(store.list_prices(FuelType::Diesel).await.unwrap().len(), 6);
        assert!(store.list_prices(FuelType::Kerosene).await.unwrap().is_empty());
    }
}

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::prices::{validate_price, validate_station};
use super::ServiceError;
use crate::domain::{
    ApprovalOutcome, DomainError, FuelType, NewSubmission, PendingSubmission, StationKey, SubmissionQueue,
    SubmissionStatus,
};
use crate::notify::Notifier;
use crate::store::PriceStore;

/// A price report as entered on the public form
#[derive(Debug, Clone, Default)]
pub struct SubmissionInput {
    pub station_name: String,
    pub station_location: String,
    pub petrol_price: Option<f64>,
    pub diesel_price: Option<f64>,
    pub kerosene_price: Option<f64>,
    pub email: Option<String>,
}

pub struct SubmissionService {
    store: Arc<dyn PriceStore>,
    notifier: Arc<dyn Notifier>,
}

impl SubmissionService {
    pub fn new(store: Arc<dyn PriceStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn submit(&self, input: SubmissionInput) -> Result<PendingSubmission, ServiceError> {
        let key: StationKey = validate_station(&input.station_name, &input.station_location)?;
        let prices = [input.petrol_price, input.diesel_price, input.kerosene_price];
        if prices.iter().all(Option::is_none) {
            return Err(DomainError::Validation("at least one price is required".to_string()).into());
        }
        for (fuel, price) in FuelType::all().zip(prices) {
            validate_price(fuel, price)?;
        }

        let new = NewSubmission::pending(key, prices, input.email, Utc::now());
        let submission = self
            .store
            .insert_submissions(SubmissionQueue::Submissions, vec![new])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::Internal("submission insert returned no row".to_string()))?;
        info!(submission_id = submission.id, station = %submission.key(), "submission received");

        if let Err(e) = self.notifier.notify_submission(&submission).await {
            warn!(error = %e, submission_id = submission.id, "admin notification failed");
        }
        Ok(submission)
    }

    /// Newest first. Without a queue, both queues are listed together.
    pub async fn list(
        &self,
        queue: Option<SubmissionQueue>,
        status: Option<SubmissionStatus>,
    ) -> Result<Vec<PendingSubmission>, ServiceError> {
        let queues: Vec<SubmissionQueue> = match queue {
            Some(q) => vec![q],
            None => SubmissionQueue::all().to_vec(),
        };
        let mut all = Vec::new();
        for q in queues {
            all.extend(self.store.list_submissions(q, status).await?);
        }
        all.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at).then(b.id.cmp(&a.id)));
        Ok(all)
    }

    pub async fn approve(&self, queue: SubmissionQueue, id: i64) -> Result<ApprovalOutcome, ServiceError> {
        let now = Utc::now();
        let outcome = self
            .store
            .approve_submission(queue, id, now.date_naive(), now)
            .await?;
        info!(
            submission_id = id,
            queue = %queue,
            rows = outcome.written.len(),
            "submission approved"
        );
        Ok(outcome)
    }

    pub async fn reject(&self, queue: SubmissionQueue, id: i64) -> Result<PendingSubmission, ServiceError> {
        let submission = self.store.reject_submission(queue, id).await?;
        info!(submission_id = id, queue = %queue, "submission rejected");
        Ok(submission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingNotifier {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify_submission(&self, _s: &PendingSubmission) -> anyhow::Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("webhook down");
            }
            Ok(())
        }
    }

    fn input(petrol: Option<f64>, diesel: Option<f64>, kerosene: Option<f64>) -> SubmissionInput {
        SubmissionInput {
            station_name: "Conoil".into(),
            station_location: "Ajah, Lagos".into(),
            petrol_price: petrol,
            diesel_price: diesel,
            kerosene_price: kerosene,
            email: None,
        }
    }

    fn service(notifier: Arc<CountingNotifier>) -> (Arc<MemoryStore>, SubmissionService) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), SubmissionService::new(store, notifier))
    }

    #[tokio::test]
    async fn test_submit_inserts_pending_and_notifies() {
        let notifier = Arc::new(CountingNotifier::default());
        let (_, svc) = service(notifier.clone());
        let s = svc.submit(input(Some(619.0), None, None)).await.unwrap();
        assert_eq!(s.status, SubmissionStatus::Pending);
        assert_eq!(s.queue, SubmissionQueue::Submissions);
        assert_eq!(s.submitted_by, "anonymous");
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_submit() {
        let notifier = Arc::new(CountingNotifier {
            fail: true,
            ..Default::default()
        });
        let (_, svc) = service(notifier);
        assert!(svc.submit(input(Some(619.0), None, None)).await.is_ok());
    }

    #[tokio::test]
    async fn test_submit_requires_a_price_and_station() {
        let (_, svc) = service(Arc::new(CountingNotifier::default()));
        assert!(svc.submit(input(None, None, None)).await.is_err());

        let mut no_name = input(Some(1.0), None, None);
        no_name.station_name = " ".into();
        assert!(svc.submit(no_name).await.is_err());

        assert!(svc.submit(input(Some(-1.0), None, None)).await.is_err());
    }

    #[tokio::test]
    async fn test_approve_then_reject_conflicts() {
        let (store, svc) = service(Arc::new(CountingNotifier::default()));
        let s = svc.submit(input(Some(619.0), Some(628.0), None)).await.unwrap();

        let outcome = svc.approve(SubmissionQueue::Submissions, s.id).await.unwrap();
        assert_eq!(outcome.written.len(), 2);
        assert_eq!(outcome.written[0].1.effective_date, Some(Utc::now().date_naive()));

        let r = svc.reject(SubmissionQueue::Submissions, s.id).await;
        assert!(matches!(r, Err(ServiceError::Store(StoreError::Conflict(_)))));
        assert_eq!(store.list_prices(FuelType::Diesel).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_merges_queues_newest_first() {
        let (store, svc) = service(Arc::new(CountingNotifier::default()));
        svc.submit(input(Some(1.0), None, None)).await.unwrap();
        store
            .insert_submissions(
                SubmissionQueue::PendingSubmissions,
                vec![NewSubmission::pending(
                    StationKey::new("Oando", "Maryland, Lagos"),
                    [None, Some(2.0), None],
                    Some("form@example.com".into()),
                    Utc::now() + chrono::Duration::seconds(5),
                )],
            )
            .await
            .unwrap();

        let all = svc.list(None, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].queue, SubmissionQueue::PendingSubmissions);

        let only_app = svc.list(Some(SubmissionQueue::Submissions), None).await.unwrap();
        assert_eq!(only_app.len(), 1);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

use super::{FuelPrice, FuelType, StationKey};

pub const ANONYMOUS_SUBMITTER: &str = "anonymous";

#[derive(Debug, Error, PartialEq)]
pub enum DomainError {
    #[error("cannot move submission from {from} to {to}")]
    InvalidTransition {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },
    #[error("{0}")]
    Validation(String),
}

/// Review state of a submission.
///
/// `pending → approved` and `pending → rejected` are the only transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn transition(self, to: SubmissionStatus) -> Result<SubmissionStatus, DomainError> {
        match (self, to) {
            (SubmissionStatus::Pending, SubmissionStatus::Approved)
            | (SubmissionStatus::Pending, SubmissionStatus::Rejected) => Ok(to),
            (from, to) => Err(DomainError::InvalidTransition { from, to }),
        }
    }
}

/// Which table a submission lives in.
///
/// `submissions` receives the app's own form endpoint, `pending_submissions`
/// receives rows synced from the external spreadsheet form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubmissionQueue {
    Submissions,
    PendingSubmissions,
}

impl SubmissionQueue {
    pub fn table(&self) -> &'static str {
        match self {
            SubmissionQueue::Submissions => "submissions",
            SubmissionQueue::PendingSubmissions => "pending_submissions",
        }
    }

    pub fn all() -> [SubmissionQueue; 2] {
        [SubmissionQueue::Submissions, SubmissionQueue::PendingSubmissions]
    }
}

/// A user- or external-form-originated price report awaiting review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub id: i64,
    #[serde(default = "default_queue")]
    pub queue: SubmissionQueue,
    pub station_name: String,
    pub station_location: String,
    #[serde(default)]
    pub petrol_price: Option<f64>,
    #[serde(default)]
    pub diesel_price: Option<f64>,
    #[serde(default)]
    pub kerosene_price: Option<f64>,
    #[serde(default = "anonymous")]
    pub submitted_by: String,
    pub status: SubmissionStatus,
    pub submitted_at: DateTime<Utc>,
}

fn default_queue() -> SubmissionQueue {
    SubmissionQueue::Submissions
}

fn anonymous() -> String {
    ANONYMOUS_SUBMITTER.to_string()
}

impl PendingSubmission {
    pub fn key(&self) -> StationKey {
        StationKey::new(self.station_name.clone(), self.station_location.clone())
    }

    pub fn price_for(&self, fuel: FuelType) -> Option<f64> {
        match fuel {
            FuelType::Petrol => self.petrol_price,
            FuelType::Diesel => self.diesel_price,
            FuelType::Kerosene => self.kerosene_price,
        }
    }

    /// One entry per non-null fuel price, in fuel order
    pub fn price_entries(&self) -> Vec<FuelPrice> {
        FuelType::all()
            .filter_map(|fuel| self.price_for(fuel).map(|price| FuelPrice { fuel, price }))
            .collect()
    }
}

/// Insert payload for a submission queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSubmission {
    pub station_name: String,
    pub station_location: String,
    pub petrol_price: Option<f64>,
    pub diesel_price: Option<f64>,
    pub kerosene_price: Option<f64>,
    pub submitted_by: String,
    pub status: SubmissionStatus,
    pub submitted_at: DateTime<Utc>,
}

impl NewSubmission {
    pub fn pending(
        key: StationKey,
        prices: [Option<f64>; 3],
        submitted_by: Option<String>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        let submitted_by = submitted_by
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(anonymous);
        Self {
            station_name: key.station_name,
            station_location: key.station_location,
            petrol_price: prices[0],
            diesel_price: prices[1],
            kerosene_price: prices[2],
            submitted_by,
            status: SubmissionStatus::Pending,
            submitted_at,
        }
    }

    pub fn into_submission(self, id: i64, queue: SubmissionQueue) -> PendingSubmission {
        PendingSubmission {
            id,
            queue,
            station_name: self.station_name,
            station_location: self.station_location,
            petrol_price: self.petrol_price,
            diesel_price: self.diesel_price,
            kerosene_price: self.kerosene_price,
            submitted_by: self.submitted_by,
            status: self.status,
            submitted_at: self.submitted_at,
        }
    }
}

/// Result of an approval: the price rows written and the updated submission
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    pub submission: PendingSubmission,
    pub written: Vec<(FuelType, super::PriceRecord)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn submission(prices: [Option<f64>; 3]) -> PendingSubmission {
        NewSubmission::pending(StationKey::new("A", "X"), prices, None, Utc::now())
            .into_submission(1, SubmissionQueue::Submissions)
    }

    #[test]
    fn test_pending_transitions() {
        assert_eq!(
            SubmissionStatus::Pending.transition(SubmissionStatus::Approved),
            Ok(SubmissionStatus::Approved)
        );
        assert_eq!(
            SubmissionStatus::Pending.transition(SubmissionStatus::Rejected),
            Ok(SubmissionStatus::Rejected)
        );
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in [SubmissionStatus::Approved, SubmissionStatus::Rejected] {
            for to in [
                SubmissionStatus::Pending,
                SubmissionStatus::Approved,
                SubmissionStatus::Rejected,
            ] {
                assert!(from.transition(to).is_err());
            }
        }
        assert!(SubmissionStatus::Pending
            .transition(SubmissionStatus::Pending)
            .is_err());
    }

    #[test]
    fn test_price_entries_skip_missing() {
        let all = submission([Some(600.0), Some(650.0), Some(400.0)]);
        assert_eq!(all.price_entries().len(), 3);

        let petrol_only = submission([Some(600.0), None, None]);
        let entries = petrol_only.price_entries();
        assert_eq!(entries, vec![FuelPrice { fuel: FuelType::Petrol, price: 600.0 }]);
    }

    #[test]
    fn test_submitter_defaults_to_anonymous() {
        let s = submission([Some(1.0), None, None]);
        assert_eq!(s.submitted_by, ANONYMOUS_SUBMITTER);

        let named = NewSubmission::pending(
            StationKey::new("A", "X"),
            [None, Some(2.0), None],
            Some("  ada@example.com ".to_string()),
            Utc::now(),
        );
        assert_eq!(named.submitted_by, "ada@example.com");
        assert_eq!(named.status, SubmissionStatus::Pending);
    }

    #[test]
    fn test_queue_names() {
        assert_eq!(SubmissionQueue::Submissions.table(), "submissions");
        assert_eq!(
            SubmissionQueue::from_str("pending_submissions").unwrap(),
            SubmissionQueue::PendingSubmissions
        );
        assert_eq!(SubmissionStatus::from_str("Approved").unwrap(), SubmissionStatus::Approved);
    }
}

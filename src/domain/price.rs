use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

use super::FuelType;

const STATION_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_4e2a_9c3d_4f51_8a27_d0c4_e915_73b8);

/// Explicit station identifier shared by all three price tables.
///
/// Derived from the exact `(station_name, station_location)` pair so that
/// every writer agrees on it, and rows read from a backend that does not
/// store it can recompute it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(pub Uuid);

impl StationId {
    pub fn derive(station_name: &str, station_location: &str) -> Self {
        let mut name = Vec::with_capacity(station_name.len() + station_location.len() + 1);
        name.extend_from_slice(station_name.as_bytes());
        name.push(0x1f);
        name.extend_from_slice(station_location.as_bytes());
        Self(Uuid::new_v5(&STATION_NAMESPACE, &name))
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for StationId {
    fn default() -> Self {
        Self(Uuid::nil())
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Join key across the fuel tables. Matching is exact on both fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StationKey {
    pub station_name: String,
    pub station_location: String,
}

impl StationKey {
    pub fn new(station_name: impl Into<String>, station_location: impl Into<String>) -> Self {
        Self {
            station_name: station_name.into(),
            station_location: station_location.into(),
        }
    }

    pub fn id(&self) -> StationId {
        StationId::derive(&self.station_name, &self.station_location)
    }
}

impl fmt::Display for StationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.station_name, self.station_location)
    }
}

/// One row in a single fuel-type price table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub id: i64,
    #[serde(default)]
    pub station_id: StationId,
    #[serde(default)]
    pub station_name: String,
    #[serde(default)]
    pub station_location: String,
    #[serde(default, deserialize_with = "lenient_price")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_tags")]
    pub tags: Vec<String>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub effective_date: Option<NaiveDate>,
}

impl PriceRecord {
    pub fn key(&self) -> StationKey {
        StationKey::new(self.station_name.clone(), self.station_location.clone())
    }

    pub fn matches(&self, key: &StationKey) -> bool {
        self.station_name == key.station_name && self.station_location == key.station_location
    }

    /// Fill in the station id for rows that arrived without one
    pub fn normalized(mut self) -> Self {
        if self.station_id.is_nil() {
            self.station_id = StationId::derive(&self.station_name, &self.station_location);
        }
        self
    }
}

/// Insert payload for a price table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPriceRecord {
    pub station_id: StationId,
    pub station_name: String,
    pub station_location: String,
    pub price: Option<f64>,
    pub tags: Vec<String>,
    pub last_updated: DateTime<Utc>,
    pub effective_date: Option<NaiveDate>,
}

impl NewPriceRecord {
    pub fn new(
        key: &StationKey,
        price: Option<f64>,
        effective_date: NaiveDate,
        last_updated: DateTime<Utc>,
    ) -> Self {
        Self {
            station_id: key.id(),
            station_name: key.station_name.clone(),
            station_location: key.station_location.clone(),
            price,
            tags: Vec::new(),
            last_updated,
            effective_date: Some(effective_date),
        }
    }

    pub fn into_record(self, id: i64) -> PriceRecord {
        PriceRecord {
            id,
            station_id: self.station_id,
            station_name: self.station_name,
            station_location: self.station_location,
            price: self.price,
            tags: self.tags,
            last_updated: self.last_updated,
            effective_date: self.effective_date,
        }
    }
}

/// A price write produced by an approval or an edit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuelPrice {
    pub fuel: FuelType,
    pub price: f64,
}

/// Render a price the way listings show it: `₦617/L` or `N/A`
pub fn format_price(price: Option<f64>) -> String {
    match price {
        Some(p) if p.fract() == 0.0 => format!("₦{}/L", p as i64),
        Some(p) => format!("₦{:.2}/L", p),
        None => "N/A".to_string(),
    }
}

fn lenient_price<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| parse_price_value(&v)))
}

/// Accept numbers and numeric strings; anything else is a missing price
pub fn parse_price_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().filter(|p| p.is_finite()),
        serde_json::Value::String(s) => parse_price_str(s),
        _ => None,
    }
}

pub fn parse_price_str(s: &str) -> Option<f64> {
    s.trim().replace(',', "").parse::<f64>().ok().filter(|p| p.is_finite())
}

fn lenient_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

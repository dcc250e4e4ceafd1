//! Reconciliation of the three per-fuel price tables into per-station and
//! per-location views.
//!
//! Rows are joined on the exact `(station_name, station_location)` pair. The
//! petrol table is the base of the fold: a merged record is created the first
//! time a key appears in it, and a later petrol row for the same key replaces
//! the petrol price only if its `last_updated` is strictly newer. Diesel and
//! kerosene take the first matching row and are not re-resolved by timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::{format_price, PriceRecord, StationId, StationKey};

/// Which stations a merge emits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    /// Only stations with at least one petrol row
    #[default]
    PetrolBase,
    /// Petrol-based stations followed by diesel/kerosene-only stations
    AllTables,
}

/// Derived, non-persisted view of all three fuel prices for one station
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedStation {
    pub station_id: StationId,
    pub station_name: String,
    pub station_location: String,
    #[serde(rename = "petrolPrice")]
    pub petrol_price: Option<f64>,
    #[serde(rename = "dieselPrice")]
    pub diesel_price: Option<f64>,
    #[serde(rename = "kerosenePrice")]
    pub kerosene_price: Option<f64>,
    pub last_updated: DateTime<Utc>,
    #[serde(rename = "stationCount")]
    pub station_count: usize,
    /// Prices as listings show them, filled once the merge settles
    pub display: PriceLabels,
}

/// Rendered prices, `N/A` where a fuel has no price
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceLabels {
    pub petrol: String,
    pub diesel: String,
    pub kerosene: String,
}

impl MergedStation {
    pub fn key(&self) -> StationKey {
        StationKey::new(self.station_name.clone(), self.station_location.clone())
    }

    pub fn price_for(&self, fuel: super::FuelType) -> Option<f64> {
        match fuel {
            super::FuelType::Petrol => self.petrol_price,
            super::FuelType::Diesel => self.diesel_price,
            super::FuelType::Kerosene => self.kerosene_price,
        }
    }

    pub fn labels(&self) -> PriceLabels {
        PriceLabels {
            petrol: format_price(self.petrol_price),
            diesel: format_price(self.diesel_price),
            kerosene: format_price(self.kerosene_price),
        }
    }
}

/// Stations sharing one `station_location`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationGroup {
    pub station_location: String,
    pub slug: String,
    #[serde(rename = "stationCount")]
    pub station_count: usize,
    pub stations: Vec<MergedStation>,
}

type KeyRef<'a> = (&'a str, &'a str);

fn key_of(row: &PriceRecord) -> KeyRef<'_> {
    (row.station_name.as_str(), row.station_location.as_str())
}

/// First row per key, in the order rows are encountered
fn first_by_key(rows: &[PriceRecord]) -> HashMap<KeyRef<'_>, &PriceRecord> {
    let mut index = HashMap::with_capacity(rows.len());
    for row in rows {
        index.entry(key_of(row)).or_insert(row);
    }
    index
}

/// Distinct station names per location across all three tables
pub fn station_counts(
    petrol: &[PriceRecord],
    diesel: &[PriceRecord],
    kerosene: &[PriceRecord],
) -> HashMap<String, usize> {
    let mut names: HashMap<&str, HashSet<&str>> = HashMap::new();
    for row in petrol.iter().chain(diesel).chain(kerosene) {
        names
            .entry(row.station_location.as_str())
            .or_default()
            .insert(row.station_name.as_str());
    }
    names
        .into_iter()
        .map(|(location, stations)| (location.to_string(), stations.len()))
        .collect()
}

pub fn station_count(
    location: &str,
    petrol: &[PriceRecord],
    diesel: &[PriceRecord],
    kerosene: &[PriceRecord],
) -> usize {
    petrol
        .iter()
        .chain(diesel)
        .chain(kerosene)
        .filter(|row| row.station_location == location)
        .map(|row| row.station_name.as_str())
        .collect::<HashSet<_>>()
        .len()
}

fn latest<'a>(stamps: impl IntoIterator<Item = &'a DateTime<Utc>>) -> Option<DateTime<Utc>> {
    stamps.into_iter().max().copied()
}

pub fn merge_stations(
    petrol: &[PriceRecord],
    diesel: &[PriceRecord],
    kerosene: &[PriceRecord],
    coverage: Coverage,
) -> Vec<MergedStation> {
    let counts = station_counts(petrol, diesel, kerosene);
    let diesel_index = first_by_key(diesel);
    let kerosene_index = first_by_key(kerosene);

    let mut merged: Vec<MergedStation> = Vec::new();
    // timestamp of the petrol row currently behind each merged petrol price
    let mut petrol_stamps: Vec<DateTime<Utc>> = Vec::new();
    let mut positions: HashMap<KeyRef<'_>, usize> = HashMap::new();

    for row in petrol {
        let key = key_of(row);
        if let Some(&i) = positions.get(&key) {
            if row.last_updated > petrol_stamps[i] {
                merged[i].petrol_price = row.price;
                merged[i].last_updated = merged[i].last_updated.max(row.last_updated);
                petrol_stamps[i] = row.last_updated;
            }
            continue;
        }

        let diesel_row = diesel_index.get(&key).copied();
        let kerosene_row = kerosene_index.get(&key).copied();
        let last_updated = latest(
            std::iter::once(&row.last_updated)
                .chain(diesel_row.map(|r| &r.last_updated))
                .chain(kerosene_row.map(|r| &r.last_updated)),
        )
        .unwrap_or(row.last_updated);

        positions.insert(key, merged.len());
        petrol_stamps.push(row.last_updated);
        merged.push(MergedStation {
            station_id: StationId::derive(key.0, key.1),
            station_name: row.station_name.clone(),
            station_location: row.station_location.clone(),
            petrol_price: row.price,
            diesel_price: diesel_row.and_then(|r| r.price),
            kerosene_price: kerosene_row.and_then(|r| r.price),
            last_updated,
            station_count: counts.get(key.1).copied().unwrap_or(0),
            display: PriceLabels::default(),
        });
    }

    if coverage == Coverage::AllTables {
        for row in diesel.iter().chain(kerosene) {
            let key = key_of(row);
            if positions.contains_key(&key) {
                continue;
            }
            let diesel_row = diesel_index.get(&key).copied();
            let kerosene_row = kerosene_index.get(&key).copied();
            let last_updated = latest(
                diesel_row
                    .map(|r| &r.last_updated)
                    .into_iter()
                    .chain(kerosene_row.map(|r| &r.last_updated)),
            )
            .unwrap_or(row.last_updated);

            positions.insert(key, merged.len());
            merged.push(MergedStation {
                station_id: StationId::derive(key.0, key.1),
                station_name: row.station_name.clone(),
                station_location: row.station_location.clone(),
                petrol_price: None,
                diesel_price: diesel_row.and_then(|r| r.price),
                kerosene_price: kerosene_row.and_then(|r| r.price),
                last_updated,
                station_count: counts.get(key.1).copied().unwrap_or(0),
                display: PriceLabels::default(),
            });
        }
    }

    for station in &mut merged {
        station.display = station.labels();
    }
    merged
}

/// Group merged stations by location, in order of first appearance
pub fn group_by_location(merged: &[MergedStation]) -> Vec<LocationGroup> {
    let mut groups: Vec<LocationGroup> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for station in merged {
        let location = station.station_location.as_str();
        let i = *positions.entry(location).or_insert_with(|| {
            groups.push(LocationGroup {
                station_location: location.to_string(),
                slug: slugify(location),
                station_count: station.station_count,
                stations: Vec::new(),
            });
            groups.len() - 1
        });
        groups[i].stations.push(station.clone());
    }

    groups
}

pub fn find_location<'a>(groups: &'a [LocationGroup], slug: &str) -> Option<&'a LocationGroup> {
    let wanted = slugify(slug);
    groups.iter().find(|g| g.slug == wanted)
}

/// URL-safe form of a location: `"Lekki Phase 1, Lagos"` → `"lekki-phase-1-lagos"`
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    let mut pending_dash = false;

    for c in lowered.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else if c.is_whitespace() || c == '-' {
            pending_dash = true;
        }
    }

    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 9, hour, 0, 0).unwrap()
    }

    fn row(id: i64, name: &str, loc: &str, price: Option<f64>, hour: u32) -> PriceRecord {
        PriceRecord {
            id,
            station_id: StationId::derive(name, loc),
            station_name: name.to_string(),
            station_location: loc.to_string(),
            price,
            tags: Vec::new(),
            last_updated: at(hour),
            effective_date: None,
        }
    }

    #[test]
    fn test_merge_matches_diesel_by_name_and_location() {
        let petrol = vec![row(1, "A", "X", Some(600.0), 8)];
        let diesel = vec![row(2, "A", "X", Some(650.0), 9)];
        let merged = merge_stations(&petrol, &diesel, &[], Coverage::PetrolBase);

        assert_eq!(merged.len(), 1);
        let m = &merged[0];
        assert_eq!(m.station_name, "A");
        assert_eq!(m.station_location, "X");
        assert_eq!(m.petrol_price, Some(600.0));
        assert_eq!(m.diesel_price, Some(650.0));
        assert_eq!(m.kerosene_price, None);
        assert_eq!(m.station_count, 1);
        assert_eq!(m.last_updated, at(9));
    }

    #[test]
    fn test_merge_json_shape() {
        let petrol = vec![row(1, "A", "X", Some(600.0), 8)];
        let diesel = vec![row(2, "A", "X", Some(650.0), 8)];
        let merged = merge_stations(&petrol, &diesel, &[], Coverage::PetrolBase);
        let json = serde_json::to_value(&merged[0]).unwrap();
        assert_eq!(json["station_name"], "A");
        assert_eq!(json["station_location"], "X");
        assert_eq!(json["petrolPrice"], 600.0);
        assert_eq!(json["dieselPrice"], 650.0);
        assert!(json["kerosenePrice"].is_null());
        assert_eq!(json["stationCount"], 1);
        assert_eq!(json["display"]["petrol"], "₦600/L");
        assert_eq!(json["display"]["diesel"], "₦650/L");
        assert_eq!(json["display"]["kerosene"], "N/A");
    }

    #[test]
    fn test_same_name_different_location_does_not_match() {
        let petrol = vec![row(1, "A", "X", Some(600.0), 8)];
        let diesel = vec![row(2, "A", "Y", Some(650.0), 8)];
        let merged = merge_stations(&petrol, &diesel, &[], Coverage::PetrolBase);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].diesel_price, None);
    }

    #[test]
    fn test_duplicate_petrol_rows_later_timestamp_wins() {
        let petrol = vec![
            row(1, "A", "X", Some(600.0), 10),
            row(2, "A", "X", Some(580.0), 8),
            row(3, "A", "X", Some(620.0), 12),
        ];
        let merged = merge_stations(&petrol, &[], &[], Coverage::PetrolBase);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].petrol_price, Some(620.0));
        assert_eq!(merged[0].last_updated, at(12));
        assert_eq!(merged[0].display.petrol, "₦620/L");
    }

    #[test]
    fn test_equal_timestamp_keeps_first_petrol_row() {
        let petrol = vec![row(1, "A", "X", Some(600.0), 10), row(2, "A", "X", Some(700.0), 10)];
        let merged = merge_stations(&petrol, &[], &[], Coverage::PetrolBase);
        assert_eq!(merged[0].petrol_price, Some(600.0));
    }

    #[test]
    fn test_duplicate_diesel_rows_first_encountered_wins() {
        let petrol = vec![row(1, "A", "X", Some(600.0), 8)];
        let diesel = vec![row(2, "A", "X", Some(650.0), 8), row(3, "A", "X", Some(700.0), 12)];
        let merged = merge_stations(&petrol, &diesel, &[], Coverage::PetrolBase);
        assert_eq!(merged[0].diesel_price, Some(650.0));
    }

    #[test]
    fn test_petrol_base_drops_diesel_only_station() {
        let petrol = vec![row(1, "A", "X", Some(600.0), 8)];
        let diesel = vec![row(2, "B", "X", Some(650.0), 8)];
        let kerosene = vec![row(3, "C", "Y", Some(400.0), 8)];
        let merged = merge_stations(&petrol, &diesel, &kerosene, Coverage::PetrolBase);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].station_name, "A");
        // B still counts towards X
        assert_eq!(merged[0].station_count, 2);
    }

    #[test]
    fn test_all_tables_appends_orphans_in_order() {
        let petrol = vec![row(1, "A", "X", Some(600.0), 8)];
        let diesel = vec![row(2, "B", "X", Some(650.0), 8)];
        let kerosene = vec![row(3, "C", "Y", Some(400.0), 8), row(4, "B", "X", Some(410.0), 9)];
        let merged = merge_stations(&petrol, &diesel, &kerosene, Coverage::AllTables);

        let names: Vec<_> = merged.iter().map(|m| m.station_name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(merged[1].petrol_price, None);
        assert_eq!(merged[1].diesel_price, Some(650.0));
        assert_eq!(merged[1].kerosene_price, Some(410.0));
        assert_eq!(merged[1].last_updated, at(9));
        assert_eq!(merged[2].station_count, 1);
    }

    #[test]
    fn test_output_follows_petrol_order() {
        let petrol = vec![
            row(1, "C", "X", Some(1.0), 8),
            row(2, "A", "X", Some(2.0), 8),
            row(3, "B", "Y", Some(3.0), 8),
        ];
        let merged = merge_stations(&petrol, &[], &[], Coverage::PetrolBase);
        let names: Vec<_> = merged.iter().map(|m| m.station_name.as_str()).collect();
        assert_eq!(names, vec!["C", "A", "B"]);
    }

    #[rstest]
    #[case("X", 3)]
    #[case("Y", 1)]
    #[case("Z", 0)]
    fn test_station_count_distinct_names_per_location(#[case] location: &str, #[case] expected: usize) {
        let petrol = vec![row(1, "A", "X", Some(1.0), 8), row(2, "A", "X", Some(1.0), 9)];
        let diesel = vec![row(3, "B", "X", Some(1.0), 8), row(4, "A", "Y", Some(1.0), 8)];
        let kerosene = vec![row(5, "C", "X", None, 8)];

        assert_eq!(station_count(location, &petrol, &diesel, &kerosene), expected);
        let counts = station_counts(&petrol, &diesel, &kerosene);
        assert_eq!(counts.get(location).copied().unwrap_or(0), expected);
    }

    #[test]
    fn test_missing_prices_stay_none() {
        let petrol = vec![row(1, "A", "X", None, 8)];
        let kerosene = vec![row(2, "A", "X", None, 8)];
        let merged = merge_stations(&petrol, &[], &kerosene, Coverage::PetrolBase);
        assert_eq!(merged[0].petrol_price, None);
        assert_eq!(merged[0].kerosene_price, None);
    }

    #[test]
    fn test_group_by_location() {
        let petrol = vec![
            row(1, "A", "Ikeja, Lagos", Some(610.0), 8),
            row(2, "B", "Abuja", Some(620.0), 8),
            row(3, "C", "Ikeja, Lagos", Some(605.0), 8),
        ];
        let merged = merge_stations(&petrol, &[], &[], Coverage::PetrolBase);
        let groups = group_by_location(&merged);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].station_location, "Ikeja, Lagos");
        assert_eq!(groups[0].slug, "ikeja-lagos");
        assert_eq!(groups[0].station_count, 2);
        assert_eq!(groups[0].stations.len(), 2);
        assert_eq!(groups[1].slug, "abuja");

        assert_eq!(find_location(&groups, "ikeja-lagos").unwrap().stations.len(), 2);
        assert_eq!(find_location(&groups, "Ikeja Lagos").unwrap().slug, "ikeja-lagos");
        assert!(find_location(&groups, "kano").is_none());
    }

    #[rstest]
    #[case("Lekki Phase 1, Lagos", "lekki-phase-1-lagos")]
    #[case("  Victoria   Island -- Lagos ", "victoria-island-lagos")]
    #[case("Port-Harcourt", "port-harcourt")]
    #[case("Ọ̀yọ́", "y")]
    #[case("", "")]
    fn test_slugify(#[case] location: &str, #[case] slug: &str) {
        assert_eq!(slugify(location), slug);
    }
}

use serde::{Deserialize, Serialize};

use super::merge::{merge_stations, Coverage, MergedStation};
use super::{FuelType, PriceRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change to one fuel table, published by the store after each write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
    pub fuel: FuelType,
    pub kind: ChangeKind,
    pub record: PriceRecord,
}

/// Subscriber-side copy of the three price tables, kept current by applying
/// change events in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceBoard {
    pub petrol: Vec<PriceRecord>,
    pub diesel: Vec<PriceRecord>,
    pub kerosene: Vec<PriceRecord>,
}

impl PriceBoard {
    pub fn new(petrol: Vec<PriceRecord>, diesel: Vec<PriceRecord>, kerosene: Vec<PriceRecord>) -> Self {
        Self {
            petrol,
            diesel,
            kerosene,
        }
    }

    pub fn table(&self, fuel: FuelType) -> &[PriceRecord] {
        match fuel {
            FuelType::Petrol => &self.petrol,
            FuelType::Diesel => &self.diesel,
            FuelType::Kerosene => &self.kerosene,
        }
    }

    fn table_mut(&mut self, fuel: FuelType) -> &mut Vec<PriceRecord> {
        match fuel {
            FuelType::Petrol => &mut self.petrol,
            FuelType::Diesel => &mut self.diesel,
            FuelType::Kerosene => &mut self.kerosene,
        }
    }

    /// An insert of an id already on the board is a replay and is ignored
    pub fn apply(&mut self, change: &PriceChange) {
        let rows = self.table_mut(change.fuel);
        match change.kind {
            ChangeKind::Insert => {
                if !rows.iter().any(|r| r.id == change.record.id) {
                    rows.push(change.record.clone());
                }
            }
            ChangeKind::Update => match rows.iter_mut().find(|r| r.id == change.record.id) {
                Some(existing) => *existing = change.record.clone(),
                None => rows.push(change.record.clone()),
            },
            ChangeKind::Delete => rows.retain(|r| r.id != change.record.id),
        }
    }

    pub fn merged(&self, coverage: Coverage) -> Vec<MergedStation> {
        merge_stations(&self.petrol, &self.diesel, &self.kerosene, coverage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StationId;
    use chrono::Utc;

    fn record(id: i64, name: &str, price: f64) -> PriceRecord {
        PriceRecord {
            id,
            station_id: StationId::derive(name, "X"),
            station_name: name.to_string(),
            station_location: "X".to_string(),
            price: Some(price),
            tags: Vec::new(),
            last_updated: Utc::now(),
            effective_date: None,
        }
    }

    fn change(fuel: FuelType, kind: ChangeKind, record: PriceRecord) -> PriceChange {
        PriceChange { fuel, kind, record }
    }

    #[test]
    fn test_insert_update_delete() {
        let mut board = PriceBoard::default();
        board.apply(&change(FuelType::Petrol, ChangeKind::Insert, record(1, "A", 600.0)));
        board.apply(&change(FuelType::Diesel, ChangeKind::Insert, record(1, "A", 650.0)));
        assert_eq!(board.petrol.len(), 1);
        assert_eq!(board.diesel.len(), 1);

        board.apply(&change(FuelType::Petrol, ChangeKind::Update, record(1, "A", 610.0)));
        assert_eq!(board.petrol[0].price, Some(610.0));
        assert_eq!(board.diesel[0].price, Some(650.0));

        board.apply(&change(FuelType::Petrol, ChangeKind::Delete, record(1, "A", 610.0)));
        assert!(board.petrol.is_empty());
        assert_eq!(board.diesel.len(), 1);
    }

    #[test]
    fn test_update_of_unknown_row_appends() {
        let mut board = PriceBoard::default();
        board.apply(&change(FuelType::Kerosene, ChangeKind::Update, record(9, "B", 400.0)));
        assert_eq!(board.table(FuelType::Kerosene).len(), 1);
    }

    #[test]
    fn test_replayed_insert_is_ignored() {
        let mut board = PriceBoard::new(vec![record(1, "A", 600.0)], vec![], vec![]);
        board.apply(&change(FuelType::Petrol, ChangeKind::Insert, record(1, "A", 600.0)));
        assert_eq!(board.petrol.len(), 1);

        board.apply(&change(FuelType::Diesel, ChangeKind::Insert, record(1, "A", 650.0)));
        assert_eq!(board.diesel.len(), 1);
    }

    #[test]
    fn test_merged_view_tracks_changes() {
        let mut board = PriceBoard::new(vec![record(1, "A", 600.0)], vec![], vec![]);
        board.apply(&change(FuelType::Kerosene, ChangeKind::Insert, record(5, "A", 400.0)));
        let merged = board.merged(Coverage::PetrolBase);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].kerosene_price, Some(400.0));
    }
}

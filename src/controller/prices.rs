use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::ServiceError;
use crate::domain::{
    cheapest, find_location, group_by_location, matches_search, merge_stations, paginate, sort_by_price, Coverage,
    DomainError, FuelType, LocationGroup, MergedStation, NewPriceRecord, Page, PriceRecord, SortOrder, StationKey,
};
use crate::store::{PriceStore, StoreError};

#[derive(Debug, Clone, Default)]
pub struct ListingQuery {
    pub search: Option<String>,
    pub page: usize,
    pub page_size: Option<usize>,
}

/// One fuel table, sorted, with the cheapest station
#[derive(Debug, Clone, Serialize)]
pub struct FuelTable {
    pub fuel: FuelType,
    pub rows: Vec<PriceRecord>,
    pub cheapest: Option<PriceRecord>,
}

#[derive(Debug, Clone)]
pub struct AddPriceEntry {
    pub fuel: FuelType,
    pub station_name: String,
    pub station_location: String,
    pub price: Option<f64>,
    pub effective_date: NaiveDate,
}

/// Per-fuel prices for an edit; `None` leaves that fuel untouched
#[derive(Debug, Clone, Default)]
pub struct StationPrices {
    pub petrol: Option<f64>,
    pub diesel: Option<f64>,
    pub kerosene: Option<f64>,
}

impl StationPrices {
    fn get(&self, fuel: FuelType) -> Option<f64> {
        match fuel {
            FuelType::Petrol => self.petrol,
            FuelType::Diesel => self.diesel,
            FuelType::Kerosene => self.kerosene,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EditOutcome {
    pub updated: Vec<PriceRecord>,
    pub inserted: Vec<PriceRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub station: StationKey,
    pub removed: Vec<TableRemoval>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableRemoval {
    pub table: &'static str,
    pub rows: usize,
}

pub(crate) fn validate_station(name: &str, location: &str) -> Result<StationKey, DomainError> {
    let name = name.trim();
    let location = location.trim();
    if name.is_empty() {
        return Err(DomainError::Validation("station name is required".to_string()));
    }
    if location.is_empty() {
        return Err(DomainError::Validation("station location is required".to_string()));
    }
    Ok(StationKey::new(name, location))
}

pub(crate) fn validate_price(fuel: FuelType, price: Option<f64>) -> Result<(), DomainError> {
    match price {
        Some(p) if !p.is_finite() || p < 0.0 => Err(DomainError::Validation(format!(
            "{} price must be a non-negative number",
            fuel.label()
        ))),
        _ => Ok(()),
    }
}

/// Reads and administrator writes over the three price tables
pub struct PriceService {
    store: Arc<dyn PriceStore>,
    coverage: Coverage,
    page_size: usize,
}

impl PriceService {
    pub fn new(store: Arc<dyn PriceStore>, coverage: Coverage, page_size: usize) -> Self {
        Self {
            store,
            coverage,
            page_size,
        }
    }

    /// All three tables, fetched concurrently
    pub async fn tables(&self) -> Result<(Vec<PriceRecord>, Vec<PriceRecord>, Vec<PriceRecord>), StoreError> {
        futures::try_join!(
            self.store.list_prices(FuelType::Petrol),
            self.store.list_prices(FuelType::Diesel),
            self.store.list_prices(FuelType::Kerosene),
        )
    }

    pub async fn merged(&self) -> Result<Vec<MergedStation>, StoreError> {
        let (petrol, diesel, kerosene) = self.tables().await?;
        Ok(merge_stations(&petrol, &diesel, &kerosene, self.coverage))
    }

    pub async fn listing(&self, query: ListingQuery) -> Result<Page<MergedStation>, ServiceError> {
        let term = query.search.unwrap_or_default();
        let stations: Vec<MergedStation> = self
            .merged()
            .await?
            .into_iter()
            .filter(|s| matches_search(&s.station_name, &s.station_location, &term))
            .collect();
        Ok(paginate(stations, query.page, query.page_size.unwrap_or(self.page_size)))
    }

    pub async fn locations(&self) -> Result<Vec<LocationGroup>, ServiceError> {
        Ok(group_by_location(&self.merged().await?))
    }

    pub async fn location(&self, slug: &str) -> Result<LocationGroup, ServiceError> {
        let groups = self.locations().await?;
        find_location(&groups, slug)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("location {slug}")))
    }

    pub async fn fuel_table(&self, fuel: FuelType, order: SortOrder) -> Result<FuelTable, ServiceError> {
        let mut rows = self.store.list_prices(fuel).await?;
        sort_by_price(&mut rows, order, |r| r.price);
        let cheapest = cheapest(&rows, |r| r.price).cloned();
        Ok(FuelTable { fuel, rows, cheapest })
    }

    pub async fn add_entry(&self, entry: AddPriceEntry) -> Result<PriceRecord, ServiceError> {
        let key = validate_station(&entry.station_name, &entry.station_location)?;
        validate_price(entry.fuel, entry.price)?;
        let record = NewPriceRecord::new(&key, entry.price, entry.effective_date, Utc::now());
        let row = self.store.insert_price(entry.fuel, record).await?;
        info!(fuel = %entry.fuel, station = %key, id = row.id, "price entry added");
        Ok(row)
    }

    pub async fn edit_station(&self, key: StationKey, prices: StationPrices) -> Result<EditOutcome, ServiceError> {
        let key = validate_station(&key.station_name, &key.station_location)?;
        let changes: Vec<(FuelType, f64)> = FuelType::all()
            .filter_map(|fuel| prices.get(fuel).map(|p| (fuel, p)))
            .collect();
        if changes.is_empty() {
            return Err(DomainError::Validation("at least one price is required".to_string()).into());
        }
        for (fuel, price) in &changes {
            validate_price(*fuel, Some(*price))?;
        }

        let now = Utc::now();
        let mut outcome = EditOutcome {
            updated: Vec::new(),
            inserted: Vec::new(),
        };
        for (fuel, price) in changes {
            let rows = self.store.update_station_price(fuel, &key, price, now).await?;
            if rows.is_empty() {
                let record = NewPriceRecord::new(&key, Some(price), now.date_naive(), now);
                outcome.inserted.push(self.store.insert_price(fuel, record).await?);
            } else {
                outcome.updated.extend(rows);
            }
        }
        info!(
            station = %key,
            updated = outcome.updated.len(),
            inserted = outcome.inserted.len(),
            "station prices edited"
        );
        Ok(outcome)
    }

    /// Delete the station from every table. Tables that succeed stay deleted
    /// when another fails.
    pub async fn delete_station(&self, key: StationKey) -> Result<DeleteOutcome, ServiceError> {
        let fuels: Vec<FuelType> = FuelType::all().collect();
        let results = join_all(fuels.iter().map(|fuel| self.store.delete_station(*fuel, &key))).await;

        let mut removed = Vec::new();
        let mut failed = Vec::new();
        for (fuel, result) in fuels.into_iter().zip(results) {
            match result {
                Ok(rows) => removed.push(TableRemoval {
                    table: fuel.table(),
                    rows: rows.len(),
                }),
                Err(e) => {
                    warn!(error = %e, table = fuel.table(), station = %key, "station delete failed");
                    failed.push(format!("{}: {e}", fuel.table()));
                }
            }
        }

        if !failed.is_empty() {
            return Err(ServiceError::PartialFailure(failed.join("; ")));
        }
        if removed.iter().all(|r| r.rows == 0) {
            return Err(ServiceError::NotFound(format!("station {key}")));
        }
        info!(station = %key, "station deleted");
        Ok(DeleteOutcome { station: key, removed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 9).unwrap()
    }

    fn service(coverage: Coverage) -> (Arc<MemoryStore>, PriceService) {
        let key = |n: &str, l: &str| StationKey::new(n, l);
        let store = Arc::new(MemoryStore::with_prices(
            vec![
                NewPriceRecord::new(&key("A", "Ikeja, Lagos"), Some(600.0), day(), Utc::now()),
                NewPriceRecord::new(&key("B", "Ikeja, Lagos"), None, day(), Utc::now()),
                NewPriceRecord::new(&key("C", "Ajah, Lagos"), Some(590.0), day(), Utc::now()),
            ],
            vec![NewPriceRecord::new(&key("A", "Ikeja, Lagos"), Some(650.0), day(), Utc::now())],
            vec![NewPriceRecord::new(&key("K", "Yaba, Lagos"), Some(400.0), day(), Utc::now())],
        ));
        let service = PriceService::new(store.clone(), coverage, 2);
        (store, service)
    }

    #[tokio::test]
    async fn test_listing_filters_and_pages() {
        let (_, svc) = service(Coverage::PetrolBase);
        let page = svc.listing(ListingQuery::default()).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total_pages, 2);

        let page = svc
            .listing(ListingQuery {
                search: Some("ajah".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].station_name, "C");
    }

    #[tokio::test]
    async fn test_all_tables_coverage_includes_kerosene_only_station() {
        let (_, svc) = service(Coverage::AllTables);
        let all = svc.merged().await.unwrap();
        assert!(all.iter().any(|s| s.station_name == "K"));

        let (_, svc) = service(Coverage::PetrolBase);
        assert!(!svc.merged().await.unwrap().iter().any(|s| s.station_name == "K"));
    }

    #[tokio::test]
    async fn test_location_by_slug() {
        let (_, svc) = service(Coverage::PetrolBase);
        let group = svc.location("ikeja-lagos").await.unwrap();
        assert_eq!(group.station_count, 2);
        assert!(matches!(svc.location("nowhere").await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fuel_table_sorted_missing_last() {
        let (_, svc) = service(Coverage::PetrolBase);
        let table = svc.fuel_table(FuelType::Petrol, SortOrder::Desc).await.unwrap();
        let prices: Vec<_> = table.rows.iter().map(|r| r.price).collect();
        assert_eq!(prices, vec![Some(600.0), Some(590.0), None]);
        assert_eq!(table.cheapest.unwrap().station_name, "C");
    }

    #[tokio::test]
    async fn test_add_entry_validates() {
        let (_, svc) = service(Coverage::PetrolBase);
        let bad = svc
            .add_entry(AddPriceEntry {
                fuel: FuelType::Diesel,
                station_name: "  ".into(),
                station_location: "Ikeja".into(),
                price: Some(1.0),
                effective_date: day(),
            })
            .await;
        assert!(matches!(bad, Err(ServiceError::Domain(DomainError::Validation(_)))));

        let negative = svc
            .add_entry(AddPriceEntry {
                fuel: FuelType::Diesel,
                station_name: "A".into(),
                station_location: "Ikeja".into(),
                price: Some(-5.0),
                effective_date: day(),
            })
            .await;
        assert!(negative.is_err());

        let row = svc
            .add_entry(AddPriceEntry {
                fuel: FuelType::Diesel,
                station_name: " A ".into(),
                station_location: "Ikeja".into(),
                price: None,
                effective_date: day(),
            })
            .await
            .unwrap();
        assert_eq!(row.station_name, "A");
        assert!(row.tags.is_empty());
        assert_eq!(row.effective_date, Some(day()));
    }

    #[tokio::test]
    async fn test_edit_updates_existing_and_inserts_missing() {
        let (store, svc) = service(Coverage::PetrolBase);
        let outcome = svc
            .edit_station(
                StationKey::new("A", "Ikeja, Lagos"),
                StationPrices {
                    petrol: Some(610.0),
                    diesel: None,
                    kerosene: Some(420.0),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.updated.len(), 1);
        assert_eq!(outcome.inserted.len(), 1);

        let diesel = store.list_prices(FuelType::Diesel).await.unwrap();
        assert_eq!(diesel[0].price, Some(650.0));
        let merged = svc.merged().await.unwrap();
        let a = merged.iter().find(|s| s.station_name == "A").unwrap();
        assert_eq!(a.petrol_price, Some(610.0));
        assert_eq!(a.kerosene_price, Some(420.0));
    }

    #[tokio::test]
    async fn test_edit_without_prices_is_rejected() {
        let (_, svc) = service(Coverage::PetrolBase);
        let r = svc
            .edit_station(StationKey::new("A", "Ikeja, Lagos"), StationPrices::default())
            .await;
        assert!(r.is_err());
    }

    #[tokio::test]
    async fn test_delete_station_across_tables() {
        let (store, svc) = service(Coverage::PetrolBase);
        let outcome = svc.delete_station(StationKey::new("A", "Ikeja, Lagos")).await.unwrap();
        let total: usize = outcome.removed.iter().map(|r| r.rows).sum();
        assert_eq!(total, 2);
        assert!(store.list_prices(FuelType::Diesel).await.unwrap().is_empty());

        let again = svc.delete_station(StationKey::new("A", "Ikeja, Lagos")).await;
        assert!(matches!(again, Err(ServiceError::NotFound(_))));
    }
}

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use super::{error::ApiError, response::ApiResponse};
use crate::{
    auth::AdminUser,
    controller::{prices::AddPriceEntry, AppState},
    domain::{FuelType, SortOrder},
};

#[derive(Debug, Deserialize)]
pub struct FuelTableParams {
    #[serde(default)]
    pub order: SortOrder,
}

/// GET /prices/:fuel
pub async fn fuel_table(
    State(st): State<AppState>,
    Path(fuel): Path<String>,
    Query(q): Query<FuelTableParams>,
) -> Result<impl IntoResponse, ApiError> {
    let fuel: FuelType = fuel
        .parse()
        .map_err(|_| ApiError::NotFound(format!("fuel type {fuel}")))?;
    let table = st.prices.fuel_table(fuel, q.order).await?;
    let count = table.rows.len();
    Ok(ApiResponse::success(table).with_count(count))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddPriceRequest {
    pub fuel: FuelType,
    #[validate(length(min = 1, message = "station name is required"))]
    pub station_name: String,
    #[validate(length(min = 1, message = "station location is required"))]
    pub station_location: String,
    #[validate(range(min = 0.0))]
    pub price: Option<f64>,
    pub effective_date: NaiveDate,
}

/// POST /prices - direct entry into one fuel table
pub async fn add_price(
    State(st): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(req): Json<AddPriceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let row = st
        .prices
        .add_entry(AddPriceEntry {
            fuel: req.fuel,
            station_name: req.station_name,
            station_location: req.station_location,
            price: req.price,
            effective_date: req.effective_date,
        })
        .await?;
    info!(admin = %admin.user.email, fuel = %req.fuel, id = row.id, "price added");
    Ok(ApiResponse::created(row))
}

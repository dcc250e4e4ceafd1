//! Merged station listings and administrator station edits

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::info;
use validator::{Validate, ValidationError};

use super::{error::ApiError, response::ApiResponse};
use crate::{
    auth::AdminUser,
    controller::{
        prices::{ListingQuery, StationPrices},
        AppState,
    },
    domain::StationKey,
};

#[derive(Debug, Deserialize)]
pub struct ListingParams {
    pub search: Option<String>,
    #[serde(default)]
    pub page: usize,
    pub page_size: Option<usize>,
}

pub async fn list_stations(
    State(st): State<AppState>,
    Query(q): Query<ListingParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = st
        .prices
        .listing(ListingQuery {
            search: q.search,
            page: q.page,
            page_size: q.page_size.map(|s| s.min(100)),
        })
        .await?;
    Ok(ApiResponse::page(page))
}

pub async fn list_locations(State(st): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let groups = st.prices.locations().await?;
    let count = groups.len();
    Ok(ApiResponse::success(groups).with_count(count))
}

pub async fn get_location(
    State(st): State<AppState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::success(st.prices.location(&slug).await?))
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "at_least_one_price"))]
pub struct EditStationRequest {
    #[validate(length(min = 1, message = "station name is required"))]
    pub station_name: String,
    #[validate(length(min = 1, message = "station location is required"))]
    pub station_location: String,
    #[validate(range(min = 0.0))]
    pub petrol_price: Option<f64>,
    #[validate(range(min = 0.0))]
    pub diesel_price: Option<f64>,
    #[validate(range(min = 0.0))]
    pub kerosene_price: Option<f64>,
}

fn at_least_one_price(req: &EditStationRequest) -> Result<(), ValidationError> {
    if req.petrol_price.is_none() && req.diesel_price.is_none() && req.kerosene_price.is_none() {
        return Err(ValidationError::new("at_least_one_price"));
    }
    Ok(())
}

pub async fn edit_station(
    State(st): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(req): Json<EditStationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let outcome = st
        .prices
        .edit_station(
            StationKey::new(req.station_name, req.station_location),
            StationPrices {
                petrol: req.petrol_price,
                diesel: req.diesel_price,
                kerosene: req.kerosene_price,
            },
        )
        .await?;
    info!(admin = %admin.user.email, "station edited");
    Ok(ApiResponse::success(outcome))
}

#[derive(Debug, Deserialize)]
pub struct StationQuery {
    pub station_name: String,
    pub station_location: String,
}

pub async fn delete_station(
    State(st): State<AppState>,
    AdminUser(admin): AdminUser,
    Query(q): Query<StationQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = st
        .prices
        .delete_station(StationKey::new(q.station_name, q.station_location))
        .await?;
    info!(admin = %admin.user.email, station = %outcome.station, "station removed");
    Ok(ApiResponse::success(outcome))
}

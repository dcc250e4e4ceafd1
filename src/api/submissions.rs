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
    controller::{submissions::SubmissionInput, AppState},
    domain::{SubmissionQueue, SubmissionStatus},
};

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "at_least_one_price"))]
pub struct SubmitRequest {
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
    pub email: Option<String>,
}

fn at_least_one_price(req: &SubmitRequest) -> Result<(), ValidationError> {
    if req.petrol_price.is_none() && req.diesel_price.is_none() && req.kerosene_price.is_none() {
        return Err(ValidationError::new("at_least_one_price"));
    }
    Ok(())
}

/// POST /submissions - public price report
pub async fn submit(
    State(st): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let submission = st
        .submissions
        .submit(SubmissionInput {
            station_name: req.station_name,
            station_location: req.station_location,
            petrol_price: req.petrol_price,
            diesel_price: req.diesel_price,
            kerosene_price: req.kerosene_price,
            email: req.email,
        })
        .await?;
    Ok(ApiResponse::created(submission))
}

#[derive(Debug, Deserialize)]
pub struct SubmissionFilter {
    pub queue: Option<SubmissionQueue>,
    pub status: Option<SubmissionStatus>,
}

pub async fn list_submissions(
    State(st): State<AppState>,
    _admin: AdminUser,
    Query(f): Query<SubmissionFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = st.submissions.list(f.queue, f.status).await?;
    let count = rows.len();
    Ok(ApiResponse::success(rows).with_count(count))
}

fn parse_queue(raw: &str) -> Result<SubmissionQueue, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("submission queue {raw}")))
}

pub async fn approve(
    State(st): State<AppState>,
    AdminUser(admin): AdminUser,
    Path((queue, id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let queue = parse_queue(&queue)?;
    let outcome = st.submissions.approve(queue, id).await?;
    info!(admin = %admin.user.email, submission_id = id, "approved by admin");
    Ok(ApiResponse::success(outcome))
}

pub async fn reject(
    State(st): State<AppState>,
    AdminUser(admin): AdminUser,
    Path((queue, id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let queue = parse_queue(&queue)?;
    let submission = st.submissions.reject(queue, id).await?;
    info!(admin = %admin.user.email, submission_id = id, "rejected by admin");
    Ok(ApiResponse::success(submission))
}

/// POST /sync/forms - run the external form import now
pub async fn sync_forms(State(st): State<AppState>, _admin: AdminUser) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::success(st.sync.run().await?))
}

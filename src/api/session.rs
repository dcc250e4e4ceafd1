//! Account endpoints. Auth itself lives in the hosted backend.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{error::ApiError, response::ApiResponse};
use crate::{
    auth::{self, CurrentUser, Session},
    controller::AppState,
    domain::Profile,
};

#[derive(Debug, Deserialize, Validate)]
pub struct SignUpRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, message = "password must be at least 6 characters"))]
    pub password: String,
    #[validate(length(min = 1, message = "first name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, message = "last name is required"))]
    pub last_name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub session: Session,
    pub profile: Profile,
    pub is_admin: bool,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub profile: Profile,
    pub is_admin: bool,
}

pub async fn sign_up(
    State(st): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let profile = auth::register(
        st.auth.as_ref(),
        st.store.as_ref(),
        req.email.trim(),
        &req.password,
        req.first_name.trim(),
        req.last_name.trim(),
    )
    .await?;
    Ok(ApiResponse::created(profile))
}

pub async fn login(
    State(st): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let (session, profile) = auth::login(st.auth.as_ref(), st.store.as_ref(), req.email.trim(), &req.password).await?;
    let is_admin = profile.is_admin(&st.cfg.auth.admin_emails);
    Ok(ApiResponse::success(LoginResponse {
        session,
        profile,
        is_admin,
    }))
}

pub async fn logout(State(st): State<AppState>, user: CurrentUser) -> Result<impl IntoResponse, ApiError> {
    st.auth.sign_out(&user.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(State(st): State<AppState>, user: CurrentUser) -> impl IntoResponse {
    let is_admin = user.is_admin(&st.cfg.auth.admin_emails);
    ApiResponse::success(MeResponse {
        profile: user.profile,
        is_admin,
    })
}

//! Email/password accounts, delegated to the hosted backend's auth service.
//!
//! The service never sees password hashes and never verifies tokens itself:
//! a bearer token is valid when the auth service resolves it to a user.

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::config::BackendConfig;
use crate::controller::AppState;
use crate::domain::{Profile, Role};
use crate::store::hosted::{backend_headers, backend_message};
use crate::store::{PriceStore, StoreError};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Rejected(String),
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("Profile not found")]
    ProfileNotFound,
    #[error("auth service unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Rejected(m) => ApiError::BadRequest(m),
            AuthError::InvalidToken => ApiError::Unauthorized("invalid or expired token".to_string()),
            AuthError::ProfileNotFound => ApiError::NotFound("Profile not found".to_string()),
            AuthError::Unavailable(m) => ApiError::ServiceUnavailable(m),
            AuthError::Store(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: u64,
    pub user: AuthUser,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str, first_name: &str, last_name: &str)
        -> Result<AuthUser, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// Resolve an access token to its user
    async fn user(&self, access_token: &str) -> Result<AuthUser, AuthError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;
}

/// Client for the backend's `/auth/v1` endpoints
pub struct HostedAuth {
    auth_url: String,
    client: reqwest::Client,
}

impl HostedAuth {
    pub fn new(cfg: &BackendConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_seconds))
            .default_headers(backend_headers(&cfg.anon_key)?)
            .build()
            .context("building auth client")?;
        Ok(Self {
            auth_url: format!("{}/auth/v1", cfg.url.trim_end_matches('/')),
            client,
        })
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<serde_json::Value, AuthError> {
        let resp = req.send().await.map_err(|e| AuthError::Unavailable(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| AuthError::Unavailable(e.to_string()))?;
        if status.is_server_error() {
            return Err(AuthError::Unavailable(format!("HTTP {status}: {}", backend_message(&body))));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AuthError::InvalidToken);
        }
        if !status.is_success() {
            return Err(AuthError::Rejected(backend_message(&body)));
        }
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| AuthError::Unavailable(format!("malformed auth response: {e}")))
    }

    fn bearer(token: &str) -> Result<HeaderValue, AuthError> {
        HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| AuthError::InvalidToken)
    }
}

fn parse_user(value: serde_json::Value) -> Result<AuthUser, AuthError> {
    // sign-up answers with the user itself, or with a session wrapping it
    let user = match value.get("user") {
        Some(u) if !u.is_null() => u.clone(),
        _ => value,
    };
    serde_json::from_value(user).map_err(|e| AuthError::Unavailable(format!("malformed user: {e}")))
}

#[async_trait]
impl AuthProvider for HostedAuth {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<AuthUser, AuthError> {
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "data": { "first_name": first_name, "last_name": last_name },
        });
        let req = self
            .client
            .post(format!("{}/signup", self.auth_url))
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string());
        parse_user(self.send(req).await?)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let req = self
            .client
            .post(format!("{}/token", self.auth_url))
            .query(&[("grant_type", "password")])
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string());
        let value = self.send(req).await?;
        serde_json::from_value(value).map_err(|e| AuthError::Unavailable(format!("malformed session: {e}")))
    }

    async fn user(&self, access_token: &str) -> Result<AuthUser, AuthError> {
        let req = self
            .client
            .get(format!("{}/user", self.auth_url))
            .header(AUTHORIZATION, Self::bearer(access_token)?);
        parse_user(self.send(req).await?)
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let req = self
            .client
            .post(format!("{}/logout", self.auth_url))
            .header(AUTHORIZATION, Self::bearer(access_token)?);
        self.send(req).await.map(|_| ())
    }
}

/// Create the account and its `profiles` row
pub async fn register(
    auth: &dyn AuthProvider,
    store: &dyn PriceStore,
    email: &str,
    password: &str,
    first_name: &str,
    last_name: &str,
) -> Result<Profile, AuthError> {
    let user = auth.sign_up(email, password, first_name, last_name).await?;
    let profile = Profile {
        id: user.id,
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        email: if user.email.is_empty() { email.to_string() } else { user.email },
        role: Role::User,
    };
    let profile = store.insert_profile(&profile).await?;
    debug!(user_id = %profile.id, "account registered");
    Ok(profile)
}

/// Sign in; an account without a profile row cannot log in
pub async fn login(
    auth: &dyn AuthProvider,
    store: &dyn PriceStore,
    email: &str,
    password: &str,
) -> Result<(Session, Profile), AuthError> {
    let session = auth.sign_in(email, password).await?;
    match store.get_profile(session.user.id).await? {
        Some(profile) => Ok((session, profile)),
        None => {
            warn!(user_id = %session.user.id, "login without profile row");
            if let Err(e) = auth.sign_out(&session.access_token).await {
                debug!(error = %e, "sign-out after missing profile failed");
            }
            Err(AuthError::ProfileNotFound)
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Signed-in caller: a valid bearer token plus the matching profile
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub token: String,
    pub user: AuthUser,
    pub profile: Profile,
}

impl CurrentUser {
    pub fn is_admin(&self, admin_emails: &[String]) -> bool {
        self.profile.is_admin(admin_emails)
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?
            .to_string();
        let user = state.auth.user(&token).await.map_err(|e| match e {
            AuthError::Rejected(_) => ApiError::Unauthorized("invalid or expired token".to_string()),
            other => other.into(),
        })?;
        // same rule as login: an account without a profile row is not signed in
        let profile = state
            .store
            .get_profile(user.id)
            .await?
            .ok_or(AuthError::ProfileNotFound)?;
        Ok(Self { token, user, profile })
    }
}

/// Signed-in caller with administrator rights
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let current = CurrentUser::from_request_parts(parts, state).await?;
        if !current.is_admin(&state.cfg.auth.admin_emails) {
            debug!(user_id = %current.user.id, "admin route refused");
            return Err(ApiError::Forbidden);
        }
        Ok(Self(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn hosted(server: &MockServer) -> HostedAuth {
        HostedAuth::new(&BackendConfig {
            url: server.uri(),
            anon_key: "anon".to_string(),
            ..BackendConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_sign_in_parses_session() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header("apikey", "anon"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "jwt",
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "refresh",
                "user": { "id": id, "email": "ada@example.com", "aud": "authenticated" }
            })))
            .mount(&server)
            .await;

        let session = hosted(&server).await.sign_in("ada@example.com", "secret").await.unwrap();
        assert_eq!(session.access_token, "jwt");
        assert_eq!(session.user.id, id);
        assert_eq!(session.expires_in, 3600);
    }

    #[tokio::test]
    async fn test_bad_credentials_are_rejected_with_backend_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let err = hosted(&server).await.sign_in("ada@example.com", "nope").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid login credentials");
    }

    #[tokio::test]
    async fn test_expired_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401).set_body_string("{\"msg\":\"JWT expired\"}"))
            .mount(&server)
            .await;

        let err = hosted(&server).await.user("stale").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[test]
    fn test_parse_user_from_either_shape() {
        let id = Uuid::new_v4();
        let bare = serde_json::json!({ "id": id, "email": "a@example.com" });
        let wrapped = serde_json::json!({ "access_token": "t", "user": { "id": id, "email": "a@example.com" } });
        assert_eq!(parse_user(bare).unwrap().id, id);
        assert_eq!(parse_user(wrapped).unwrap().id, id);
    }
}

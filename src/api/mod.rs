pub mod error;
pub mod health;
pub mod prices;
pub mod response;
pub mod session;
pub mod stations;
pub mod stream;
pub mod submissions;
pub mod v1;

use axum::{
    http::{HeaderValue, StatusCode},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::warn;

use crate::{config::Config, controller::AppState};

pub fn router(state: AppState, cfg: &Config) -> Router {
    let mut router = Router::new().nest("/api/v1", v1::router(state));

    if cfg.server.enable_cors {
        match cfg.server.cors_origin.parse::<HeaderValue>() {
            Ok(origin) => {
                let cors = CorsLayer::new()
                    .allow_origin(origin)
                    .allow_methods([
                        axum::http::Method::GET,
                        axum::http::Method::POST,
                        axum::http::Method::PUT,
                        axum::http::Method::DELETE,
                    ])
                    .allow_headers([
                        axum::http::header::AUTHORIZATION,
                        axum::http::header::CONTENT_TYPE,
                    ]);
                router = router.layer(cors);
            }
            Err(e) => warn!(error = %e, origin = %cfg.server.cors_origin, "invalid CORS origin, CORS disabled"),
        }
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(64 * 1024))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    Duration::from_secs(cfg.server.request_timeout_secs),
                )),
        )
        .layer(TraceLayer::new_for_http())
}

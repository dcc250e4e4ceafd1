use axum::{
    routing::{get, post, put},
    Router,
};

use super::{health, prices, session, stations, stream, submissions};
use crate::controller::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .route("/health/live", get(health::liveness_check))
        .route("/stations", get(stations::list_stations).delete(stations::delete_station))
        .route("/stations/edit", put(stations::edit_station))
        .route("/locations", get(stations::list_locations))
        .route("/locations/:slug", get(stations::get_location))
        .route("/prices", post(prices::add_price))
        .route("/prices/stream", get(stream::price_stream))
        .route("/prices/:fuel", get(prices::fuel_table))
        .route("/submissions", post(submissions::submit).get(submissions::list_submissions))
        .route("/submissions/:queue/:id/approve", post(submissions::approve))
        .route("/submissions/:queue/:id/reject", post(submissions::reject))
        .route("/sync/forms", post(submissions::sync_forms))
        .route("/auth/signup", post(session::sign_up))
        .route("/auth/login", post(session::login))
        .route("/auth/logout", post(session::logout))
        .route("/auth/me", get(session::me))
        .with_state(state)
}

pub mod api;
pub mod auth;
pub mod config;
pub mod controller;
pub mod domain;
pub mod notify;
pub mod store;
pub mod telemetry;

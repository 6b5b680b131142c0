//! HTTP gateway. Each sibling module exports a subrouter; this module merges
//! them and attaches the shared [`AppState`].

use std::sync::Arc;

use axum::Router;

use crate::calibration::CalibrationRegistry;
use crate::telemetry::TelemetryClient;
use crate::Config;

mod fuel_series;
mod health;

pub use fuel_series::FuelSeriesResponse;

// ---

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub telemetry: TelemetryClient,
    pub registry: Arc<CalibrationRegistry>,
    pub config: Config,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(fuel_series::router())
        .merge(health::router())
        .with_state(state)
}

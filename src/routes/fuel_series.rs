use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::calibration::CalibrationCurve;
use crate::error::{PipelineError, RegistryError};
use crate::filter::FilterDirection;
use crate::models::SeriesRow;
use crate::pipeline::{self, FuelSeries, PipelineConfig};
use crate::telemetry::TimeRange;

use super::AppState;

// ---

/// How many skipped-item diagnostics are echoed back to the caller.
const MAX_SKIPPED_EXAMPLES: usize = 10;

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/fuel/series", get(handler))
}

/// Query parameters for `GET /fuel/series`.
///
/// Pipeline options left unset fall back to the service configuration.
#[derive(Debug, Default, Deserialize)]
pub struct SeriesQuery {
    vehicle_no: String,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    /// Tank model to calibrate with, instead of the vehicle's assigned one.
    tank: Option<String>,
    resample_period_seconds: Option<u32>,
    moving_average_window: Option<usize>,
    fir_cutoff: Option<f64>,
    fir_sampling_rate: Option<f64>,
    fir_numtaps: Option<usize>,
    fir_direction: Option<FilterDirection>,
    max_buckets: Option<usize>,
}

impl SeriesQuery {
    fn pipeline_config(&self, base: &PipelineConfig) -> PipelineConfig {
        // ---
        PipelineConfig {
            resample_period_seconds: self
                .resample_period_seconds
                .unwrap_or(base.resample_period_seconds),
            moving_average_window: self
                .moving_average_window
                .unwrap_or(base.moving_average_window),
            fir_cutoff: self.fir_cutoff.unwrap_or(base.fir_cutoff),
            fir_sampling_rate: self.fir_sampling_rate.unwrap_or(base.fir_sampling_rate),
            fir_numtaps: self.fir_numtaps.unwrap_or(base.fir_numtaps),
            fir_direction: self.fir_direction.unwrap_or(base.fir_direction),
            max_buckets: self.max_buckets.unwrap_or(base.max_buckets),
        }
    }

    fn time_range(&self) -> TimeRange {
        TimeRange {
            from: self.from,
            to: self.to,
        }
    }
}

/// JSON body returned by `GET /fuel/series`.
#[derive(Debug, Serialize, Deserialize)]
pub struct FuelSeriesResponse {
    pub vehicle: String,
    pub run_id: Uuid,
    pub period_seconds: u32,
    pub filled_buckets: usize,
    pub skipped: usize,
    pub skipped_examples: Vec<String>,
    /// `[c0, c1, c2]` of `volume = c0 + c1 * raw + c2 * raw^2`.
    pub calibration_coefficients: [f64; 3],
    pub pipeline: PipelineConfig,
    pub rows: Vec<SeriesRow>,
}

impl FuelSeriesResponse {
    pub fn new(vehicle: String, pipeline: PipelineConfig, series: &FuelSeries) -> Self {
        // ---
        Self {
            vehicle,
            run_id: series.run_id,
            period_seconds: series.period_seconds,
            filled_buckets: series.filled_buckets,
            skipped: series.skipped.len(),
            skipped_examples: series
                .skipped
                .iter()
                .take(MAX_SKIPPED_EXAMPLES)
                .map(ToString::to_string)
                .collect(),
            calibration_coefficients: series.calibration.coefficients(),
            pipeline,
            rows: series.rows().collect(),
        }
    }
}

/// Failures of one request, mapped onto HTTP status codes.
#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    Registry(RegistryError),
    Telemetry(anyhow::Error),
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        // ---
        match self {
            ApiError::Pipeline(PipelineError::EmptyInput { .. })
            | ApiError::Pipeline(PipelineError::InsufficientData { .. })
            | ApiError::Pipeline(PipelineError::SpanTooLarge { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Pipeline(_) => StatusCode::BAD_REQUEST,
            ApiError::Registry(RegistryError::UnknownTank(_))
            | ApiError::Registry(RegistryError::UnknownVehicle(_)) => StatusCode::NOT_FOUND,
            ApiError::Registry(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Telemetry(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Pipeline(e) => e.to_string(),
            ApiError::Registry(e) => e.to_string(),
            ApiError::Telemetry(e) => format!("{e:#}"),
            ApiError::Internal(msg) => msg.clone(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Pipeline(e)
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        ApiError::Registry(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let status = self.status();
        let error = self.message();
        if status.is_server_error() {
            error!("GET /fuel/series failed: {}", error);
        } else {
            warn!("GET /fuel/series rejected: {}", error);
        }
        (status, Json(ErrorBody { error })).into_response()
    }
}

async fn handler(
    Query(params): Query<SeriesQuery>,
    State(state): State<AppState>,
) -> Result<Json<FuelSeriesResponse>, ApiError> {
    // ---
    let span = info_span!("fuel_series", vehicle = %params.vehicle_no);
    serve_series(params, state).instrument(span).await
}

async fn serve_series(
    params: SeriesQuery,
    state: AppState,
) -> Result<Json<FuelSeriesResponse>, ApiError> {
    // ---
    info!("GET /fuel/series - Starting pipeline");

    // Step 1: Resolve calibration and settings before any fetch
    debug!("GET /fuel/series - Step 1");
    let curve: CalibrationCurve = match &params.tank {
        Some(tank) => state.registry.tank(tank)?.clone(),
        None => state.registry.for_vehicle(&params.vehicle_no)?.clone(),
    };
    let config = params.pipeline_config(&state.config.pipeline);
    config.validate()?;

    // Step 2: Fetch telemetry
    debug!("GET /fuel/series - Step 2");
    let records = state
        .telemetry
        .fetch_records(&params.vehicle_no, &params.time_range())
        .await
        .map_err(ApiError::Telemetry)?;

    // Step 3: Run the pipeline off the async workers
    debug!("GET /fuel/series - Step 3");
    let span = tracing::Span::current();
    let series = tokio::task::spawn_blocking(move || {
        span.in_scope(|| pipeline::run(records, &curve, &config))
    })
    .await
    .map_err(|e| ApiError::Internal(format!("pipeline task failed: {e}")))??;

    info!("Pipeline complete, returning {} rows", series.len());
    Ok(Json(FuelSeriesResponse::new(
        params.vehicle_no,
        config,
        &series,
    )))
}

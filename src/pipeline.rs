//! Pipeline orchestrator.
//!
//! One call runs Normalizer → Resampler → moving average → FIR → calibration
//! (applied to both the raw and the smoothed level) and returns every column
//! on the same uniform time index. Intermediate series stay inside the run.
//!
//! Configuration and the calibration table are checked before any telemetry
//! is touched, so a bad table fails the run without filtering work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};
use uuid::Uuid;

use crate::calibration::{CalibrationCurve, CalibrationModel};
use crate::error::{PipelineError, SkippedItem};
use crate::filter::{moving_average, FilterDirection, FirFilter};
use crate::models::{SeriesRow, TelemetryRecord};
use crate::normalizer::normalize;
use crate::resampler::resample;

// ---

pub const DEFAULT_RESAMPLE_PERIOD_SECONDS: u32 = 60;
pub const DEFAULT_MOVING_AVERAGE_WINDOW: usize = 20;
pub const DEFAULT_FIR_CUTOFF: f64 = 0.01;
pub const DEFAULT_FIR_SAMPLING_RATE: f64 = 3.0;
pub const DEFAULT_FIR_NUMTAPS: usize = 101;
/// One leap year of one-minute buckets.
pub const DEFAULT_MAX_BUCKETS: usize = 527_040;

/// Tunables for one pipeline run.
///
/// `fir_cutoff` and `fir_sampling_rate` must be given in the same units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub resample_period_seconds: u32,
    pub moving_average_window: usize,
    pub fir_cutoff: f64,
    pub fir_sampling_rate: f64,
    pub fir_numtaps: usize,
    pub fir_direction: FilterDirection,
    /// Upper bound on the resampled grid; longer spans fail the run.
    pub max_buckets: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resample_period_seconds: DEFAULT_RESAMPLE_PERIOD_SECONDS,
            moving_average_window: DEFAULT_MOVING_AVERAGE_WINDOW,
            fir_cutoff: DEFAULT_FIR_CUTOFF,
            fir_sampling_rate: DEFAULT_FIR_SAMPLING_RATE,
            fir_numtaps: DEFAULT_FIR_NUMTAPS,
            fir_direction: FilterDirection::Causal,
            max_buckets: DEFAULT_MAX_BUCKETS,
        }
    }
}

impl PipelineConfig {
    // ---
    /// Check every option and design the FIR filter they describe.
    pub fn validate(&self) -> Result<FirFilter, PipelineError> {
        // ---
        if self.resample_period_seconds == 0 {
            return Err(PipelineError::InvalidConfig {
                reason: "resample period must be positive".into(),
            });
        }
        if self.moving_average_window == 0 {
            return Err(PipelineError::InvalidConfig {
                reason: "moving average window must be positive".into(),
            });
        }
        if self.max_buckets == 0 {
            return Err(PipelineError::InvalidConfig {
                reason: "bucket limit must be positive".into(),
            });
        }
        FirFilter::lowpass(self.fir_numtaps, self.fir_cutoff, self.fir_sampling_rate)
    }

    /// Fewest resampled buckets a run with this configuration can filter.
    pub fn min_samples(&self, fir: &FirFilter) -> usize {
        self.moving_average_window.max(fir.min_len(self.fir_direction))
    }
}

/// Output of one run. All columns share `timestamps`.
#[derive(Debug, Clone)]
pub struct FuelSeries {
    pub run_id: Uuid,
    pub period_seconds: u32,
    pub timestamps: Vec<DateTime<Utc>>,
    pub raw_level: Vec<f64>,
    pub smoothed_level: Vec<f64>,
    pub raw_volume: Vec<f64>,
    pub calibrated_volume: Vec<f64>,
    pub speed: Vec<f64>,
    /// Buckets that had no readings and were forward-filled.
    pub filled_buckets: usize,
    /// Telemetry items dropped during normalization.
    pub skipped: Vec<SkippedItem>,
    pub calibration: CalibrationModel,
}

impl FuelSeries {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Row view over the column arrays.
    pub fn rows(&self) -> impl Iterator<Item = SeriesRow> + '_ {
        (0..self.len()).map(|i| SeriesRow {
            timestamp: self.timestamps[i],
            raw_level: self.raw_level[i],
            smoothed_level: self.smoothed_level[i],
            raw_volume: self.raw_volume[i],
            calibrated_volume: self.calibrated_volume[i],
            speed: self.speed[i],
        })
    }
}

/// Run the full pipeline over one vehicle's telemetry documents.
pub fn run<I>(
    records: I,
    curve: &CalibrationCurve,
    config: &PipelineConfig,
) -> Result<FuelSeries, PipelineError>
where
    I: IntoIterator<Item = TelemetryRecord>,
{
    // ---
    let run_id = Uuid::new_v4();
    let span = info_span!("fuel_pipeline", %run_id);
    let _guard = span.enter();

    let fir = config.validate()?;
    let calibration = CalibrationModel::fit(curve)?;

    let normalized = normalize(records);
    if normalized.is_empty() {
        return Err(PipelineError::EmptyInput {
            reason: format!(
                "no readings could be decoded ({} item(s) skipped)",
                normalized.skipped.len()
            ),
        });
    }

    let resampled = resample(
        &normalized.points,
        config.resample_period_seconds,
        config.max_buckets,
    )?;

    let required = config.min_samples(&fir);
    if resampled.len() < required {
        return Err(PipelineError::InsufficientData {
            stage: "low-pass filter stage",
            required,
            actual: resampled.len(),
        });
    }

    debug!(
        window = config.moving_average_window,
        numtaps = fir.numtaps(),
        direction = %config.fir_direction,
        "Filtering level series"
    );
    let pre_filtered = moving_average(&resampled.level, config.moving_average_window)?;
    let smoothed_level = fir.apply(&pre_filtered, config.fir_direction)?;

    let raw_volume = calibration.apply(&resampled.level);
    let calibrated_volume = calibration.apply(&smoothed_level);

    let extrapolated = smoothed_level
        .iter()
        .filter(|&&l| !calibration.covers(l))
        .count();
    if extrapolated > 0 {
        debug!(
            extrapolated,
            "Smoothed levels outside the calibrated raw range"
        );
    }

    info!(
        readings = normalized.len(),
        skipped = normalized.skipped.len(),
        buckets = resampled.len(),
        filled = resampled.filled,
        "Fuel pipeline complete"
    );

    Ok(FuelSeries {
        run_id,
        period_seconds: config.resample_period_seconds,
        timestamps: resampled.timestamps,
        raw_level: resampled.level,
        smoothed_level,
        raw_volume,
        calibrated_volume,
        speed: resampled.speed,
        filled_buckets: resampled.filled,
        skipped: normalized.skipped,
        calibration,
    })
}

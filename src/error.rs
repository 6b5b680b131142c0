//! Error taxonomy for the fuel signal pipeline.
//!
//! Two families live here:
//! - [`RecordParseError`] describes a single telemetry item that could not be
//!   decoded. It is recovered locally by the normalizer (skip, log, continue)
//!   and never aborts a run.
//! - [`PipelineError`] is fatal for one run. A run either produces a complete
//!   [`crate::FuelSeries`] or returns one of these.

use std::fmt;

use thiserror::Error;

// ---

/// Why one telemetry item was dropped during normalization.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordParseError {
    #[error("item is not an object")]
    NotAnObject,

    #[error("missing field `{field}`")]
    MissingField { field: &'static str },

    #[error("invalid timestamp: {reason}")]
    InvalidTimestamp { reason: String },

    #[error("invalid `{field}`: {reason}")]
    InvalidNumber { field: &'static str, reason: String },
}

/// A dropped item together with its position in the flattened input.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedItem {
    pub index: usize,
    pub error: RecordParseError,
}

impl fmt::Display for SkippedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item {}: {}", self.index, self.error)
    }
}

/// A calibration table that cannot be turned into a model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("calibration needs at least {required} anchor points, got {actual}")]
    TooFewAnchors { required: usize, actual: usize },

    #[error("calibration anchors span only {distinct} distinct raw value(s); a degree-2 fit needs 3")]
    DegenerateAnchors { distinct: usize },

    #[error("calibration anchor {index} is not a finite number")]
    NonFiniteAnchor { index: usize },

    #[error("calibration raw units decrease at anchor {index}")]
    NotMonotonic { index: usize },
}

/// Fatal failure of one pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no usable data: {reason}")]
    EmptyInput { reason: String },

    #[error("{stage} needs at least {required} samples, series has {actual}")]
    InsufficientData {
        stage: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("readings span {buckets} resample buckets, more than the limit of {limit}")]
    SpanTooLarge { buckets: u64, limit: usize },

    #[error("calibration fit failed: {0}")]
    CalibrationFit(#[from] FitError),

    #[error("invalid pipeline configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// Failures loading or querying the calibration registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read calibration registry {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse calibration registry: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no calibration table for tank model `{0}`")]
    UnknownTank(String),

    #[error("no calibration table registered for vehicle `{0}`")]
    UnknownVehicle(String),

    #[error("calibration table `{tank}` is unusable: {source}")]
    InvalidCurve {
        tank: String,
        #[source]
        source: FitError,
    },
}

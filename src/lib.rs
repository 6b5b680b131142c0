//! Fuel-level signal conditioning for vehicle telemetry.
//!
//! Turns noisy, irregularly sampled `fuelLevelE2` readings into a uniform,
//! smoothed and calibrated fuel-volume series:
//!
//! - [`normalizer`] decodes telemetry items and repairs dropout zeros
//! - [`resampler`] buckets readings onto a fixed-period grid with forward-fill
//! - [`filter`] runs the moving-average + FIR low-pass cascade
//! - [`calibration`] fits and applies the raw-unit → volume polynomial
//! - [`pipeline`] composes the stages into one run
//!
//! The remaining modules (`config`, `telemetry`, `routes`) are the service
//! plumbing used by the `fuelflow` binary.

pub mod calibration;
pub mod config;
pub mod error;
pub mod filter;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod resampler;
pub mod routes;
pub mod telemetry;

pub use calibration::{CalibrationCurve, CalibrationModel, CalibrationRegistry};
pub use config::Config;
pub use error::{FitError, PipelineError, RecordParseError, RegistryError, SkippedItem};
pub use filter::FilterDirection;
pub use models::{RawReading, SeriesRow, TelemetryRecord};
pub use pipeline::{run, FuelSeries, PipelineConfig};

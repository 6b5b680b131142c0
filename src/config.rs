//! Configuration loader for the `fuelflow` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Pipeline tunables land in [`PipelineConfig`] and
//! are validated here, so a bad value stops the service at startup instead
//! of failing every request.
//!
use std::env;

use anyhow::{anyhow, Context, Result};

use crate::filter::FilterDirection;
use crate::pipeline::{
    PipelineConfig, DEFAULT_FIR_CUTOFF, DEFAULT_FIR_NUMTAPS, DEFAULT_FIR_SAMPLING_RATE,
    DEFAULT_MAX_BUCKETS, DEFAULT_MOVING_AVERAGE_WINDOW, DEFAULT_RESAMPLE_PERIOD_SECONDS,
};

/// Parse an optional environment variable into `$ty`, with a default value.
macro_rules! parse_env {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $lookup($var_name)
            .map(|v: String| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($lookup:expr, $var_name:expr) => {
        $lookup($var_name)
            .ok_or_else(|| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

pub const DEFAULT_CALIBRATION_PATH: &str = "config/calibration.json";

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Telemetry API base URL (document store gateway).
    pub telemetry_url: String,

    /// Maximum number of telemetry pages to fetch per request (safety limit).
    pub telemetry_max_pages: u32,

    /// Path of the calibration registry JSON file.
    pub calibration_path: String,

    /// TCP port the HTTP server binds to.
    pub listen_port: u16,

    /// Default pipeline tunables; requests may override them.
    pub pipeline: PipelineConfig,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `TELEMETRY_API_URL` – telemetry API base URL
///
/// Optional:
/// - `TELEMETRY_MAX_PAGES` – max telemetry pages per request (default: 100)
/// - `CALIBRATION_REGISTRY` – registry file (default: `config/calibration.json`)
/// - `LISTEN_PORT` – HTTP port (default: 8080)
/// - `RESAMPLE_PERIOD_SECONDS` (default: 60)
/// - `MOVING_AVERAGE_WINDOW` (default: 20)
/// - `FIR_CUTOFF` (default: 0.01)
/// - `FIR_SAMPLING_RATE` (default: 3)
/// - `FIR_NUMTAPS` (default: 101)
/// - `FIR_DIRECTION` – `causal` or `zero_phase` (default: `causal`)
/// - `MAX_BUCKETS` – resampled grid limit per run (default: 527040)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    load_with(|name| env::var(name).ok())
}

/// Same as [`load_from_env`], reading variables through `lookup`.
pub fn load_with<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    let telemetry_url = require_env!(lookup, "TELEMETRY_API_URL");
    let telemetry_max_pages = parse_env!(lookup, "TELEMETRY_MAX_PAGES", u32, 100);
    let calibration_path = lookup("CALIBRATION_REGISTRY")
        .unwrap_or_else(|| DEFAULT_CALIBRATION_PATH.to_string());
    let listen_port = parse_env!(lookup, "LISTEN_PORT", u16, 8080);

    let pipeline = PipelineConfig {
        resample_period_seconds: parse_env!(
            lookup,
            "RESAMPLE_PERIOD_SECONDS",
            u32,
            DEFAULT_RESAMPLE_PERIOD_SECONDS
        ),
        moving_average_window: parse_env!(
            lookup,
            "MOVING_AVERAGE_WINDOW",
            usize,
            DEFAULT_MOVING_AVERAGE_WINDOW
        ),
        fir_cutoff: parse_env!(lookup, "FIR_CUTOFF", f64, DEFAULT_FIR_CUTOFF),
        fir_sampling_rate: parse_env!(lookup, "FIR_SAMPLING_RATE", f64, DEFAULT_FIR_SAMPLING_RATE),
        fir_numtaps: parse_env!(lookup, "FIR_NUMTAPS", usize, DEFAULT_FIR_NUMTAPS),
        fir_direction: parse_env!(lookup, "FIR_DIRECTION", FilterDirection, FilterDirection::Causal),
        max_buckets: parse_env!(lookup, "MAX_BUCKETS", usize, DEFAULT_MAX_BUCKETS),
    };
    pipeline
        .validate()
        .context("pipeline settings from environment are invalid")?;

    Ok(Config {
        telemetry_url,
        telemetry_max_pages,
        calibration_path,
        listen_port,
        pipeline,
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Strips any query string from the telemetry URL, since API keys tend
    /// to travel there.
    pub fn log_config(&self) {
        // ---
        let masked_url = match self.telemetry_url.split_once('?') {
            Some((base, _)) => format!("{base}?****"),
            None => self.telemetry_url.clone(),
        };
        let p = &self.pipeline;

        tracing::info!("Configuration loaded:");
        tracing::info!("  TELEMETRY_API_URL       : {}", masked_url);
        tracing::info!("  TELEMETRY_MAX_PAGES     : {}", self.telemetry_max_pages);
        tracing::info!("  CALIBRATION_REGISTRY    : {}", self.calibration_path);
        tracing::info!("  LISTEN_PORT             : {}", self.listen_port);
        tracing::info!("  RESAMPLE_PERIOD_SECONDS : {}", p.resample_period_seconds);
        tracing::info!("  MOVING_AVERAGE_WINDOW   : {}", p.moving_average_window);
        tracing::info!("  FIR_CUTOFF              : {}", p.fir_cutoff);
        tracing::info!("  FIR_SAMPLING_RATE       : {}", p.fir_sampling_rate);
        tracing::info!("  FIR_NUMTAPS             : {}", p.fir_numtaps);
        tracing::info!("  FIR_DIRECTION           : {}", p.fir_direction);
        tracing::info!("  MAX_BUCKETS             : {}", p.max_buckets);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_apply() {
        // ---
        let cfg = load_with(lookup_from(&[("TELEMETRY_API_URL", "http://telemetry:9000/geo")])).unwrap();

        assert_eq!(cfg.telemetry_url, "http://telemetry:9000/geo");
        assert_eq!(cfg.telemetry_max_pages, 100);
        assert_eq!(cfg.calibration_path, DEFAULT_CALIBRATION_PATH);
        assert_eq!(cfg.listen_port, 8080);
        assert_eq!(cfg.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_overrides_are_parsed() {
        // ---
        let cfg = load_with(lookup_from(&[
            ("TELEMETRY_API_URL", "http://t"),
            ("RESAMPLE_PERIOD_SECONDS", "30"),
            ("MOVING_AVERAGE_WINDOW", " 10 "),
            ("FIR_CUTOFF", "0.02"),
            ("FIR_NUMTAPS", "51"),
            ("FIR_DIRECTION", "zero_phase"),
            ("MAX_BUCKETS", "10080"),
        ]))
        .unwrap();

        assert_eq!(cfg.pipeline.resample_period_seconds, 30);
        assert_eq!(cfg.pipeline.moving_average_window, 10);
        assert_eq!(cfg.pipeline.fir_cutoff, 0.02);
        assert_eq!(cfg.pipeline.fir_numtaps, 51);
        assert_eq!(cfg.pipeline.fir_direction, FilterDirection::ZeroPhase);
        assert_eq!(cfg.pipeline.max_buckets, 10_080);
    }

    #[test]
    fn test_missing_url_is_an_error() {
        // ---
        let err = load_with(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("TELEMETRY_API_URL must be set"));
    }

    #[test]
    fn test_invalid_values_are_errors() {
        // ---
        let err = load_with(lookup_from(&[
            ("TELEMETRY_API_URL", "http://t"),
            ("FIR_NUMTAPS", "many"),
        ]))
        .unwrap_err();
        assert!(err.to_string().starts_with("Invalid FIR_NUMTAPS"));

        // Cutoff above Nyquist (fs / 2 = 1.5).
        let err = load_with(lookup_from(&[
            ("TELEMETRY_API_URL", "http://t"),
            ("FIR_CUTOFF", "2.0"),
        ]))
        .unwrap_err();
        assert!(format!("{err:#}").contains("Nyquist"));
    }
}

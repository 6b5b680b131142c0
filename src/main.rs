//! Application entry point for the `fuelflow` service.
//!
//! This binary orchestrates the startup sequence for the fuel signal API:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Loading and validating the calibration registry
//! - Mounting all API routes via the `routes` gateway
//! - Binding the Axum HTTP server and serving requests
//!
//! # Environment Variables
//! - `TELEMETRY_API_URL` (**required**) – telemetry store gateway
//! - `CALIBRATION_REGISTRY` (optional) – calibration tables JSON
//! - `FUEL_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `FUEL_ITEM_LOG_LEVEL` (optional) – level for per-item skip messages
//! - `FUEL_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See [`fuelflow::config`] for the pipeline tunables.
use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use fuelflow::routes::{self, AppState};
use fuelflow::telemetry::TelemetryClient;
use fuelflow::{config, CalibrationRegistry};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let registry = CalibrationRegistry::load(&cfg.calibration_path)
        .with_context(|| format!("Failed to load calibration registry '{}'", cfg.calibration_path))?;
    tracing::info!(
        "Calibration tables available: {}",
        registry.tank_models().collect::<Vec<_>>().join(", ")
    );

    let state = AppState {
        telemetry: TelemetryClient::new(cfg.telemetry_url.clone(), cfg.telemetry_max_pages),
        registry: Arc::new(registry),
        config: cfg.clone(),
    };

    // Build app from routes gateway
    let app: Router = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

/// Logging options read from the environment.
///
/// - `FUEL_LOG_LEVEL` (default `debug`) applies to this crate only; other
///   crates log at `warn`. `RUST_LOG`, when set, replaces the whole filter.
/// - `FUEL_ITEM_LOG_LEVEL` (default `warn`) applies to the per-item skip
///   messages of the normalizer and the telemetry page parser. A feed with
///   many malformed items can be quieted with `error`.
/// - `FUEL_SPAN_EVENTS`: `full`, `enter_exit`, or CLOSE only (default). The
///   CLOSE event of each `fuel_pipeline` span carries its `run_id` and run
///   time.
/// - `FORCE_COLOR`: `1|true|yes` on, `0|false|no` off, else TTY detection.
#[derive(Debug, PartialEq)]
struct TracingSettings {
    directives: Option<String>,
    span_events: FmtSpan,
    color: Option<bool>,
}

impl TracingSettings {
    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // ---
        let level_of = |name: &str, default: &'static str| match lookup(name).as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => default,
        };

        // None defers to RUST_LOG
        let directives = lookup("RUST_LOG").is_none().then(|| {
            let level = level_of("FUEL_LOG_LEVEL", "debug");
            let items = level_of("FUEL_ITEM_LOG_LEVEL", "warn");
            format!(
                "warn,fuelflow={level},fuelflow::normalizer={items},fuelflow::telemetry={items}"
            )
        });

        let span_events = match lookup("FUEL_SPAN_EVENTS").as_deref() {
            Some("full") => FmtSpan::FULL,
            Some("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
            _ => FmtSpan::CLOSE,
        };

        let color = match lookup("FORCE_COLOR").as_deref() {
            Some("1") | Some("true") | Some("yes") => Some(true),
            Some("0") | Some("false") | Some("no") => Some(false),
            _ => None,
        };

        Self {
            directives,
            span_events,
            color,
        }
    }
}

/// Install the global subscriber. Call once, before any event is emitted.
fn init_tracing() {
    // ---
    let settings = TracingSettings::from_lookup(|name| env::var(name).ok());

    let env_filter = match &settings.directives {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::from_default_env(),
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(settings.span_events)
        .with_env_filter(env_filter)
        .with_ansi(settings.color.unwrap_or_else(|| std::io::stdout().is_terminal()))
        .compact()
        .init();
}

//! Headless SPH runner
//!
//! Usage: `sph-runner [RUN_FILE]` (defaults to `configs/default.json`).
//! The log filter comes from `RUST_LOG`.

use std::process::ExitCode;

use sph_runner::RunConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_RUN_FILE: &str = "configs/default.json";

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sph_runner=info,sph_kernel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_RUN_FILE.to_string());

    let config = match RunConfig::load(&path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match sph_runner::run(&config) {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{json}"),
                Err(e) => tracing::warn!("failed to serialize report: {e}"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("run failed: {e}");
            ExitCode::FAILURE
        }
    }
}

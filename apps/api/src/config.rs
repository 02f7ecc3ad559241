use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::assessor::AssessMode;

/// Application configuration loaded from environment variables.
///
/// Vision provider keys are optional: with neither key set, every assessment
/// falls through to the deterministic offline template and the service still
/// produces reports.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    /// Root directory for per-job storage namespaces.
    pub data_dir: PathBuf,
    /// CSV price list. Missing or unreadable → the service runs unpriced.
    pub price_catalog_path: Option<PathBuf>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub assess_mode: AssessMode,
    /// Per-provider timeout for the external vision call.
    pub assess_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let assess_mode = match std::env::var("ASSESS_MODE") {
            Ok(raw) => raw
                .parse::<AssessMode>()
                .map_err(anyhow::Error::msg)
                .context("ASSESS_MODE must be 'structured' or 'narrative'")?,
            Err(_) => AssessMode::Structured,
        };

        Ok(Config {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            data_dir: PathBuf::from(
                std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            ),
            price_catalog_path: optional_env("PRICE_CATALOG_PATH").map(PathBuf::from),
            openai_api_key: optional_env("OPENAI_API_KEY"),
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            assess_mode,
            assess_timeout_secs: std::env::var("ASSESS_TIMEOUT_SECS")
                .unwrap_or_else(|_| "45".to_string())
                .parse::<u64>()
                .context("ASSESS_TIMEOUT_SECS must be a positive integer")?,
        })
    }
}

/// Returns Some(value) only when the variable is set and non-empty.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

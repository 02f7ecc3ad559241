//! Damage assessment — ordered provider chain with a guaranteed-success
//! terminal fallback.
//!
//! `DamageAssessor::assess` never fails: configured providers are tried in
//! fixed priority order with a bounded timeout each, and when every external
//! attempt errors out the deterministic offline template takes over. Callers
//! therefore always receive a well-formed (possibly empty) result, and every
//! submitted job yields a report.
//!
//! The hard logic here is the ordering/fallback policy and the defensive
//! parsing of model output — the AI call itself lives behind the narrow
//! `VisionProvider` trait.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

pub mod prompts;
pub mod provider;

use crate::config::Config;
use crate::models::ImageUpload;
use provider::{AnthropicVision, OpenAiVision, VisionProvider};

/// Provider label attached to results synthesized by the offline template.
pub const OFFLINE_PROVIDER: &str = "offline-template";

/// Narrative attached to offline structured results so the report makes the
/// degraded origin visible.
pub const OFFLINE_NOTE: &str = "Offline template estimate: no vision provider was \
reachable. Quantities below are defaults and require field verification.";

// Fixed template items used when every provider fails. Codes intentionally
// match common catalog entries so pricing still applies when available.
const TEMPLATE_ITEMS: &[(&str, &str, f64, &str)] = &[
    ("DRY123", "Drywall replacement", 10.0, "SF"),
    ("PAINT45", "Repainting walls", 1.0, "EA"),
];

/// Which answer shape the external capability is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessMode {
    Narrative,
    Structured,
}

impl FromStr for AssessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "narrative" => Ok(AssessMode::Narrative),
            "structured" => Ok(AssessMode::Structured),
            other => Err(format!("unknown assess mode '{other}'")),
        }
    }
}

/// A candidate line item as proposed by the assessor, before catalog
/// reconciliation. Quantities and prices are parsed leniently because models
/// frequently return numbers as strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLineItem {
    #[serde(default)]
    pub code: String,
    #[serde(default, alias = "desc")]
    pub description: String,
    #[serde(default, alias = "qty", deserialize_with = "lenient_f64")]
    pub quantity: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub price: Option<f64>,
}

/// Tagged assessment result; the composer dispatches on the tag instead of
/// duplicating layout logic per provider mode.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssessmentResult {
    Narrative { text: String },
    Structured { items: Vec<RawLineItem> },
}

/// One image's assessment plus the provider that produced it.
#[derive(Debug, Clone)]
pub struct AssessedImage {
    pub provider: &'static str,
    pub result: AssessmentResult,
}

/// Ordered chain of external vision providers terminated by the offline
/// template. The chain order is fixed at construction.
pub struct DamageAssessor {
    providers: Vec<Arc<dyn VisionProvider>>,
    timeout: Duration,
}

impl DamageAssessor {
    pub fn new(providers: Vec<Arc<dyn VisionProvider>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    /// Builds the provider chain from whichever API keys are configured.
    /// OpenAI is tried first (faster/cheaper), Anthropic second.
    pub fn from_config(config: &Config) -> Self {
        let mut providers: Vec<Arc<dyn VisionProvider>> = Vec::new();
        if let Some(key) = &config.openai_api_key {
            providers.push(Arc::new(OpenAiVision::new(
                key.clone(),
                config.assess_timeout_secs,
            )));
        }
        if let Some(key) = &config.anthropic_api_key {
            providers.push(Arc::new(AnthropicVision::new(
                key.clone(),
                config.assess_timeout_secs,
            )));
        }
        Self::new(providers, Duration::from_secs(config.assess_timeout_secs))
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Assesses one image. Infallible: exhausting the provider chain lands on
    /// the offline template.
    pub async fn assess(&self, image: &ImageUpload, mode: AssessMode) -> AssessedImage {
        let instruction = match mode {
            AssessMode::Narrative => prompts::NARRATIVE_INSTRUCTION,
            AssessMode::Structured => prompts::STRUCTURED_INSTRUCTION,
        };

        for provider in &self.providers {
            let attempt = tokio::time::timeout(self.timeout, provider.describe(image, instruction));
            match attempt.await {
                Ok(Ok(text)) if !text.trim().is_empty() => {
                    debug!(
                        provider = provider.name(),
                        image = %image.file_name,
                        "assessment succeeded"
                    );
                    return AssessedImage {
                        provider: provider.name(),
                        result: parse_result(&text, mode),
                    };
                }
                Ok(Ok(_)) => {
                    warn!(
                        provider = provider.name(),
                        image = %image.file_name,
                        "provider returned blank output, trying next"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        provider = provider.name(),
                        image = %image.file_name,
                        error = %e,
                        "provider failed, trying next"
                    );
                }
                Err(_) => {
                    warn!(
                        provider = provider.name(),
                        image = %image.file_name,
                        timeout_secs = self.timeout.as_secs(),
                        "provider timed out, trying next"
                    );
                }
            }
        }

        warn!(
            image = %image.file_name,
            "all providers exhausted, using offline template"
        );
        AssessedImage {
            provider: OFFLINE_PROVIDER,
            result: offline_template(mode),
        }
    }
}

/// Converts raw provider text into an `AssessmentResult`.
///
/// Structured mode parses defensively: fences are stripped, only a JSON array
/// is accepted as structured data, valid JSON of any other shape degrades to
/// an empty item list, and plain prose is passed through as narrative so the
/// model's answer stays visible. Parse problems never propagate as errors.
fn parse_result(text: &str, mode: AssessMode) -> AssessmentResult {
    match mode {
        AssessMode::Narrative => AssessmentResult::Narrative {
            text: text.trim().to_string(),
        },
        AssessMode::Structured => {
            let stripped = strip_json_fences(text);
            match serde_json::from_str::<Vec<RawLineItem>>(stripped) {
                Ok(items) => AssessmentResult::Structured { items },
                Err(_) => {
                    if serde_json::from_str::<serde_json::Value>(stripped).is_ok() {
                        warn!("structured assessment returned JSON that is not a list; treating as empty");
                        AssessmentResult::Structured { items: Vec::new() }
                    } else {
                        debug!("structured assessment returned prose; passing through as narrative");
                        AssessmentResult::Narrative {
                            text: text.trim().to_string(),
                        }
                    }
                }
            }
        }
    }
}

/// Deterministic local result used when no external provider is available.
fn offline_template(mode: AssessMode) -> AssessmentResult {
    match mode {
        AssessMode::Narrative => AssessmentResult::Narrative {
            text: format!(
                "{OFFLINE_NOTE}\n\nRecommended scope: replace damaged drywall and \
                 repaint the affected area."
            ),
        },
        AssessMode::Structured => AssessmentResult::Structured {
            items: TEMPLATE_ITEMS
                .iter()
                .map(|(code, description, quantity, unit)| RawLineItem {
                    code: code.to_string(),
                    description: description.to_string(),
                    quantity: *quantity,
                    unit: Some(unit.to_string()),
                    price: None,
                })
                .collect(),
        },
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from model output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Lenient numeric deserialization
// ────────────────────────────────────────────────────────────────────────────

/// Accepts a JSON number or a numeric string; anything else becomes 0.
fn lenient_f64<'de, D: Deserializer<'de>>(de: D) -> Result<f64, D::Error> {
    Ok(lenient_value_to_f64(serde_json::Value::deserialize(de)?).unwrap_or(0.0))
}

fn lenient_opt_f64<'de, D: Deserializer<'de>>(de: D) -> Result<Option<f64>, D::Error> {
    Ok(lenient_value_to_f64(serde_json::Value::deserialize(de)?))
}

fn lenient_value_to_f64(value: serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    }
}

//! Shared domain types passed between the intake, assessment, and composition stages.

use bytes::Bytes;
use serde::Serialize;

/// One uploaded image, held in memory for the duration of the pipeline run.
/// The original filename is preserved for display in the report; the stored
/// copy on disk uses a sanitized name (see `jobs`).
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl ImageUpload {
    /// Media type sent to vision providers. Falls back to the filename
    /// extension when the upload did not carry a content type.
    pub fn media_type(&self) -> &str {
        if let Some(ct) = self.content_type.as_deref() {
            if ct.starts_with("image/") {
                return ct;
            }
        }
        match self
            .file_name
            .rsplit('.')
            .next()
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            _ => "image/jpeg",
        }
    }
}

/// One billable unit of repair work after catalog reconciliation.
///
/// When `matched` is true, description, unit and unit_price come from the
/// catalog regardless of what the assessor proposed. Unmatched items keep the
/// assessor's wording, carry a zero price, and stay visible in the report.
#[derive(Debug, Clone, Serialize)]
pub struct LineItem {
    pub code: String,
    pub description: String,
    pub unit: String,
    pub quantity: f64,
    pub unit_price: f64,
    /// quantity * unit_price, full precision. Rounded only at presentation.
    pub total: f64,
    pub matched: bool,
}

/// One image's assessment result after resolution.
///
/// Shapes: narrative-only, line-items-only, or both (the offline template
/// produces items plus an explanatory narrative). The composer handles all
/// three.
#[derive(Debug, Clone, Serialize)]
pub struct ImageAnalysis {
    pub file_name: String,
    pub narrative: Option<String>,
    pub line_items: Vec<LineItem>,
    /// Sum of line-item totals, full precision.
    pub subtotal: f64,
}

/// Rounds a monetary value to 2 decimal places for presentation.
/// Accumulation always happens on unrounded values.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

//! Price catalog — static code → price reference table.
//!
//! Loaded once at startup from a CSV resource, read-only afterwards, and
//! shared across concurrent jobs behind an `Arc` without locking. Header
//! names vary between supplier exports, so each required column is resolved
//! against a set of accepted spellings (case-insensitive). An unloadable
//! catalog is not fatal: callers fall back to `PriceCatalog::empty()` and the
//! pipeline runs in unpriced mode.

use std::collections::HashMap;
use std::path::Path;

use csv::ReaderBuilder;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalog CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("catalog is missing required column(s): {0}")]
    MissingColumns(String),
}

/// One priced unit of work, keyed by normalized code.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub code: String,
    pub description: String,
    pub unit: String,
    pub unit_price: f64,
}

// Accepted header spellings per column, compared after trim + lowercase.
const CODE_HEADERS: &[&str] = &["code", "item code", "item_code", "sku", "item no", "item #"];
const DESCRIPTION_HEADERS: &[&str] = &[
    "description",
    "desc",
    "item description",
    "work description",
    "item",
];
const UNIT_HEADERS: &[&str] = &["unit", "uom", "unit of measure", "units"];
const PRICE_HEADERS: &[&str] = &[
    "price",
    "unit price",
    "unit_price",
    "unit cost",
    "rate",
    "cost",
];

/// Immutable in-memory price index. Constructed once, then only read.
#[derive(Debug, Default)]
pub struct PriceCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl PriceCatalog {
    /// A catalog with no entries — every lookup misses, all items unpriced.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Parses a CSV stream into a catalog.
    ///
    /// Rows with an unparsable price or an empty code are skipped
    /// individually; only a missing required column aborts the load.
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, CatalogError> {
        let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);

        let headers: Vec<String> = rdr
            .headers()?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        let code_idx = find_column(&headers, CODE_HEADERS);
        let desc_idx = find_column(&headers, DESCRIPTION_HEADERS);
        let unit_idx = find_column(&headers, UNIT_HEADERS);
        let price_idx = find_column(&headers, PRICE_HEADERS);

        let mut missing = Vec::new();
        if code_idx.is_none() {
            missing.push("code");
        }
        if desc_idx.is_none() {
            missing.push("description");
        }
        if price_idx.is_none() {
            missing.push("price");
        }
        let (Some(code_idx), Some(desc_idx), Some(price_idx)) = (code_idx, desc_idx, price_idx)
        else {
            return Err(CatalogError::MissingColumns(missing.join(", ")));
        };

        let mut entries = HashMap::new();
        let mut skipped = 0usize;

        for (row_no, record) in rdr.records().enumerate() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!(row = row_no + 2, "skipping malformed catalog row: {e}");
                    skipped += 1;
                    continue;
                }
            };

            let code = normalize_code(record.get(code_idx).unwrap_or(""));
            if code.is_empty() {
                skipped += 1;
                continue;
            }

            let raw_price = record.get(price_idx).unwrap_or("").trim();
            let unit_price = match parse_price(raw_price) {
                Some(p) => p,
                None => {
                    warn!(
                        row = row_no + 2,
                        code, raw_price, "skipping catalog row with unparsable price"
                    );
                    skipped += 1;
                    continue;
                }
            };

            let description = record.get(desc_idx).unwrap_or("").trim().to_string();
            let unit = unit_idx
                .and_then(|i| record.get(i))
                .map(|u| u.trim())
                .filter(|u| !u.is_empty())
                .unwrap_or("EA")
                .to_string();

            // Last-loaded wins on duplicate codes.
            entries.insert(
                code.clone(),
                CatalogEntry {
                    code,
                    description,
                    unit,
                    unit_price,
                },
            );
        }

        if skipped > 0 {
            warn!(skipped, loaded = entries.len(), "catalog loaded with skipped rows");
        }

        Ok(Self { entries })
    }

    /// Pure lookup. Applies the same trim + uppercase normalization as load,
    /// so `wtr-101`, ` WTR-101 ` and `WTR-101` all hit the same entry.
    pub fn lookup(&self, code: &str) -> Option<&CatalogEntry> {
        self.entries.get(&normalize_code(code))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Canonical catalog key form: trimmed, uppercased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

fn find_column(headers: &[String], accepted: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| accepted.contains(&h.as_str()))
}

/// Parses a price field, tolerating currency symbols and thousands separators.
fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|p| *p >= 0.0)
}

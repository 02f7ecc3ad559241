//! Line-item resolution — reconciles assessor output against the price
//! catalog and computes totals.
//!
//! The catalog is authoritative: on a code match, its description, unit and
//! price replace whatever the assessor proposed, keeping pricing consistent
//! and auditable. Unmatched items are never dropped — they stay visible with
//! a zero price so a reviewing contractor can see the gaps.

use tracing::debug;

use crate::assessor::{AssessedImage, AssessmentResult, RawLineItem, OFFLINE_NOTE, OFFLINE_PROVIDER};
use crate::catalog::{normalize_code, PriceCatalog};
use crate::models::{ImageAnalysis, LineItem};

/// Resolves raw assessor items into canonical line items.
pub fn resolve_items(raw_items: &[RawLineItem], catalog: &PriceCatalog) -> Vec<LineItem> {
    raw_items
        .iter()
        .map(|raw| resolve_one(raw, catalog))
        .collect()
}

fn resolve_one(raw: &RawLineItem, catalog: &PriceCatalog) -> LineItem {
    let code = normalize_code(&raw.code);
    let quantity = raw.quantity.max(0.0);

    match catalog.lookup(&code) {
        Some(entry) => {
            // Catalog pricing wins even when the assessor proposed its own.
            let total = quantity * entry.unit_price;
            LineItem {
                code: entry.code.clone(),
                description: entry.description.clone(),
                unit: entry.unit.clone(),
                quantity,
                unit_price: entry.unit_price,
                total,
                matched: true,
            }
        }
        None => {
            debug!(code = %code, "no catalog match; item kept unpriced");
            LineItem {
                code,
                description: raw.description.trim().to_string(),
                unit: raw
                    .unit
                    .as_deref()
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .unwrap_or("EA")
                    .to_string(),
                quantity,
                unit_price: 0.0,
                total: 0.0,
                matched: false,
            }
        }
    }
}

/// Builds a per-image analysis from an assessment outcome.
///
/// Offline-template results carry an explanatory narrative alongside their
/// items so the report shows the degraded origin.
pub fn analyze_image(
    file_name: &str,
    assessed: AssessedImage,
    catalog: &PriceCatalog,
) -> ImageAnalysis {
    match assessed.result {
        AssessmentResult::Narrative { text } => ImageAnalysis {
            file_name: file_name.to_string(),
            narrative: if text.is_empty() { None } else { Some(text) },
            line_items: Vec::new(),
            subtotal: 0.0,
        },
        AssessmentResult::Structured { items } => {
            let line_items = resolve_items(&items, catalog);
            let subtotal = line_items.iter().map(|i| i.total).sum();
            let narrative = (assessed.provider == OFFLINE_PROVIDER)
                .then(|| OFFLINE_NOTE.to_string());
            ImageAnalysis {
                file_name: file_name.to_string(),
                narrative,
                line_items,
                subtotal,
            }
        }
    }
}

/// Grand total across all images, full precision.
pub fn grand_total(analyses: &[ImageAnalysis]) -> f64 {
    analyses.iter().map(|a| a.subtotal).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_catalog() -> PriceCatalog {
        PriceCatalog::from_reader(
            "code,description,unit,price\n\
             WTR-101,Water extraction and drying,hour,205\n\
             DRY123,Drywall replacement,SF,50\n"
                .as_bytes(),
        )
        .expect("fixture catalog should load")
    }

    fn raw(code: &str, qty: f64) -> RawLineItem {
        RawLineItem {
            code: code.to_string(),
            description: "assessor wording".to_string(),
            quantity: qty,
            unit: Some("guess".to_string()),
            price: Some(999.0),
        }
    }

    #[test]
    fn test_catalog_match_overrides_assessor_fields() {
        let catalog = fixture_catalog();
        let items = resolve_items(&[raw("wtr-101", 2.0)], &catalog);
        let item = &items[0];
        assert!(item.matched);
        assert_eq!(item.code, "WTR-101");
        assert_eq!(item.description, "Water extraction and drying");
        assert_eq!(item.unit, "hour");
        assert_eq!(item.unit_price, 205.0);
        assert_eq!(item.total, 410.0);
    }

    #[test]
    fn test_unmatched_item_kept_with_zero_price() {
        let catalog = fixture_catalog();
        let items = resolve_items(&[raw("ZZZ-999", 1.0)], &catalog);
        let item = &items[0];
        assert!(!item.matched);
        assert_eq!(item.code, "ZZZ-999");
        assert_eq!(item.description, "assessor wording");
        assert_eq!(item.unit_price, 0.0);
        assert_eq!(item.total, 0.0);
    }

    #[test]
    fn test_negative_quantity_clamped() {
        let catalog = fixture_catalog();
        let items = resolve_items(&[raw("WTR-101", -3.0)], &catalog);
        assert_eq!(items[0].quantity, 0.0);
        assert_eq!(items[0].total, 0.0);
    }

    #[test]
    fn test_same_code_may_repeat() {
        let catalog = fixture_catalog();
        let items = resolve_items(&[raw("WTR-101", 1.0), raw("WTR-101", 2.0)], &catalog);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].total, 205.0);
        assert_eq!(items[1].total, 410.0);
    }

    #[test]
    fn test_empty_catalog_leaves_everything_unpriced() {
        let catalog = PriceCatalog::empty();
        let items = resolve_items(&[raw("WTR-101", 2.0)], &catalog);
        assert!(!items[0].matched);
        assert_eq!(items[0].total, 0.0);
    }

    #[test]
    fn test_analyze_structured_image_subtotal() {
        let catalog = fixture_catalog();
        let assessed = AssessedImage {
            provider: "openai",
            result: AssessmentResult::Structured {
                items: vec![raw("WTR-101", 2.0), raw("ZZZ-999", 1.0)],
            },
        };
        let analysis = analyze_image("a.jpg", assessed, &catalog);
        assert_eq!(analysis.subtotal, 410.0);
        assert_eq!(analysis.line_items.len(), 2);
        assert!(analysis.narrative.is_none());
    }

    #[test]
    fn test_analyze_narrative_image() {
        let catalog = fixture_catalog();
        let assessed = AssessedImage {
            provider: "anthropic",
            result: AssessmentResult::Narrative {
                text: "Hail damage across the south-facing slope.".to_string(),
            },
        };
        let analysis = analyze_image("b.jpg", assessed, &catalog);
        assert!(analysis.line_items.is_empty());
        assert_eq!(analysis.subtotal, 0.0);
        assert!(analysis.narrative.unwrap().contains("Hail damage"));
    }

    #[test]
    fn test_analyze_offline_template_carries_note() {
        let catalog = fixture_catalog();
        let assessed = AssessedImage {
            provider: OFFLINE_PROVIDER,
            result: AssessmentResult::Structured {
                items: vec![raw("DRY123", 10.0)],
            },
        };
        let analysis = analyze_image("c.jpg", assessed, &catalog);
        assert!(analysis.narrative.unwrap().contains("Offline template"));
        assert_eq!(analysis.subtotal, 500.0);
    }

    #[test]
    fn test_grand_total_equals_sum_of_subtotals_and_items() {
        let catalog = fixture_catalog();
        let analyses = vec![
            analyze_image(
                "a.jpg",
                AssessedImage {
                    provider: "openai",
                    result: AssessmentResult::Structured {
                        items: vec![raw("WTR-101", 2.0)],
                    },
                },
                &catalog,
            ),
            analyze_image(
                "b.jpg",
                AssessedImage {
                    provider: "openai",
                    result: AssessmentResult::Structured {
                        items: vec![raw("DRY123", 3.0), raw("ZZZ-999", 4.0)],
                    },
                },
                &catalog,
            ),
        ];
        let total = grand_total(&analyses);
        let item_sum: f64 = analyses
            .iter()
            .flat_map(|a| a.line_items.iter())
            .map(|i| i.total)
            .sum();
        assert_eq!(total, 410.0 + 150.0);
        assert_eq!(total, item_sum);
    }

    #[test]
    fn test_grand_total_empty_is_zero() {
        assert_eq!(grand_total(&[]), 0.0);
    }
}

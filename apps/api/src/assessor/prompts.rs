//! Instructions sent to vision providers, one per assessment mode.

/// Structured mode: the model must answer with a bare JSON array so the
/// defensive parser in `assessor` can extract candidate line items.
pub const STRUCTURED_INSTRUCTION: &str = "\
You are a property damage estimator reviewing a photograph of damage to a building.

Identify the repair work needed and respond with ONLY a JSON array of line items, \
no prose and no markdown fences. Each element must have this shape:

  {\"code\": \"TRADE-CODE\", \"description\": \"work description\", \
\"quantity\": 1.0, \"unit\": \"SF|LF|EA|hour\", \"price\": 0.0}

Use standard trade estimating codes where you know them (e.g. WTR- for water \
mitigation, DRY- for drywall, PNT- for painting, FLR- for flooring, ROF- for \
roofing). Quantities are your best estimate from the photograph. If you cannot \
price an item, set price to 0.";

/// Narrative mode: free text, passed through verbatim to the report.
pub const NARRATIVE_INSTRUCTION: &str = "\
You are a property damage estimator reviewing a photograph of damage to a building.

Write a concise scope-of-work narrative: what is damaged, the repairs required, \
and rough cost expectations. Plain text only, a few short paragraphs at most.";

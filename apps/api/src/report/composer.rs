//! Layout engine for the scope-of-work report.
//!
//! Stateless: the output is purely a function of the job metadata, the image
//! analyses, and the uploaded blobs. A vertical cursor walks the sections in
//! order — title block, optional inspector notes, one section per image
//! (thumbnail, then narrative or line-item table, then subtotal), closing
//! grand total — and starts a new page before any element that would overflow
//! the remaining height. Content is never clipped.
//!
//! Per-element failure isolation: an unreadable image blob becomes a visible
//! placeholder line and a log entry; composition continues.

use tracing::warn;

use crate::jobs::JobMeta;
use crate::models::{ImageAnalysis, ImageUpload, LineItem, round2};
use crate::report::font_metrics::{helvetica, FontMetricTable};
use crate::report::pdf::{prepare_image, PdfWriter, PAGE_HEIGHT, PAGE_WIDTH};
use crate::report::ComposeError;
use crate::resolver::grand_total;

const MARGIN: f32 = 54.0;
const RIGHT_EDGE: f32 = PAGE_WIDTH - MARGIN;
const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;

const TITLE_SIZE: f32 = 16.0;
const HEADING_SIZE: f32 = 12.0;
const BODY_SIZE: f32 = 10.0;
const FOOTNOTE_SIZE: f32 = 8.5;
const LINE_HEIGHT: f32 = 14.0;

const THUMB_MAX_WIDTH: f32 = 216.0;
const THUMB_MAX_HEIGHT: f32 = 150.0;

// Table column left edges; numeric columns are right-aligned to their edge.
const COL_CODE: f32 = MARGIN;
const COL_DESC: f32 = 130.0;
const COL_DESC_WIDTH: f32 = 192.0;
const COL_QTY_RIGHT: f32 = 368.0;
const COL_UNIT: f32 = 378.0;
const COL_PRICE_RIGHT: f32 = 492.0;
const COL_TOTAL_RIGHT: f32 = RIGHT_EDGE;

/// Composes the full report PDF. `images` runs parallel to `analyses`
/// (upload order); a missing blob simply renders no thumbnail.
pub fn compose(
    meta: &JobMeta,
    analyses: &[ImageAnalysis],
    images: &[ImageUpload],
) -> Result<Vec<u8>, ComposeError> {
    let metrics = helvetica();
    let mut cursor = Cursor::new();

    render_title(&mut cursor, meta);

    if let Some(notes) = meta.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        render_notes(&mut cursor, metrics, notes);
    }

    for (index, analysis) in analyses.iter().enumerate() {
        render_image_section(&mut cursor, metrics, meta, analysis, images.get(index));
    }

    render_grand_total(&mut cursor, metrics, grand_total(analyses));

    cursor.writer.finish()
}

// ────────────────────────────────────────────────────────────────────────────
// Vertical cursor
// ────────────────────────────────────────────────────────────────────────────

/// Tracks the current baseline position and inserts page breaks before any
/// element that would cross the bottom margin.
struct Cursor {
    writer: PdfWriter,
    y: f32,
}

impl Cursor {
    fn new() -> Self {
        let mut writer = PdfWriter::new();
        writer.start_page();
        Self {
            writer,
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    /// Starts a new page unless `needed` points still fit above the margin.
    fn ensure_room(&mut self, needed: f32) {
        if self.y - needed < MARGIN {
            self.writer.start_page();
            self.y = PAGE_HEIGHT - MARGIN;
        }
    }

    /// Writes one line of text and advances the baseline.
    fn text_line(&mut self, x: f32, size: f32, bold: bool, text: &str) {
        self.ensure_room(LINE_HEIGHT);
        self.y -= LINE_HEIGHT;
        self.writer.draw_text(x, self.y, size, bold, text);
    }

    fn gap(&mut self, points: f32) {
        self.y = (self.y - points).max(MARGIN);
    }

    fn rule(&mut self) {
        self.ensure_room(6.0);
        self.y -= 4.0;
        self.writer.draw_rule(MARGIN, RIGHT_EDGE, self.y);
        self.y -= 2.0;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sections
// ────────────────────────────────────────────────────────────────────────────

fn render_title(cursor: &mut Cursor, meta: &JobMeta) {
    cursor.text_line(MARGIN, TITLE_SIZE, true, "Scope of Work Report");
    cursor.gap(4.0);
    cursor.text_line(MARGIN, BODY_SIZE, false, &format!("Job ID: {}", meta.id));
    cursor.text_line(
        MARGIN,
        BODY_SIZE,
        false,
        &format!(
            "Generated: {}",
            meta.created_at.format("%Y-%m-%d %H:%M UTC")
        ),
    );
    cursor.gap(8.0);
}

fn render_notes(cursor: &mut Cursor, metrics: &FontMetricTable, notes: &str) {
    cursor.text_line(MARGIN, HEADING_SIZE, true, "Inspector Notes");
    cursor.gap(2.0);
    // Verbatim: preserve the caller's paragraph breaks, wrap within them.
    for paragraph in notes.lines() {
        if paragraph.trim().is_empty() {
            cursor.gap(LINE_HEIGHT / 2.0);
            continue;
        }
        for line in metrics.wrap(paragraph, BODY_SIZE, CONTENT_WIDTH) {
            cursor.text_line(MARGIN, BODY_SIZE, false, &line);
        }
    }
    cursor.gap(10.0);
}

fn render_image_section(
    cursor: &mut Cursor,
    metrics: &FontMetricTable,
    meta: &JobMeta,
    analysis: &ImageAnalysis,
    upload: Option<&ImageUpload>,
) {
    // Keep the heading attached to at least a couple of content lines.
    cursor.ensure_room(3.0 * LINE_HEIGHT);
    cursor.text_line(
        MARGIN,
        HEADING_SIZE,
        true,
        &format!("Image: {}", analysis.file_name),
    );
    cursor.gap(2.0);

    if let Some(upload) = upload {
        render_thumbnail(cursor, meta, analysis, upload);
    }

    if let Some(narrative) = analysis.narrative.as_deref().filter(|n| !n.is_empty()) {
        for paragraph in narrative.lines() {
            if paragraph.trim().is_empty() {
                cursor.gap(LINE_HEIGHT / 2.0);
                continue;
            }
            for line in metrics.wrap(paragraph, BODY_SIZE, CONTENT_WIDTH) {
                cursor.text_line(MARGIN, BODY_SIZE, false, &line);
            }
        }
        cursor.gap(4.0);
    }

    if !analysis.line_items.is_empty() {
        render_item_table(cursor, metrics, &analysis.line_items);
        let subtotal = format!("Subtotal: {}", money(analysis.subtotal));
        cursor.ensure_room(LINE_HEIGHT);
        cursor.text_line(
            COL_TOTAL_RIGHT - metrics.text_width(&subtotal, BODY_SIZE),
            BODY_SIZE,
            true,
            &subtotal,
        );
    }

    cursor.gap(12.0);
}

fn render_thumbnail(
    cursor: &mut Cursor,
    meta: &JobMeta,
    analysis: &ImageAnalysis,
    upload: &ImageUpload,
) {
    match prepare_image(&upload.bytes) {
        Ok(prepared) => {
            let scale = (THUMB_MAX_WIDTH / prepared.width as f32)
                .min(THUMB_MAX_HEIGHT / prepared.height as f32)
                .min(1.0);
            let w = prepared.width as f32 * scale;
            let h = prepared.height as f32 * scale;

            cursor.ensure_room(h + 6.0);
            cursor.y -= h;
            cursor.writer.draw_image(&prepared, MARGIN, cursor.y, w, h);
            cursor.gap(6.0);
        }
        Err(e) => {
            warn!(
                job_id = %meta.id,
                image = %analysis.file_name,
                error = %e,
                "skipping unreadable image, rendering placeholder"
            );
            cursor.text_line(
                MARGIN,
                BODY_SIZE,
                false,
                &format!("[image \"{}\" could not be rendered]", analysis.file_name),
            );
        }
    }
}

fn render_item_table(cursor: &mut Cursor, metrics: &FontMetricTable, items: &[LineItem]) {
    render_table_header(cursor, metrics);

    let mut has_unmatched = false;
    for item in items {
        // Re-emit the header after a row-driven page break so continuation
        // pages stay readable.
        if cursor.y - LINE_HEIGHT < MARGIN {
            cursor.writer.start_page();
            cursor.y = PAGE_HEIGHT - MARGIN;
            render_table_header(cursor, metrics);
        }
        render_table_row(cursor, metrics, item);
        has_unmatched |= !item.matched;
    }

    cursor.rule();
    if has_unmatched {
        cursor.text_line(
            MARGIN,
            FOOTNOTE_SIZE,
            false,
            "* no catalog match - unpriced",
        );
    }
}

fn render_table_header(cursor: &mut Cursor, metrics: &FontMetricTable) {
    cursor.ensure_room(2.0 * LINE_HEIGHT);
    cursor.y -= LINE_HEIGHT;
    let y = cursor.y;
    let w = &mut cursor.writer;
    w.draw_text(COL_CODE, y, BODY_SIZE, true, "Code");
    w.draw_text(COL_DESC, y, BODY_SIZE, true, "Description");
    draw_right(w, metrics, COL_QTY_RIGHT, y, BODY_SIZE, true, "Qty");
    w.draw_text(COL_UNIT, y, BODY_SIZE, true, "Unit");
    draw_right(w, metrics, COL_PRICE_RIGHT, y, BODY_SIZE, true, "Unit Price");
    draw_right(w, metrics, COL_TOTAL_RIGHT, y, BODY_SIZE, true, "Total");
    cursor.rule();
}

fn render_table_row(cursor: &mut Cursor, metrics: &FontMetricTable, item: &LineItem) {
    cursor.y -= LINE_HEIGHT;
    let y = cursor.y;

    let code = if item.matched {
        item.code.clone()
    } else {
        format!("{} *", item.code)
    };
    let description = metrics.truncate_to_width(&item.description, BODY_SIZE, COL_DESC_WIDTH);
    let qty = trim_qty(item.quantity);
    let price = if item.matched {
        money(item.unit_price)
    } else {
        "-".to_string()
    };

    let w = &mut cursor.writer;
    w.draw_text(COL_CODE, y, BODY_SIZE, false, &code);
    w.draw_text(COL_DESC, y, BODY_SIZE, false, &description);
    draw_right(w, metrics, COL_QTY_RIGHT, y, BODY_SIZE, false, &qty);
    w.draw_text(COL_UNIT, y, BODY_SIZE, false, &item.unit);
    draw_right(w, metrics, COL_PRICE_RIGHT, y, BODY_SIZE, false, &price);
    draw_right(
        w,
        metrics,
        COL_TOTAL_RIGHT,
        y,
        BODY_SIZE,
        false,
        &money(item.total),
    );
}

fn render_grand_total(cursor: &mut Cursor, metrics: &FontMetricTable, total: f64) {
    cursor.ensure_room(3.0 * LINE_HEIGHT);
    cursor.rule();
    let label = format!("Total Estimate: {}", money(total));
    cursor.text_line(
        COL_TOTAL_RIGHT - metrics.text_width(&label, HEADING_SIZE),
        HEADING_SIZE,
        true,
        &label,
    );
}

// ────────────────────────────────────────────────────────────────────────────
// Formatting helpers
// ────────────────────────────────────────────────────────────────────────────

fn draw_right(
    writer: &mut PdfWriter,
    metrics: &FontMetricTable,
    right_edge: f32,
    y: f32,
    size: f32,
    bold: bool,
    text: &str,
) {
    writer.draw_text(right_edge - metrics.text_width(text, size), y, size, bold, text);
}

/// Monetary presentation: rounded to 2 decimals only here.
fn money(value: f64) -> String {
    format!("${:.2}", round2(value))
}

/// Quantities print without trailing zeros ("2" rather than "2.00").
fn trim_qty(quantity: f64) -> String {
    if (quantity.fract()).abs() < 1e-9 {
        format!("{}", quantity as i64)
    } else {
        format!("{quantity:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobMeta, JobStatus};
    use bytes::Bytes;
    use chrono::Utc;
    use lopdf::Document;
    use uuid::Uuid;

    fn meta(notes: Option<&str>) -> JobMeta {
        JobMeta {
            id: Uuid::new_v4(),
            status: JobStatus::Analyzing,
            created_at: Utc::now(),
            images: vec!["a.jpg".to_string()],
            notes: notes.map(|s| s.to_string()),
            report_file: None,
        }
    }

    fn item(code: &str, qty: f64, price: f64, matched: bool) -> LineItem {
        LineItem {
            code: code.to_string(),
            description: "Drywall replacement in affected area".to_string(),
            unit: "SF".to_string(),
            quantity: qty,
            unit_price: price,
            total: qty * price,
            matched,
        }
    }

    fn png_upload(name: &str) -> ImageUpload {
        let img = image::RgbImage::from_pixel(8, 6, image::Rgb([120, 120, 200]));
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .expect("png encode");
        ImageUpload {
            file_name: name.to_string(),
            content_type: Some("image/png".to_string()),
            bytes: Bytes::from(buf.into_inner()),
        }
    }

    fn page_count(bytes: &[u8]) -> usize {
        Document::load_mem(bytes).expect("pdf should parse").get_pages().len()
    }

    #[test]
    fn test_narrative_only_report_single_page() {
        let analyses = vec![ImageAnalysis {
            file_name: "a.jpg".to_string(),
            narrative: Some("Water staining along the ceiling joint.".to_string()),
            line_items: Vec::new(),
            subtotal: 0.0,
        }];
        let bytes = compose(&meta(None), &analyses, &[png_upload("a.jpg")]).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert_eq!(page_count(&bytes), 1);
    }

    #[test]
    fn test_long_table_paginates() {
        let items: Vec<LineItem> = (0..90).map(|i| item(&format!("DRY-{i}"), 2.0, 50.0, true)).collect();
        let subtotal = items.iter().map(|i| i.total).sum();
        let analyses = vec![ImageAnalysis {
            file_name: "a.jpg".to_string(),
            narrative: None,
            line_items: items,
            subtotal,
        }];
        let bytes = compose(&meta(None), &analyses, &[]).unwrap();
        assert!(
            page_count(&bytes) >= 2,
            "90 table rows must overflow a single page"
        );
    }

    #[test]
    fn test_unreadable_image_renders_placeholder_not_error() {
        let analyses = vec![ImageAnalysis {
            file_name: "broken.jpg".to_string(),
            narrative: None,
            line_items: vec![item("WTR-101", 2.0, 205.0, true)],
            subtotal: 410.0,
        }];
        let broken = ImageUpload {
            file_name: "broken.jpg".to_string(),
            content_type: None,
            bytes: Bytes::from_static(b"definitely not image data"),
        };
        let bytes = compose(&meta(None), &analyses, &[broken]).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn test_mixed_shapes_and_notes_compose() {
        let analyses = vec![
            ImageAnalysis {
                file_name: "a.jpg".to_string(),
                narrative: None,
                line_items: vec![item("WTR-101", 2.0, 205.0, true), item("ZZZ-999", 1.0, 0.0, false)],
                subtotal: 410.0,
            },
            ImageAnalysis {
                file_name: "b.jpg".to_string(),
                narrative: Some("Hail impact marks across shingles.".to_string()),
                line_items: Vec::new(),
                subtotal: 0.0,
            },
        ];
        let uploads = vec![png_upload("a.jpg"), png_upload("b.jpg")];
        let bytes = compose(
            &meta(Some("South elevation.\n\nAccess through side gate.")),
            &analyses,
            &uploads,
        )
        .unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert!(page_count(&bytes) >= 1);
    }

    #[test]
    fn test_empty_job_still_produces_document() {
        let bytes = compose(&meta(None), &[], &[]).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert_eq!(page_count(&bytes), 1);
    }

    #[test]
    fn test_trim_qty_formatting() {
        assert_eq!(trim_qty(2.0), "2");
        assert_eq!(trim_qty(2.5), "2.50");
    }

    #[test]
    fn test_money_rounds_at_presentation() {
        assert_eq!(money(410.0), "$410.00");
        assert_eq!(money(0.005), "$0.01");
    }
}

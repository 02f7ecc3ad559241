//! Axum route handlers for the Reports API.

use axum::{
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::jobs::{JobMeta, JobStatus};
use crate::models::{round2, ImageAnalysis, ImageUpload, LineItem};
use crate::pipeline::run_submission;
use crate::resolver::grand_total;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

/// One priced line item as presented to clients. Monetary fields are rounded
/// at this boundary only; internal math stays full precision.
#[derive(Debug, Serialize)]
pub struct LineItemView {
    pub code: String,
    pub description: String,
    pub unit: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub total: f64,
    pub matched: bool,
}

impl From<&LineItem> for LineItemView {
    fn from(item: &LineItem) -> Self {
        Self {
            code: item.code.clone(),
            description: item.description.clone(),
            unit: item.unit.clone(),
            quantity: item.quantity,
            unit_price: round2(item.unit_price),
            total: round2(item.total),
            matched: item.matched,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ImageResultView {
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    pub line_items: Vec<LineItemView>,
    pub subtotal: f64,
}

impl From<&ImageAnalysis> for ImageResultView {
    fn from(analysis: &ImageAnalysis) -> Self {
        Self {
            file_name: analysis.file_name.clone(),
            narrative: analysis.narrative.clone(),
            line_items: analysis.line_items.iter().map(LineItemView::from).collect(),
            subtotal: round2(analysis.subtotal),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub results: Vec<ImageResultView>,
    pub total_estimate: f64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub images: Vec<String>,
    pub report_ready: bool,
}

impl From<&JobMeta> for StatusResponse {
    fn from(meta: &JobMeta) -> Self {
        Self {
            job_id: meta.id,
            status: meta.status,
            created_at: meta.created_at,
            images: meta.images.clone(),
            report_ready: meta.status == JobStatus::Composed,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/reports
///
/// Multipart submission: every part carrying a filename is treated as an
/// image; `notes` and `scope` text parts are the adjuster's auxiliary text,
/// persisted verbatim. Runs the full pipeline synchronously and returns the
/// priced results inline along with the job id for later PDF retrieval.
pub async fn handle_submit(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let mut images: Vec<ImageUpload> = Vec::new();
    let mut notes_text: Option<String> = None;
    let mut scope_text: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("malformed multipart body: {e}")))?
    {
        if let Some(file_name) = field.file_name().map(str::to_string) {
            let content_type = field.content_type().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::Validation(format!("failed to read upload '{file_name}': {e}")))?;
            if bytes.is_empty() {
                return Err(AppError::Validation(format!(
                    "uploaded file '{file_name}' is empty"
                )));
            }
            images.push(ImageUpload {
                file_name,
                content_type,
                bytes,
            });
        } else {
            let field_name = field.name().map(str::to_string);
            match field_name.as_deref() {
                Some(name @ ("notes" | "scope")) => {
                    let text = field.text().await.map_err(|e| {
                        AppError::Validation(format!("failed to read {name}: {e}"))
                    })?;
                    if !text.is_empty() {
                        match name {
                            "notes" => notes_text = Some(text),
                            _ => scope_text = Some(text),
                        }
                    }
                }
                // Unknown text fields are ignored.
                _ => {}
            }
        }
    }

    let outcome = run_submission(&state, images, combine_aux_text(notes_text, scope_text)).await?;

    let results: Vec<ImageResultView> = outcome.analyses.iter().map(ImageResultView::from).collect();
    let total_estimate = round2(grand_total(&outcome.analyses));

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            job_id: outcome.meta.id,
            status: outcome.meta.status,
            results,
            total_estimate,
        }),
    ))
}

/// GET /api/v1/reports/:job_id
///
/// Returns the job's current status. Malformed ids are indistinguishable
/// from unknown ones.
pub async fn handle_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let meta = lookup_job(&state, &job_id).await?;
    Ok(Json(StatusResponse::from(&meta)))
}

/// GET /api/v1/reports/:job_id/download
///
/// Streams the finalized PDF. A known job without a finished report answers
/// 409 so clients can retry; a terminally failed job answers 410 so they
/// stop; unknown ids answer 404.
pub async fn handle_download(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<(HeaderMap, Vec<u8>), AppError> {
    let meta = lookup_job(&state, &job_id).await?;

    match meta.status {
        JobStatus::Composed => {}
        JobStatus::Failed => {
            return Err(AppError::ReportFailed(format!(
                "report generation failed for job '{}'; resubmit the images",
                meta.id
            )));
        }
        _ => {
            return Err(AppError::StillProcessing(format!(
                "report for job '{}' is not composed yet",
                meta.id
            )));
        }
    }

    let Some(pdf) = state.jobs.read_artifact(&meta).await? else {
        return Err(AppError::StillProcessing(format!(
            "report for job '{}' is not available yet",
            meta.id
        )));
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/pdf"),
    );
    let disposition = format!("attachment; filename=\"{}_scope_report.pdf\"", meta.id);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok((headers, pdf))
}

/// Merges the two auxiliary text parts into the persisted notes, verbatim.
/// Both may be present; notes come first, blank-line separated from scope.
fn combine_aux_text(notes: Option<String>, scope: Option<String>) -> Option<String> {
    match (notes, scope) {
        (Some(n), Some(s)) => Some(format!("{n}\n\n{s}")),
        (n, s) => n.or(s),
    }
}

/// Parses the path id and loads the job. Both a non-UUID id and an unknown
/// UUID map to NotFound so the error reveals nothing about the id space.
async fn lookup_job(state: &AppState, job_id: &str) -> Result<JobMeta, AppError> {
    let id = Uuid::parse_str(job_id)
        .map_err(|_| AppError::NotFound(format!("job '{job_id}' not found")))?;
    state
        .jobs
        .load_meta(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("job '{id}' not found")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessor::{AssessMode, DamageAssessor};
    use crate::catalog::PriceCatalog;
    use crate::config::Config;
    use crate::jobs::JobStore;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::Request;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn test_state() -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        let jobs = JobStore::new(dir.path());
        jobs.init().await.unwrap();
        let state = AppState {
            config: Config {
                port: 0,
                rust_log: "info".to_string(),
                data_dir: PathBuf::from("unused"),
                price_catalog_path: None,
                openai_api_key: None,
                anthropic_api_key: None,
                assess_mode: AssessMode::Structured,
                assess_timeout_secs: 5,
            },
            catalog: Arc::new(PriceCatalog::empty()),
            // Empty chain: every assessment lands on the offline template.
            assessor: Arc::new(DamageAssessor::new(Vec::new(), Duration::from_secs(5))),
            jobs,
        };
        (dir, state)
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(6, 4, image::Rgb([80, 80, 80]));
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    async fn multipart_from(body: Vec<u8>) -> Multipart {
        let request = Request::builder()
            .method("POST")
            .header(
                header::CONTENT_TYPE,
                "multipart/form-data; boundary=XBOUNDARY",
            )
            .body(Body::from(body))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    #[test]
    fn test_combine_aux_text_keeps_both_fields() {
        let combined = combine_aux_text(
            Some("  South elevation.  ".to_string()),
            Some("Replace drywall.".to_string()),
        );
        assert_eq!(
            combined.as_deref(),
            Some("  South elevation.  \n\nReplace drywall.")
        );
    }

    #[test]
    fn test_combine_aux_text_single_field_verbatim() {
        assert_eq!(
            combine_aux_text(None, Some(" scope only ".to_string())).as_deref(),
            Some(" scope only ")
        );
        assert_eq!(
            combine_aux_text(Some("notes only".to_string()), None).as_deref(),
            Some("notes only")
        );
        assert_eq!(combine_aux_text(None, None), None);
    }

    #[tokio::test]
    async fn test_submit_persists_notes_and_scope_together() {
        let (_dir, state) = test_state().await;

        let mut body: Vec<u8> = Vec::new();
        body.extend_from_slice(
            b"--XBOUNDARY\r\nContent-Disposition: form-data; name=\"notes\"\r\n\r\n  South elevation.  \r\n",
        );
        body.extend_from_slice(
            b"--XBOUNDARY\r\nContent-Disposition: form-data; name=\"scope\"\r\n\r\nReplace drywall.\r\n",
        );
        body.extend_from_slice(
            b"--XBOUNDARY\r\nContent-Disposition: form-data; name=\"image\"; filename=\"a.png\"\r\nContent-Type: image/png\r\n\r\n",
        );
        body.extend_from_slice(&png_bytes());
        body.extend_from_slice(b"\r\n--XBOUNDARY--\r\n");

        let multipart = multipart_from(body).await;
        let (status, Json(response)) = handle_submit(State(state.clone()), multipart)
            .await
            .expect("submission should succeed");
        assert_eq!(status, StatusCode::CREATED);

        let meta = state
            .jobs
            .load_meta(response.job_id)
            .await
            .unwrap()
            .expect("job must exist");
        assert_eq!(
            meta.notes.as_deref(),
            Some("  South elevation.  \n\nReplace drywall."),
            "both auxiliary fields must persist, untrimmed, notes first"
        );
        assert_eq!(meta.status, JobStatus::Composed);
    }

    #[tokio::test]
    async fn test_download_of_failed_job_is_terminal() {
        let (_dir, state) = test_state().await;
        let mut meta = state.jobs.create().await.unwrap();
        state.jobs.mark_failed(&mut meta).await.unwrap();

        let result = handle_download(State(state.clone()), Path(meta.id.to_string())).await;
        assert!(
            matches!(result, Err(AppError::ReportFailed(_))),
            "a failed job must not answer as still-processing"
        );
    }

    #[tokio::test]
    async fn test_download_of_unfinished_job_says_retry() {
        let (_dir, state) = test_state().await;
        let meta = state.jobs.create().await.unwrap();

        let result = handle_download(State(state.clone()), Path(meta.id.to_string())).await;
        assert!(matches!(result, Err(AppError::StillProcessing(_))));
    }

    #[test]
    fn test_line_item_view_rounds_money_only() {
        let item = LineItem {
            code: "WTR-101".to_string(),
            description: "Water extraction".to_string(),
            unit: "hour".to_string(),
            quantity: 2.5,
            unit_price: 33.333,
            total: 83.3325,
            matched: true,
        };
        let view = LineItemView::from(&item);
        assert_eq!(view.unit_price, 33.33);
        assert_eq!(view.total, 83.33);
        assert_eq!(view.quantity, 2.5);
    }

    #[test]
    fn test_status_response_reports_readiness() {
        let meta = JobMeta {
            id: Uuid::new_v4(),
            status: JobStatus::Composed,
            created_at: chrono::Utc::now(),
            images: vec!["a.jpg".to_string()],
            notes: None,
            report_file: Some("report.pdf".to_string()),
        };
        let view = StatusResponse::from(&meta);
        assert!(view.report_ready);
        assert_eq!(view.images, vec!["a.jpg".to_string()]);
    }
}

//! Submission pipeline — orchestrates upload → assess → price → render →
//! finalize for one job.
//!
//! Flow: intake validation → job creation → per-image assessment (one task
//! per image, collected in upload order) → catalog resolution → PDF
//! composition (spawn_blocking, CPU-bound) → finalize.
//!
//! Failure policy: only intake problems (no images, storage write failure)
//! abort the request. Assessment can't fail (provider chain terminates at the
//! offline template), a panicked per-image task degrades to a placeholder
//! analysis for that image only, and element-level compose problems are
//! handled inside the composer. A total compose failure marks the job Failed
//! before surfacing.

use std::sync::Arc;

use anyhow::anyhow;
use tracing::{error, info, warn};

use crate::errors::AppError;
use crate::jobs::{JobMeta, JobStatus};
use crate::models::{ImageAnalysis, ImageUpload};
use crate::report;
use crate::resolver::analyze_image;
use crate::state::AppState;

/// Result of a completed submission: the finalized job plus the per-image
/// analyses for the synchronous response body.
pub struct SubmitOutcome {
    pub meta: JobMeta,
    pub analyses: Vec<ImageAnalysis>,
}

pub async fn run_submission(
    state: &AppState,
    images: Vec<ImageUpload>,
    notes: Option<String>,
) -> Result<SubmitOutcome, AppError> {
    // Intake validation happens before any job id is allocated.
    if images.is_empty() {
        return Err(AppError::Validation(
            "at least one image is required".to_string(),
        ));
    }

    let mut meta = state.jobs.create().await?;
    info!(job_id = %meta.id, images = images.len(), "submission accepted");

    for (index, image) in images.iter().enumerate() {
        state
            .jobs
            .store_image(meta.id, index, &image.file_name, &image.bytes)
            .await?;
        meta.images.push(image.file_name.clone());
    }
    if let Some(notes) = &notes {
        state.jobs.store_notes(meta.id, notes).await?;
        meta.notes = Some(notes.clone());
    }
    meta.status = JobStatus::Analyzing;
    state.jobs.save_meta(&meta).await?;

    let analyses = assess_all(state, &images).await;

    // Composition runs to completion once reached; partial reports are not a
    // supported state.
    let compose_meta = meta.clone();
    let compose_analyses = analyses.clone();
    let compose_images = images.clone();
    let pdf = tokio::task::spawn_blocking(move || {
        report::compose(&compose_meta, &compose_analyses, &compose_images)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow!("compose task panicked: {e}")))?;

    let pdf = match pdf {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(job_id = %meta.id, error = %e, "report composition failed");
            state.jobs.mark_failed(&mut meta).await?;
            return Err(AppError::Compose(e.to_string()));
        }
    };

    state.jobs.finalize(&mut meta, &pdf).await?;
    info!(job_id = %meta.id, "report composed and finalized");

    Ok(SubmitOutcome { meta, analyses })
}

/// Assesses all images concurrently, one task per image, and collects the
/// results in upload order — the report's page order must match, so the
/// collection is by position, not completion.
async fn assess_all(state: &AppState, images: &[ImageUpload]) -> Vec<ImageAnalysis> {
    let handles: Vec<_> = images
        .iter()
        .map(|image| {
            let assessor = Arc::clone(&state.assessor);
            let catalog = Arc::clone(&state.catalog);
            let image = image.clone();
            let mode = state.config.assess_mode;
            tokio::spawn(async move {
                let assessed = assessor.assess(&image, mode).await;
                analyze_image(&image.file_name, assessed, &catalog)
            })
        })
        .collect();

    let mut analyses = Vec::with_capacity(handles.len());
    for (index, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(analysis) => analyses.push(analysis),
            Err(e) => {
                // One image's failure must not abort its siblings.
                let file_name = images[index].file_name.clone();
                warn!(image = %file_name, error = %e, "assessment task failed; using placeholder");
                analyses.push(ImageAnalysis {
                    file_name,
                    narrative: Some("Assessment unavailable for this image.".to_string()),
                    line_items: Vec::new(),
                    subtotal: 0.0,
                });
            }
        }
    }
    analyses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessor::provider::{ProviderError, VisionProvider};
    use crate::assessor::{AssessMode, DamageAssessor};
    use crate::catalog::PriceCatalog;
    use crate::config::Config;
    use crate::jobs::JobStore;
    use crate::resolver::grand_total;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Stub provider keyed by filename: JSON items for image "a", prose for
    /// image "b", errors for anything else.
    struct ScriptedProvider;

    #[async_trait]
    impl VisionProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn describe(
            &self,
            image: &ImageUpload,
            _instruction: &str,
        ) -> Result<String, ProviderError> {
            if image.file_name.starts_with('a') {
                Ok(r#"[{"code":"WTR-101","description":"Water extraction","quantity":2},
                       {"code":"ZZZ-999","description":"Unknown specialty work","quantity":1}]"#
                    .to_string())
            } else if image.file_name.starts_with('b') {
                Ok("Hail damage across the south-facing roof slope.".to_string())
            } else {
                Err(ProviderError::EmptyContent)
            }
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl VisionProvider for AlwaysFails {
        fn name(&self) -> &'static str {
            "always-fails"
        }

        async fn describe(
            &self,
            _image: &ImageUpload,
            _instruction: &str,
        ) -> Result<String, ProviderError> {
            Err(ProviderError::EmptyContent)
        }
    }

    fn fixture_catalog() -> PriceCatalog {
        PriceCatalog::from_reader(
            "code,description,unit,price\nWTR-101,Water extraction and drying,hour,205\n"
                .as_bytes(),
        )
        .unwrap()
    }

    fn test_config() -> Config {
        Config {
            port: 0,
            rust_log: "info".to_string(),
            data_dir: PathBuf::from("unused"),
            price_catalog_path: None,
            openai_api_key: None,
            anthropic_api_key: None,
            assess_mode: AssessMode::Structured,
            assess_timeout_secs: 5,
        }
    }

    async fn test_state(provider: Arc<dyn VisionProvider>) -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        let jobs = JobStore::new(dir.path());
        jobs.init().await.unwrap();
        let state = AppState {
            config: test_config(),
            catalog: Arc::new(fixture_catalog()),
            assessor: Arc::new(DamageAssessor::new(
                vec![provider],
                Duration::from_secs(5),
            )),
            jobs,
        };
        (dir, state)
    }

    fn png_upload(name: &str) -> ImageUpload {
        let img = image::RgbImage::from_pixel(6, 4, image::Rgb([90, 90, 90]));
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        ImageUpload {
            file_name: name.to_string(),
            content_type: Some("image/png".to_string()),
            bytes: Bytes::from(buf.into_inner()),
        }
    }

    #[tokio::test]
    async fn test_zero_images_rejected_before_job_allocation() {
        let (dir, state) = test_state(Arc::new(ScriptedProvider)).await;
        let result = run_submission(&state, Vec::new(), None).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        // No job directory may exist.
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 0, "no job namespace should have been created");
    }

    #[tokio::test]
    async fn test_mixed_structured_and_narrative_submission() {
        let (_dir, state) = test_state(Arc::new(ScriptedProvider)).await;
        let outcome = run_submission(
            &state,
            vec![png_upload("a.png"), png_upload("b.png")],
            Some("Check the attic too.".to_string()),
        )
        .await
        .expect("submission should succeed");

        assert_eq!(outcome.meta.status, JobStatus::Composed);
        assert_eq!(outcome.analyses.len(), 2);

        // Image A: catalog match at 2 × 205, unmatched item kept at zero.
        let a = &outcome.analyses[0];
        assert_eq!(a.subtotal, 410.0);
        let unmatched = a
            .line_items
            .iter()
            .find(|i| i.code == "ZZZ-999")
            .expect("unmatched item must stay visible");
        assert!(!unmatched.matched);
        assert_eq!(unmatched.unit_price, 0.0);

        // Image B: narrative only, no table.
        let b = &outcome.analyses[1];
        assert!(b.line_items.is_empty());
        assert!(b.narrative.as_deref().unwrap().contains("Hail damage"));

        assert_eq!(grand_total(&outcome.analyses), 410.0);

        // Artifact is durable and retrievable.
        let artifact = state
            .jobs
            .read_artifact(&outcome.meta)
            .await
            .unwrap()
            .expect("artifact must exist");
        assert!(artifact.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_all_providers_failing_still_yields_report() {
        let (_dir, state) = test_state(Arc::new(AlwaysFails)).await;
        let outcome = run_submission(&state, vec![png_upload("x.png")], None)
            .await
            .expect("fallback template must keep the pipeline alive");

        assert_eq!(outcome.meta.status, JobStatus::Composed);
        let analysis = &outcome.analyses[0];
        assert!(!analysis.line_items.is_empty(), "template items expected");
        assert!(
            analysis.narrative.as_deref().unwrap().contains("Offline"),
            "offline origin must be visible"
        );

        let artifact = state.jobs.read_artifact(&outcome.meta).await.unwrap();
        assert!(artifact.unwrap().starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_repeated_reads_are_byte_identical() {
        let (_dir, state) = test_state(Arc::new(ScriptedProvider)).await;
        let outcome = run_submission(&state, vec![png_upload("a.png")], None)
            .await
            .unwrap();
        let first = state.jobs.read_artifact(&outcome.meta).await.unwrap().unwrap();
        let second = state.jobs.read_artifact(&outcome.meta).await.unwrap().unwrap();
        assert_eq!(first, second);
    }
}

//! Job store — durable per-job filesystem namespaces.
//!
//! Each job owns an isolated directory under the store root, named by a
//! random UUIDv4. The id doubles as the retrieval token, so ids are never
//! sequential and any incoming id is parsed as a UUID before the filesystem
//! is touched (no path traversal through crafted ids). Status lives in a
//! JSON sidecar next to the inputs, so "not found" and "still processing"
//! stay distinguishable across process restarts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const META_FILE: &str = "meta.json";
const IMAGES_DIR: &str = "images";
const REPORT_FILE: &str = "report.pdf";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata serialization error: {0}")]
    Meta(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Analyzing,
    Composed,
    Failed,
}

/// Persisted job record. Mutated by each pipeline stage via `save_meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMeta {
    pub id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    /// Original filenames in upload order, for display.
    pub images: Vec<String>,
    pub notes: Option<String>,
    /// Set by `finalize`; relative to the job directory.
    pub report_file: Option<String>,
}

#[derive(Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    fn job_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Allocates a fresh job with a random, unguessable id.
    pub async fn create(&self) -> Result<JobMeta, StoreError> {
        let meta = JobMeta {
            id: Uuid::new_v4(),
            status: JobStatus::Created,
            created_at: Utc::now(),
            images: Vec::new(),
            notes: None,
            report_file: None,
        };
        let dir = self.job_dir(meta.id);
        tokio::fs::create_dir_all(dir.join(IMAGES_DIR)).await?;
        self.save_meta(&meta).await?;
        debug!(job_id = %meta.id, "job created");
        Ok(meta)
    }

    pub async fn save_meta(&self, meta: &JobMeta) -> Result<(), StoreError> {
        let path = self.job_dir(meta.id).join(META_FILE);
        let json = serde_json::to_vec_pretty(meta)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Loads a job's metadata. `Ok(None)` when the id is unknown.
    pub async fn load_meta(&self, id: Uuid) -> Result<Option<JobMeta>, StoreError> {
        let path = self.job_dir(id).join(META_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Persists one uploaded image under the job's namespace. The stored
    /// filename is index-prefixed and sanitized; the caller keeps the
    /// original name in `JobMeta.images` for display.
    pub async fn store_image(
        &self,
        id: Uuid,
        index: usize,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let stored = format!("{:02}_{}", index, sanitize_file_name(file_name));
        let path = self.job_dir(id).join(IMAGES_DIR).join(stored);
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    pub async fn store_notes(&self, id: Uuid, notes: &str) -> Result<(), StoreError> {
        let path = self.job_dir(id).join("notes.txt");
        tokio::fs::write(path, notes.as_bytes()).await?;
        Ok(())
    }

    /// Writes the rendered artifact and flips the job to Composed.
    pub async fn finalize(&self, meta: &mut JobMeta, pdf: &[u8]) -> Result<(), StoreError> {
        let path = self.job_dir(meta.id).join(REPORT_FILE);
        tokio::fs::write(&path, pdf).await?;
        meta.report_file = Some(REPORT_FILE.to_string());
        meta.status = JobStatus::Composed;
        self.save_meta(meta).await?;
        debug!(job_id = %meta.id, bytes = pdf.len(), "report finalized");
        Ok(())
    }

    pub async fn mark_failed(&self, meta: &mut JobMeta) -> Result<(), StoreError> {
        meta.status = JobStatus::Failed;
        self.save_meta(meta).await
    }

    /// Reads back a finalized artifact. `Ok(None)` when the job has no
    /// report yet (the caller distinguishes that from an unknown id via
    /// `load_meta`).
    pub async fn read_artifact(&self, meta: &JobMeta) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(name) = meta.report_file.as_deref() else {
            return Ok(None);
        };
        let path = self.job_dir(meta.id).join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps alphanumerics, dots, dashes and underscores; everything else
/// becomes an underscore. Defends against separator characters in
/// client-supplied filenames.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '_' || c == '.') {
        "image".to_string()
    } else {
        cleaned
    }
}

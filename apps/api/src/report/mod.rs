//! Report composition — turns a job plus its image analyses into a paginated
//! PDF artifact.

pub mod composer;
pub mod font_metrics;
pub mod pdf;

use thiserror::Error;

pub use composer::compose;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("PDF generation failed: {0}")]
    Pdf(String),

    #[error("image processing failed: {0}")]
    Image(String),
}

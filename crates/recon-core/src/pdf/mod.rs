//! PDF processing module.
//!
//! Only the first page of a document is ever read.

mod extractor;

pub use extractor::FirstPageExtractor;

use crate::error::PdfError;
use image::DynamicImage;

/// What the first page offers for recognition.
#[derive(Debug, Clone)]
pub enum PageContent {
    /// Embedded text long enough to skip OCR.
    Text(String),
    /// A scanned page image that needs OCR.
    Image(DynamicImage),
}

/// Result type for PDF operations.
pub type Result<T> = std::result::Result<T, PdfError>;

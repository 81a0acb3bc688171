//! Error types for the recon-core library.

use std::time::Duration;

use thiserror::Error;

use crate::models::catalog::InvoiceId;

/// Errors from loading and saving library-level files such as the
/// configuration.
#[derive(Error, Debug)]
pub enum ReconError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed or serialized.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Validation failures raised before any recognition is attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    /// The declared MIME type is not on the allow-list.
    #[error("unsupported file type {mime}; allowed types: {allowed}")]
    UnsupportedType { mime: String, allowed: String },

    /// The payload exceeds the configured upload limit.
    #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    /// The payload is empty.
    #[error("empty document")]
    Empty,
}

/// Errors raised by the recognition adapter.
///
/// These never escape an extraction call: the extraction service folds them
/// into an unsuccessful result with zero confidence.
#[derive(Error, Debug)]
pub enum RecognitionError {
    /// Recognition did not finish within the hard timeout.
    #[error("recognition timed out after {0:?}")]
    Timeout(Duration),

    /// The engine produced no text.
    #[error("recognition produced no text")]
    EmptyText,

    /// No recognition path exists for the document type.
    #[error("cannot recognize documents of type {0}")]
    Unsupported(String),

    /// The blocking recognition task panicked or was cancelled.
    #[error("recognition task failed: {0}")]
    Task(String),

    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    /// OCR engine error.
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    /// Image decoding error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Errors related to PDF processing.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// Failed to extract text from the first page.
    #[error("failed to extract text: {0}")]
    TextExtraction(String),

    /// No decodable image on the first page.
    #[error("failed to extract images: {0}")]
    ImageExtraction(String),

    /// The PDF is encrypted and cannot be processed.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,
}

/// Errors related to OCR processing.
#[derive(Error, Debug)]
pub enum OcrError {
    /// Failed to load OCR models.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Text recognition failed.
    #[error("text recognition failed: {0}")]
    Recognition(String),

    /// Image preprocessing failed.
    #[error("preprocessing failed: {0}")]
    Preprocessing(String),
}

/// Errors raised by an inventory store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Generic backend failure.
    #[error("backend failure: {0}")]
    Backend(String),

    /// A row referenced inside the transaction does not exist.
    #[error("missing row: {0}")]
    MissingRow(String),

    /// The transaction was already committed or rolled back.
    #[error("transaction already finished")]
    Finished,

    /// Postgres driver error.
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors surfaced by the reconciliation engine.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The confirmed invoice failed validation; no transaction was opened.
    #[error("invalid invoice: {0}")]
    InvalidInvoice(String),

    /// The invoice does not exist within the caller's tenant.
    #[error("invoice {0} not found")]
    InvoiceNotFound(InvoiceId),

    /// The transaction failed and was rolled back.
    #[error("transaction failed and was rolled back: {0}")]
    TransactionFailure(#[source] StoreError),
}

/// Result type for configuration and file handling in the recon library.
pub type Result<T> = std::result::Result<T, ReconError>;

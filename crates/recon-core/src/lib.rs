//! Core library for restaurant invoice intake.
//!
//! This crate provides:
//! - Recognition of PDFs and images into text (embedded PDF text or OCR)
//! - Rule-based extraction of invoice header fields and line items
//! - Confidence scoring and catalog suggestions for extracted names
//! - Transactional reconciliation of confirmed invoices into stock

pub mod error;
pub mod models;
pub mod pdf;
pub mod ocr;
pub mod invoice;
pub mod resolve;
pub mod store;
pub mod reconcile;
pub mod service;

pub use error::{InputError, OcrError, PdfError, ReconError, ReconcileError, RecognitionError, Result, StoreError};
pub use models::catalog::{CatalogEntity, EntityKind, InvoiceId, ProductId, ProviderId, Suggestion, TenantId};
pub use models::config::ReconConfig;
pub use models::inventory::{ConfirmedInvoice, ConfirmedItem, Discrepancy, ReconcileOutcome, RetryOutcome};
pub use models::invoice::{ExtractedHeader, ExtractedInvoice, ExtractedLineItem};
pub use invoice::{InvoiceParser, RuleInvoiceParser};
pub use ocr::{DocumentRecognizer, OcrBackend, RawDocument, Recognizer};
#[cfg(feature = "native")]
pub use ocr::PureOcrBackend;
pub use resolve::{CatalogLookup, CatalogSnapshot, EntityResolver};
pub use store::{InventoryStore, MemoryStore, StockTransaction, StoreSnapshot};
#[cfg(feature = "postgres")]
pub use store::PgStore;
pub use reconcile::ReconciliationEngine;
pub use service::ExtractionService;

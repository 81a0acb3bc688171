//! Extraction entry point: validate, recognize, parse, suggest.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{InputError, RecognitionError};
use crate::invoice::{InvoiceParser, RuleInvoiceParser};
use crate::models::catalog::TenantId;
use crate::models::config::{RecognitionConfig, ReconConfig};
use crate::models::invoice::ExtractedInvoice;
use crate::ocr::{RawDocument, Recognizer};
use crate::resolve::{CatalogLookup, EntityResolver};

/// Runs documents through recognition and extraction.
///
/// Recognition is blocking work: it runs on the blocking pool, at most
/// `max_concurrent` at a time, and is abandoned after the configured
/// timeout. An abandoned recognition keeps its slot until its thread
/// returns.
pub struct ExtractionService<R> {
    recognizer: Arc<R>,
    parser: Box<dyn InvoiceParser>,
    resolver: EntityResolver,
    allowed_mime_types: Vec<String>,
    max_upload_bytes: usize,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl<R: Recognizer + 'static> ExtractionService<R> {
    pub fn new(recognizer: R, config: &ReconConfig) -> Self {
        let recognition: &RecognitionConfig = &config.recognition;
        Self {
            recognizer: Arc::new(recognizer),
            parser: Box::new(RuleInvoiceParser::from_config(&config.extraction)),
            resolver: EntityResolver::new(config.resolver.clone()),
            allowed_mime_types: recognition
                .allowed_mime_types
                .iter()
                .map(|m| m.trim().to_ascii_lowercase())
                .collect(),
            max_upload_bytes: recognition.max_upload_bytes(),
            timeout: recognition.timeout(),
            permits: Arc::new(Semaphore::new(recognition.max_concurrent.max(1))),
        }
    }

    pub fn with_parser(mut self, parser: impl InvoiceParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reject a document before any recognition work is done.
    pub fn validate(&self, document: &RawDocument) -> Result<(), InputError> {
        let essence = document.essence();
        if !self.allowed_mime_types.iter().any(|m| *m == essence) {
            return Err(InputError::UnsupportedType {
                mime: document.mime.clone(),
                allowed: self.allowed_mime_types.join(", "),
            });
        }
        if document.bytes.len() > self.max_upload_bytes {
            return Err(InputError::TooLarge {
                size: document.bytes.len(),
                limit: self.max_upload_bytes,
            });
        }
        if document.bytes.is_empty() {
            return Err(InputError::Empty);
        }
        Ok(())
    }

    /// Recognize a document under the concurrency bound and timeout.
    ///
    /// The timeout covers the wait for a slot as well as the recognition
    /// itself.
    pub async fn recognize(&self, document: RawDocument) -> Result<String, RecognitionError> {
        let permits = Arc::clone(&self.permits);
        let recognizer = Arc::clone(&self.recognizer);
        let run = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|e| RecognitionError::Task(e.to_string()))?;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                recognizer.recognize(&document)
            })
            .await
            .map_err(|join| RecognitionError::Task(join.to_string()))?
        };

        let text = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| RecognitionError::Timeout(self.timeout))??;

        if text.trim().is_empty() {
            return Err(RecognitionError::EmptyText);
        }
        Ok(text)
    }

    /// Extract fields from a document.
    ///
    /// Only input validation fails the call; recognition failures produce
    /// an unsuccessful result with zero confidence.
    pub async fn extract(&self, document: RawDocument) -> Result<ExtractedInvoice, InputError> {
        self.validate(&document)?;

        let start = Instant::now();
        let size = document.bytes.len();
        let result = match self.recognize(document).await {
            Ok(text) => self.parser.parse(&text),
            Err(e) => {
                warn!("Recognition failed: {}", e);
                ExtractedInvoice::failed(e.to_string())
            }
        };

        info!(
            "Extracted {} bytes in {}ms (success: {}, confidence {:.2})",
            size,
            start.elapsed().as_millis(),
            result.success,
            result.confidence
        );
        Ok(result)
    }

    /// [`Self::extract`], then attach catalog suggestions for the provider
    /// and line names.
    pub async fn extract_with_suggestions<C: CatalogLookup + ?Sized>(
        &self,
        document: RawDocument,
        catalog: &C,
        tenant: TenantId,
    ) -> Result<ExtractedInvoice, InputError> {
        let mut result = self.extract(document).await?;
        if result.success {
            result.suggestions = self.resolver.suggest(catalog, tenant, &result);
            debug!("Attached {} suggestions", result.suggestions.len());
        }
        Ok(result)
    }
}

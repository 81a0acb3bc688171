//! Recognition adapter: turns a document into a block of text.
//!
//! PDFs contribute their first page only: embedded text when there is
//! enough of it, otherwise the page image goes through OCR. Images are
//! preprocessed before OCR.

mod preprocessing;
#[cfg(feature = "native")]
mod pure_engine;

pub use preprocessing::ImagePreprocessor;
#[cfg(feature = "native")]
pub use pure_engine::PureOcrBackend;

use image::DynamicImage;
use tracing::debug;

use crate::error::{OcrError, RecognitionError};
use crate::models::config::ReconConfig;
use crate::pdf::{FirstPageExtractor, PageContent};

/// A document submitted for extraction. Lives for one extraction call.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub bytes: Vec<u8>,
    /// Declared MIME type, possibly with parameters.
    pub mime: String,
}

/// Recognition path for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
    Text,
}

impl RawDocument {
    pub fn new(bytes: impl Into<Vec<u8>>, mime: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime: mime.into(),
        }
    }

    /// MIME type without parameters, lowercased.
    pub fn essence(&self) -> String {
        self.mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }

    pub fn kind(&self) -> Option<DocumentKind> {
        let essence = self.essence();
        match essence.as_str() {
            "application/pdf" => Some(DocumentKind::Pdf),
            "text/plain" => Some(DocumentKind::Text),
            other if other.starts_with("image/") => Some(DocumentKind::Image),
            _ => None,
        }
    }
}

/// Black-box `recognize(bytes, mime) -> text` capability.
///
/// Implementations may block for seconds; callers run them off the async
/// executor.
pub trait Recognizer: Send + Sync {
    fn recognize(&self, document: &RawDocument) -> Result<String, RecognitionError>;
}

/// An OCR engine that reads text from a single image.
pub trait OcrBackend: Send + Sync {
    fn recognize_image(&self, image: &DynamicImage) -> Result<String, OcrError>;
}

/// A recognized text region.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBox {
    pub text: String,
    pub left: f32,
    pub top: f32,
    pub bottom: f32,
}

/// Join text regions top-to-bottom, grouping regions that overlap
/// vertically into one line read left-to-right.
pub fn join_reading_order(mut boxes: Vec<TextBox>) -> String {
    boxes.retain(|b| !b.text.trim().is_empty());
    boxes.sort_by(|a, b| a.top.total_cmp(&b.top));

    let mut rows: Vec<Vec<TextBox>> = Vec::new();
    for text_box in boxes {
        let center = (text_box.top + text_box.bottom) / 2.0;
        match rows.last_mut() {
            Some(row) if center <= row[0].bottom => row.push(text_box),
            _ => rows.push(vec![text_box]),
        }
    }

    rows.into_iter()
        .map(|mut row| {
            row.sort_by(|a, b| a.left.total_cmp(&b.left));
            row.iter().map(|b| b.text.trim()).collect::<Vec<_>>().join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Routes a document to embedded-text extraction or OCR.
pub struct DocumentRecognizer<B> {
    backend: B,
    preprocessor: ImagePreprocessor,
    min_pdf_text_len: usize,
}

impl<B: OcrBackend> DocumentRecognizer<B> {
    pub fn new(backend: B) -> Self {
        Self::from_config(backend, &ReconConfig::default())
    }

    pub fn from_config(backend: B, config: &ReconConfig) -> Self {
        Self {
            backend,
            preprocessor: ImagePreprocessor::new()
                .with_min_width(config.ocr.min_image_width)
                .with_max_pixels(config.ocr.max_image_pixels),
            min_pdf_text_len: config.recognition.min_pdf_text_length,
        }
    }

    fn ocr(&self, image: &DynamicImage) -> Result<String, RecognitionError> {
        let prepared = self.preprocessor.prepare(image)?;
        Ok(self.backend.recognize_image(&prepared)?)
    }
}

impl<B: OcrBackend> Recognizer for DocumentRecognizer<B> {
    fn recognize(&self, document: &RawDocument) -> Result<String, RecognitionError> {
        let kind = document
            .kind()
            .ok_or_else(|| RecognitionError::Unsupported(document.essence()))?;
        debug!("Recognizing {} bytes as {:?}", document.bytes.len(), kind);

        match kind {
            DocumentKind::Text => Ok(String::from_utf8_lossy(&document.bytes).into_owned()),
            DocumentKind::Pdf => {
                let pdf = FirstPageExtractor::load(&document.bytes)?;
                match pdf.content(self.min_pdf_text_len)? {
                    PageContent::Text(text) => Ok(text),
                    PageContent::Image(image) => self.ocr(&image),
                }
            }
            DocumentKind::Image => {
                let image = image::load_from_memory(&document.bytes)?;
                self.ocr(&image)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbImage};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::sync::Mutex;

    /// Records the size of the image it was given.
    struct RecordingBackend {
        seen: Mutex<Option<(u32, u32)>>,
    }

    impl OcrBackend for RecordingBackend {
        fn recognize_image(&self, image: &DynamicImage) -> Result<String, OcrError> {
            *self.seen.lock().unwrap() = Some(image.dimensions());
            Ok("Total: 10.00".to_string())
        }
    }

    fn text_box(text: &str, left: f32, top: f32) -> TextBox {
        TextBox {
            text: text.to_string(),
            left,
            top,
            bottom: top + 20.0,
        }
    }

    #[test]
    fn test_kind_from_mime() {
        assert_eq!(RawDocument::new(vec![], "application/pdf").kind(), Some(DocumentKind::Pdf));
        assert_eq!(RawDocument::new(vec![], "IMAGE/PNG").kind(), Some(DocumentKind::Image));
        assert_eq!(
            RawDocument::new(vec![], "text/plain; charset=utf-8").kind(),
            Some(DocumentKind::Text)
        );
        assert_eq!(RawDocument::new(vec![], "application/zip").kind(), None);
    }

    #[test]
    fn test_join_reading_order() {
        let boxes = vec![
            text_box("25.00", 400.0, 102.0),
            text_box("Tomates", 10.0, 100.0),
            text_box("Factura", 10.0, 10.0),
            text_box("   ", 10.0, 50.0),
            text_box("10", 200.0, 98.0),
        ];
        assert_eq!(join_reading_order(boxes), "Factura\nTomates 10 25.00");
    }

    #[test]
    fn test_image_goes_through_preprocessing() {
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(200, 100))
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let recognizer = DocumentRecognizer::new(RecordingBackend { seen: Mutex::new(None) });
        let text = recognizer.recognize(&RawDocument::new(png, "image/png")).unwrap();

        assert_eq!(text, "Total: 10.00");
        assert_eq!(*recognizer.backend.seen.lock().unwrap(), Some((1000, 500)));
    }

    #[test]
    fn test_plain_text_passes_through() {
        let recognizer = DocumentRecognizer::new(RecordingBackend { seen: Mutex::new(None) });
        let text = recognizer
            .recognize(&RawDocument::new(b"Factura No: 1".to_vec(), "text/plain"))
            .unwrap();
        assert_eq!(text, "Factura No: 1");
        assert!(recognizer.backend.seen.lock().unwrap().is_none());
    }

    #[test]
    fn test_undecodable_image() {
        let recognizer = DocumentRecognizer::new(RecordingBackend { seen: Mutex::new(None) });
        let result = recognizer.recognize(&RawDocument::new(b"not a png".to_vec(), "image/png"));
        assert!(matches!(result, Err(RecognitionError::Image(_))));
    }
}

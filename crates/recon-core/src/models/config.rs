//! Configuration structures for the intake pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ReconError;

/// Main configuration for the recon pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    /// Document validation and recognition limits.
    pub recognition: RecognitionConfig,

    /// Header and line-item extraction limits.
    pub extraction: ExtractionConfig,

    /// Catalog suggestion limits.
    pub resolver: ResolverConfig,

    /// OCR engine configuration.
    pub ocr: OcrConfig,
}

/// Document validation and recognition configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// MIME types accepted for extraction.
    pub allowed_mime_types: Vec<String>,

    /// Maximum accepted payload in megabytes.
    pub max_upload_size_mb: usize,

    /// Hard timeout for one recognition call, in seconds.
    pub timeout_secs: u64,

    /// Number of recognitions allowed to run at once.
    pub max_concurrent: usize,

    /// Minimum embedded text length for a PDF page to skip OCR.
    pub min_pdf_text_length: usize,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            allowed_mime_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "application/pdf".to_string(),
            ],
            max_upload_size_mb: 10,
            timeout_secs: 15,
            max_concurrent: 4,
            min_pdf_text_length: 50,
        }
    }
}

impl RecognitionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Extraction configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Maximum characters kept for a header field.
    pub max_field_len: usize,

    /// Lines shorter than this are treated as noise.
    pub min_line_len: usize,

    /// Maximum number of line items returned.
    pub max_items: usize,

    /// Maximum characters kept for a product name.
    pub max_name_len: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_field_len: 100,
            min_line_len: 10,
            max_items: 20,
            max_name_len: 50,
        }
    }
}

/// Entity resolver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Characters of the provider name used for the substring search.
    pub provider_prefix_len: usize,

    /// Maximum provider suggestions.
    pub provider_limit: usize,

    /// Characters of a product name used for the substring search.
    pub product_prefix_len: usize,

    /// Maximum product suggestions per line.
    pub product_limit: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            provider_prefix_len: 20,
            provider_limit: 3,
            product_prefix_len: 15,
            product_limit: 2,
        }
    }
}

/// OCR engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Directory containing model files.
    pub model_dir: PathBuf,

    /// Text detection model file name.
    pub detection_model: String,

    /// Text recognition model file name.
    pub recognition_model: String,

    /// Character dictionary file name.
    pub dictionary: String,

    /// Images narrower than this are upscaled before recognition.
    pub min_image_width: u32,

    /// Upper bound on pixels after preprocessing.
    pub max_image_pixels: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            detection_model: "det.onnx".to_string(),
            recognition_model: "latin_rec.onnx".to_string(),
            dictionary: "latin_dict.txt".to_string(),
            min_image_width: 1000,
            max_image_pixels: 40_000_000,
        }
    }
}

impl ReconConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| ReconError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| ReconError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `RECON_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply `RECON_*` overrides from an arbitrary variable source.
    ///
    /// Unparseable values are ignored.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mb) = lookup("RECON_MAX_UPLOAD_SIZE_MB").and_then(|v| v.trim().parse().ok()) {
            self.recognition.max_upload_size_mb = mb;
        }
        if let Some(types) = lookup("RECON_ALLOWED_FILE_TYPES") {
            let types: Vec<String> = types
                .split(',')
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
            if !types.is_empty() {
                self.recognition.allowed_mime_types = types;
            }
        }
        if let Some(secs) =
            lookup("RECON_RECOGNITION_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok())
        {
            self.recognition.timeout_secs = secs;
        }
        self
    }

    /// Get full path to a model file.
    pub fn model_path(&self, model_name: &str) -> PathBuf {
        self.ocr.model_dir.join(model_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ReconConfig::default();
        assert_eq!(config.recognition.timeout(), Duration::from_secs(15));
        assert_eq!(config.recognition.max_upload_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.extraction.max_items, 20);
        assert_eq!(config.resolver.provider_prefix_len, 20);
        assert_eq!(config.resolver.product_limit, 2);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ReconConfig =
            serde_json::from_str(r#"{"recognition": {"timeout_secs": 5}}"#).unwrap();
        assert_eq!(config.recognition.timeout_secs, 5);
        assert_eq!(config.recognition.max_upload_size_mb, 10);
        assert_eq!(config.extraction, ExtractionConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RECON_MAX_UPLOAD_SIZE_MB", "2"),
            ("RECON_ALLOWED_FILE_TYPES", "image/png, text/plain"),
            ("RECON_RECOGNITION_TIMEOUT_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = ReconConfig::default()
            .with_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.recognition.max_upload_size_mb, 2);
        assert_eq!(
            config.recognition.allowed_mime_types,
            vec!["image/png".to_string(), "text/plain".to_string()]
        );
        assert_eq!(config.recognition.timeout_secs, 15);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = ReconConfig::default();
        config.resolver.product_limit = 5;
        config.save(&path).unwrap();

        let loaded = ReconConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ReconConfig::from_file(&dir.path().join("missing.json"));
        assert!(matches!(missing, Err(ReconError::Io(_))));

        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let broken = ReconConfig::from_file(&path);
        assert!(matches!(broken, Err(ReconError::Config(msg)) if msg.contains("broken.json")));
    }
}

//! OCR engine selection.

use image::DynamicImage;
use tracing::{debug, warn};

use recon_core::error::OcrError;
use recon_core::models::config::ReconConfig;
use recon_core::ocr::{OcrBackend, PureOcrBackend};

/// The OCR backend, or why it could not be loaded.
pub enum Engine {
    Loaded(PureOcrBackend),
    Unavailable(String),
}

impl Engine {
    pub fn load(config: &ReconConfig) -> Self {
        match PureOcrBackend::from_config(config) {
            Ok(backend) => {
                debug!("Loaded OCR models from {}", config.ocr.model_dir.display());
                Engine::Loaded(backend)
            }
            Err(e) => {
                warn!("OCR unavailable: {}", e);
                Engine::Unavailable(e.to_string())
            }
        }
    }
}

impl OcrBackend for Engine {
    fn recognize_image(&self, image: &DynamicImage) -> Result<String, OcrError> {
        match self {
            Engine::Loaded(backend) => backend.recognize_image(image),
            Engine::Unavailable(reason) => Err(OcrError::ModelLoad(reason.clone())),
        }
    }
}

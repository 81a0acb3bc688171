//! OCR backend using `pure-onnx-ocr` (pure Rust, no external ONNX Runtime).

use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use image::{DynamicImage, GenericImageView};
use pure_onnx_ocr::engine::{OcrEngine, OcrEngineBuilder};
use tracing::{debug, info};

use crate::error::OcrError;
use crate::models::config::ReconConfig;

use super::{OcrBackend, TextBox, join_reading_order};

/// A page waiting for the OCR worker, with the channel its text goes back on.
struct OcrJob {
    image: DynamicImage,
    reply: Sender<Result<String, OcrError>>,
}

/// Detection + recognition models loaded from disk.
///
/// The engine keeps per-session caches that cannot cross threads, so it
/// lives on one worker thread and pages are queued to it. The worker exits
/// once the backend is dropped.
pub struct PureOcrBackend {
    jobs: Sender<OcrJob>,
}

impl PureOcrBackend {
    /// Load the models named in the configuration from its model directory.
    pub fn from_config(config: &ReconConfig) -> Result<Self, OcrError> {
        let det_path = config.model_path(&config.ocr.detection_model);
        let rec_path = config.model_path(&config.ocr.recognition_model);
        let dict_path = config.model_path(&config.ocr.dictionary);

        for path in [&det_path, &rec_path, &dict_path] {
            if !path.exists() {
                return Err(OcrError::ModelLoad(format!("missing model file {}", path.display())));
            }
        }

        let (jobs, queue) = unbounded::<OcrJob>();
        let (ready_tx, ready_rx) = bounded::<Result<(), OcrError>>(1);

        thread::Builder::new()
            .name("recon-ocr".to_string())
            .spawn(move || {
                let built = OcrEngineBuilder::new()
                    .det_model_path(&det_path)
                    .rec_model_path(&rec_path)
                    .dictionary_path(&dict_path)
                    .build()
                    .map_err(|e| OcrError::ModelLoad(format!("pure-onnx-ocr: {}", e)));
                match built {
                    Ok(engine) => {
                        let _ = ready_tx.send(Ok(()));
                        run_worker_loop(queue, engine);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| OcrError::ModelLoad(format!("cannot start OCR worker: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| OcrError::ModelLoad("OCR worker exited during startup".to_string()))??;

        info!("Loaded pure-onnx-ocr engine from {}", config.ocr.model_dir.display());
        Ok(Self { jobs })
    }
}

fn run_worker_loop(queue: Receiver<OcrJob>, engine: OcrEngine) {
    while let Ok(job) = queue.recv() {
        let _ = job.reply.send(recognize_with(&engine, &job.image));
    }
    debug!("OCR worker stopped");
}

fn recognize_with(engine: &OcrEngine, image: &DynamicImage) -> Result<String, OcrError> {
    let start = Instant::now();
    let (width, height) = image.dimensions();

    let results = engine
        .run_from_image(image)
        .map_err(|e| OcrError::Recognition(format!("pure-onnx-ocr: {}", e)))?;

    let boxes: Vec<TextBox> = results
        .iter()
        .map(|r| {
            let (left, top, bottom) = polygon_extent(&r.bounding_box);
            TextBox {
                text: r.text.replace("[UNK]", " "),
                left,
                top,
                bottom,
            }
        })
        .collect();

    debug!(
        "OCR on {}x{} image: {} text regions in {}ms",
        width,
        height,
        boxes.len(),
        start.elapsed().as_millis()
    );

    Ok(join_reading_order(boxes))
}

impl OcrBackend for PureOcrBackend {
    fn recognize_image(&self, image: &DynamicImage) -> Result<String, OcrError> {
        let (reply, answer) = bounded(1);
        self.jobs
            .send(OcrJob {
                image: image.clone(),
                reply,
            })
            .map_err(|_| OcrError::Recognition("OCR worker is not running".to_string()))?;
        answer
            .recv()
            .map_err(|_| OcrError::Recognition("OCR worker stopped before answering".to_string()))?
    }
}

/// Left edge, top and bottom of a detected quadrilateral.
fn polygon_extent(polygon: &pure_onnx_ocr::Polygon<f64>) -> (f32, f32, f32) {
    let mut left = f32::INFINITY;
    let mut top = f32::INFINITY;
    let mut bottom = f32::NEG_INFINITY;
    for coord in polygon.exterior().coords().take(4) {
        left = left.min(coord.x as f32);
        top = top.min(coord.y as f32);
        bottom = bottom.max(coord.y as f32);
    }
    (left, top, bottom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_shareable<T: Send + Sync + 'static>() {}

    #[test]
    fn test_backend_is_shareable_across_threads() {
        assert_shareable::<PureOcrBackend>();
        assert_shareable::<crate::ocr::DocumentRecognizer<PureOcrBackend>>();
    }

    #[test]
    fn test_missing_models_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ReconConfig::default();
        config.ocr.model_dir = dir.path().to_path_buf();

        let result = PureOcrBackend::from_config(&config);
        assert!(matches!(result, Err(OcrError::ModelLoad(msg)) if msg.contains("missing model file")));
    }

    #[test]
    fn test_stopped_worker_reports_an_error() {
        let (jobs, queue) = unbounded::<OcrJob>();
        drop(queue);
        let backend = PureOcrBackend { jobs };

        let result = backend.recognize_image(&DynamicImage::new_luma8(4, 4));
        assert!(matches!(result, Err(OcrError::Recognition(_))));
    }
}

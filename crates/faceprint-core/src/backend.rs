//! ONNX-backed [`FaceAnalyzer`]: SCRFD detection plus ArcFace embeddings.
//!
//! The recognizer is loaded once and shared by every detector instance; one
//! SCRFD session is built per resolution hint.

use crate::capability::{DetectorError, DetectorFactory, FaceAnalyzer, ThresholdUnsupported};
use crate::config::{ConfigError, EngineConfig};
use crate::detector::ScrfdDetector;
use crate::prepare::PixelBuffer;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Embedding, Face};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

type SharedRecognizer = Arc<Mutex<FaceRecognizer>>;

pub struct OnnxFaceAnalyzer {
    detector: ScrfdDetector,
    recognizer: SharedRecognizer,
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn set_threshold(&mut self, threshold: f32) -> Result<(), ThresholdUnsupported> {
        self.detector.set_threshold(threshold);
        Ok(())
    }

    fn detect(&mut self, image: &PixelBuffer) -> Result<Vec<Face>, DetectorError> {
        let rgb = image.as_rgb();
        let mut faces = self.detector.detect(rgb)?;
        if faces.is_empty() {
            return Ok(faces);
        }

        let mut recognizer = self.recognizer.lock().unwrap_or_else(PoisonError::into_inner);
        for face in faces.iter_mut() {
            let Some(landmarks) = face.landmarks else {
                continue;
            };
            match recognizer.extract(rgb, &landmarks) {
                Ok(values) => face.embedding = Some(Embedding::new(values)),
                Err(e) => {
                    tracing::warn!(
                        bbox = ?face.bbox.to_array(),
                        error = %e,
                        "embedding extraction failed; face kept without embedding"
                    );
                }
            }
        }

        Ok(faces)
    }
}

/// Builds [`OnnxFaceAnalyzer`]s from a model pack.
pub struct OnnxFactory {
    detector_path: String,
    intra_threads: usize,
    recognizer: SharedRecognizer,
}

impl OnnxFactory {
    /// Load the recognizer and check the detector model exists. Detector
    /// sessions are created lazily, one per resolution hint.
    pub fn load(config: &EngineConfig) -> Result<Self, BackendError> {
        for provider in unsupported_providers(&config.providers) {
            tracing::warn!(provider, "execution provider not available; running on CPU");
        }

        let detector_path = config.detector_model_path()?;
        if !Path::new(&detector_path).exists() {
            return Err(DetectorError::ModelNotFound(detector_path).into());
        }

        let recognizer_path = config.recognizer_model_path()?;
        let recognizer = FaceRecognizer::load(&recognizer_path, config.intra_threads)?;

        tracing::info!(
            model = %config.model_name,
            detector = %detector_path,
            recognizer = %recognizer_path,
            "model pack ready"
        );

        Ok(Self {
            detector_path,
            intra_threads: config.intra_threads,
            recognizer: Arc::new(Mutex::new(recognizer)),
        })
    }
}

impl DetectorFactory for OnnxFactory {
    fn construct(&self, resolution_hint: (u32, u32)) -> Result<Box<dyn FaceAnalyzer>, DetectorError> {
        let detector = ScrfdDetector::load(&self.detector_path, resolution_hint, self.intra_threads)?;
        Ok(Box::new(OnnxFaceAnalyzer {
            detector,
            recognizer: Arc::clone(&self.recognizer),
        }))
    }
}

/// Providers other than CPU are accepted in configuration but not applied.
fn unsupported_providers(providers: &[String]) -> impl Iterator<Item = &str> {
    providers
        .iter()
        .map(String::as_str)
        .filter(|p| !matches!(*p, "cpu" | "cpuexecutionprovider"))
}

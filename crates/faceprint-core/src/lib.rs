//! Escalating face detection and embedding extraction.
//!
//! Images are decoded, bounded in size, and passed through a fixed schedule of
//! detector configurations until a face is found. The most representative face
//! is selected and its L2-normalized embedding reported alongside a trace of
//! every attempt. SCRFD detection and ArcFace recognition run via ONNX Runtime.

pub mod alignment;
pub mod backend;
pub mod cache;
pub mod capability;
pub mod config;
pub mod detector;
pub mod engine;
pub mod pipeline;
pub mod prepare;
pub mod recognizer;
pub mod response;
pub mod select;
pub mod types;

pub use backend::{BackendError, OnnxFactory};
pub use capability::{DetectorError, DetectorFactory, FaceAnalyzer, ThresholdUnsupported};
pub use config::{ConfigError, EngineConfig};
pub use engine::{EmbedError, FaceEmbedder};
pub use pipeline::{AttemptRecord, EscalatingPipeline, Phase, PipelineError, PipelineLimits};
pub use prepare::{DecodeError, PixelBuffer};
pub use response::{EmbedResponse, FacePayload, NO_EMBEDDING, NO_FACE};
pub use types::{BoundingBox, Embedding, Face};

use crate::pipeline::{
    PipelineLimits, DEFAULT_ABS_MAX_EDGE, DEFAULT_FIRST_PASS_MAX_EDGE, DEFAULT_UPSCALE_ON_FAIL,
};
use crate::prepare::MAX_UPSCALE_FACTOR;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_MODEL_NAME: &str = "buffalo_l";
pub const DEFAULT_PROVIDERS: &str = "cpu";
pub const DEFAULT_INTRA_THREADS: usize = 2;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("unknown model pack {0:?} (expected buffalo_l, buffalo_m, buffalo_s or buffalo_sc)")]
    UnknownModel(String),
    #[error("{name} must be positive, got {value}")]
    NonPositiveEdge { name: &'static str, value: u32 },
    #[error("UPSCALE_ON_FAIL must be finite, got {0}")]
    NonFiniteUpscale(f32),
    #[error("UPSCALE_ON_FAIL must be at most 4, got {0}")]
    UpscaleTooLarge(f32),
    #[error("FACEPRINT_INTRA_THREADS must be at least 1")]
    NoThreads,
}

/// Engine configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Directory holding one sub-directory per model pack.
    pub model_dir: PathBuf,
    pub model_name: String,
    /// Requested execution providers, in preference order.
    pub providers: Vec<String>,
    pub intra_threads: usize,
    pub limits: PipelineLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("./models"),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            providers: vec![DEFAULT_PROVIDERS.to_string()],
            intra_threads: DEFAULT_INTRA_THREADS,
            limits: PipelineLimits::default(),
        }
    }
}

impl EngineConfig {
    /// Load from the process environment and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let providers: Vec<String> = lookup("FACE_PROVIDERS")
            .unwrap_or_else(|| DEFAULT_PROVIDERS.to_string())
            .split(',')
            .map(|p| p.trim().to_ascii_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        let config = Self {
            model_dir: lookup("FACEPRINT_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            model_name: lookup("FACE_MODEL_NAME")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.model_name),
            providers: if providers.is_empty() {
                defaults.providers
            } else {
                providers
            },
            intra_threads: parsed(&lookup, "FACEPRINT_INTRA_THREADS", DEFAULT_INTRA_THREADS),
            limits: PipelineLimits {
                first_pass_max_edge: parsed(
                    &lookup,
                    "MAX_LONG_EDGE_FOR_FIRST_PASS",
                    DEFAULT_FIRST_PASS_MAX_EDGE,
                ),
                abs_max_edge: parsed(&lookup, "ABS_MAX_LONG_EDGE", DEFAULT_ABS_MAX_EDGE),
                upscale_on_fail: parsed(&lookup, "UPSCALE_ON_FAIL", DEFAULT_UPSCALE_ON_FAIL),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        model_files(&self.model_name)?;
        if self.limits.first_pass_max_edge == 0 {
            return Err(ConfigError::NonPositiveEdge {
                name: "MAX_LONG_EDGE_FOR_FIRST_PASS",
                value: 0,
            });
        }
        if self.limits.abs_max_edge == 0 {
            return Err(ConfigError::NonPositiveEdge {
                name: "ABS_MAX_LONG_EDGE",
                value: 0,
            });
        }
        if !self.limits.upscale_on_fail.is_finite() {
            return Err(ConfigError::NonFiniteUpscale(self.limits.upscale_on_fail));
        }
        if self.limits.upscale_on_fail > MAX_UPSCALE_FACTOR {
            return Err(ConfigError::UpscaleTooLarge(self.limits.upscale_on_fail));
        }
        if self.intra_threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        Ok(())
    }

    /// Path to the SCRFD detection model of the configured pack.
    pub fn detector_model_path(&self) -> Result<String, ConfigError> {
        let (detector, _) = model_files(&self.model_name)?;
        Ok(self.pack_file(detector))
    }

    /// Path to the ArcFace recognition model of the configured pack.
    pub fn recognizer_model_path(&self) -> Result<String, ConfigError> {
        let (_, recognizer) = model_files(&self.model_name)?;
        Ok(self.pack_file(recognizer))
    }

    fn pack_file(&self, file: &str) -> String {
        self.model_dir
            .join(&self.model_name)
            .join(file)
            .to_string_lossy()
            .into_owned()
    }
}

/// (detector, recognizer) file names of a model pack.
fn model_files(model_name: &str) -> Result<(&'static str, &'static str), ConfigError> {
    match model_name {
        "buffalo_l" => Ok(("det_10g.onnx", "w600k_r50.onnx")),
        "buffalo_m" => Ok(("det_2.5g.onnx", "w600k_r50.onnx")),
        "buffalo_s" | "buffalo_sc" => Ok(("det_500m.onnx", "w600k_mbf.onnx")),
        other => Err(ConfigError::UnknownModel(other.to_string())),
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

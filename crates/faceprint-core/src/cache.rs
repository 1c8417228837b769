//! Process-wide cache of constructed analyzers, keyed by detector configuration.
//!
//! Each key owns a once-cell, so concurrent first use of the same
//! configuration builds exactly one analyzer; the other callers block on the
//! cell and receive the same instance. The map's shard lock is released before
//! construction starts. Entries are never evicted: the retry schedule bounds
//! the key space.

use crate::capability::{DetectorError, DetectorFactory, FaceAnalyzer};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

/// An analyzer shared between requests. ONNX sessions need exclusive access to run.
pub type SharedAnalyzer = Arc<Mutex<Box<dyn FaceAnalyzer>>>;

/// Detector input size plus score threshold. Thresholds compare bitwise.
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    pub resolution_hint: (u32, u32),
    pub threshold: f32,
}

impl DetectorConfig {
    pub fn new(resolution_hint: (u32, u32), threshold: f32) -> Self {
        Self {
            resolution_hint,
            threshold,
        }
    }
}

impl PartialEq for DetectorConfig {
    fn eq(&self, other: &Self) -> bool {
        self.resolution_hint == other.resolution_hint
            && self.threshold.to_bits() == other.threshold.to_bits()
    }
}

impl Eq for DetectorConfig {}

impl Hash for DetectorConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resolution_hint.hash(state);
        self.threshold.to_bits().hash(state);
    }
}

pub struct DetectorCache {
    factory: Arc<dyn DetectorFactory>,
    slots: DashMap<DetectorConfig, Arc<OnceCell<SharedAnalyzer>>>,
}

impl DetectorCache {
    pub fn new(factory: Arc<dyn DetectorFactory>) -> Self {
        Self {
            factory,
            slots: DashMap::new(),
        }
    }

    /// Return the analyzer for `config`, constructing it on first use.
    ///
    /// A failed construction leaves the slot empty so a later call retries.
    pub fn get(&self, config: DetectorConfig) -> Result<SharedAnalyzer, DetectorError> {
        let slot = Arc::clone(self.slots.entry(config).or_default().value());
        let analyzer = slot.get_or_try_init(|| self.build(config))?;
        Ok(Arc::clone(analyzer))
    }

    /// Number of analyzers constructed so far.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.value().get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn build(&self, config: DetectorConfig) -> Result<SharedAnalyzer, DetectorError> {
        let (w, h) = config.resolution_hint;
        let mut analyzer = self.factory.construct(config.resolution_hint)?;

        // Threshold support varies by backend; an analyzer that refuses keeps its default.
        if let Err(unsupported) = analyzer.set_threshold(config.threshold) {
            tracing::debug!(
                det_w = w,
                det_h = h,
                threshold = config.threshold,
                reason = %unsupported,
                "threshold not applied"
            );
        }

        tracing::info!(det_w = w, det_h = h, threshold = config.threshold, "detector constructed");
        Ok(Arc::new(Mutex::new(analyzer)))
    }
}

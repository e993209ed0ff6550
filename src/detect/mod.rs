//! Product detection and counting.
//!
//! The detection model is treated as an opaque function from a frame to raw
//! outputs. [`Detector`] wraps a loaded model, validates its outputs into
//! [`Detection`] records and applies the confidence threshold; the counting
//! helpers turn detections into per-product unit counts for reconciliation.

mod replay;

pub use replay::{ReplayLoader, ReplayModel};
#[cfg(feature = "fuzzing")]
pub use replay::fuzz_parse_replay;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::ShrinkError;
use crate::ir::{Detection, PixelBox};
use crate::reconcile::ProductCount;

/// Default minimum confidence for a detection to be counted.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.75;

/// A single decoded frame handed to the model.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Source identifier (file name, camera + sequence number, ...).
    pub source: String,
    pub width: u32,
    pub height: u32,
    /// Encoded or raw pixel data, shared so frames are cheap to pass around.
    pub data: Arc<[u8]>,
}

impl Frame {
    pub fn new(source: impl Into<String>, width: u32, height: u32, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            source: source.into(),
            width,
            height,
            data: data.into(),
        }
    }

    /// Loads a frame from an image file, reading its dimensions from the header.
    pub fn from_path(path: &Path) -> Result<Self, ShrinkError> {
        let size = imagesize::size(path).map_err(|source| ShrinkError::ImageDimensionRead {
            path: path.to_path_buf(),
            source,
        })?;
        let width = u32::try_from(size.width).map_err(|_| ShrinkError::InvalidDetection {
            message: format!("image width {} does not fit in u32", size.width),
        })?;
        let height = u32::try_from(size.height).map_err(|_| ShrinkError::InvalidDetection {
            message: format!("image height {} does not fit in u32", size.height),
        })?;
        let data = std::fs::read(path)?;
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(source, width, height, data))
    }
}

/// One unfiltered model output.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawDetection {
    /// Index into the model's class names.
    pub class_id: usize,
    pub confidence: f64,
    /// `[x1, y1, x2, y2]` in pixel space.
    pub bbox: [f64; 4],
}

/// An object detection model, opaque to the rest of the crate.
pub trait DetectionModel: Send + Sync {
    /// Class names indexed by [`RawDetection::class_id`].
    fn class_names(&self) -> &[String];

    /// Runs inference on one frame.
    ///
    /// Implementations must return an error rather than an empty list when
    /// inference itself fails.
    fn infer(&self, frame: &Frame) -> Result<Vec<RawDetection>, ShrinkError>;
}

/// Loads a model from disk. A load failure is fatal for the detector.
pub trait ModelLoader {
    type Model: DetectionModel;

    fn load(&self, path: &Path) -> Result<Self::Model, ShrinkError>;
}

/// Runs a model and keeps confident detections.
///
/// Holds no mutable state, so one detector can serve several cameras
/// concurrently.
pub struct Detector<M: DetectionModel> {
    model: M,
    threshold: f64,
}

impl<M: DetectionModel> Detector<M> {
    /// Wraps an already-loaded model.
    pub fn new(model: M, threshold: f64) -> Result<Self, ShrinkError> {
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(ShrinkError::InvalidThreshold(threshold));
        }
        Ok(Self { model, threshold })
    }

    /// Loads the model with `loader` and wraps it.
    pub fn load<L>(loader: &L, path: &Path, threshold: f64) -> Result<Self, ShrinkError>
    where
        L: ModelLoader<Model = M>,
    {
        let model = loader.load(path).map_err(|err| match err {
            err @ ShrinkError::ModelLoad { .. } => err,
            other => ShrinkError::ModelLoad {
                path: PathBuf::from(path),
                message: other.to_string(),
            },
        })?;
        tracing::info!(
            path = %path.display(),
            classes = model.class_names().len(),
            threshold,
            "detection model loaded"
        );
        Self::new(model, threshold)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Detects products in `frame`, dropping outputs below the threshold.
    ///
    /// Outputs at or above the threshold are all kept. A raw output that
    /// names an unknown class or carries an invalid box or confidence fails
    /// the whole call: a partially trusted frame must not feed a count.
    pub fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, ShrinkError> {
        let raw = self.model.infer(frame)?;
        let names = self.model.class_names();

        let mut detections = Vec::with_capacity(raw.len());
        for output in raw {
            let class_name = names.get(output.class_id).ok_or_else(|| ShrinkError::Inference {
                frame: frame.source.clone(),
                message: format!(
                    "class_id {} is out of range for a model with {} class(es)",
                    output.class_id,
                    names.len()
                ),
            })?;
            let invalid = |err: ShrinkError| ShrinkError::Inference {
                frame: frame.source.clone(),
                message: err.to_string(),
            };
            let bbox = PixelBox::from_array(output.bbox).map_err(invalid)?;
            let detection =
                Detection::new(output.class_id, class_name.clone(), output.confidence, bbox)
                    .map_err(invalid)?;

            if detection.confidence >= self.threshold {
                detections.push(detection);
            }
        }

        tracing::debug!(
            frame = %frame.source,
            kept = detections.len(),
            threshold = self.threshold,
            "frame processed"
        );
        Ok(detections)
    }

    /// Detects and tallies in one step.
    pub fn count_frame(&self, frame: &Frame) -> Result<ProductCount, ShrinkError> {
        Ok(tally(&self.detect(frame)?))
    }
}

/// Counts detections whose class name equals `product_name` exactly.
///
/// Matching is case-sensitive; callers normalize case if they need to.
pub fn count_products(detections: &[Detection], product_name: &str) -> usize {
    detections
        .iter()
        .filter(|d| d.class_name == product_name)
        .count()
}

/// Counts detections per class name.
pub fn tally(detections: &[Detection]) -> ProductCount {
    let mut counts = ProductCount::new();
    for detection in detections {
        counts.add(&detection.class_name, 1);
    }
    counts
}

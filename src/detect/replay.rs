//! A detection model that replays precomputed outputs.
//!
//! The file maps frame source names to raw model outputs:
//!
//! ```json
//! {
//!   "names": ["SKOL 350ml", "Coca-Cola 2L"],
//!   "frames": {
//!     "shelf-01.jpg": [
//!       { "class_id": 0, "confidence": 0.91, "bbox": [12.0, 40.0, 88.0, 210.0] }
//!     ]
//!   }
//! }
//! ```
//!
//! Useful for running the reconciliation path offline against outputs
//! captured from the production model, and for tests.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use super::{DetectionModel, Frame, ModelLoader, RawDetection};
use crate::error::ShrinkError;

#[derive(Debug, Deserialize)]
struct ReplayFile {
    names: Vec<String>,
    #[serde(default)]
    frames: BTreeMap<String, Vec<ReplayOutput>>,
}

#[derive(Debug, Deserialize)]
struct ReplayOutput {
    class_id: usize,
    confidence: f64,
    bbox: [f64; 4],
}

/// Precomputed model outputs keyed by frame source name.
#[derive(Debug, Clone)]
pub struct ReplayModel {
    names: Vec<String>,
    frames: BTreeMap<String, Vec<RawDetection>>,
}

impl ReplayModel {
    /// Parses a replay file from a byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let file: ReplayFile = serde_json::from_slice(bytes)?;
        let frames = file
            .frames
            .into_iter()
            .map(|(source, outputs)| {
                let raw = outputs
                    .into_iter()
                    .map(|o| RawDetection {
                        class_id: o.class_id,
                        confidence: o.confidence,
                        bbox: o.bbox,
                    })
                    .collect();
                (source, raw)
            })
            .collect();
        Ok(Self {
            names: file.names,
            frames,
        })
    }

    /// Number of frames with recorded outputs.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl DetectionModel for ReplayModel {
    fn class_names(&self) -> &[String] {
        &self.names
    }

    fn infer(&self, frame: &Frame) -> Result<Vec<RawDetection>, ShrinkError> {
        self.frames
            .get(&frame.source)
            .cloned()
            .ok_or_else(|| ShrinkError::Inference {
                frame: frame.source.clone(),
                message: "no recorded model output for this frame".to_string(),
            })
    }
}

/// Loads [`ReplayModel`] files.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayLoader;

impl ModelLoader for ReplayLoader {
    type Model = ReplayModel;

    fn load(&self, path: &Path) -> Result<ReplayModel, ShrinkError> {
        let bytes = std::fs::read(path).map_err(|err| ShrinkError::ModelLoad {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let model = ReplayModel::from_slice(&bytes).map_err(|err| ShrinkError::ModelLoad {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        if model.names.is_empty() {
            return Err(ShrinkError::ModelLoad {
                path: path.to_path_buf(),
                message: "model declares no class names".to_string(),
            });
        }
        Ok(model)
    }
}

/// Fuzz-only entrypoint for replay file parsing.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_replay(bytes: &[u8]) -> Result<(), serde_json::Error> {
    let _ = ReplayModel::from_slice(bytes)?;
    Ok(())
}

//! skinscan-core: Scan state machine, skin metric estimator and overlay renderer.
//!
//! Face landmarks come from a face-mesh model run via ONNX Runtime; everything
//! else here is pure and driven by injected time and randomness.

pub mod config;
pub mod estimator;
pub mod landmarker;
pub mod render;
pub mod scan;
pub mod session;
pub mod types;

pub use config::ScanConfig;
pub use landmarker::{DetectorError, FaceLandmarker, LandmarkDetector};
pub use render::{OverlayFrame, OverlayRenderer};
pub use scan::{derive_score, ScanMachine, Transition};
pub use session::{FrameReport, LoopMode, ScanSession};
pub use types::{Detection, FaceBox, Landmark, ScanState, SkinMetrics, SkinType, Subject, TodayLabel};

use std::path::PathBuf;

/// Default directory searched for the face-mesh model.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("skinscan/models")
}

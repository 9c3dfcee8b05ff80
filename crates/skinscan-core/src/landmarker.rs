//! Face-mesh landmark detector via ONNX Runtime.
//!
//! Runs a 468-point face-mesh model on the centre square of the frame and
//! reports at most one subject with landmarks normalized to the full frame.

use crate::types::{Detection, Landmark, Subject};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const MESH_INPUT_SIZE: usize = 192;
const MESH_MEAN: f32 = 0.0;
const MESH_STD: f32 = 255.0;
const MESH_LANDMARKS: usize = 468;
/// x, y, z per landmark.
const MESH_LANDMARK_VALUES: usize = MESH_LANDMARKS * 3;
/// Minimum face presence (after sigmoid) to report a subject.
const MESH_PRESENCE_THRESHOLD: f32 = 0.4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (place a face-mesh ONNX model in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Source of per-frame face detections.
pub trait LandmarkDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Detection, DetectorError>;
}

/// Square crop taken from the middle of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CenterCrop {
    x0: u32,
    y0: u32,
    side: u32,
}

impl CenterCrop {
    fn for_frame(width: u32, height: u32) -> Self {
        let side = width.min(height);
        Self {
            x0: (width - side) / 2,
            y0: (height - side) / 2,
            side,
        }
    }
}

/// Face-mesh model session.
pub struct FaceLandmarker {
    session: Session,
    output_count: usize,
    presence_threshold: f32,
}

impl FaceLandmarker {
    /// Load the face-mesh ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded face-mesh model"
        );

        if output_names.is_empty() {
            return Err(DetectorError::InferenceFailed(
                "face-mesh model has no outputs".into(),
            ));
        }

        Ok(Self {
            output_count: output_names.len(),
            session,
            presence_threshold: MESH_PRESENCE_THRESHOLD,
        })
    }

    fn run(&mut self, frame: &RgbImage) -> Result<Detection, DetectorError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Ok(Detection::Absent);
        }
        let crop = CenterCrop::for_frame(width, height);
        let input = preprocess(frame, &crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        // Outputs are told apart by size: 1404 values of landmarks and a
        // single presence logit. Export names vary between conversions.
        let mut raw_landmarks = None;
        let mut presence_logit = None;
        for idx in 0..self.output_count {
            let (_, data) = outputs[idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("output {idx}: {e}")))?;
            match data.len() {
                MESH_LANDMARK_VALUES => raw_landmarks = Some(data.to_vec()),
                1 => presence_logit = Some(data[0]),
                _ => {}
            }
        }

        let raw = raw_landmarks.ok_or_else(|| {
            DetectorError::InferenceFailed(format!(
                "no output with {MESH_LANDMARK_VALUES} values"
            ))
        })?;
        let presence = presence_logit.map(sigmoid).unwrap_or(1.0);

        if presence < self.presence_threshold {
            return Ok(Detection::Absent);
        }

        Ok(Detection::Present(vec![Subject {
            landmarks: decode_landmarks(&raw, &crop, width, height),
            presence,
        }]))
    }
}

impl LandmarkDetector for FaceLandmarker {
    fn detect(&mut self, frame: &RgbImage) -> Result<Detection, DetectorError> {
        self.run(frame)
    }
}

/// Crop, resize and normalize into a 1×3×192×192 tensor.
fn preprocess(frame: &RgbImage, crop: &CenterCrop) -> Array4<f32> {
    let size = MESH_INPUT_SIZE;
    let square = imageops::crop_imm(frame, crop.x0, crop.y0, crop.side, crop.side).to_image();
    let resized = imageops::resize(&square, size as u32, size as u32, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            tensor[[0, c, y, x]] = (pixel.0[c] as f32 - MESH_MEAN) / MESH_STD;
        }
    }
    tensor
}

/// Map model-space landmarks (pixels of the 192×192 crop) to frame-normalized
/// coordinates.
fn decode_landmarks(raw: &[f32], crop: &CenterCrop, width: u32, height: u32) -> Vec<Landmark> {
    let size = MESH_INPUT_SIZE as f32;
    let side = crop.side as f32;
    raw.chunks_exact(3)
        .map(|v| Landmark {
            x: (crop.x0 as f32 + v[0] / size * side) / width as f32,
            y: (crop.y0 as f32 + v[1] / size * side) / height as f32,
            z: v[2] / size,
        })
        .collect()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

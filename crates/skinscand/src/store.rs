//! Transient session store.
//!
//! Holds the latest scan result, the mirrored capture shown with it and
//! overlay snapshots. Lives under the login session's runtime directory and
//! is never read back across sessions.

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use skinscan_core::SkinMetrics;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const CAPTURE_FILE: &str = "face_capture.jpg";
const RESULT_FILE: &str = "result.json";
const OVERLAY_FILE: &str = "overlay.png";
const CAPTURE_JPEG_QUALITY: u8 = 85;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("result serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything handed to the result view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub scan_id: Uuid,
    pub score: u8,
    pub metrics: SkinMetrics,
    /// Mirrored capture saved alongside the result, if any.
    pub capture: Option<PathBuf>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Create the store directory if needed.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save `frame` mirrored horizontally as the result capture.
    ///
    /// With no frame the stale capture is removed. On any failure the capture
    /// entry is removed before the error is returned.
    pub fn persist_capture(&self, frame: Option<&RgbImage>) -> Result<Option<PathBuf>, StoreError> {
        let Some(frame) = frame else {
            self.clear_capture();
            return Ok(None);
        };
        let path = self.dir.join(CAPTURE_FILE);
        match self.write_capture(frame, &path) {
            Ok(()) => Ok(Some(path)),
            Err(e) => {
                self.clear_capture();
                Err(e)
            }
        }
    }

    fn write_capture(&self, frame: &RgbImage, path: &Path) -> Result<(), StoreError> {
        let mirrored = skinscan_hw::frame::mirrored(frame);
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, CAPTURE_JPEG_QUALITY).encode_image(&mirrored)?;
        write_atomic(path, &jpeg)
    }

    /// Remove the capture entry; a missing file is not an error.
    pub fn clear_capture(&self) {
        let path = self.dir.join(CAPTURE_FILE);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove capture");
            }
        }
    }

    pub fn write_result(&self, record: &ResultRecord) -> Result<PathBuf, StoreError> {
        let path = self.dir.join(RESULT_FILE);
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&path, &json)?;
        Ok(path)
    }

    /// Latest result of this session, if any scan completed.
    pub fn read_result(&self) -> Result<Option<ResultRecord>, StoreError> {
        let path = self.dir.join(RESULT_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Save the current overlay as PNG.
    pub fn write_overlay(&self, overlay: &RgbaImage) -> Result<PathBuf, StoreError> {
        let path = self.dir.join(OVERLAY_FILE);
        overlay.save(&path)?;
        Ok(path)
    }
}

/// Write through a temp file and rename so readers never see a partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).map_err(|source| StoreError::Io {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&dir.path().join("session")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_persist_capture_writes_mirrored_jpeg() {
        let (_dir, store) = store();
        let frame = RgbImage::from_fn(64, 32, |x, _| if x < 32 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) });
        let path = store.persist_capture(Some(&frame)).unwrap().unwrap();
        let saved = image::open(&path).unwrap().to_rgb8();
        assert_eq!(saved.dimensions(), (64, 32));
        // left half is now blue
        let left = saved.get_pixel(8, 16).0;
        assert!(left[2] > 200 && left[0] < 60, "left pixel {left:?}");
    }

    #[test]
    fn test_persist_without_frame_clears_stale_capture() {
        let (_dir, store) = store();
        let frame = RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]));
        let path = store.persist_capture(Some(&frame)).unwrap().unwrap();
        assert!(path.exists());
        assert_eq!(store.persist_capture(None).unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_result_round_trip() {
        let (_dir, store) = store();
        assert!(store.read_result().unwrap().is_none());
        let record = ResultRecord {
            scan_id: Uuid::new_v4(),
            score: 72,
            metrics: SkinMetrics::default(),
            capture: None,
            completed_at: Utc::now(),
        };
        store.write_result(&record).unwrap();
        let read = store.read_result().unwrap().unwrap();
        assert_eq!(read.scan_id, record.scan_id);
        assert_eq!(read.score, 72);
        assert_eq!(read.metrics.skin_type, record.metrics.skin_type);
    }

    #[test]
    fn test_result_json_uses_lowercase_labels() {
        let (_dir, store) = store();
        let record = ResultRecord {
            scan_id: Uuid::new_v4(),
            score: 50,
            metrics: SkinMetrics::default(),
            capture: None,
            completed_at: Utc::now(),
        };
        let path = store.write_result(&record).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("\"type\": \"neutral\""));
        assert!(text.contains("\"today\": \"normal\""));
    }

    #[test]
    fn test_write_overlay_png() {
        let (_dir, store) = store();
        let overlay = RgbaImage::new(10, 10);
        let path = store.write_overlay(&overlay).unwrap();
        assert_eq!(image::open(path).unwrap().width(), 10);
    }
}

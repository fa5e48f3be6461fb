//! Face detection on extracted frames
//!
//! Shells out to MTCNN via Python and parses its JSON back into typed
//! observations. Low-confidence and tiny detections are filtered here so
//! downstream analysis only ever sees faces that pass the quality gate.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::media::locate_tool;

/// Minimum detector confidence for a face to be kept
pub const CONFIDENCE_THRESHOLD: f64 = 0.9;
/// Minimum face edge in pixels
pub const MIN_FACE_SIZE: f64 = 20.0;

/// A single detected face, bbox as `[x1, y1, x2, y2]` in pixels
#[derive(Debug, Clone)]
pub struct FaceObservation {
    pub bbox: [f64; 4],
    pub confidence: f64,
    /// 5-point landmarks (eyes, nose, mouth corners) when reported
    pub landmarks: Option<[[f64; 2]; 5]>,
}

impl FaceObservation {
    #[must_use]
    pub fn width(&self) -> f64 {
        self.bbox[2] - self.bbox[0]
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.bbox[3] - self.bbox[1]
    }

    #[must_use]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            (self.bbox[0] + self.bbox[2]) / 2.0,
            (self.bbox[1] + self.bbox[3]) / 2.0,
        )
    }
}

/// Detection result for one frame
#[derive(Debug, Clone)]
pub struct FrameDetections {
    pub faces: Vec<FaceObservation>,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl FrameDetections {
    /// Largest face by area, if any
    #[must_use]
    pub fn largest(&self) -> Option<&FaceObservation> {
        self.faces
            .iter()
            .max_by(|a, b| a.area().partial_cmp(&b.area()).unwrap_or(std::cmp::Ordering::Equal))
    }
}

/// MTCNN-backed face detector
#[derive(Debug, Clone)]
pub struct FaceDetector {
    confidence_threshold: f64,
    min_face_size: f64,
}

impl Default for FaceDetector {
    fn default() -> Self {
        Self {
            confidence_threshold: CONFIDENCE_THRESHOLD,
            min_face_size: MIN_FACE_SIZE,
        }
    }
}

/// Raw detector JSON printed by the helper script
#[derive(Debug, Deserialize)]
struct RawDetections {
    width: u32,
    height: u32,
    faces: Vec<RawFace>,
}

#[derive(Debug, Deserialize)]
struct RawFace {
    /// `[x, y, w, h]` as MTCNN reports it
    r#box: [f64; 4],
    confidence: f64,
    #[serde(default)]
    keypoints: Option<RawKeypoints>,
}

#[derive(Debug, Deserialize)]
struct RawKeypoints {
    left_eye: [f64; 2],
    right_eye: [f64; 2],
    nose: [f64; 2],
    mouth_left: [f64; 2],
    mouth_right: [f64; 2],
}

impl FaceDetector {
    /// Detect faces in an image file.
    ///
    /// Returned faces satisfy `confidence >= 0.9` and
    /// `min(width, height) >= 20 px`, sorted by confidence descending.
    pub async fn detect(&self, image_path: &Path) -> Result<FrameDetections> {
        if !image_path.exists() {
            return Err(PipelineError::InputMissing(image_path.to_path_buf()));
        }
        let python = locate_tool("python3")?;

        let script = format!(
            r#"
import json
import cv2
from mtcnn import MTCNN

image = cv2.imread("{image_path}")
h, w = image.shape[:2]
detector = MTCNN()
detections = detector.detect_faces(cv2.cvtColor(image, cv2.COLOR_BGR2RGB))

faces = []
for det in detections:
    faces.append({{
        "box": [float(v) for v in det["box"]],
        "confidence": det["confidence"],
        "keypoints": {{k: [float(v[0]), float(v[1])] for k, v in det.get("keypoints", {{}}).items()}} or None,
    }})

print(json.dumps({{"width": w, "height": h, "faces": faces}}))
"#,
            image_path = image_path.display(),
        );

        let output = Command::new(python)
            .args(["-c", &script])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::FaceDetect(
                stderr.lines().last().unwrap_or("unknown error").to_string(),
            ));
        }

        let raw: RawDetections = serde_json::from_slice(&output.stdout)?;
        Ok(self.filter(raw))
    }

    /// Apply the quality gate to raw detections.
    fn filter(&self, raw: RawDetections) -> FrameDetections {
        let mut faces: Vec<FaceObservation> = raw
            .faces
            .into_iter()
            .filter(|f| f.confidence >= self.confidence_threshold)
            .filter(|f| f.r#box[2] >= self.min_face_size && f.r#box[3] >= self.min_face_size)
            .map(|f| {
                let [x, y, w, h] = f.r#box;
                FaceObservation {
                    bbox: [x, y, x + w, y + h],
                    confidence: f.confidence,
                    landmarks: f.keypoints.map(|kp| {
                        [kp.left_eye, kp.right_eye, kp.nose, kp.mouth_left, kp.mouth_right]
                    }),
                }
            })
            .collect();

        faces.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!("kept {} faces after quality gate", faces.len());
        FrameDetections {
            faces,
            frame_width: raw.width,
            frame_height: raw.height,
        }
    }
}

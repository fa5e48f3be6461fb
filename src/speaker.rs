//! Main-speaker identification
//!
//! Samples one frame every five seconds, keeps the largest face per frame,
//! and greedily clusters the normalized observations. The dominant cluster
//! is promoted to main speaker when it appears in at least half of the
//! sampled frames and is large enough on screen. Position-centering and
//! position-variance checks are computed and logged but not enforced.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::faces::FaceDetector;
use crate::media::{self, VideoMetadata};

/// Seconds between sampled frames
pub const SAMPLE_INTERVAL: f64 = 5.0;
/// A cluster must cover at least this fraction of sampled frames
pub const MIN_APPEARANCE_RATIO: f64 = 0.5;
/// Minimum mean face area as a fraction of the frame
pub const MIN_FACE_SIZE_RATIO: f64 = 0.03;
/// Max normalized center distance for two observations to share a cluster
const CLUSTER_DISTANCE: f64 = 0.2;
/// Max relative size difference for two observations to share a cluster
const CLUSTER_SIZE_DIFF: f64 = 0.5;
/// Advisory centered-position region (x1, x2, y1, y2), logged only
const CENTER_REGION: (f64, f64, f64, f64) = (0.2, 0.8, 0.1, 0.9);
/// Advisory position-variance ceiling, logged only
const MAX_POSITION_VARIANCE: f64 = 0.15;

/// Largest face of one sampled frame, normalized to the frame dimensions
#[derive(Debug, Clone)]
pub struct FaceSample {
    pub time: f64,
    /// Normalized face center, both in `[0, 1]`
    pub x: f64,
    pub y: f64,
    /// Face area as a fraction of the frame area
    pub size: f64,
    pub confidence: f64,
    pub frame_path: PathBuf,
}

/// Aggregate statistics for one face-identity cluster
#[derive(Debug, Clone)]
pub struct SpeakerProfile {
    pub appearance_count: usize,
    pub avg_position: (f64, f64),
    pub avg_size: f64,
    pub position_variance: f64,
    pub avg_confidence: f64,
    pub best_frame: PathBuf,
    pub best_frame_time: f64,
}

/// Scene classification for one host video
#[derive(Debug, Clone)]
pub struct SceneAnalysis {
    pub is_single_speaker: bool,
    pub profile: Option<SpeakerProfile>,
    pub total_sampled_frames: usize,
    pub frames_with_faces: usize,
    pub unique_speakers: usize,
}

/// Greedy single-pass clustering over sampled observations.
///
/// An observation joins the first cluster whose running-mean center is
/// within [`CLUSTER_DISTANCE`] and whose size differs by less than
/// [`CLUSTER_SIZE_DIFF`] relatively; otherwise it opens a new cluster.
/// Means are maintained incrementally, so every cluster mean stays a convex
/// combination of the observations it absorbed.
pub fn cluster_samples(samples: &[FaceSample]) -> Vec<SpeakerProfile> {
    let mut clusters: Vec<SpeakerProfile> = Vec::new();

    for sample in samples {
        let mut matched = false;

        for cluster in &mut clusters {
            let dist = ((sample.x - cluster.avg_position.0).powi(2)
                + (sample.y - cluster.avg_position.1).powi(2))
            .sqrt();
            let size_diff =
                (sample.size - cluster.avg_size).abs() / cluster.avg_size.max(0.01);

            if dist < CLUSTER_DISTANCE && size_diff < CLUSTER_SIZE_DIFF {
                let n = cluster.appearance_count as f64;
                cluster.avg_position = (
                    (cluster.avg_position.0 * n + sample.x) / (n + 1.0),
                    (cluster.avg_position.1 * n + sample.y) / (n + 1.0),
                );
                cluster.avg_size = (cluster.avg_size * n + sample.size) / (n + 1.0);
                cluster.avg_confidence =
                    (cluster.avg_confidence * n + sample.confidence) / (n + 1.0);
                cluster.appearance_count += 1;

                // Promote this frame to the cluster's representative when its
                // confidence keeps pace with the cluster mean.
                if sample.confidence >= cluster.avg_confidence * 0.95 {
                    cluster.best_frame = sample.frame_path.clone();
                    cluster.best_frame_time = sample.time;
                }

                matched = true;
                break;
            }
        }

        if !matched {
            clusters.push(SpeakerProfile {
                appearance_count: 1,
                avg_position: (sample.x, sample.y),
                avg_size: sample.size,
                position_variance: 0.0,
                avg_confidence: sample.confidence,
                best_frame: sample.frame_path.clone(),
                best_frame_time: sample.time,
            });
        }
    }

    // Position variance across the observations near each final centroid.
    for cluster in &mut clusters {
        let near: Vec<&FaceSample> = samples
            .iter()
            .filter(|s| {
                let dist = ((s.x - cluster.avg_position.0).powi(2)
                    + (s.y - cluster.avg_position.1).powi(2))
                .sqrt();
                dist < CLUSTER_DISTANCE
            })
            .collect();

        if near.len() > 1 {
            let n = near.len() as f64;
            let mean_x = near.iter().map(|s| s.x).sum::<f64>() / n;
            let mean_y = near.iter().map(|s| s.y).sum::<f64>() / n;
            let var_x = near.iter().map(|s| (s.x - mean_x).powi(2)).sum::<f64>() / n;
            let var_y = near.iter().map(|s| (s.y - mean_y).powi(2)).sum::<f64>() / n;
            cluster.position_variance = (var_x + var_y) / 2.0;
        }
    }

    clusters
}

/// Promote the dominant cluster to main speaker if it passes the gates.
///
/// Enforced: appearance ratio >= 0.5 and mean size ratio >= 0.03.
/// Advisory (logged only): centered position and position variance.
fn identify_main_speaker(
    clusters: Vec<SpeakerProfile>,
    total_frames: usize,
) -> Option<SpeakerProfile> {
    // On an appearance-count tie the earliest-opened cluster wins, keeping
    // the choice deterministic for symmetric inputs.
    let main = clusters.into_iter().reduce(|best, cluster| {
        if cluster.appearance_count > best.appearance_count {
            cluster
        } else {
            best
        }
    })?;

    let ratio = main.appearance_count as f64 / total_frames.max(1) as f64;
    if ratio < MIN_APPEARANCE_RATIO {
        debug!(
            "dominant cluster appears in {:.0}% of frames, below {:.0}% threshold",
            ratio * 100.0,
            MIN_APPEARANCE_RATIO * 100.0
        );
        return None;
    }

    if main.avg_size < MIN_FACE_SIZE_RATIO {
        debug!(
            "dominant face covers {:.1}% of frame, below {:.0}% threshold",
            main.avg_size * 100.0,
            MIN_FACE_SIZE_RATIO * 100.0
        );
        return None;
    }

    let (x, y) = main.avg_position;
    let (x1, x2, y1, y2) = CENTER_REGION;
    if !(x1 <= x && x <= x2 && y1 <= y && y <= y2) {
        debug!("speaker position ({x:.2}, {y:.2}) outside center region (advisory)");
    }
    if main.position_variance > MAX_POSITION_VARIANCE {
        debug!(
            "speaker position variance {:.3} above {MAX_POSITION_VARIANCE} (advisory)",
            main.position_variance
        );
    }

    Some(main)
}

/// Scene analyzer driving frame sampling and detection
pub struct SpeakerAnalyzer<'a> {
    detector: &'a FaceDetector,
}

impl<'a> SpeakerAnalyzer<'a> {
    #[must_use]
    pub fn new(detector: &'a FaceDetector) -> Self {
        Self { detector }
    }

    /// Classify the video scene and build a speaker profile if one identity
    /// dominates. Sampled frames are persisted under `keyframe_dir` so the
    /// profile's best frame survives as a reusable asset.
    pub async fn analyze(
        &self,
        video_path: &Path,
        metadata: &VideoMetadata,
        keyframe_dir: &Path,
    ) -> Result<SceneAnalysis> {
        let mut samples = Vec::new();
        let mut total_sampled = 0usize;
        let mut frames_with_faces = 0usize;
        let mut faces_seen = 0usize;

        let mut t = 0.0;
        let mut index = 0usize;
        while t < metadata.duration {
            let frame_path = keyframe_dir.join(format!("sample_{index:03}.jpg"));
            media::extract_frame_at(video_path, t, &frame_path).await?;
            total_sampled += 1;

            let detections = self.detector.detect(&frame_path).await?;
            if let Some(face) = detections.largest() {
                frames_with_faces += 1;
                faces_seen += detections.faces.len();

                let w = f64::from(detections.frame_width);
                let h = f64::from(detections.frame_height);
                let (cx, cy) = face.center();
                samples.push(FaceSample {
                    time: t,
                    x: cx / w,
                    y: cy / h,
                    size: face.area() / (w * h),
                    confidence: face.confidence,
                    frame_path: frame_path.clone(),
                });
            }

            t += SAMPLE_INTERVAL;
            index += 1;
        }

        info!(
            "scene sampling: {frames_with_faces}/{total_sampled} frames contain a face"
        );

        let clusters = cluster_samples(&samples);
        let cluster_count = clusters.len();
        let profile = identify_main_speaker(clusters, total_sampled);

        let (is_single_speaker, unique_speakers) = match &profile {
            Some(p) => {
                info!(
                    "single-speaker scene: appears {}/{} frames, avg size {:.1}%, best frame at {:.1}s",
                    p.appearance_count,
                    total_sampled,
                    p.avg_size * 100.0,
                    p.best_frame_time
                );
                (true, 1)
            }
            None => {
                let estimate = if frames_with_faces > 0 {
                    (faces_seen as f64 / frames_with_faces as f64).round() as usize
                } else {
                    0
                };
                warn!(
                    "no stable main speaker ({cluster_count} clusters, ~{estimate} faces per frame); speaker-aware scoring disabled"
                );
                (false, estimate.max(usize::from(frames_with_faces > 0)))
            }
        };

        Ok(SceneAnalysis {
            is_single_speaker,
            profile,
            total_sampled_frames: total_sampled,
            frames_with_faces,
            unique_speakers,
        })
    }
}

/// Whether the largest face in a frame matches the speaker profile.
///
/// Matching is by normalized center distance, with a slightly wider gate
/// than clustering to tolerate drift between sampled frames.
#[must_use]
pub fn matches_profile(
    profile: &SpeakerProfile,
    face_center: (f64, f64),
    frame_width: f64,
    frame_height: f64,
) -> bool {
    let x = face_center.0 / frame_width;
    let y = face_center.1 / frame_height;
    let dist = ((x - profile.avg_position.0).powi(2) + (y - profile.avg_position.1).powi(2)).sqrt();
    dist < 0.25
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(time: f64, x: f64, y: f64, size: f64, confidence: f64) -> FaceSample {
        FaceSample {
            time,
            x,
            y,
            size,
            confidence,
            frame_path: PathBuf::from(format!("frame_{time}.jpg")),
        }
    }

    #[test]
    fn stable_face_forms_one_cluster() {
        let samples = vec![
            sample(0.0, 0.50, 0.40, 0.06, 0.95),
            sample(5.0, 0.52, 0.41, 0.06, 0.96),
            sample(10.0, 0.49, 0.39, 0.05, 0.94),
        ];
        let clusters = cluster_samples(&samples);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].appearance_count, 3);
    }

    #[test]
    fn distant_faces_open_new_clusters() {
        let samples = vec![
            sample(0.0, 0.2, 0.4, 0.06, 0.95),
            sample(5.0, 0.8, 0.4, 0.06, 0.95),
        ];
        let clusters = cluster_samples(&samples);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn large_size_difference_opens_new_cluster() {
        // Same position, but one face is far larger than the running mean.
        let samples = vec![
            sample(0.0, 0.5, 0.4, 0.04, 0.95),
            sample(5.0, 0.5, 0.4, 0.10, 0.95),
        ];
        let clusters = cluster_samples(&samples);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn cluster_mean_is_convex_combination() {
        let samples = vec![
            sample(0.0, 0.40, 0.40, 0.05, 0.95),
            sample(5.0, 0.50, 0.40, 0.05, 0.95),
        ];
        let clusters = cluster_samples(&samples);
        assert_eq!(clusters.len(), 1);
        let (x, _) = clusters[0].avg_position;
        assert!((x - 0.45).abs() < 1e-9);
        assert!(x >= 0.40 && x <= 0.50);
    }

    #[test]
    fn best_frame_tracks_high_confidence() {
        let samples = vec![
            sample(0.0, 0.5, 0.4, 0.05, 0.999),
            // Below 0.95x the running mean; must not steal the best frame.
            sample(5.0, 0.5, 0.4, 0.05, 0.90),
        ];
        let clusters = cluster_samples(&samples);
        assert_eq!(clusters[0].best_frame_time, 0.0);

        let samples = vec![
            sample(0.0, 0.5, 0.4, 0.05, 0.92),
            sample(5.0, 0.5, 0.4, 0.05, 0.97),
        ];
        let clusters = cluster_samples(&samples);
        assert_eq!(clusters[0].best_frame_time, 5.0);
    }

    #[test]
    fn main_speaker_requires_appearance_ratio() {
        let clusters = vec![SpeakerProfile {
            appearance_count: 4,
            avg_position: (0.5, 0.4),
            avg_size: 0.05,
            position_variance: 0.01,
            avg_confidence: 0.95,
            best_frame: PathBuf::from("f.jpg"),
            best_frame_time: 0.0,
        }];
        assert!(identify_main_speaker(clusters.clone(), 8).is_some());
        assert!(identify_main_speaker(clusters, 10).is_none());
    }

    #[test]
    fn main_speaker_requires_size() {
        let clusters = vec![SpeakerProfile {
            appearance_count: 9,
            avg_position: (0.5, 0.4),
            avg_size: 0.01,
            position_variance: 0.01,
            avg_confidence: 0.95,
            best_frame: PathBuf::from("f.jpg"),
            best_frame_time: 0.0,
        }];
        assert!(identify_main_speaker(clusters, 10).is_none());
    }

    #[test]
    fn appearance_tie_resolves_to_first_cluster() {
        let profile = |x: f64| SpeakerProfile {
            appearance_count: 6,
            avg_position: (x, 0.4),
            avg_size: 0.05,
            position_variance: 0.01,
            avg_confidence: 0.95,
            best_frame: PathBuf::from(format!("f{x}.jpg")),
            best_frame_time: 0.0,
        };
        let main = identify_main_speaker(vec![profile(0.3), profile(0.7)], 10).unwrap();
        assert!((main.avg_position.0 - 0.3).abs() < 1e-9);
    }

    #[test]
    fn off_center_speaker_still_accepted() {
        // Centered-position check is advisory only.
        let clusters = vec![SpeakerProfile {
            appearance_count: 9,
            avg_position: (0.05, 0.95),
            avg_size: 0.05,
            position_variance: 0.5,
            avg_confidence: 0.95,
            best_frame: PathBuf::from("f.jpg"),
            best_frame_time: 0.0,
        }];
        assert!(identify_main_speaker(clusters, 10).is_some());
    }

    #[test]
    fn profile_matching_distance_gate() {
        let profile = SpeakerProfile {
            appearance_count: 5,
            avg_position: (0.5, 0.5),
            avg_size: 0.05,
            position_variance: 0.0,
            avg_confidence: 0.95,
            best_frame: PathBuf::from("f.jpg"),
            best_frame_time: 0.0,
        };
        // Center of a 1000x1000 frame: normalized (0.5, 0.5) -> distance 0.
        assert!(matches_profile(&profile, (500.0, 500.0), 1000.0, 1000.0));
        // Normalized (0.9, 0.5) -> distance 0.4, outside the 0.25 gate.
        assert!(!matches_profile(&profile, (900.0, 500.0), 1000.0, 1000.0));
    }

    #[test]
    fn variance_computed_over_near_observations() {
        let samples = vec![
            sample(0.0, 0.45, 0.40, 0.05, 0.95),
            sample(5.0, 0.55, 0.40, 0.05, 0.95),
        ];
        let clusters = cluster_samples(&samples);
        assert!(clusters[0].position_variance > 0.0);
        assert!(clusters[0].position_variance < 0.01);
    }
}

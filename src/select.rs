//! Insertion-point selection
//!
//! Combines the planner's semantic ranking with speaker-presence
//! verification in three tiers:
//!
//! - Tier A scores each candidate by semantics and the face found on the
//!   frame immediately before the insertion time; when a speaker profile
//!   exists the face must sit near the profile centroid.
//! - Tier B falls back to the profile's best sampled frame, keeping the
//!   top candidate's context strings for copy generation.
//! - Tier C gives up with `NoUsableInsertion`.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::faces::FaceDetector;
use crate::media::{self, VideoMetadata};
use crate::planner::InsertionCandidate;
use crate::speaker::{matches_profile, SceneAnalysis};

/// Weight of the semantic rank in the candidate score
const SEMANTIC_WEIGHT: f64 = 0.4;
/// Weight of the detector confidence in the candidate score
const FACE_WEIGHT: f64 = 0.6;

/// Half-width of the reference-audio window in seconds
pub const REFERENCE_HALF_WINDOW: f64 = 5.0;
/// Minimum reference-audio window length in seconds
pub const REFERENCE_FLOOR: f64 = 5.0;

/// The chosen insertion moment with its staged keyframe
#[derive(Debug, Clone)]
pub struct ChosenPlan {
    pub candidate: InsertionCandidate,
    /// Actual splice time; equals the candidate time in tier A, the
    /// profile's best-frame time in tier B
    pub insertion_time: f64,
    /// Frame that will precede the ad clip
    pub keyframe: PathBuf,
    /// True when tier B substituted the profile's best frame
    pub via_best_frame: bool,
}

/// Semantic score for a priority rank: priority 1 maps to 1.0 and the worst
/// rank approaches `1 / max_priority`.
#[must_use]
pub fn semantic_score(priority: u32, max_priority: u32) -> f64 {
    let max = max_priority.max(1);
    f64::from(max + 1 - priority.min(max)) / f64::from(max)
}

/// Combined candidate score
#[must_use]
pub fn candidate_score(semantic: f64, face_confidence: f64) -> f64 {
    SEMANTIC_WEIGHT * semantic + FACE_WEIGHT * face_confidence
}

/// A tier-A candidate that passed verification
#[derive(Debug, Clone)]
struct ScoredCandidate {
    index: usize,
    score: f64,
    priority: u32,
    time: f64,
    keyframe: PathBuf,
}

/// Pick the best accepted candidate: highest score, ties broken by better
/// (smaller) priority, then by earlier time.
fn pick_best(mut accepted: Vec<ScoredCandidate>) -> Option<ScoredCandidate> {
    accepted.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.priority.cmp(&b.priority))
            .then(a.time.partial_cmp(&b.time).unwrap_or(std::cmp::Ordering::Equal))
    });
    accepted.into_iter().next()
}

/// Reference-audio window around the insertion time.
///
/// Nominally `[t - 5, t + 5]` clamped to the media; when clamping shrinks
/// the window below the floor, the opposite edge is extended so the window
/// is exactly the floor length (media permitting).
#[must_use]
pub fn reference_window(t: f64, duration: f64) -> (f64, f64) {
    let mut start = (t - REFERENCE_HALF_WINDOW).max(0.0);
    let mut end = (t + REFERENCE_HALF_WINDOW).min(duration);

    if end - start < REFERENCE_FLOOR {
        if start <= 0.0 {
            end = REFERENCE_FLOOR.min(duration);
        } else if end >= duration {
            start = (duration - REFERENCE_FLOOR).max(0.0);
        }
    }

    (start, end)
}

/// Insertion selector driving frame reads and face verification
pub struct InsertionSelector<'a> {
    detector: &'a FaceDetector,
}

impl<'a> InsertionSelector<'a> {
    #[must_use]
    pub fn new(detector: &'a FaceDetector) -> Self {
        Self { detector }
    }

    /// Resolve the splice moment from ranked candidates and the scene
    /// analysis. Candidate keyframes are written under `keyframe_dir`.
    pub async fn select(
        &self,
        video_path: &Path,
        candidates: &[InsertionCandidate],
        scene: &SceneAnalysis,
        metadata: &VideoMetadata,
        keyframe_dir: &Path,
    ) -> Result<ChosenPlan> {
        let max_priority = candidates.iter().map(|c| c.priority).max().unwrap_or(1);
        let mut accepted = Vec::new();

        for (index, candidate) in candidates.iter().enumerate() {
            // The frame just before t becomes the first frame of the ad clip.
            let frame_time = (candidate.time - metadata.frame_period()).max(0.0);
            let frame_path = keyframe_dir.join(format!("candidate_{index:02}.jpg"));
            media::extract_frame_at(video_path, frame_time, &frame_path).await?;

            let detections = self.detector.detect(&frame_path).await?;
            let Some(face) = detections.largest() else {
                debug!("candidate {index} at {:.1}s: no face", candidate.time);
                continue;
            };

            if let Some(profile) = &scene.profile {
                let ok = matches_profile(
                    profile,
                    face.center(),
                    f64::from(detections.frame_width),
                    f64::from(detections.frame_height),
                );
                if !ok {
                    debug!(
                        "candidate {index} at {:.1}s: largest face is not the main speaker",
                        candidate.time
                    );
                    continue;
                }
            }

            let semantic = semantic_score(candidate.priority, max_priority);
            let score = candidate_score(semantic, face.confidence);
            debug!(
                "candidate {index} at {:.1}s accepted: semantic={semantic:.2}, face={:.2}, score={score:.3}",
                candidate.time, face.confidence
            );
            accepted.push(ScoredCandidate {
                index,
                score,
                priority: candidate.priority,
                time: candidate.time,
                keyframe: frame_path,
            });
        }

        if let Some(best) = pick_best(accepted) {
            let candidate = candidates[best.index].clone();
            info!(
                "insertion point: {:.1}s (priority {}, score {:.3})",
                best.time, best.priority, best.score
            );
            return Ok(ChosenPlan {
                insertion_time: candidate.time,
                candidate,
                keyframe: best.keyframe,
                via_best_frame: false,
            });
        }

        // Tier B: reuse the profile's best sampled frame. The top semantic
        // candidate still supplies the context strings for copy generation.
        if let (Some(profile), Some(first)) = (&scene.profile, candidates.first()) {
            let candidate = first.clone();
            warn!(
                "no candidate frame shows the main speaker; falling back to best sampled frame at {:.1}s",
                profile.best_frame_time
            );
            return Ok(ChosenPlan {
                insertion_time: profile.best_frame_time,
                candidate,
                keyframe: profile.best_frame.clone(),
                via_best_frame: true,
            });
        }

        Err(PipelineError::NoUsableInsertion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semantic_score_maps_priority_one_to_unity() {
        assert!((semantic_score(1, 3) - 1.0).abs() < 1e-9);
        assert!((semantic_score(3, 3) - (1.0 / 3.0)).abs() < 1e-9);
        assert!((semantic_score(1, 1) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn score_weights_face_over_semantics() {
        // Equal inputs: 0.4 + 0.6 split.
        let s = candidate_score(1.0, 0.9);
        assert!((s - (0.4 + 0.54)).abs() < 1e-9);
        // A confident face on a lower-priority candidate can win.
        let weak_semantic = candidate_score(semantic_score(2, 3), 0.99);
        let strong_semantic = candidate_score(semantic_score(1, 3), 0.5);
        assert!(weak_semantic > strong_semantic);
    }

    fn scored(index: usize, score: f64, priority: u32, time: f64) -> ScoredCandidate {
        ScoredCandidate {
            index,
            score,
            priority,
            time,
            keyframe: PathBuf::from(format!("c{index}.jpg")),
        }
    }

    #[test]
    fn pick_best_prefers_highest_score() {
        let best = pick_best(vec![
            scored(0, 0.8, 1, 15.0),
            scored(1, 0.9, 2, 30.0),
        ])
        .unwrap();
        assert_eq!(best.index, 1);
    }

    #[test]
    fn ties_resolve_by_priority_then_time() {
        let best = pick_best(vec![
            scored(0, 0.9, 2, 10.0),
            scored(1, 0.9, 1, 30.0),
        ])
        .unwrap();
        assert_eq!(best.index, 1, "equal score resolves by priority");

        let best = pick_best(vec![
            scored(0, 0.9, 1, 30.0),
            scored(1, 0.9, 1, 10.0),
        ])
        .unwrap();
        assert_eq!(best.index, 1, "equal score and priority resolves by time");
    }

    #[test]
    fn pick_best_empty_is_none() {
        assert!(pick_best(vec![]).is_none());
    }

    #[test]
    fn reference_window_centered() {
        let (start, end) = reference_window(30.0, 60.0);
        assert!((start - 25.0).abs() < 1e-9);
        assert!((end - 35.0).abs() < 1e-9);
    }

    #[test]
    fn reference_window_floor_at_media_start() {
        let (start, end) = reference_window(0.0, 60.0);
        assert!((start - 0.0).abs() < 1e-9);
        assert!((end - REFERENCE_FLOOR).abs() < 1e-9);
    }

    #[test]
    fn reference_window_floor_at_media_end() {
        let (start, end) = reference_window(60.0, 60.0);
        assert!((end - 60.0).abs() < 1e-9);
        assert!((start - (60.0 - REFERENCE_FLOOR)).abs() < 1e-9);
    }

    #[test]
    fn reference_window_short_media_is_clamped() {
        let (start, end) = reference_window(1.0, 3.0);
        assert!((start - 0.0).abs() < 1e-9);
        assert!((end - 3.0).abs() < 1e-9);
    }
}

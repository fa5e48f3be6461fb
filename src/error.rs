//! Pipeline error kinds
//!
//! One variant per failure mode so the orchestrator can decide whether a
//! phase failure is recoverable in place or aborts the whole run.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced anywhere in the ad-insertion pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input file not found: {0}")]
    InputMissing(PathBuf),

    #[error("video has no audio track")]
    NoAudioTrack,

    #[error("video duration {actual:.1}s outside allowed range {min:.0}s..{max:.0}s")]
    DurationOutOfRange { actual: f64, min: f64, max: f64 },

    #[error("transcription failed: {0}")]
    TranscribeFailed(String),

    #[error("planner returned malformed analysis: {0}")]
    PlanMalformed(String),

    #[error("no insertion candidate survives edge filtering")]
    NoViableCandidates,

    #[error("no usable insertion point (no candidate frame shows the speaker)")]
    NoUsableInsertion,

    #[error("no enabled ad in catalog")]
    NoAdAvailable,

    #[error("upload to job service failed: {0}")]
    UploadFailed(String),

    #[error("job graph rejected by service: {0}")]
    SubmitRejected(String),

    #[error("remote job failed: {0}")]
    JobErrored(String),

    #[error("remote job timed out after {0}s")]
    TimedOut(u64),

    #[error("voice cloning failed after retries: {0}")]
    VoiceClonePermanentFail(String),

    #[error("digital-human rendering failed after retries: {0}")]
    DigitalHumanPermanentFail(String),

    #[error("video composition failed: {0}")]
    ComposeFailed(String),

    #[error("cancelled by user")]
    Cancelled,

    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error("ffmpeg error: {0}")]
    Ffmpeg(String),

    #[error("source separation error: {0}")]
    Separation(String),

    #[error("face detection error: {0}")]
    FaceDetect(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl PipelineError {
    /// Whether this error aborts the remaining phases.
    ///
    /// The per-stage retry loop consults this: transient remote kinds
    /// (failed uploads, rejected submissions, errored or timed-out jobs,
    /// transport failures) are worth another attempt, everything else
    /// fails the stage immediately. Recoverable kinds (degraded image
    /// cleanup, missing main speaker, out-of-range ad copy) are handled
    /// in place and never reach the orchestrator.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::UploadFailed(_)
                | Self::SubmitRejected(_)
                | Self::JobErrored(_)
                | Self::TimedOut(_)
                | Self::Http(_)
        )
    }

    /// Whether the workspace must be preserved for debugging regardless of
    /// the `keep_temp_on_error` setting.
    #[must_use]
    pub fn preserves_workspace(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_transients_are_retryable() {
        assert!(!PipelineError::UploadFailed("conn reset".into()).is_terminal());
        assert!(!PipelineError::SubmitRejected("node 7".into()).is_terminal());
        assert!(!PipelineError::TimedOut(600).is_terminal());
        assert!(!PipelineError::JobErrored("oom".into()).is_terminal());
    }

    #[test]
    fn pipeline_failures_are_terminal() {
        assert!(PipelineError::NoAudioTrack.is_terminal());
        assert!(PipelineError::NoViableCandidates.is_terminal());
        assert!(PipelineError::VoiceClonePermanentFail("x".into()).is_terminal());
        assert!(PipelineError::Cancelled.is_terminal());
    }

    #[test]
    fn cancelled_preserves_workspace() {
        assert!(PipelineError::Cancelled.preserves_workspace());
        assert!(!PipelineError::NoAudioTrack.preserves_workspace());
    }
}

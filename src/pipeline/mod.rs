//! Five-phase orchestration: ingest → understand → localize → synthesize →
//! compose
//!
//! `process_one` drives the whole DAG for a single host video under a
//! scoped workspace and never lets an error escape as a panic or a thrown
//! error: every outcome is folded into a [`PipelineResult`]. Batch mode
//! runs videos serially and isolates per-video failures.

pub mod workspace;

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::ads::AdCatalog;
use crate::cancel::CancelToken;
use crate::comfy::stages::AdAssetPipeline;
use crate::comfy::ComfyClient;
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::faces::FaceDetector;
use crate::media::{self, compose, separate::VocalSeparator};
use crate::planner::{AdCopyRequest, ChatPlanner};
use crate::select::{reference_window, InsertionSelector};
use crate::speaker::SpeakerAnalyzer;
use crate::transcribe::Transcriber;
use self::workspace::Workspace;

/// Source-separation model used for both the full track and the reference
/// window
const SEPARATION_MODEL: &str = "htdemucs";
/// Candidate insertion points requested from the planner
const PLAN_CANDIDATES: usize = 3;

/// Outcome of one pipeline invocation
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub video_id: String,
    pub original_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub success: bool,
    pub error_message: Option<String>,
    pub processing_seconds: f64,

    // Echoed plan fields for reporting
    pub transcript: Option<String>,
    pub theme: Option<String>,
    pub insertion_time: Option<f64>,
    pub ad_copy: Option<String>,
}

/// Artifacts of a successful run
struct RunArtifacts {
    output_path: PathBuf,
    transcript: String,
    theme: String,
    insertion_time: f64,
    ad_copy: String,
}

/// The ad-insertion pipeline with all collaborators wired in
pub struct Pipeline {
    config: Config,
    catalog: AdCatalog,
    planner: ChatPlanner,
    comfy: ComfyClient,
    detector: FaceDetector,
    transcriber: Transcriber,
    separator: VocalSeparator,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(config: &Config) -> Result<Self> {
        let catalog = AdCatalog::load(&config.ads_config)?;
        let planner = ChatPlanner::new(config)?;
        let comfy = ComfyClient::new(&config.comfy_base_url())?;

        Ok(Self {
            config: config.clone(),
            catalog,
            planner,
            comfy,
            detector: FaceDetector::default(),
            transcriber: Transcriber::new(&config.whisper_model),
            separator: VocalSeparator::new(SEPARATION_MODEL),
            cancel: CancelToken::new(),
        })
    }

    /// Clone of the run's cancellation token, for wiring to a signal
    /// handler. Tripping it makes the current phase operation resolve to
    /// [`PipelineError::Cancelled`] at its next suspension point.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Race a phase operation against cancellation.
    ///
    /// Dropping the losing future aborts in-flight HTTP requests and kills
    /// spawned subprocesses (they are started with `kill_on_drop`).
    async fn guard<T>(&self, work: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            result = work => result,
            () = self.cancel.cancelled() => Err(PipelineError::Cancelled),
        }
    }

    /// Process one host video end to end.
    ///
    /// Never propagates an error: failures come back as a result with
    /// `success = false`, with the workspace preserved when configured.
    pub async fn process_one(
        &self,
        video_path: &Path,
        output_dir: Option<&Path>,
        device: &str,
    ) -> PipelineResult {
        let started = Instant::now();
        let video_id = video_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string());

        info!("processing {} (device={device})", video_path.display());

        let failed = |error: PipelineError, elapsed: f64| PipelineResult {
            video_id: video_id.clone(),
            original_path: video_path.to_path_buf(),
            output_path: None,
            success: false,
            error_message: Some(error.to_string()),
            processing_seconds: elapsed,
            transcript: None,
            theme: None,
            insertion_time: None,
            ad_copy: None,
        };

        if !video_path.exists() {
            return failed(
                PipelineError::InputMissing(video_path.to_path_buf()),
                started.elapsed().as_secs_f64(),
            );
        }

        let workspace = match Workspace::create(
            &self.config.cache_dir,
            &video_id,
            self.config.keep_temp_on_error,
        ) {
            Ok(ws) => ws,
            Err(e) => return failed(e, started.elapsed().as_secs_f64()),
        };

        match self
            .run_phases(video_path, output_dir, device, &workspace)
            .await
        {
            Ok(artifacts) => {
                workspace.release(true, false);
                let elapsed = started.elapsed().as_secs_f64();
                info!(
                    "done in {elapsed:.1}s: {}",
                    artifacts.output_path.display()
                );
                PipelineResult {
                    video_id,
                    original_path: video_path.to_path_buf(),
                    output_path: Some(artifacts.output_path),
                    success: true,
                    error_message: None,
                    processing_seconds: elapsed,
                    transcript: Some(artifacts.transcript),
                    theme: Some(artifacts.theme),
                    insertion_time: Some(artifacts.insertion_time),
                    ad_copy: Some(artifacts.ad_copy),
                }
            }
            Err(e) => {
                error!("pipeline failed for {video_id}: {e}");
                workspace.release(false, e.preserves_workspace());
                failed(e, started.elapsed().as_secs_f64())
            }
        }
    }

    async fn run_phases(
        &self,
        video_path: &Path,
        output_dir: Option<&Path>,
        device: &str,
        ws: &Workspace,
    ) -> Result<RunArtifacts> {
        let config = &self.config;

        // ── Phase 1: ingest ─────────────────────────────────────────────
        info!("phase 1/5: ingest");
        let metadata = self.guard(media::probe(video_path)).await?;
        info!(
            "{}x{} @ {:.2}fps, {:.1}s, codec={}",
            metadata.width, metadata.height, metadata.fps, metadata.duration, metadata.codec
        );

        if !metadata.has_audio {
            return Err(PipelineError::NoAudioTrack);
        }
        if metadata.duration < config.min_video_duration
            || metadata.duration > config.max_video_duration
        {
            return Err(PipelineError::DurationOutOfRange {
                actual: metadata.duration,
                min: config.min_video_duration,
                max: config.max_video_duration,
            });
        }

        let original_audio = ws.audio_path("original.wav");
        self.guard(media::extract_audio(video_path, &original_audio))
            .await?;

        let vocals = ws.audio_path("vocals.wav");
        self.guard(self.separator.separate(&original_audio, &vocals, device))
            .await?;

        // ── Phase 2: understand ─────────────────────────────────────────
        info!("phase 2/5: understand");
        let transcription = self
            .guard(self.transcriber.transcribe(&original_audio, None, device))
            .await?;

        ws.save_text("transcriptions/transcription.txt", &transcription.full_text)?;
        ws.save_text("transcriptions/subtitles.srt", &transcription.to_srt())?;

        let analysis = self
            .guard(self.planner.analyze_content(
                &transcription.segments,
                metadata.duration,
                config.avoid_start,
                config.avoid_end,
                PLAN_CANDIDATES,
            ))
            .await?;

        // ── Phase 3: localize & stage assets ────────────────────────────
        info!("phase 3/5: localize");
        let scene = self
            .guard(SpeakerAnalyzer::new(&self.detector).analyze(
                video_path,
                &metadata,
                &ws.keyframe_dir(),
            ))
            .await?;

        let plan = self
            .guard(InsertionSelector::new(&self.detector).select(
                video_path,
                &analysis.insertion_points,
                &scene,
                &metadata,
                &ws.keyframe_dir(),
            ))
            .await?;

        let keyframe = ws.keyframe_path("insertion_keyframe.png");
        self.guard(media::transcode_to_png(&plan.keyframe, &keyframe))
            .await?;

        let (ref_start, ref_end) = reference_window(plan.insertion_time, metadata.duration);
        info!("reference audio window: {ref_start:.1}s - {ref_end:.1}s");
        let reference_clip = ws.audio_path("reference_clip.wav");
        self.guard(media::extract_audio_segment(
            &original_audio,
            ref_start,
            ref_end,
            &reference_clip,
        ))
        .await?;

        let reference_vocals = ws.audio_path("reference_vocals_clip.wav");
        self.guard(
            self.separator
                .separate(&reference_clip, &reference_vocals, device),
        )
        .await?;

        let ad = self.catalog.select_for_theme(&analysis.theme)?;
        info!("selected ad {:?} ({})", ad.name, ad.product);

        let ad_copy = self
            .guard(self.planner.generate_ad_copy(&AdCopyRequest {
                theme: &analysis.theme,
                category: &analysis.category,
                tone: &analysis.tone,
                context_before: &plan.candidate.context_before,
                context_after: &plan.candidate.context_after,
                transition_hint: &plan.candidate.transition_hint,
                language: &transcription.language,
                ad,
            }))
            .await?;
        info!("ad copy: {ad_copy:?}");

        // ── Phase 4: synthesize ─────────────────────────────────────────
        info!("phase 4/5: synthesize");
        let reachable = self.guard(async { Ok(self.comfy.ping().await) }).await?;
        if !reachable {
            return Err(PipelineError::JobErrored(format!(
                "job service unreachable at {}",
                config.comfy_base_url()
            )));
        }

        let fps = metadata.fps.round().max(1.0) as u32;
        let assets = self
            .guard(AdAssetPipeline::new(&self.comfy, config).generate(
                &keyframe,
                &reference_vocals,
                &ad_copy,
                &ws.ad_material_dir(),
                fps,
                metadata.width,
                metadata.height,
            ))
            .await?;

        // ── Phase 5: compose ────────────────────────────────────────────
        info!("phase 5/5: compose");
        let out_dir = output_dir.map_or_else(
            || {
                config
                    .output_dir
                    .join("processed")
                    .join(ws.video_id())
            },
            Path::to_path_buf,
        );
        tokio::fs::create_dir_all(&out_dir).await?;

        let extension = video_path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| "mp4".to_string());
        let output_path = out_dir.join(format!("{}_with_ad.{extension}", ws.video_id()));

        self.guard(compose::insert_ad(
            video_path,
            &assets.ad_video,
            plan.insertion_time,
            &output_path,
        ))
        .await?;
        self.guard(self.verify_output(&metadata, &assets.ad_video, &output_path))
            .await?;

        Ok(RunArtifacts {
            output_path,
            transcript: transcription.full_text,
            theme: analysis.theme,
            insertion_time: plan.insertion_time,
            ad_copy,
        })
    }

    /// Check the composed file: non-empty, and its duration equals host
    /// plus ad within one frame period (with container rounding slack).
    async fn verify_output(
        &self,
        host: &media::VideoMetadata,
        ad_clip: &Path,
        output_path: &Path,
    ) -> Result<()> {
        let ad_meta = media::probe(ad_clip).await?;
        let out_meta = media::probe(output_path).await?;

        let expected = host.duration + ad_meta.duration;
        let tolerance = host.frame_period().max(0.05);
        let drift = (out_meta.duration - expected).abs();

        if drift > tolerance {
            return Err(PipelineError::ComposeFailed(format!(
                "output duration {:.3}s deviates from expected {expected:.3}s by {drift:.3}s",
                out_meta.duration
            )));
        }

        info!(
            "output verified: {:.1}s host + {:.1}s ad = {:.1}s",
            host.duration, ad_meta.duration, out_meta.duration
        );
        Ok(())
    }

    /// Process every `.mp4` directly inside `dir`, serially.
    pub async fn process_batch(
        &self,
        dir: &Path,
        output_dir: Option<&Path>,
        device: &str,
    ) -> Result<Vec<PipelineResult>> {
        let mut videos: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"))
            })
            .collect();
        videos.sort();

        info!("batch mode: {} videos in {}", videos.len(), dir.display());

        let mut results = Vec::with_capacity(videos.len());
        for (i, video) in videos.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("batch interrupted after {i} of {} videos", videos.len());
                break;
            }
            info!("batch progress: {}/{}", i + 1, videos.len());
            results.push(self.process_one(video, output_dir, device).await);
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        let total_secs: f64 = results.iter().map(|r| r.processing_seconds).sum();
        if succeeded == results.len() {
            info!("batch complete: {succeeded}/{} succeeded", results.len());
        } else {
            warn!(
                "batch complete: {succeeded}/{} succeeded, {} failed",
                results.len(),
                results.len() - succeeded
            );
        }
        if !results.is_empty() {
            info!(
                "total {:.1}min, average {:.1}min per video",
                total_secs / 60.0,
                total_secs / results.len() as f64 / 60.0
            );
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_result_shape() {
        let result = PipelineResult {
            video_id: "v".into(),
            original_path: PathBuf::from("v.mp4"),
            output_path: None,
            success: false,
            error_message: Some("video has no audio track".into()),
            processing_seconds: 0.3,
            transcript: None,
            theme: None,
            insertion_time: None,
            ad_copy: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("no audio track"));
    }
}

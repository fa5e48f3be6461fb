//! Generative stages: image cleanup → voice clone → digital human
//!
//! Each stage fills its own workflow template, drives one remote job and
//! downloads the artifact. The orchestrator chains them with per-stage
//! retry budgets; image cleanup is the only stage allowed to degrade (the
//! original keyframe is used when cleanup keeps failing), the other two are
//! fatal to the pipeline when their retries run out.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::media;

use super::graph::{capped_scale_length, WorkflowGraph};
use super::{ComfyClient, OutputKind};

/// Attempts per generative stage
const STAGE_ATTEMPTS: u32 = 2;
/// Poll cadence while a job runs
const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Job budget for the image and voice stages
const SHORT_JOB_TIMEOUT: Duration = Duration::from_secs(300);
/// Digital-human rendering can legitimately take most of an hour
const RENDER_TIMEOUT: Duration = Duration::from_secs(3600);

/// Default positive prompt for keyframe cleanup
const CLEANUP_PROMPT: &str =
    "Remove text, subtitles, watermarks and logos; keep the person and background natural";
/// Default negative prompt for keyframe cleanup
const CLEANUP_NEGATIVE: &str = "text, subtitles, watermark, logo";

/// Paths of the three synthesized artifacts
#[derive(Debug, Clone)]
pub struct GeneratedAssets {
    pub cleaned_image: PathBuf,
    pub cloned_audio: PathBuf,
    pub ad_video: PathBuf,
}

/// Image cleanup stage (generative image edit)
pub struct ImageCleaner<'a> {
    client: &'a ComfyClient,
    template_path: PathBuf,
}

impl<'a> ImageCleaner<'a> {
    pub fn new(client: &'a ComfyClient, template_path: impl Into<PathBuf>) -> Self {
        Self {
            client,
            template_path: template_path.into(),
        }
    }

    /// Run one cleanup job against `input`, writing the result to `output`.
    pub async fn clean(&self, input: &Path, output: &Path) -> Result<()> {
        // The remote decoder rejects some JPEG variants, so keyframes are
        // re-encoded to PNG first. Transcode failure falls back to the
        // original file rather than aborting.
        let png_path = input.with_extension("upload.png");
        let upload_source = match media::transcode_to_png(input, &png_path).await {
            Ok(()) => png_path.clone(),
            Err(e) => {
                warn!("PNG transcode failed ({e}), uploading original keyframe");
                input.to_path_buf()
            }
        };

        let uploaded = self.client.upload(&upload_source).await?;
        let _ = tokio::fs::remove_file(&png_path).await;

        let mut workflow = WorkflowGraph::load(&self.template_path)?;
        workflow.inject_image(&uploaded);
        workflow.inject_prompts(CLEANUP_PROMPT, CLEANUP_NEGATIVE);

        let prompt_id = self.client.submit(&workflow).await?;
        let outputs = self
            .client
            .await_completion(&prompt_id, SHORT_JOB_TIMEOUT, POLL_INTERVAL)
            .await?;

        let file = outputs
            .first_of(OutputKind::Image)
            .ok_or_else(|| PipelineError::JobErrored("cleanup produced no image".into()))?;
        self.client.download(file, output).await
    }
}

/// Voice-clone stage (reference-conditioned TTS)
pub struct VoiceCloner<'a> {
    client: &'a ComfyClient,
    template_path: PathBuf,
}

impl<'a> VoiceCloner<'a> {
    pub fn new(client: &'a ComfyClient, template_path: impl Into<PathBuf>) -> Self {
        Self {
            client,
            template_path: template_path.into(),
        }
    }

    /// Clone the reference voice speaking `text` into `output`.
    pub async fn clone_voice(&self, reference_audio: &Path, text: &str, output: &Path) -> Result<()> {
        let uploaded = self.client.upload(reference_audio).await?;

        let mut workflow = WorkflowGraph::load(&self.template_path)?;
        workflow.inject_audio(&uploaded);
        workflow.inject_text(text);

        let prompt_id = self.client.submit(&workflow).await?;
        let outputs = self
            .client
            .await_completion(&prompt_id, SHORT_JOB_TIMEOUT, POLL_INTERVAL)
            .await?;

        let file = outputs
            .first_of(OutputKind::Audio)
            .ok_or_else(|| PipelineError::JobErrored("voice clone produced no audio".into()))?;
        self.client.download(file, output).await
    }
}

/// Digital-human rendering stage (lip-synced talking head)
pub struct DigitalHumanRenderer<'a> {
    client: &'a ComfyClient,
    template_path: PathBuf,
}

impl<'a> DigitalHumanRenderer<'a> {
    pub fn new(client: &'a ComfyClient, template_path: impl Into<PathBuf>) -> Self {
        Self {
            client,
            template_path: template_path.into(),
        }
    }

    /// Render the talking-head clip from a face image and cloned audio.
    pub async fn render(
        &self,
        face_image: &Path,
        audio: &Path,
        output: &Path,
        fps: u32,
        target_width: u32,
        target_height: u32,
    ) -> Result<()> {
        // The two uploads are independent; run them concurrently.
        let (image_name, audio_name) = futures::future::try_join(
            self.client.upload(face_image),
            self.client.upload(audio),
        )
        .await?;

        let mut workflow = WorkflowGraph::load(&self.template_path)?;
        workflow.inject_image(&image_name);
        workflow.inject_audio(&audio_name);
        workflow.inject_fps(fps);
        workflow.inject_scale_length(capped_scale_length(target_width, target_height));
        workflow.inject_render_tuning();

        let prompt_id = self.client.submit(&workflow).await?;
        info!("digital-human render running, this can take several minutes");
        let outputs = self
            .client
            .await_completion(&prompt_id, RENDER_TIMEOUT, POLL_INTERVAL)
            .await?;

        let file = outputs
            .first_of(OutputKind::Video)
            .ok_or_else(|| PipelineError::JobErrored("render produced no video".into()))?;
        self.client.download(file, output).await
    }
}

/// Orchestrates the three generative stages in order with per-stage
/// retry and degradation policy.
pub struct AdAssetPipeline<'a> {
    cleaner: ImageCleaner<'a>,
    cloner: VoiceCloner<'a>,
    renderer: DigitalHumanRenderer<'a>,
}

impl<'a> AdAssetPipeline<'a> {
    pub fn new(client: &'a ComfyClient, config: &Config) -> Self {
        Self {
            cleaner: ImageCleaner::new(client, &config.workflow_image_edit),
            cloner: VoiceCloner::new(client, &config.workflow_voice_clone),
            renderer: DigitalHumanRenderer::new(client, &config.workflow_digital_human),
        }
    }

    /// Produce the ad clip: cleaned keyframe, cloned voice line, rendered
    /// digital-human video, all under `out_dir`.
    pub async fn generate(
        &self,
        keyframe: &Path,
        reference_audio: &Path,
        ad_copy: &str,
        out_dir: &Path,
        fps: u32,
        target_width: u32,
        target_height: u32,
    ) -> Result<GeneratedAssets> {
        tokio::fs::create_dir_all(out_dir).await?;

        // Stage 1: cleanup, degrading to the raw keyframe on permanent
        // failure so a flaky image backend cannot sink the whole run.
        let cleaned_image = out_dir.join("cleaned_keyframe.png");
        let face_image = match retry_stage("image cleanup", 2, || {
            self.cleaner.clean(keyframe, &cleaned_image)
        })
        .await
        {
            Ok(()) => cleaned_image,
            Err(e) => {
                warn!("image cleanup failed permanently ({e}), using original keyframe");
                keyframe.to_path_buf()
            }
        };

        // Stage 2: voice clone, fatal on exhaustion.
        let cloned_audio = out_dir.join("ad_voice.wav");
        retry_stage("voice clone", 2, || {
            self.cloner.clone_voice(reference_audio, ad_copy, &cloned_audio)
        })
        .await
        .map_err(|e| PipelineError::VoiceClonePermanentFail(e.to_string()))?;

        // Stage 3: digital human, fatal on exhaustion.
        let ad_video = out_dir.join("ad_video.mp4");
        retry_stage("digital human", 3, || {
            self.renderer.render(
                &face_image,
                &cloned_audio,
                &ad_video,
                fps,
                target_width,
                target_height,
            )
        })
        .await
        .map_err(|e| PipelineError::DigitalHumanPermanentFail(e.to_string()))?;

        info!("ad assets ready under {}", out_dir.display());
        Ok(GeneratedAssets {
            cleaned_image: face_image,
            cloned_audio,
            ad_video,
        })
    }
}

/// Run a stage with up to [`STAGE_ATTEMPTS`] attempts, sleeping
/// `backoff_base * attempt` seconds before each retry.
///
/// Only transient remote errors are retried; a terminal error (missing
/// input, unreadable template, cancellation) fails the stage on the spot.
async fn retry_stage<F, Fut>(stage: &str, backoff_base: u64, run: F) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut last_error = None;
    for attempt in 1..=STAGE_ATTEMPTS {
        match run().await {
            Ok(()) => {
                info!("{stage} succeeded on attempt {attempt}");
                return Ok(());
            }
            Err(e) if e.is_terminal() => {
                warn!("{stage} failed with non-retryable error: {e}");
                return Err(e);
            }
            Err(e) => {
                if attempt < STAGE_ATTEMPTS {
                    let wait = Duration::from_secs(backoff_base * u64::from(attempt));
                    warn!(
                        "{stage} attempt {attempt}/{STAGE_ATTEMPTS} failed ({e}), retrying in {}s",
                        wait.as_secs()
                    );
                    tokio::time::sleep(wait).await;
                }
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| PipelineError::JobErrored(format!("{stage} failed"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_stage_stops_after_budget() {
        let calls = AtomicU32::new(0);
        let result = retry_stage("test", 0, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::JobErrored("boom".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), STAGE_ATTEMPTS);
    }

    #[tokio::test]
    async fn retry_stage_returns_on_first_success() {
        let calls = AtomicU32::new(0);
        let result = retry_stage("test", 0, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_stage_short_circuits_on_terminal_error() {
        let calls = AtomicU32::new(0);
        let result = retry_stage("test", 0, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(PipelineError::InputMissing(
                    std::path::PathBuf::from("gone.png"),
                ))
            }
        })
        .await;
        assert!(matches!(result, Err(PipelineError::InputMissing(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_stage_recovers_on_second_attempt() {
        let calls = AtomicU32::new(0);
        let result = retry_stage("test", 0, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(PipelineError::TimedOut(1))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

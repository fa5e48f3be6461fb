//! Two-stem vocal separation via demucs
//!
//! Only the vocal stem is retained; the accompaniment and the model's
//! intermediate directory tree are deleted after the move.

use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::media::locate_tool;

/// Source-separation engine wrapper
#[derive(Debug, Clone)]
pub struct VocalSeparator {
    model: String,
}

impl VocalSeparator {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    /// Separate vocals from `audio_path` into `output_path`.
    ///
    /// `device` is the compute hint forwarded to the engine ("cuda"/"cpu").
    pub async fn separate(&self, audio_path: &Path, output_path: &Path, device: &str) -> Result<()> {
        if !audio_path.exists() {
            return Err(PipelineError::InputMissing(audio_path.to_path_buf()));
        }
        let demucs = locate_tool("demucs")?;

        let work_dir = output_path
            .parent()
            .ok_or_else(|| PipelineError::Separation("output path has no parent dir".into()))?;
        tokio::fs::create_dir_all(work_dir).await?;

        info!(
            "separating vocals from {} (model={}, device={device})",
            audio_path.display(),
            self.model
        );

        let output = Command::new(demucs)
            .args(["--two-stems", "vocals", "-n", &self.model, "-o"])
            .arg(work_dir)
            .args(["--device", device])
            .arg(audio_path)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Separation(format!(
                "demucs failed: {}",
                stderr.lines().last().unwrap_or("unknown error")
            )));
        }

        // demucs writes <work_dir>/<model>/<stem>/vocals.wav
        let audio_stem = audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let model_dir = work_dir.join(&self.model);
        let vocals = model_dir.join(&audio_stem).join("vocals.wav");

        if !vocals.exists() {
            return Err(PipelineError::Separation(format!(
                "no vocals stem produced at {}",
                vocals.display()
            )));
        }

        tokio::fs::rename(&vocals, output_path).await?;
        if model_dir.exists() {
            tokio::fs::remove_dir_all(&model_dir).await?;
            debug!("removed intermediate stems under {}", model_dir.display());
        }

        info!("vocals written to {}", output_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separator_keeps_model_name() {
        let sep = VocalSeparator::new("htdemucs");
        assert_eq!(sep.model, "htdemucs");
    }

    #[tokio::test]
    async fn missing_input_is_reported() {
        let sep = VocalSeparator::new("htdemucs");
        let err = sep
            .separate(
                Path::new("/nonexistent/input.wav"),
                Path::new("/tmp/out.wav"),
                "cpu",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InputMissing(_)));
    }
}

//! Splice composition: host prefix + ad clip + host suffix
//!
//! The host is cut frame-accurately at the insertion time (re-encode, not a
//! keyframe-aligned stream copy) and the three parts are concatenated with a
//! re-encode to harmonize codec parameters. With a fixed encoder
//! configuration the operation is deterministic, so re-running it on the
//! same inputs reproduces the same output.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::media::locate_tool;

/// Encoder settings shared by split and concat so parameters always match
const VIDEO_CODEC_ARGS: [&str; 6] = ["-c:v", "libx264", "-preset", "medium", "-crf", "18"];
const AUDIO_CODEC_ARGS: [&str; 4] = ["-c:a", "aac", "-b:a", "192k"];

/// Split the host video at `split_time` into `[0, t)` and `[t, end)`.
///
/// Returns the prefix and suffix paths inside `work_dir`.
pub async fn split_at(
    video_path: &Path,
    split_time: f64,
    work_dir: &Path,
) -> Result<(PathBuf, PathBuf)> {
    tokio::fs::create_dir_all(work_dir).await?;
    let prefix = work_dir.join("part1.mp4");
    let suffix = work_dir.join("part2.mp4");

    info!("splitting host at {split_time:.2}s");

    run(
        |cmd| {
            cmd.arg("-i")
                .arg(video_path)
                .args(["-t", &format!("{split_time:.3}")])
                .args(VIDEO_CODEC_ARGS)
                .args(AUDIO_CODEC_ARGS)
                .arg(&prefix)
                .arg("-y");
        },
        "prefix cut",
    )
    .await?;

    run(
        |cmd| {
            cmd.args(["-ss", &format!("{split_time:.3}")])
                .arg("-i")
                .arg(video_path)
                .args(VIDEO_CODEC_ARGS)
                .args(AUDIO_CODEC_ARGS)
                .arg(&suffix)
                .arg("-y");
        },
        "suffix cut",
    )
    .await?;

    Ok((prefix, suffix))
}

/// Concatenate clips in order with a harmonizing re-encode.
pub async fn concat(clips: &[PathBuf], output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // concat demuxer needs a list file; escape single quotes per ffmpeg rules
    let list_path = output_path.with_extension("concat.txt");
    let mut list = String::new();
    for clip in clips {
        let escaped = clip.display().to_string().replace('\'', "'\\''");
        list.push_str(&format!("file '{escaped}'\n"));
    }
    tokio::fs::write(&list_path, list).await?;

    info!("concatenating {} clips into {}", clips.len(), output_path.display());

    let result = run(
        |cmd| {
            cmd.args(["-f", "concat", "-safe", "0", "-i"])
                .arg(&list_path)
                .args(VIDEO_CODEC_ARGS)
                .args(AUDIO_CODEC_ARGS)
                .arg(output_path)
                .arg("-y");
        },
        "concat",
    )
    .await;

    let _ = tokio::fs::remove_file(&list_path).await;
    result
}

/// Insert the ad clip into the host video at `insertion_time`.
///
/// Splits, concatenates prefix + ad + suffix, and removes the temporary
/// split parts regardless of outcome.
pub async fn insert_ad(
    host_video: &Path,
    ad_clip: &Path,
    insertion_time: f64,
    output_path: &Path,
) -> Result<()> {
    let work_dir = output_path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
        .join("temp_splits");

    let outcome = async {
        let (prefix, suffix) = split_at(host_video, insertion_time, &work_dir).await?;
        concat(
            &[prefix, ad_clip.to_path_buf(), suffix],
            output_path,
        )
        .await
    }
    .await;

    if work_dir.exists() {
        let _ = tokio::fs::remove_dir_all(&work_dir).await;
        debug!("removed split scratch dir");
    }

    outcome.map_err(|e| PipelineError::ComposeFailed(e.to_string()))?;

    let produced = tokio::fs::metadata(output_path)
        .await
        .map_err(|e| PipelineError::ComposeFailed(format!("output missing: {e}")))?;
    if produced.len() == 0 {
        return Err(PipelineError::ComposeFailed("output file is empty".into()));
    }

    Ok(())
}

async fn run(build: impl FnOnce(&mut Command), what: &str) -> Result<()> {
    let ffmpeg = locate_tool("ffmpeg")?;
    let mut cmd = Command::new(ffmpeg);
    build(&mut cmd);

    let output = cmd.kill_on_drop(true).output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
        return Err(PipelineError::Ffmpeg(format!("{what} failed: {tail}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_args_match_between_split_and_concat() {
        // Idempotent composition depends on one fixed encoder configuration.
        assert_eq!(VIDEO_CODEC_ARGS[1], "libx264");
        assert_eq!(AUDIO_CODEC_ARGS[1], "aac");
    }

    #[tokio::test]
    async fn insert_ad_rejects_missing_host() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out.mp4");
        let err = insert_ad(
            Path::new("/nonexistent/host.mp4"),
            Path::new("/nonexistent/ad.mp4"),
            5.0,
            &out,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::ComposeFailed(_)));
    }
}

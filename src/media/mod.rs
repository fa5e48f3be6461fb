//! Media container operations via ffmpeg/ffprobe
//!
//! Metadata probing, audio demux, windowed audio slicing and single-frame
//! extraction. Everything shells out to the system ffmpeg; no decoding
//! happens in-process.

pub mod compose;
pub mod separate;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// Demux sample rate for the host audio track (PCM-16 WAV)
pub const DEMUX_SAMPLE_RATE: u32 = 44_100;

/// Container metadata for a host video, immutable after ingest
#[derive(Debug, Clone)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration: f64,
    pub codec: String,
    pub has_audio: bool,
    pub filesize: u64,
}

impl VideoMetadata {
    /// Duration of a single frame in seconds
    #[must_use]
    pub fn frame_period(&self) -> f64 {
        if self.fps > 0.0 {
            1.0 / self.fps
        } else {
            0.04
        }
    }
}

/// Locate an external tool on PATH.
pub fn locate_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| PipelineError::MissingDependency(name.to_string()))
}

/// Probe container metadata using ffprobe.
pub async fn probe(video_path: &Path) -> Result<VideoMetadata> {
    if !video_path.exists() {
        return Err(PipelineError::InputMissing(video_path.to_path_buf()));
    }
    let ffprobe = locate_tool("ffprobe")?;

    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(video_path)
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        return Err(PipelineError::Ffmpeg(format!(
            "ffprobe failed on {}",
            video_path.display()
        )));
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)?;

    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| PipelineError::Ffmpeg("no video stream found".into()))?;

    let has_audio = parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let fps = video_stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .unwrap_or(25.0);

    let duration = parsed.format.duration.parse().unwrap_or(0.0);
    let filesize = parsed
        .format
        .size
        .as_deref()
        .and_then(|s| s.parse().ok())
        .or_else(|| std::fs::metadata(video_path).ok().map(|m| m.len()))
        .unwrap_or(0);

    Ok(VideoMetadata {
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        fps,
        duration,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
        has_audio,
        filesize,
    })
}

/// Parse an ffprobe rational frame rate ("30/1", "30000/1001") or plain float.
fn parse_frame_rate(raw: &str) -> Option<f64> {
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() == 2 {
        let num: f64 = parts[0].parse().ok()?;
        let den: f64 = parts[1].parse().ok()?;
        if den == 0.0 {
            return None;
        }
        Some(num / den)
    } else {
        raw.parse().ok()
    }
}

/// Demux the full audio track as PCM-16 WAV at 44.1 kHz.
pub async fn extract_audio(video_path: &Path, output_path: &Path) -> Result<()> {
    run_ffmpeg(
        |cmd| {
            cmd.arg("-i")
                .arg(video_path)
                .args(["-vn", "-acodec", "pcm_s16le", "-ar"])
                .arg(DEMUX_SAMPLE_RATE.to_string())
                .arg(output_path)
                .arg("-y");
        },
        "audio extraction",
    )
    .await
}

/// Demux a `[start, end)` window of the audio track.
pub async fn extract_audio_segment(
    audio_or_video_path: &Path,
    start: f64,
    end: f64,
    output_path: &Path,
) -> Result<()> {
    let duration = end - start;
    run_ffmpeg(
        |cmd| {
            cmd.args(["-ss", &format!("{start:.3}")])
                .args(["-t", &format!("{duration:.3}")])
                .arg("-i")
                .arg(audio_or_video_path)
                .args(["-vn", "-acodec", "pcm_s16le", "-ar"])
                .arg(DEMUX_SAMPLE_RATE.to_string())
                .arg(output_path)
                .arg("-y");
        },
        "audio segment extraction",
    )
    .await
}

/// Extract a single frame at `timestamp` as an image file.
pub async fn extract_frame_at(
    video_path: &Path,
    timestamp: f64,
    output_path: &Path,
) -> Result<()> {
    run_ffmpeg(
        |cmd| {
            cmd.args(["-ss", &format!("{timestamp:.3}")])
                .arg("-i")
                .arg(video_path)
                .args(["-frames:v", "1", "-q:v", "2"])
                .arg(output_path)
                .arg("-y");
        },
        "frame extraction",
    )
    .await
}

/// Re-encode an image to PNG. Used before uploads because the remote image
/// decoder chokes on some JPEG variants.
pub async fn transcode_to_png(input: &Path, output: &Path) -> Result<()> {
    run_ffmpeg(
        |cmd| {
            cmd.arg("-i").arg(input).arg(output).arg("-y");
        },
        "PNG transcode",
    )
    .await
}

/// Run ffmpeg with the supplied argument builder, mapping failure to a
/// captioned [`PipelineError::Ffmpeg`].
async fn run_ffmpeg(build: impl FnOnce(&mut Command), what: &str) -> Result<()> {
    let ffmpeg = locate_tool("ffmpeg")?;
    let mut cmd = Command::new(ffmpeg);
    build(&mut cmd);

    debug!("ffmpeg: {what}");
    // kill_on_drop: dropping the future on cancellation must not leave a
    // detached encoder running.
    let output = cmd
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
        return Err(PipelineError::Ffmpeg(format!("{what} failed: {tail}")));
    }
    Ok(())
}

/// `FFprobe` JSON output structure
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    streams: Vec<FfprobeStream>,
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: String,
    size: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rate_rational_forms() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("30/0"), None);
        assert_eq!(parse_frame_rate("garbage"), None);
    }

    #[test]
    fn frame_period_from_fps() {
        let meta = VideoMetadata {
            width: 1920,
            height: 1080,
            fps: 25.0,
            duration: 60.0,
            codec: "h264".into(),
            has_audio: true,
            filesize: 1,
        };
        assert!((meta.frame_period() - 0.04).abs() < 1e-9);
    }

    #[test]
    fn ffprobe_output_parses() {
        let json = r#"{
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "width": 1280,
                 "height": 720, "r_frame_rate": "30/1"},
                {"codec_type": "audio", "codec_name": "aac"}
            ],
            "format": {"duration": "62.5", "size": "1048576"}
        }"#;
        let parsed: FfprobeOutput = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.streams.len(), 2);
        assert_eq!(parsed.format.duration, "62.5");
    }
}

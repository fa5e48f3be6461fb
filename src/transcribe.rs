//! Audio transcription via Whisper
//!
//! Runs the Python whisper package as a subprocess and parses its JSON
//! output into time-aligned segments. The detected language is carried
//! through to ad-copy generation so the synthesized line matches the host
//! video's language.

use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::media::locate_tool;

/// Transcript segment with timestamps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<WordTiming>>,
}

/// Word-level timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// Ordered transcription with detected language
#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    pub segments: Vec<TranscriptionSegment>,
    pub language: String,
    pub full_text: String,
}

impl TranscriptionResult {
    /// Build a result from raw segments, enforcing ordering and validity:
    /// segments are sorted by start and entries with `start >= end` dropped.
    #[must_use]
    pub fn from_segments(mut segments: Vec<TranscriptionSegment>, language: String) -> Self {
        segments.retain(|s| s.start < s.end && s.start >= 0.0);
        segments.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));
        let full_text = segments
            .iter()
            .map(|s| s.text.trim())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            segments,
            language,
            full_text,
        }
    }

    /// Render the transcript in SubRip format.
    #[must_use]
    pub fn to_srt(&self) -> String {
        let mut out = String::new();
        for (i, seg) in self.segments.iter().enumerate() {
            out.push_str(&format!(
                "{}\n{} --> {}\n{}\n\n",
                i + 1,
                format_srt_timestamp(seg.start),
                format_srt_timestamp(seg.end),
                seg.text.trim()
            ));
        }
        out
    }
}

/// Format seconds as an SRT timecode (HH:MM:SS,mmm)
fn format_srt_timestamp(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

/// Whisper transcription engine
#[derive(Debug, Clone)]
pub struct Transcriber {
    model: String,
}

/// Raw whisper JSON shape printed by the helper script
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    language: String,
    segments: Vec<TranscriptionSegment>,
}

impl Transcriber {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    /// Transcribe a PCM audio file.
    ///
    /// `language` is an optional hint; `None` lets the model auto-detect.
    /// `device` selects the compute backend ("cuda"/"cpu").
    pub async fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
        device: &str,
    ) -> Result<TranscriptionResult> {
        if !audio_path.exists() {
            return Err(PipelineError::InputMissing(audio_path.to_path_buf()));
        }
        let python = locate_tool("python3")?;

        let language_arg = match language {
            Some(lang) => format!("\"{lang}\""),
            None => "None".to_string(),
        };

        let script = format!(
            r#"
import json
import whisper

model = whisper.load_model("{model}", device="{device}")
result = model.transcribe(
    "{audio_path}",
    language={language_arg},
    word_timestamps=True,
    verbose=False
)

segments = []
for seg in result["segments"]:
    entry = {{
        "start": seg["start"],
        "end": seg["end"],
        "text": seg["text"].strip(),
    }}
    if "words" in seg:
        entry["words"] = [
            {{"word": w["word"].strip(), "start": w["start"], "end": w["end"]}}
            for w in seg["words"]
        ]
    segments.append(entry)

print(json.dumps({{"language": result.get("language", "unknown"), "segments": segments}}))
"#,
            model = self.model,
            audio_path = audio_path.display(),
        );

        info!(
            "transcribing {} (model={}, device={device})",
            audio_path.display(),
            self.model
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
            return Err(PipelineError::TranscribeFailed(
                stderr.lines().last().unwrap_or("whisper failed").to_string(),
            ));
        }

        let raw: WhisperOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| PipelineError::TranscribeFailed(format!("unparseable output: {e}")))?;

        let result = TranscriptionResult::from_segments(raw.segments, raw.language);
        info!(
            "transcribed {} segments, language={}",
            result.segments.len(),
            result.language
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, text: &str) -> TranscriptionSegment {
        TranscriptionSegment {
            start,
            end,
            text: text.into(),
            words: None,
        }
    }

    #[test]
    fn segments_are_sorted_and_invalid_dropped() {
        let result = TranscriptionResult::from_segments(
            vec![
                seg(5.0, 7.0, "second"),
                seg(0.0, 2.0, "first"),
                seg(3.0, 3.0, "degenerate"),
                seg(-1.0, 1.0, "negative"),
            ],
            "en".into(),
        );
        let texts: Vec<&str> = result.segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(result.full_text, "first second");
    }

    #[test]
    fn srt_timecode_format() {
        assert_eq!(format_srt_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_srt_timestamp(61.5), "00:01:01,500");
        assert_eq!(format_srt_timestamp(3661.042), "01:01:01,042");
    }

    #[test]
    fn srt_rendering() {
        let result = TranscriptionResult::from_segments(
            vec![seg(0.0, 1.5, "hello"), seg(1.5, 3.0, "world")],
            "en".into(),
        );
        let srt = result.to_srt();
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,500\nhello\n"));
        assert!(srt.contains("2\n00:00:01,500 --> 00:00:03,000\nworld\n"));
    }

    #[test]
    fn whisper_output_parses() {
        let json = r#"{
            "language": "en",
            "segments": [
                {"start": 0.0, "end": 1.2, "text": "hi",
                 "words": [{"word": "hi", "start": 0.0, "end": 0.4}]}
            ]
        }"#;
        let raw: WhisperOutput = serde_json::from_str(json).unwrap();
        assert_eq!(raw.language, "en");
        assert_eq!(raw.segments[0].words.as_ref().unwrap().len(), 1);
    }
}

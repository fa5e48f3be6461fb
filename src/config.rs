//! Runtime configuration
//!
//! Every knob is read from the environment exactly once at startup and the
//! resulting [`Config`] is threaded into each component by reference. Nothing
//! re-reads the environment after load.

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

/// Immutable runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    // Chat-completion service
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,

    // Job-graph (ComfyUI) service
    pub comfy_host: String,
    pub comfy_port: u16,
    pub comfy_protocol: String,

    // Workflow templates (opaque job graphs, editable by non-developers)
    pub workflow_image_edit: PathBuf,
    pub workflow_voice_clone: PathBuf,
    pub workflow_digital_human: PathBuf,

    // Local transcription
    pub whisper_model: String,

    // Video admission bounds
    pub min_video_duration: f64,
    pub max_video_duration: f64,

    // Insertion-point edge avoidance
    pub avoid_start: f64,
    pub avoid_end: f64,

    // Ad copy length bounds (characters)
    pub ad_copy_min_chars: usize,
    pub ad_copy_max_chars: usize,

    // Workspace management
    pub keep_temp_on_error: bool,
    pub temp_files_ttl: u64,
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,

    // Ad catalog
    pub ads_config: PathBuf,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// `OPENAI_API_KEY` is the only required key; everything else has a
    /// default matching the reference deployment.
    pub fn from_env() -> Result<Self> {
        let openai_api_key = env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY is required (set it in the environment or .env)")?;
        if openai_api_key.trim().is_empty() {
            bail!("OPENAI_API_KEY is empty");
        }

        let cache_dir = env_path("ADSPLICE_CACHE_DIR").unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(env::temp_dir)
                .join("adsplice")
        });

        Ok(Self {
            openai_api_key,
            openai_base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_model: env_or("OPENAI_MODEL", "gpt-4o-mini"),

            comfy_host: env_or("COMFYUI_HOST", "127.0.0.1"),
            comfy_port: env_parsed("COMFYUI_PORT", 8188)?,
            comfy_protocol: env_or("COMFYUI_PROTOCOL", "http"),

            workflow_image_edit: env_path("WORKFLOW_IMAGE_EDIT")
                .unwrap_or_else(|| PathBuf::from("workflows/image_edit.json")),
            workflow_voice_clone: env_path("WORKFLOW_VOICE_CLONE")
                .unwrap_or_else(|| PathBuf::from("workflows/voice_clone.json")),
            workflow_digital_human: env_path("WORKFLOW_DIGITAL_HUMAN")
                .unwrap_or_else(|| PathBuf::from("workflows/digital_human.json")),

            whisper_model: env_or("WHISPER_MODEL", "medium"),

            min_video_duration: env_parsed("MIN_VIDEO_DURATION", 15.0)?,
            max_video_duration: env_parsed("MAX_VIDEO_DURATION", 300.0)?,

            avoid_start: env_parsed("INSERTION_POINT_AVOID_START", 3.0)?,
            avoid_end: env_parsed("INSERTION_POINT_AVOID_END", 5.0)?,

            ad_copy_min_chars: env_parsed("AD_SCRIPT_MIN_LENGTH", 10)?,
            ad_copy_max_chars: env_parsed("AD_SCRIPT_MAX_LENGTH", 60)?,

            keep_temp_on_error: env_bool("KEEP_TEMP_FILES_ON_ERROR", true),
            temp_files_ttl: env_parsed("TEMP_FILES_TTL", 86_400)?,
            cache_dir,
            output_dir: env_path("ADSPLICE_OUTPUT_DIR").unwrap_or_else(|| PathBuf::from("output")),

            ads_config: env_path("ADS_CONFIG").unwrap_or_else(|| PathBuf::from("config/ads.json")),
        })
    }

    /// Base URL of the job-graph service, e.g. `http://host:8188`
    #[must_use]
    pub fn comfy_base_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.comfy_protocol, self.comfy_host, self.comfy_port
        )
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var(key).ok().map(PathBuf::from)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map_or(default, |v| matches!(v.as_str(), "1" | "true" | "True" | "yes"))
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comfy_base_url_assembly() {
        let config = Config {
            openai_api_key: "k".into(),
            openai_base_url: "https://api.openai.com/v1".into(),
            openai_model: "gpt-4o-mini".into(),
            comfy_host: "10.0.0.2".into(),
            comfy_port: 9000,
            comfy_protocol: "http".into(),
            workflow_image_edit: "workflows/image_edit.json".into(),
            workflow_voice_clone: "workflows/voice_clone.json".into(),
            workflow_digital_human: "workflows/digital_human.json".into(),
            whisper_model: "medium".into(),
            min_video_duration: 15.0,
            max_video_duration: 300.0,
            avoid_start: 3.0,
            avoid_end: 5.0,
            ad_copy_min_chars: 10,
            ad_copy_max_chars: 60,
            keep_temp_on_error: true,
            temp_files_ttl: 86_400,
            cache_dir: "/tmp/adsplice".into(),
            output_dir: "output".into(),
            ads_config: "config/ads.json".into(),
        };
        assert_eq!(config.comfy_base_url(), "http://10.0.0.2:9000");
    }

    #[test]
    fn bool_parsing_accepts_common_forms() {
        assert!(env_bool("ADSPLICE_TEST_UNSET_KEY", true));
        std::env::set_var("ADSPLICE_TEST_BOOL", "false");
        assert!(!env_bool("ADSPLICE_TEST_BOOL", true));
        std::env::set_var("ADSPLICE_TEST_BOOL", "1");
        assert!(env_bool("ADSPLICE_TEST_BOOL", false));
        std::env::remove_var("ADSPLICE_TEST_BOOL");
    }
}

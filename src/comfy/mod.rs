//! Job-graph service client (ComfyUI wire protocol)
//!
//! One shared client serves all three generative stages: upload, graph
//! submission, history polling and artifact download. Every request goes
//! through a single retry helper with linear backoff plus jitter; transport
//! errors and 5xx responses are retried, 4xx responses are terminal. A
//! `Connection: close` default header sidesteps keep-alive problems behind
//! reverse proxies.

pub mod graph;
pub mod stages;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, CONNECTION};
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use self::graph::WorkflowGraph;

/// Attempts per HTTP request before giving up
const HTTP_ATTEMPTS: u32 = 5;
/// Base backoff multiplied by the attempt number
const HTTP_BACKOFF: Duration = Duration::from_secs(1);
/// Per-request timeout
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Extensions routed to the audio upload endpoint
const AUDIO_EXTENSIONS: [&str; 6] = ["wav", "mp3", "flac", "m4a", "aac", "ogg"];

/// Kind of artifact to pull out of a finished job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Image,
    Audio,
    Video,
}

/// One produced file reference
#[derive(Debug, Clone, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
}

/// Outputs of a single graph node
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    images: Vec<OutputFile>,
    #[serde(default)]
    gifs: Vec<OutputFile>,
    #[serde(default)]
    audio: Vec<OutputFile>,
    #[serde(default)]
    videos: Vec<OutputFile>,
}

/// Outputs of a finished job, keyed by node id
#[derive(Debug, Clone, Default)]
pub struct JobOutputs {
    nodes: HashMap<String, NodeOutput>,
}

impl JobOutputs {
    /// First produced file of the given kind across all nodes.
    ///
    /// Stages locate their artifact by kind rather than node id so template
    /// edits that renumber nodes keep working.
    #[must_use]
    pub fn first_of(&self, kind: OutputKind) -> Option<&OutputFile> {
        self.nodes.values().find_map(|node| match kind {
            OutputKind::Image => node.images.first(),
            OutputKind::Audio => node.audio.first(),
            OutputKind::Video => node.gifs.first().or_else(|| node.videos.first()),
        })
    }
}

/// Observed state of a submitted job
#[derive(Debug)]
pub enum JobStatus {
    Pending,
    Running,
    Success(JobOutputs),
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    prompt_id: String,
    #[serde(default)]
    node_errors: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    status: HistoryStatus,
    #[serde(default)]
    outputs: HashMap<String, NodeOutput>,
}

#[derive(Debug, Deserialize)]
struct HistoryStatus {
    status_str: String,
    #[serde(default)]
    messages: serde_json::Value,
}

/// Shared client for the job-graph service
pub struct ComfyClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
}

impl ComfyClient {
    pub fn new(base_url: &str) -> Result<Self> {
        // Validate the endpoint up front so a typo fails at startup.
        url::Url::parse(base_url)
            .map_err(|e| PipelineError::SubmitRejected(format!("bad service URL: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("close"));

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: format!("adsplice_{}", uuid::Uuid::new_v4()),
        })
    }

    /// Liveness probe against `/system_stats`.
    pub async fn ping(&self) -> bool {
        let url = format!("{}/system_stats", self.base_url);
        match self.http.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Upload a local file, returning the server-side filename.
    ///
    /// Recognized audio extensions go to `/upload/audio` with the `audio`
    /// multipart field; everything else goes to `/upload/image`.
    pub async fn upload(&self, file_path: &Path) -> Result<String> {
        if !file_path.exists() {
            return Err(PipelineError::InputMissing(file_path.to_path_buf()));
        }

        let (endpoint, field) = upload_route(file_path);

        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.bin".to_string());
        let bytes = tokio::fs::read(file_path).await?;
        let url = format!("{}/upload/{endpoint}", self.base_url);

        info!("uploading {} ({} bytes) as {field}", file_name, bytes.len());

        let response = self
            .execute_with_retry(|| {
                let part = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name(file_name.clone());
                let form = reqwest::multipart::Form::new()
                    .part(field.to_string(), part)
                    .text("overwrite", "true");
                self.http.post(&url).multipart(form)
            })
            .await
            .map_err(|e| PipelineError::UploadFailed(e.to_string()))?;

        #[derive(Deserialize)]
        struct UploadResponse {
            name: String,
        }
        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::UploadFailed(format!("bad upload response: {e}")))?;

        debug!("uploaded as {}", uploaded.name);
        Ok(uploaded.name)
    }

    /// Submit a prepared graph, returning the job id.
    pub async fn submit(&self, workflow: &WorkflowGraph) -> Result<String> {
        let url = format!("{}/prompt", self.base_url);
        let payload = json!({
            "prompt": workflow.nodes(),
            "client_id": self.client_id,
        });

        let response = self
            .execute_with_retry(|| self.http.post(&url).json(&payload))
            .await?;

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::SubmitRejected(format!("bad submit response: {e}")))?;

        if !submitted.node_errors.is_empty() {
            return Err(PipelineError::SubmitRejected(
                serde_json::to_string(&submitted.node_errors).unwrap_or_default(),
            ));
        }

        info!("job submitted: {}", submitted.prompt_id);
        Ok(submitted.prompt_id)
    }

    /// Poll the job's current status.
    pub async fn status(&self, prompt_id: &str) -> Result<JobStatus> {
        let url = format!("{}/history/{prompt_id}", self.base_url);
        let response = self.execute_with_retry(|| self.http.get(&url)).await?;

        let mut history: HashMap<String, HistoryEntry> = response.json().await?;
        let Some(entry) = history.remove(prompt_id) else {
            // Not in history yet: still queued.
            return Ok(JobStatus::Pending);
        };

        Ok(parse_status(entry))
    }

    /// Wait for the job to finish, polling at `poll_interval` until
    /// `timeout` has elapsed.
    pub async fn await_completion(
        &self,
        prompt_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<JobOutputs> {
        let started = Instant::now();
        debug!(
            "waiting for job {prompt_id} (timeout {}s)",
            timeout.as_secs()
        );

        loop {
            if started.elapsed() > timeout {
                return Err(PipelineError::TimedOut(timeout.as_secs()));
            }

            match self.status(prompt_id).await? {
                JobStatus::Success(outputs) => {
                    info!(
                        "job {prompt_id} finished in {:.1}s",
                        started.elapsed().as_secs_f64()
                    );
                    return Ok(outputs);
                }
                JobStatus::Failed(message) => {
                    return Err(PipelineError::JobErrored(message));
                }
                JobStatus::Pending | JobStatus::Running => {}
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Download a produced file to `output_path`.
    pub async fn download(&self, file: &OutputFile, output_path: &Path) -> Result<()> {
        let url = format!("{}/view", self.base_url);

        info!("downloading {}", file.filename);
        let response = self
            .execute_with_retry(|| {
                let mut req = self.http.get(&url).query(&[
                    ("filename", file.filename.as_str()),
                    ("type", "output"),
                ]);
                if !file.subfolder.is_empty() {
                    req = req.query(&[("subfolder", file.subfolder.as_str())]);
                }
                req
            })
            .await?;

        let bytes = response.bytes().await?;
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output_path, &bytes).await?;

        debug!("saved {} bytes to {}", bytes.len(), output_path.display());
        Ok(())
    }

    /// Execute a request with bounded retries.
    ///
    /// Retries transport failures and 5xx responses with
    /// `backoff * attempt + U(0, 0.5)` seconds between attempts. 4xx
    /// responses are returned immediately as errors.
    async fn execute_with_retry<F>(&self, make_request: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt: u32 = 1;
        loop {
            let failure = match make_request().send().await {
                Ok(response) if response.status().is_server_error() => {
                    format!("HTTP {}", response.status())
                }
                Ok(response) if response.status().is_client_error() => {
                    return Err(PipelineError::JobErrored(format!(
                        "HTTP {}",
                        response.status()
                    )));
                }
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt >= HTTP_ATTEMPTS {
                        return Err(PipelineError::Http(e));
                    }
                    e.to_string()
                }
            };

            if attempt >= HTTP_ATTEMPTS {
                return Err(PipelineError::JobErrored(format!(
                    "request failed after {HTTP_ATTEMPTS} attempts: {failure}"
                )));
            }

            let jitter = rand::thread_rng().gen_range(0.0..0.5);
            let delay = HTTP_BACKOFF.mul_f64(f64::from(attempt)) + Duration::from_secs_f64(jitter);
            warn!(
                "request failed ({failure}), retrying in {:.1}s ({attempt}/{HTTP_ATTEMPTS})",
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Choose the upload endpoint and multipart field for a file: recognized
/// audio extensions go to the audio endpoint, everything else is an image.
fn upload_route(path: &Path) -> (&'static str, &'static str) {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        ("audio", "audio")
    } else {
        ("image", "image")
    }
}

/// Map a history entry to a [`JobStatus`]. Unknown status strings are
/// rejected rather than polled forever.
fn parse_status(entry: HistoryEntry) -> JobStatus {
    match entry.status.status_str.as_str() {
        "success" => JobStatus::Success(JobOutputs {
            nodes: entry.outputs,
        }),
        "error" => JobStatus::Failed(
            serde_json::to_string(&entry.status.messages)
                .unwrap_or_else(|_| "unreported error".to_string()),
        ),
        "pending" => JobStatus::Pending,
        "running" => JobStatus::Running,
        other => JobStatus::Failed(format!("unknown status {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status_str: &str, outputs: &str) -> HistoryEntry {
        serde_json::from_str(&format!(
            r#"{{"status": {{"status_str": "{status_str}", "messages": []}}, "outputs": {outputs}}}"#
        ))
        .unwrap()
    }

    #[test]
    fn success_status_carries_outputs() {
        let entry = entry(
            "success",
            r#"{"9": {"images": [{"filename": "out.png", "subfolder": "sub"}]}}"#,
        );
        match parse_status(entry) {
            JobStatus::Success(outputs) => {
                let file = outputs.first_of(OutputKind::Image).unwrap();
                assert_eq!(file.filename, "out.png");
                assert_eq!(file.subfolder, "sub");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn error_and_unknown_statuses_fail() {
        assert!(matches!(
            parse_status(entry("error", "{}")),
            JobStatus::Failed(_)
        ));
        assert!(matches!(
            parse_status(entry("exploded", "{}")),
            JobStatus::Failed(_)
        ));
    }

    #[test]
    fn in_progress_statuses() {
        assert!(matches!(
            parse_status(entry("pending", "{}")),
            JobStatus::Pending
        ));
        assert!(matches!(
            parse_status(entry("running", "{}")),
            JobStatus::Running
        ));
    }

    #[test]
    fn video_outputs_found_under_gifs_or_videos() {
        let entry = entry(
            "success",
            r#"{"30": {"gifs": [{"filename": "clip.mp4"}]}}"#,
        );
        let JobStatus::Success(outputs) = parse_status(entry) else {
            panic!("expected success");
        };
        assert_eq!(outputs.first_of(OutputKind::Video).unwrap().filename, "clip.mp4");
        assert!(outputs.first_of(OutputKind::Audio).is_none());
    }

    #[test]
    fn submit_response_node_errors() {
        let ok: SubmitResponse =
            serde_json::from_str(r#"{"prompt_id": "abc", "node_errors": {}}"#).unwrap();
        assert!(ok.node_errors.is_empty());

        let bad: SubmitResponse = serde_json::from_str(
            r#"{"prompt_id": "abc", "node_errors": {"7": {"message": "missing model"}}}"#,
        )
        .unwrap();
        assert!(!bad.node_errors.is_empty());
    }

    #[test]
    fn audio_extension_routing() {
        assert_eq!(upload_route(Path::new("clip.WAV")), ("audio", "audio"));
        assert_eq!(upload_route(Path::new("voice.mp3")), ("audio", "audio"));
        assert_eq!(upload_route(Path::new("frame.png")), ("image", "image"));
        assert_eq!(upload_route(Path::new("noext")), ("image", "image"));
    }
}

//! `adsplice` - contextual digital-human ad insertion
//!
//! # Pipeline
//!
//! - **Ingest**: probe the container, demux audio, separate vocals
//! - **Understand**: transcribe, ask a chat model for theme + ranked
//!   insertion candidates
//! - **Localize**: identify the main speaker, verify candidate frames,
//!   slice reference audio, pick an ad and generate copy
//! - **Synthesize**: image cleanup → voice clone → digital-human render
//!   against a remote job-graph service
//! - **Compose**: splice host prefix + ad clip + host suffix
//!
//! # Example
//!
//! ```rust,no_run
//! use adsplice::{Config, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let pipeline = Pipeline::new(&config)?;
//!     let result = pipeline
//!         .process_one("input/host.mp4".as_ref(), None, "cuda")
//!         .await;
//!     println!("success: {}", result.success);
//!     Ok(())
//! }
//! ```

pub mod ads;
pub mod cancel;
pub mod comfy;
pub mod config;
pub mod error;
pub mod faces;
pub mod media;
pub mod pipeline;
pub mod planner;
pub mod select;
pub mod speaker;
pub mod transcribe;

pub use ads::{AdCatalog, AdEntry};
pub use cancel::CancelToken;
pub use comfy::{ComfyClient, JobOutputs, JobStatus, OutputKind};
pub use config::Config;
pub use error::{PipelineError, Result};
pub use faces::{FaceDetector, FaceObservation};
pub use media::VideoMetadata;
pub use pipeline::{workspace::Workspace, Pipeline, PipelineResult};
pub use planner::{ChatPlanner, ContentAnalysis, InsertionCandidate};
pub use select::{ChosenPlan, InsertionSelector};
pub use speaker::{SceneAnalysis, SpeakerAnalyzer, SpeakerProfile};
pub use transcribe::{Transcriber, TranscriptionResult, TranscriptionSegment};

/// Version of adsplice
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! `adsplice` CLI - insert a digital-human ad clip into a narrated video

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use adsplice::{Config, Pipeline, PipelineResult, Workspace};

#[derive(Parser)]
#[command(name = "adsplice")]
#[command(about = "Splices a synthesized digital-human ad clip into a narrated video")]
#[command(version)]
struct Cli {
    /// Input video file, or a directory with --batch
    input: PathBuf,

    /// Output directory (default: <output root>/processed/<video id>)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Treat the input as a directory and process all .mp4 files in it
    #[arg(long)]
    batch: bool,

    /// Compute device forwarded to transcription and source separation
    #[arg(long, value_enum, default_value_t = Device::Cuda)]
    device: Device,
}

#[derive(Clone, Copy, ValueEnum)]
enum Device {
    Cuda,
    Cpu,
}

impl Device {
    fn as_str(self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Cpu => "cpu",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::from_env()?;

    match Workspace::cleanup_expired(&config.cache_dir, Duration::from_secs(config.temp_files_ttl))
    {
        Ok(0) => {}
        Ok(n) => println!("🧹 Removed {n} expired workspaces"),
        Err(e) => warn!("workspace TTL sweep failed: {e}"),
    }

    let pipeline = Pipeline::new(&config)?;
    let device = cli.device.as_str();

    // Ctrl-c trips the pipeline's cancellation token; the run stops at its
    // next suspension point, the failure surfaces as a Cancelled result,
    // and the workspace is preserved.
    let cancel = pipeline.cancel_handle();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; stopping at the next suspension point");
                cancel.cancel();
            }
        });
    }

    let code = if cli.batch {
        if !cli.input.is_dir() {
            anyhow::bail!("--batch requires a directory, got {}", cli.input.display());
        }

        let results = pipeline
            .process_batch(&cli.input, cli.output.as_deref(), device)
            .await?;

        let succeeded = results.iter().filter(|r| r.success).count();
        for result in &results {
            print_result(result);
        }
        println!("\n📊 Batch: {succeeded}/{} succeeded", results.len());

        if succeeded == results.len() && !results.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        }
    } else {
        if !cli.input.is_file() {
            anyhow::bail!("input video not found: {}", cli.input.display());
        }

        let result = pipeline
            .process_one(&cli.input, cli.output.as_deref(), device)
            .await;
        print_result(&result);

        if result.success {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        }
    };

    if cancel.is_cancelled() {
        return Ok(ExitCode::from(130));
    }
    Ok(code)
}

fn print_result(result: &PipelineResult) {
    if result.success {
        println!("\n✅ {}", result.video_id);
        if let Some(theme) = &result.theme {
            println!("   Theme: {theme}");
        }
        if let Some(time) = result.insertion_time {
            println!("   Inserted at: {time:.1}s");
        }
        if let Some(copy) = &result.ad_copy {
            println!("   Ad copy: {copy}");
        }
        if let Some(path) = &result.output_path {
            println!("   Output: {}", path.display());
        }
        println!("   Took: {:.1}min", result.processing_seconds / 60.0);
    } else {
        println!("\n❌ {}", result.video_id);
        if let Some(message) = &result.error_message {
            println!("   Error: {message}");
        }
    }
}

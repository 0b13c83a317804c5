use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use archi_app::backend::GenerationBackend;
use archi_app::{AppConfig, HttpBackend, JobLifecycleController, SessionContext};
use archi_core::sketch::SketchModel;
use archi_raster::PngRenderer;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "archisynth", about = "Sketch-to-architecture generation client")]
struct Cli {
    /// Base URL of the generation service
    #[arg(long, env = "ARCHI_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Log in and remember the token
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Forget the stored token
    Logout,
    /// List past iterations, most recent first
    History,
    /// Submit a prompt and sketch, then wait for the result
    Generate {
        #[arg(long)]
        prompt: String,
        /// JSON array of strokes, each an array of [x, y] points
        #[arg(long)]
        sketch: Option<PathBuf>,
        /// Seconds between status checks
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load()?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }

    let session = Arc::new(SessionContext::open(&config.session_file));
    let backend = Arc::new(HttpBackend::new(
        config.api_url.clone(),
        config.request_timeout,
        session.clone(),
    )?);

    match cli.command {
        Command::Register { email, password } => {
            let user = backend.register(&email, &password).await?;
            println!("Registered {} (id {})", user.email, user.id);
        }
        Command::Login { email, password } => {
            backend.login(&email, &password).await?;
            println!("Logged in as {email}");
        }
        Command::Logout => {
            session.clear()?;
            println!("Logged out");
        }
        Command::History => {
            let iterations = backend.list_history().await?;
            if iterations.is_empty() {
                println!("No iterations yet");
            }
            for iteration in iterations {
                println!(
                    "{:>6}  {:<10} {}",
                    iteration.id, iteration.status, iteration.prompt
                );
            }
        }
        Command::Generate {
            prompt,
            sketch,
            interval_secs,
        } => {
            if let Some(secs) = interval_secs {
                config.poll_interval = Duration::from_secs(secs);
            }
            let controller = JobLifecycleController::new(
                backend,
                Arc::new(PngRenderer::default()),
                session,
                config.controller_config(),
            );
            if let Some(path) = sketch {
                let model = load_sketch(&path)?;
                info!("Loaded {} points from {}", model.point_count(), path.display());
                controller.with_sketch(|current| *current = model);
            }

            let handle = controller.submit_design(&prompt)?;
            info!(
                "Submitted at {}, polling every {}s",
                handle.submitted_at().format("%H:%M:%S"),
                config.poll_interval.as_secs()
            );
            let iteration = handle.outcome().await?;

            println!("Iteration {}", iteration.id);
            println!("Image: {}", iteration.generated_image_url().unwrap_or("-"));
            println!("\n{}", iteration.narrative().unwrap_or_default());
            println!("\nCompliance:\n{}", iteration.compliance_check().unwrap_or_default());
        }
    }

    Ok(())
}

fn load_sketch(path: &Path) -> anyhow::Result<SketchModel> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sketch {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Sketch {} is not a list of strokes", path.display()))
}

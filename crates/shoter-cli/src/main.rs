use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shoter_api::HttpGameApi;
use shoter_core::{Angle, CapturedFrame, FaceDetector, PhotoPipeline, ScrfdDetector, UnavailableDetector};
use shoter_game::{Config, Registration, ShotController};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

type Pipeline = PhotoPipeline<Box<dyn FaceDetector>>;

#[derive(Parser)]
#[command(name = "shoter", about = "Shoter AR party game: photo pipeline and backend client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the photo pipeline on a file and print the payload as JSON
    Process {
        file: PathBuf,
        /// Angle to tag the photo with
        #[arg(short, long, default_value_t = Angle::Front)]
        angle: Angle,
        /// Override the longest-side bound
        #[arg(long)]
        max_dimension: Option<u32>,
    },
    /// Take a shot with a photo and identify the player in it
    Shoot { file: PathBuf },
    /// Register a player from four photos
    Register {
        #[arg(long)]
        front: PathBuf,
        #[arg(long)]
        left: PathBuf,
        #[arg(long)]
        right: PathBuf,
        #[arg(long)]
        back: PathBuf,
        /// Player id to register under (default: random UUID)
        #[arg(long)]
        player_id: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Process {
            file,
            angle,
            max_dimension,
        } => {
            let mut options = config.pipeline_options();
            if let Some(max) = max_dimension {
                options.max_dimension = max;
            }
            let mut pipeline = PhotoPipeline::new(load_detector(&config), options);
            let result = tokio::task::spawn_blocking(move || pipeline.process(&file, angle)).await??;
            println!("{}", serde_json::to_string_pretty(&result.payload)?);
        }
        Commands::Shoot { file } => {
            let controller = ShotController::new(backend(&config)?);
            let pipeline = Arc::new(Mutex::new(build_pipeline(&config)));

            let frame = match CapturedFrame::stage_copy(&file, &config.capture_dir) {
                Ok(frame) => frame,
                Err(e) => {
                    controller.on_shot_failed(format!("Capture error: {e}"));
                    println!("{}", controller.snapshot().message());
                    return Ok(());
                }
            };

            match controller.fire(frame, &pipeline, Angle::Front).await {
                Some(outcome) => println!("{}", outcome.message),
                None => println!("Shot already in progress"),
            }
        }
        Commands::Register {
            front,
            left,
            right,
            back,
            player_id,
        } => {
            let controller = ShotController::new(backend(&config)?);
            let sources = [front, left, right, back];
            let capture_dir = config.capture_dir.clone();
            let pipeline = build_pipeline(&config);

            let registration =
                tokio::task::spawn_blocking(move || capture_all(&sources, &capture_dir, pipeline)).await??;
            let request = registration.into_request(player_id)?;
            let player_id = request.player_id.clone();

            let response = controller.submit_profile(request).await?;
            println!("Registered {player_id}: {}", response.message);
        }
        Commands::Config => {
            let summary = serde_json::json!({
                "backend_base_url": config.backend_base_url,
                "model_path": config.scrfd_model_path(),
                "max_dimension": config.max_dimension,
                "face_margin": config.face_margin,
                "jpeg_quality": config.jpeg_quality,
                "detect_soft_budget_ms": config.detect_soft_budget.map(|d| d.as_millis() as u64),
                "http_timeout_secs": config.http_timeout.map(|d| d.as_secs()),
                "capture_dir": config.capture_dir,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

fn backend(config: &Config) -> Result<HttpGameApi> {
    HttpGameApi::new(&config.backend_base_url, config.http_timeout)
        .with_context(|| format!("backend base URL {}", config.backend_base_url))
}

/// Load SCRFD, falling back to a detector that never finds a face.
fn load_detector(config: &Config) -> Box<dyn FaceDetector> {
    let model_path = config.scrfd_model_path();
    match ScrfdDetector::load(&model_path) {
        Ok(detector) => Box::new(detector),
        Err(e) => {
            tracing::warn!(path = %model_path.display(), error = %e, "face detection disabled");
            Box::new(UnavailableDetector::new(e.to_string()))
        }
    }
}

fn build_pipeline(config: &Config) -> Pipeline {
    PhotoPipeline::new(load_detector(config), config.pipeline_options())
}

fn capture_all(sources: &[PathBuf], capture_dir: &Path, mut pipeline: Pipeline) -> Result<Registration> {
    let mut registration = Registration::new();
    for source in sources {
        let frame = CapturedFrame::stage_copy(source, capture_dir)?;
        let angle = registration.capture(frame, &mut pipeline)?;
        println!("Captured {angle} from {}", source.display());
    }
    Ok(registration)
}

//! Upload client
//!
//! Walks a recorded video through the device capture flow and uploads it to
//! the ingestion server, printing the analysis result.

use anyhow::{bail, Context, Result};
use clap::Parser;
use formcheck::capture::{CaptureSession, CaptureState, PermissionSet};
use formcheck::config::ClientConfig;
use formcheck::HttpUploader;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "upload")]
#[command(about = "Upload a recorded exercise video for analysis", long_about = None)]
struct Cli {
    /// Recorded video file
    video: PathBuf,

    /// Ingestion server URL
    #[arg(long, env = "SERVER_URL")]
    server_url: Option<String>,

    /// Countdown seconds before the (simulated) recording starts
    #[arg(long)]
    countdown: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "formcheck=info,upload=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::from_env();
    let server_url = cli.server_url.unwrap_or(config.server_url);
    let countdown = cli.countdown.unwrap_or(config.countdown);

    if !cli.video.is_file() {
        bail!("{} is not a file", cli.video.display());
    }

    let mut session = CaptureSession::new(countdown);
    session.grant(PermissionSet::all())?;
    session.record()?;
    while let CaptureState::Countdown { remaining } = session.state() {
        eprintln!("{}...", remaining);
        tokio::time::sleep(Duration::from_secs(1)).await;
        session.tick()?;
    }
    session.stop(cli.video.clone())?;

    let uploader = HttpUploader::new(server_url);
    eprintln!("Uploading {} to {}", cli.video.display(), uploader.base_url());

    match session.upload(&uploader).await? {
        CaptureState::RemoteReview { result } => {
            let rendered =
                serde_json::to_string_pretty(result).context("Failed to render result")?;
            println!("{}", rendered);
            Ok(())
        }
        CaptureState::LocalReview {
            alert: Some(alert), ..
        } => bail!("{}", alert),
        other => bail!("Upload ended while {}", other.name()),
    }
}

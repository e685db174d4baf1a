//! Ingestion server
//!
//! Wires up:
//! - Filesystem artifact store and child-process worker (local adapters)
//! - Job pipeline and retention janitor
//! - HTTP inbound adapter

use anyhow::Context;
use formcheck::adapters::local::{create_router, FsArtifactStore, ProcessWorker};
use formcheck::application::{janitor, JobPipeline, JobTable, PipelineSettings};
use formcheck::config::ServerConfig;
use formcheck::ports::worker::WorkerTemplate;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "formcheck=debug,server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ingestion server...");

    // 1. Adapters
    let store = Arc::new(
        FsArtifactStore::new(&config.artifact_dir).with_context(|| {
            format!("Failed to prepare artifact directory {:?}", config.artifact_dir)
        })?,
    );
    let worker = ProcessWorker::new(config.worker_timeout, config.worker_output_limit);
    let worker_dir = std::fs::canonicalize(&config.worker_dir)
        .with_context(|| format!("Worker directory {:?} is not usable", config.worker_dir))?;
    let template = WorkerTemplate::new(
        config.worker_command.clone(),
        config.worker_args.clone(),
        worker_dir,
    );
    tracing::info!(
        root = ?store.root(),
        program = %template.program,
        args = ?template.args,
        cwd = ?template.cwd,
        "Artifact store and worker ready"
    );

    // 2. Application services
    let jobs = JobTable::new();
    let pipeline = Arc::new(JobPipeline::new(
        store.clone(),
        worker,
        template,
        jobs.clone(),
        PipelineSettings::from(&config),
    ));
    let _janitor = janitor::start(jobs, store.clone(), config.cleanup, config.janitor_interval);

    // 3. HTTP layer
    let app = create_router(pipeline, store.results_root(), &config);

    // 4. Start server
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .await
        .context("Server terminated unexpectedly")?;
    Ok(())
}

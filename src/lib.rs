//! Formcheck - exercise video analysis service
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (jobs, capture state machine, errors, wire types)
//! - ports/: Trait definitions (artifact storage, worker runner, uploader)
//! - adapters/: Concrete implementations (filesystem, child process, axum, reqwest)
//! - application/: Job pipeline, result correlation, retention
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

// Re-exports for convenience
pub use adapters::local::{FsArtifactStore, ProcessWorker};
pub use adapters::HttpUploader;
pub use application::{JobPipeline, JobTable};
pub use config::{ClientConfig, ServerConfig};
pub use domain::capture;

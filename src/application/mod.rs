//! Application layer - services built on the ports.

pub mod correlator;
pub mod janitor;
pub mod pipeline;
pub mod registry;

pub use correlator::ResultCorrelator;
pub use pipeline::{JobOutcome, JobPipeline, PipelineSettings, Upload};
pub use registry::JobTable;

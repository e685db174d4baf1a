//! Local adapters: filesystem artifacts, child-process workers, HTTP.

pub mod fs;
pub mod http;
pub mod process;

pub use fs::FsArtifactStore;
pub use http::create_router;
pub use process::ProcessWorker;

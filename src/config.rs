//! Configuration for the server and the device client.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// What happens to a succeeded job's artifacts once its result is produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanupPolicy {
    /// Purge right away. The processed video URL will not resolve afterwards.
    Immediate,
    /// Keep processed artifacts for the given window so the client can fetch them.
    Retain(Duration),
}

/// Configuration for the ingestion server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    /// Root of the artifact store (`uploads/` and `results/` live below it)
    pub artifact_dir: PathBuf,
    /// Largest accepted upload, in bytes
    pub max_upload_bytes: u64,
    /// Worker executable
    pub worker_command: String,
    /// Worker arguments; `{input}` and `{output}` are substituted per job
    pub worker_args: Vec<String>,
    /// Working directory of worker processes
    pub worker_dir: PathBuf,
    /// Hard limit on one worker run
    pub worker_timeout: Duration,
    /// Per-stream cap on captured worker output, in bytes
    pub worker_output_limit: usize,
    /// Number of worker processes allowed to run at once
    pub max_concurrent_jobs: usize,
    /// How long a request may wait for a free worker slot
    pub queue_timeout: Duration,
    pub cleanup: CleanupPolicy,
    /// Period of the retention sweep
    pub janitor_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: String::from("127.0.0.1"),
            port: String::from("3000"),
            artifact_dir: PathBuf::from("./artifacts"),
            max_upload_bytes: 100 * 1024 * 1024,
            worker_command: String::from("python"),
            worker_args: split_args("src/main.py {input} {output}"),
            worker_dir: PathBuf::from("."),
            worker_timeout: Duration::from_secs(300),
            worker_output_limit: 1024 * 1024,
            max_concurrent_jobs: 2,
            queue_timeout: Duration::from_secs(30),
            cleanup: CleanupPolicy::Retain(Duration::from_secs(3600)),
            janitor_interval: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let retention_secs: u64 = parse_var("RETENTION_SECS", 3600);
        let cleanup = if retention_secs == 0 {
            CleanupPolicy::Immediate
        } else {
            CleanupPolicy::Retain(Duration::from_secs(retention_secs))
        };

        Self {
            addr: env::var("ADDR").unwrap_or(defaults.addr),
            port: env::var("PORT").unwrap_or(defaults.port),
            artifact_dir: env::var("ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifact_dir),
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            worker_command: env::var("WORKER_COMMAND").unwrap_or(defaults.worker_command),
            worker_args: env::var("WORKER_ARGS")
                .map(|raw| split_args(&raw))
                .unwrap_or(defaults.worker_args),
            worker_dir: env::var("WORKER_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.worker_dir),
            worker_timeout: Duration::from_secs(parse_var("WORKER_TIMEOUT_SECS", 300)),
            worker_output_limit: parse_var("WORKER_OUTPUT_LIMIT", defaults.worker_output_limit),
            max_concurrent_jobs: parse_var("MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)
                .max(1),
            queue_timeout: Duration::from_secs(parse_var("QUEUE_TIMEOUT_SECS", 30)),
            cleanup,
            janitor_interval: Duration::from_secs(parse_var("JANITOR_INTERVAL_SECS", 60).max(1)),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

/// Configuration for the device-side upload client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the ingestion server, e.g. `http://192.168.1.67:3000`
    pub server_url: String,
    /// Countdown ticks before recording
    pub countdown: u32,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            server_url: env::var("SERVER_URL")
                .unwrap_or_else(|_| String::from("http://127.0.0.1:3000")),
            countdown: parse_var("COUNTDOWN", crate::domain::capture::DEFAULT_COUNTDOWN),
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(String::from).collect()
}

use crate::domain::errors::WorkerError;
use crate::domain::jobs::JobId;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// A fully resolved worker invocation for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub job_id: JobId,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

/// Captured text of one stream, bounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub text: String,
    pub truncated: bool,
}

/// A finished external process run. Only ever built once the process has exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExecution {
    pub command: String,
    pub arguments: Vec<String>,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
    pub exit_code: Option<i32>,
}

impl WorkerExecution {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs the external analysis process.
///
/// Returns `Ok` only for an exit code of 0; every other termination maps to
/// a [`WorkerError`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkerRunner: Send + Sync {
    async fn run(&self, command: WorkerCommand) -> Result<WorkerExecution, WorkerError>;
}

/// Program and argument template, turned into a [`WorkerCommand`] per job.
///
/// `{input}` and `{output}` in the arguments are replaced with the job's
/// input file and output directory. A placeholder that does not appear is
/// appended instead, input first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTemplate {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory shared by all runs. Should be absolute.
    pub cwd: PathBuf,
}

impl WorkerTemplate {
    pub const INPUT: &'static str = "{input}";
    pub const OUTPUT: &'static str = "{output}";

    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: cwd.into(),
        }
    }

    pub fn command(&self, job_id: JobId, input: &Path, output: &Path) -> WorkerCommand {
        let input = input.to_string_lossy();
        let output_str = output.to_string_lossy();

        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace(Self::INPUT, &input)
                    .replace(Self::OUTPUT, &output_str)
            })
            .collect();
        if !self.args.iter().any(|arg| arg.contains(Self::INPUT)) {
            args.push(input.to_string());
        }
        if !self.args.iter().any(|arg| arg.contains(Self::OUTPUT)) {
            args.push(output_str.to_string());
        }

        WorkerCommand {
            job_id,
            program: self.program.clone(),
            args,
            cwd: self.cwd.clone(),
        }
    }
}

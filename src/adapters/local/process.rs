use crate::domain::errors::WorkerError;
use crate::domain::jobs::JobId;
use crate::ports::worker::{CapturedOutput, WorkerCommand, WorkerExecution, WorkerRunner};
use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long to wait for the output pipes to close once the process is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

const CHUNK_SIZE: usize = 8 * 1024;

/// Runs the analysis worker as a child process of the server.
///
/// The worker leads its own process group. The whole group is killed once the
/// worker exits or times out, and when the returned future is dropped, so a
/// request that goes away takes the worker and anything it spawned with it.
#[derive(Clone, Debug)]
pub struct ProcessWorker {
    timeout: Duration,
    output_limit: usize,
}

impl ProcessWorker {
    pub fn new(timeout: Duration, output_limit: usize) -> Self {
        Self {
            timeout,
            output_limit,
        }
    }
}

/// The worker's process group. Killed at the latest when dropped.
struct ProcessGroup {
    pgid: Option<i32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self {
            pgid: child.id().and_then(|pid| i32::try_from(pid).ok()),
        }
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        if let Err(e) = kill_group(pgid) {
            warn!(pgid, "Failed to kill worker process group: {}", e);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: i32) -> io::Result<()> {
    // SAFETY: killpg takes no pointers; it only signals the group.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        // Everyone in the group is already gone.
        Some(libc::ESRCH) => Ok(()),
        _ => Err(err),
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: i32) -> io::Result<()> {
    Ok(())
}

impl CapturedOutput {
    fn capped(bytes: &[u8], truncated: bool, limit: usize) -> Self {
        let mut text = String::from_utf8_lossy(bytes).into_owned();
        // A character cut at the limit decodes to a wider replacement.
        while text.len() > limit {
            text.pop();
        }
        Self { text, truncated }
    }
}

fn collect<R>(
    mut reader: R,
    job_id: JobId,
    stream: &'static str,
    limit: usize,
) -> JoinHandle<CapturedOutput>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut kept = Vec::new();
        let mut truncated = false;
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            let read = match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) => {
                    warn!(%job_id, stream, "Failed reading worker output: {}", e);
                    break;
                }
            };
            let data = &chunk[..read];
            debug!(%job_id, stream, "{}", String::from_utf8_lossy(data).trim_end());

            // Past the limit the pipe is still read so the worker never blocks on it.
            let room = limit.saturating_sub(kept.len());
            if read > room {
                truncated = true;
            }
            kept.extend_from_slice(&data[..read.min(room)]);
        }
        CapturedOutput::capped(&kept, truncated, limit)
    })
}

async fn drain(handle: Option<JoinHandle<CapturedOutput>>) -> CapturedOutput {
    let Some(mut handle) = handle else {
        return CapturedOutput::default();
    };
    match tokio::time::timeout(DRAIN_GRACE, &mut handle).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("Worker output reader failed: {}", e);
            CapturedOutput::default()
        }
        Err(_) => {
            // Something outside the process group inherited the pipe.
            handle.abort();
            CapturedOutput::default()
        }
    }
}

#[async_trait]
impl WorkerRunner for ProcessWorker {
    async fn run(&self, command: WorkerCommand) -> Result<WorkerExecution, WorkerError> {
        let job_id = command.job_id;
        let spawned = {
            let mut process = Command::new(&command.program);
            process
                .args(&command.args)
                .current_dir(&command.cwd)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            #[cfg(unix)]
            process.process_group(0);
            process.spawn()
        };
        let mut child = spawned.map_err(|e| WorkerError::SpawnFailure {
            command: command.program.clone(),
            reason: e.to_string(),
        })?;
        let mut group = ProcessGroup::of(&child);

        info!(%job_id, pid = ?child.id(), program = %command.program, "Worker started");

        let stdout = child
            .stdout
            .take()
            .map(|out| collect(out, job_id, "stdout", self.output_limit));
        let stderr = child
            .stderr
            .take()
            .map(|err| collect(err, job_id, "stderr", self.output_limit));

        let waited = tokio::time::timeout(self.timeout, child.wait()).await;
        // Leftover group members would keep the pipes open.
        group.kill();

        let status = match waited {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(e)) => {
                warn!(%job_id, "Lost track of worker process: {}", e);
                Err(None)
            }
            Err(_) => {
                warn!(%job_id, timeout = ?self.timeout, "Worker timed out, killing it");
                Err(Some(self.timeout))
            }
        };
        if status.is_err() {
            if let Err(e) = child.kill().await {
                warn!(%job_id, "Failed to reap worker: {}", e);
            }
        }

        let (stdout, stderr) = tokio::join!(drain(stdout), drain(stderr));

        let status = match status {
            Ok(status) => status,
            Err(Some(after)) => {
                return Err(WorkerError::Timeout {
                    after,
                    stderr: stderr.text,
                })
            }
            Err(None) => {
                return Err(WorkerError::NonZeroExit {
                    code: None,
                    stderr: stderr.text,
                })
            }
        };

        let execution = WorkerExecution {
            command: command.program,
            arguments: command.args,
            stdout,
            stderr,
            exit_code: status.code(),
        };
        info!(%job_id, exit_code = ?execution.exit_code, "Worker finished");

        if execution.succeeded() {
            Ok(execution)
        } else {
            Err(WorkerError::NonZeroExit {
                code: execution.exit_code,
                stderr: execution.stderr.text,
            })
        }
    }
}

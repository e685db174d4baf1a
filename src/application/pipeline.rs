use super::correlator::ResultCorrelator;
use super::registry::JobTable;
use crate::config::{CleanupPolicy, ServerConfig};
use crate::domain::api::Origin;
use crate::domain::errors::{IngestionError, PipelineError};
use crate::domain::jobs::{AnalysisResult, Job, JobId, JobState};
use crate::ports::storage::{ArtifactStore, StoreError, UploadStream};
use crate::ports::worker::{WorkerRunner, WorkerTemplate};
use axum::body::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// An incoming video, not yet written anywhere.
pub struct Upload<'a> {
    pub file_name: String,
    pub body: UploadStream<'a>,
}

impl<'a> Upload<'a> {
    pub fn new<St, E>(file_name: impl Into<String>, body: St) -> Self
    where
        St: Stream<Item = Result<Bytes, E>> + Send + 'a,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            file_name: file_name.into(),
            body: body.map_err(|e| io::Error::new(io::ErrorKind::Other, e)).boxed(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub max_upload_bytes: u64,
    pub max_concurrent_jobs: usize,
    pub queue_timeout: Duration,
    pub cleanup: CleanupPolicy,
}

impl From<&ServerConfig> for PipelineSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_upload_bytes: config.max_upload_bytes,
            max_concurrent_jobs: config.max_concurrent_jobs,
            queue_timeout: config.queue_timeout,
            cleanup: config.cleanup,
        }
    }
}

/// A finished, successful job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub result: AnalysisResult,
    pub worker_output: String,
}

/// Drives one upload through storage, the worker and result correlation.
///
/// Each call to [`JobPipeline::submit`] owns exactly one job. At most
/// `max_concurrent_jobs` workers run at once; other jobs wait up to
/// `queue_timeout` for a slot and are then refused.
pub struct JobPipeline<S, W> {
    store: Arc<S>,
    worker: W,
    template: WorkerTemplate,
    jobs: JobTable,
    permits: Semaphore,
    settings: PipelineSettings,
}

impl<S, W> JobPipeline<S, W>
where
    S: ArtifactStore + 'static,
    W: WorkerRunner,
{
    pub fn new(
        store: Arc<S>,
        worker: W,
        template: WorkerTemplate,
        jobs: JobTable,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            worker,
            template,
            jobs,
            permits: Semaphore::new(settings.max_concurrent_jobs.max(1)),
            settings,
        }
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.jobs.get(id)
    }

    /// Process one upload end to end.
    ///
    /// If the returned future is dropped before completion the job is marked
    /// failed and its artifacts are purged in the background.
    pub async fn submit(
        &self,
        upload: Option<Upload<'_>>,
        origin: &Origin,
    ) -> Result<JobOutcome, PipelineError> {
        let Some(upload) = upload else {
            warn!("Request carried no video file");
            return Err(IngestionError::MissingFile.into());
        };

        let mut guard = JobGuard::start(self.jobs.clone(), self.store.clone());
        let job_id = guard.job.id;
        info!(%job_id, file_name = %upload.file_name, "Job created");

        let record = match self
            .store
            .store(
                job_id,
                &upload.file_name,
                upload.body,
                self.settings.max_upload_bytes,
            )
            .await
        {
            Ok(record) => record,
            Err(StoreError::Rejected(e)) => {
                warn!(%job_id, "Upload rejected: {}", e);
                return Err(guard.fail(e).await);
            }
            Err(StoreError::Io(e)) => {
                error!(%job_id, "Failed to store upload: {}", e);
                return Err(guard.fail(e).await);
            }
        };
        info!(%job_id, bytes = record.size_bytes, path = ?record.path, "Upload stored");
        guard.job.upload_path = Some(record.path.clone());
        self.jobs.replace(&guard.job);

        let output_dir = match self.store.resolve(job_id).await {
            Ok(dir) => dir,
            Err(e) => {
                error!(%job_id, "Failed to create output directory: {}", e);
                return Err(guard.fail(e).await);
            }
        };

        let permit =
            match tokio::time::timeout(self.settings.queue_timeout, self.permits.acquire()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) | Err(_) => {
                    warn!(%job_id, "No worker slot freed up in time");
                    return Err(guard.fail(PipelineError::Saturated).await);
                }
            };

        guard.advance(JobState::Running)?;
        let command = self.template.command(job_id, &record.path, &output_dir);
        let execution = self.worker.run(command).await;
        drop(permit);

        let execution = match execution {
            Ok(execution) => execution,
            Err(e) => {
                warn!(%job_id, "Worker failed: {}", e);
                return Err(guard.fail(e).await);
            }
        };

        let correlated = match ResultCorrelator::new(&*self.store)
            .correlate(job_id, &output_dir, origin)
            .await
        {
            Ok(correlated) => correlated,
            Err(e) => {
                warn!(%job_id, "Could not correlate worker output: {}", e);
                return Err(guard.fail(e).await);
            }
        };

        guard.advance(JobState::Succeeded)?;
        let result = AnalysisResult::for_job(&guard.job, correlated)?;
        guard.settle(self.settings.cleanup).await;
        info!(
            %job_id,
            frames = result.frames_processed,
            confidence = result.average_confidence,
            "Job succeeded"
        );

        Ok(JobOutcome {
            job_id,
            result,
            worker_output: execution.stdout.text,
        })
    }
}

/// Keeps the job table and the artifact store consistent with how a
/// submission ended, including when it never got to end.
struct JobGuard<S: ArtifactStore + 'static> {
    job: Job,
    jobs: JobTable,
    store: Arc<S>,
    settled: bool,
}

impl<S: ArtifactStore + 'static> JobGuard<S> {
    fn start(jobs: JobTable, store: Arc<S>) -> Self {
        let job = Job::new();
        jobs.insert(job.clone());
        Self {
            job,
            jobs,
            store,
            settled: false,
        }
    }

    fn advance(&mut self, next: JobState) -> Result<(), PipelineError> {
        self.job.transition(next)?;
        self.jobs.replace(&self.job);
        Ok(())
    }

    /// Mark the job failed, drop all of its artifacts and hand back the cause.
    async fn fail(&mut self, cause: impl Into<PipelineError>) -> PipelineError {
        if let Err(e) = self.advance(JobState::Failed) {
            warn!(job_id = %self.job.id, "{}", e);
        }
        if let Err(e) = self.store.purge(self.job.id).await {
            warn!(job_id = %self.job.id, "Failed to purge artifacts: {}", e);
        }
        self.settled = true;
        cause.into()
    }

    async fn settle(&mut self, cleanup: CleanupPolicy) {
        let job_id = self.job.id;
        let purged = match cleanup {
            CleanupPolicy::Immediate => self.store.purge(job_id).await,
            CleanupPolicy::Retain(_) => self.store.purge_upload(job_id).await,
        };
        if let Err(e) = purged {
            warn!(%job_id, "Failed to clean up after job: {}", e);
        }
        self.settled = true;
    }
}

impl<S: ArtifactStore + 'static> Drop for JobGuard<S> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let job_id = self.job.id;
        warn!(%job_id, state = %self.job.state, "Job abandoned before completion");
        if self.job.transition(JobState::Failed).is_ok() {
            self.jobs.replace(&self.job);
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = self.store.clone();
        runtime.spawn(async move {
            if let Err(e) = store.purge(job_id).await {
                warn!(%job_id, "Failed to purge abandoned job: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::fs::FsArtifactStore;
    use crate::domain::errors::{CorrelationError, WorkerError};
    use crate::ports::worker::{
        CapturedOutput, MockWorkerRunner, WorkerCommand, WorkerExecution,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use std::path::{Path, PathBuf};
    use tempfile::{tempdir, TempDir};

    const REPORT: &str =
        r#"{"framesProcessed":120,"averageConfidence":0.87,"processedVideoPath":"out.mp4"}"#;

    fn settings(max_concurrent_jobs: usize, cleanup: CleanupPolicy) -> PipelineSettings {
        PipelineSettings {
            max_upload_bytes: 1024,
            max_concurrent_jobs,
            queue_timeout: Duration::from_millis(50),
            cleanup,
        }
    }

    fn template() -> WorkerTemplate {
        WorkerTemplate::new("worker", vec!["{input}".into(), "{output}".into()], "/")
    }

    fn pipeline<W: WorkerRunner>(
        worker: W,
        settings: PipelineSettings,
    ) -> (TempDir, JobPipeline<FsArtifactStore, W>) {
        let temp_dir = tempdir().unwrap();
        let store = Arc::new(FsArtifactStore::new(temp_dir.path()).unwrap());
        let pipeline = JobPipeline::new(store, worker, template(), JobTable::new(), settings);
        (temp_dir, pipeline)
    }

    fn upload(content: impl Into<Bytes>) -> Option<Upload<'static>> {
        let chunks = vec![Ok::<_, io::Error>(content.into())];
        Some(Upload::new("squat.mp4", stream::iter(chunks)))
    }

    fn origin() -> Origin {
        Origin::new("http", "localhost:3000")
    }

    fn execution(command: &WorkerCommand) -> WorkerExecution {
        WorkerExecution {
            command: command.program.clone(),
            arguments: command.args.clone(),
            stdout: CapturedOutput {
                text: "Processing complete\n".to_string(),
                truncated: false,
            },
            stderr: CapturedOutput::default(),
            exit_code: Some(0),
        }
    }

    fn write_outputs(command: &WorkerCommand) {
        let out = Path::new(&command.args[1]);
        std::fs::write(out.join("out.mp4"), b"processed").unwrap();
        std::fs::write(out.join("result.json"), REPORT).unwrap();
    }

    fn only_job<W: WorkerRunner>(pipeline: &JobPipeline<FsArtifactStore, W>) -> Job {
        let jobs = pipeline.jobs().snapshot();
        assert_eq!(jobs.len(), 1);
        jobs.into_iter().next().unwrap()
    }

    fn job_dirs(root: &Path, job: JobId) -> (PathBuf, PathBuf) {
        (
            root.join("uploads").join(job.to_string()),
            root.join("results").join(job.to_string()),
        )
    }

    struct SlowWorker(Duration);

    #[async_trait]
    impl WorkerRunner for SlowWorker {
        async fn run(&self, command: WorkerCommand) -> Result<WorkerExecution, WorkerError> {
            tokio::time::sleep(self.0).await;
            write_outputs(&command);
            Ok(execution(&command))
        }
    }

    #[tokio::test]
    async fn test_successful_job() {
        let mut worker = MockWorkerRunner::new();
        worker.expect_run().times(1).returning(|command| {
            assert_eq!(command.program, "worker");
            assert!(command.args[0].ends_with("squat.mp4"));
            write_outputs(&command);
            Ok(execution(&command))
        });
        let (_tmp, pipeline) = pipeline(
            worker,
            settings(2, CleanupPolicy::Retain(Duration::from_secs(60))),
        );

        let outcome = pipeline.submit(upload("video bytes"), &origin()).await.unwrap();

        assert_eq!(outcome.result.frames_processed, 120);
        assert_eq!(outcome.result.average_confidence, 0.87);
        assert_eq!(
            outcome.result.processed_video_url,
            format!("http://localhost:3000/processed-videos/{}/out.mp4", outcome.job_id)
        );
        assert_eq!(outcome.worker_output, "Processing complete\n");

        let job = pipeline.job(outcome.job_id).unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert!(job.finished_at.is_some());

        let (uploads, results) = job_dirs(pipeline.store().root(), outcome.job_id);
        assert!(!uploads.exists());
        assert!(results.join("out.mp4").exists());
    }

    #[tokio::test]
    async fn test_immediate_cleanup_removes_outputs() {
        let mut worker = MockWorkerRunner::new();
        worker.expect_run().times(1).returning(|command| {
            write_outputs(&command);
            Ok(execution(&command))
        });
        let (_tmp, pipeline) = pipeline(worker, settings(2, CleanupPolicy::Immediate));

        let outcome = pipeline.submit(upload("video bytes"), &origin()).await.unwrap();

        let (uploads, results) = job_dirs(pipeline.store().root(), outcome.job_id);
        assert!(!uploads.exists());
        assert!(!results.exists());
    }

    #[tokio::test]
    async fn test_missing_file_never_reaches_worker() {
        let mut worker = MockWorkerRunner::new();
        worker.expect_run().times(0);
        let (_tmp, pipeline) = pipeline(worker, settings(2, CleanupPolicy::Immediate));

        let err = pipeline.submit(None, &origin()).await.unwrap_err();

        assert!(matches!(err, PipelineError::Ingestion(IngestionError::MissingFile)));
        assert!(pipeline.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_upload_fails_job_without_worker() {
        let mut worker = MockWorkerRunner::new();
        worker.expect_run().times(0);
        let (_tmp, pipeline) = pipeline(worker, settings(2, CleanupPolicy::Immediate));

        let err = pipeline.submit(upload(""), &origin()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Ingestion(IngestionError::EmptyFile)));

        let job = only_job(&pipeline);
        assert_eq!(job.state, JobState::Failed);
        let (uploads, _) = job_dirs(pipeline.store().root(), job.id);
        assert!(!uploads.exists());
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let mut worker = MockWorkerRunner::new();
        worker.expect_run().times(0);
        let (_tmp, pipeline) = pipeline(worker, settings(2, CleanupPolicy::Immediate));
        let err = pipeline
            .submit(upload("x".repeat(2048)), &origin())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Ingestion(IngestionError::TooLarge { limit: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_worker_failure_is_surfaced_and_cleaned_up() {
        let mut worker = MockWorkerRunner::new();
        worker.expect_run().times(1).returning(|_| {
            Err(WorkerError::NonZeroExit {
                code: Some(2),
                stderr: "decode failure".to_string(),
            })
        });
        let (_tmp, pipeline) = pipeline(
            worker,
            settings(2, CleanupPolicy::Retain(Duration::from_secs(60))),
        );

        let err = pipeline.submit(upload("video bytes"), &origin()).await.unwrap_err();
        match err {
            PipelineError::Worker(e) => {
                assert_eq!(e.exit_code(), Some(2));
                assert_eq!(e.stderr(), Some("decode failure"));
            }
            other => panic!("expected worker error, got {:?}", other),
        }

        let job = only_job(&pipeline);
        assert_eq!(job.state, JobState::Failed);
        let (uploads, results) = job_dirs(pipeline.store().root(), job.id);
        assert!(!uploads.exists());
        assert!(!results.exists());
    }

    #[tokio::test]
    async fn test_clean_exit_without_result_is_a_correlation_error() {
        let mut worker = MockWorkerRunner::new();
        worker
            .expect_run()
            .times(1)
            .returning(|command| Ok(execution(&command)));
        let (_tmp, pipeline) = pipeline(worker, settings(2, CleanupPolicy::Immediate));

        let err = pipeline.submit(upload("video bytes"), &origin()).await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Correlation(CorrelationError::MissingResult)
        ));
        assert_eq!(only_job(&pipeline).state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_saturated_pipeline_refuses_extra_jobs() {
        let (_tmp, pipeline) = pipeline(
            SlowWorker(Duration::from_millis(500)),
            settings(1, CleanupPolicy::Retain(Duration::from_secs(60))),
        );
        let pipeline = Arc::new(pipeline);

        let first = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.submit(upload("first"), &origin()).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = pipeline.submit(upload("second"), &origin()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Saturated));

        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome.result.frames_processed, 120);

        let jobs = pipeline.jobs().snapshot();
        assert_eq!(jobs.len(), 2);
        assert_eq!(
            jobs.iter().filter(|job| job.state == JobState::Failed).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_abandoned_job_is_failed_and_purged() {
        let (_tmp, pipeline) = pipeline(
            SlowWorker(Duration::from_secs(30)),
            settings(1, CleanupPolicy::Retain(Duration::from_secs(60))),
        );

        let abandoned = tokio::time::timeout(
            Duration::from_millis(200),
            pipeline.submit(upload("video bytes"), &origin()),
        )
        .await;
        assert!(abandoned.is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let job = only_job(&pipeline);
        assert_eq!(job.state, JobState::Failed);
        let (uploads, results) = job_dirs(pipeline.store().root(), job.id);
        assert!(!uploads.exists());
        assert!(!results.exists());
    }
}

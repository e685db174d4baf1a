use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use super::errors::InvalidTransition;

/// Identity of one processing request.
///
/// Always a random v4 UUID, so two submissions arriving at the same instant
/// still get distinct ids and therefore distinct artifact directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Created,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    fn can_move_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Created, JobState::Running)
                | (JobState::Created, JobState::Failed)
                | (JobState::Running, JobState::Succeeded)
                | (JobState::Running, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Created => "created",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One unit of work, from "video received" to "result or failure produced".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    #[serde(skip)]
    pub upload_path: Option<PathBuf>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new() -> Self {
        Self {
            id: JobId::new(),
            upload_path: None,
            state: JobState::Created,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Moves the job forward. Terminal states are final.
    pub fn transition(&mut self, next: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_move_to(next) {
            return Err(InvalidTransition {
                job_id: self.id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Upload,
    Processed,
}

/// A file tracked by the artifact store, always under a directory named after its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub job_id: JobId,
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Output of a successful worker run, after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedOutput {
    pub frames_processed: u64,
    pub average_confidence: f64,
    /// Path relative to the artifact root.
    pub processed_video_path: PathBuf,
    pub processed_video_url: String,
}

/// The outcome surfaced to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub frames_processed: u64,
    pub average_confidence: f64,
    pub processed_video_path: String,
    pub processed_video_url: String,
}

impl AnalysisResult {
    /// Builds the client-facing result. Only a succeeded job has one.
    pub fn for_job(job: &Job, output: CorrelatedOutput) -> Result<Self, InvalidTransition> {
        if job.state != JobState::Succeeded {
            return Err(InvalidTransition {
                job_id: job.id,
                from: job.state,
                to: JobState::Succeeded,
            });
        }
        Ok(Self {
            frames_processed: output.frames_processed,
            average_confidence: output.average_confidence,
            processed_video_path: output.processed_video_path.to_string_lossy().into_owned(),
            processed_video_url: output.processed_video_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> CorrelatedOutput {
        CorrelatedOutput {
            frames_processed: 12,
            average_confidence: 0.5,
            processed_video_path: PathBuf::from("results/x/out.mp4"),
            processed_video_url: "http://host/processed-videos/x/out.mp4".to_string(),
        }
    }

    #[test]
    fn test_job_ids_are_unique() {
        let ids: std::collections::HashSet<JobId> = (0..1000).map(|_| JobId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_job_id_parse_roundtrip() {
        let id = JobId::new();
        assert_eq!(JobId::parse(&id.to_string()), Some(id));
        assert_eq!(JobId::parse("../etc"), None);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = Job::new();
        assert_eq!(job.state, JobState::Created);
        job.transition(JobState::Running).unwrap();
        job.transition(JobState::Succeeded).unwrap();
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut job = Job::new();
        job.transition(JobState::Failed).unwrap();
        assert!(job.transition(JobState::Running).is_err());
        assert!(job.transition(JobState::Succeeded).is_err());
        assert_eq!(job.state, JobState::Failed);
    }

    #[test]
    fn test_created_cannot_skip_to_succeeded() {
        let mut job = Job::new();
        let err = job.transition(JobState::Succeeded).unwrap_err();
        assert_eq!(err.from, JobState::Created);
        assert_eq!(job.state, JobState::Created);
    }

    #[test]
    fn test_result_requires_succeeded_job() {
        let mut job = Job::new();
        job.transition(JobState::Running).unwrap();
        job.transition(JobState::Failed).unwrap();
        assert!(AnalysisResult::for_job(&job, output()).is_err());

        let mut job = Job::new();
        job.transition(JobState::Running).unwrap();
        job.transition(JobState::Succeeded).unwrap();
        let result = AnalysisResult::for_job(&job, output()).unwrap();
        assert_eq!(result.frames_processed, 12);
        assert_eq!(result.processed_video_path, "results/x/out.mp4");
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let mut job = Job::new();
        job.transition(JobState::Running).unwrap();
        job.transition(JobState::Succeeded).unwrap();
        let result = AnalysisResult::for_job(&job, output()).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["framesProcessed"], 12);
        assert_eq!(json["averageConfidence"], 0.5);
        assert!(json["processedVideoUrl"].as_str().unwrap().ends_with("out.mp4"));
    }
}

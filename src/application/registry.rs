#[cfg(test)]
use crate::domain::errors::InvalidTransition;
#[cfg(test)]
use crate::domain::jobs::JobState;
use crate::domain::jobs::{Job, JobId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory record of every job the server knows about.
///
/// Cloning is cheap and every clone sees the same table.
#[derive(Clone, Default)]
pub struct JobTable {
    jobs: Arc<Mutex<HashMap<JobId, Job>>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.insert(job.id, job);
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        let jobs = self.jobs.lock().unwrap();
        jobs.get(&id).cloned()
    }

    /// Apply a state change to the stored job. Unknown ids are ignored.
    #[cfg(test)]
    pub fn transition(&self, id: JobId, next: JobState) -> Result<(), InvalidTransition> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&id) {
            Some(job) => job.transition(next),
            None => Ok(()),
        }
    }

    pub fn replace(&self, job: &Job) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(stored) = jobs.get_mut(&job.id) {
            *stored = job.clone();
        }
    }

    pub fn snapshot(&self) -> Vec<Job> {
        let jobs = self.jobs.lock().unwrap();
        jobs.values().cloned().collect()
    }

    pub fn remove(&self, id: JobId) -> Option<Job> {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.remove(&id)
    }

    /// Ids of terminal jobs that finished more than `retention` before `now`.
    pub fn expired(&self, now: DateTime<Utc>, retention: Duration) -> Vec<JobId> {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let jobs = self.jobs.lock().unwrap();
        jobs.values()
            .filter(|job| job.state.is_terminal())
            .filter(|job| match job.finished_at {
                Some(finished) => now.signed_duration_since(finished) >= retention,
                None => false,
            })
            .map(|job| job.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let table = JobTable::new();
        let job = Job::new();
        let id = job.id;
        table.clone().insert(job);

        table.transition(id, JobState::Running).unwrap();
        assert_eq!(table.get(id).unwrap().state, JobState::Running);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_transition_rejects_leaving_terminal_state() {
        let table = JobTable::new();
        let job = Job::new();
        let id = job.id;
        table.insert(job);

        table.transition(id, JobState::Failed).unwrap();
        let err = table.transition(id, JobState::Running).unwrap_err();
        assert_eq!(err.from, JobState::Failed);
        assert_eq!(table.get(id).unwrap().state, JobState::Failed);
    }

    #[test]
    fn test_only_old_terminal_jobs_expire() {
        let table = JobTable::new();
        let running = Job::new();
        let finished = Job::new();
        let (running_id, finished_id) = (running.id, finished.id);
        table.insert(running);
        table.insert(finished);
        table.transition(running_id, JobState::Running).unwrap();
        table.transition(finished_id, JobState::Failed).unwrap();

        let later = Utc::now() + chrono::Duration::seconds(120);
        assert!(table.expired(Utc::now(), Duration::from_secs(60)).is_empty());
        assert_eq!(table.expired(later, Duration::from_secs(60)), vec![finished_id]);
    }
}

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;

use super::job::{Job, JobId, JobSnapshot, UploadRequest};
use crate::errors::{AppError, AppResult};

/// How long settled jobs stay available for lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionPolicy {
    pub max_completed: Option<usize>,
    pub ttl: Option<Duration>,
}

impl RetentionPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }
}

/// Jobs indexed by lifecycle stage
#[derive(Debug, Default)]
pub struct JobRegistry {
    pending: VecDeque<Job>,
    running: Vec<Job>,
    completed: VecDeque<Job>,
    retention: RetentionPolicy,
}

impl JobRegistry {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            retention,
            ..Self::default()
        }
    }

    pub fn push_pending(&mut self, job: Job) {
        self.pending.push_back(job);
    }

    /// Settle a job that never made it into the pending queue
    pub fn record_rejected(&mut self, mut job: Job, error: AppError) {
        job.settle(Err(error));
        self.push_completed(job);
    }

    /// Move the head of the pending queue into the running set
    pub fn start_next(&mut self) -> Option<(JobId, UploadRequest)> {
        let mut job = self.pending.pop_front()?;
        job.mark_running();
        let started = (job.id(), job.request().clone());
        self.running.push(job);
        Some(started)
    }

    /// Record the transport outcome for a running job
    pub fn settle(&mut self, id: JobId, result: AppResult<String>) -> Option<JobSnapshot> {
        let Some(index) = self.running.iter().position(|job| job.id() == id) else {
            log::warn!("Settlement for job {} arrived but it is not running", id);
            return None;
        };

        let mut job = self.running.remove(index);
        job.settle(result);
        let snapshot = job.snapshot();
        self.push_completed(job);
        Some(snapshot)
    }

    pub fn get(&self, id: JobId) -> Option<JobSnapshot> {
        self.pending
            .iter()
            .chain(self.running.iter())
            .chain(self.completed.iter())
            .find(|job| job.id() == id)
            .map(Job::snapshot)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    fn push_completed(&mut self, job: Job) {
        self.completed.push_back(job);
        self.evict(Utc::now());
    }

    /// Drop completed jobs beyond the size cap or older than the TTL
    pub fn evict(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.completed.len();

        if let Some(ttl) = self.retention.ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok()) {
            self.completed.retain(|job| match job.finished_at() {
                Some(finished) => now - finished < ttl,
                None => true,
            });
        }

        if let Some(max) = self.retention.max_completed {
            while self.completed.len() > max {
                self.completed.pop_front();
            }
        }

        let evicted = before - self.completed.len();
        if evicted > 0 {
            log::debug!("Evicted {} completed job(s) from the registry", evicted);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::job::JobStatus;
    use std::path::PathBuf;

    fn job(id: JobId) -> Job {
        let (job, _handle) = Job::new(
            id,
            UploadRequest {
                file_path: PathBuf::from(format!("/tmp/{}.png", id)),
                channel_id: "123456789012345678".to_string(),
                message: String::new(),
            },
        );
        job
    }

    #[test]
    fn test_lookup_follows_job_through_lifecycle() {
        let mut registry = JobRegistry::new(RetentionPolicy::unbounded());
        registry.push_pending(job(1));
        assert_eq!(registry.get(1).unwrap().status, JobStatus::Pending);

        let (id, request) = registry.start_next().unwrap();
        assert_eq!(id, 1);
        assert_eq!(request.file_path, PathBuf::from("/tmp/1.png"));
        assert_eq!(registry.get(1).unwrap().status, JobStatus::Running);
        assert_eq!(registry.running_len(), 1);

        registry.settle(1, Ok("https://cdn.example/1.png".to_string()));
        let snapshot = registry.get(1).unwrap();
        assert_eq!(snapshot.status, JobStatus::Done);
        assert_eq!(snapshot.url.as_deref(), Some("https://cdn.example/1.png"));
        assert_eq!(registry.running_len(), 0);
        assert_eq!(registry.completed_len(), 1);

        assert!(registry.get(2).is_none());
    }

    #[test]
    fn test_start_next_is_fifo() {
        let mut registry = JobRegistry::default();
        for id in 1..=3 {
            registry.push_pending(job(id));
        }

        let order: Vec<JobId> = std::iter::from_fn(|| registry.start_next().map(|(id, _)| id)).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(registry.start_next().is_none());
    }

    #[test]
    fn test_lookup_does_not_mutate() {
        let mut registry = JobRegistry::default();
        registry.push_pending(job(1));
        let _ = registry.get(1);
        let _ = registry.get(1);
        assert_eq!(registry.pending_len(), 1);
        assert_eq!(registry.get(1).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_rejected_job_goes_straight_to_completed() {
        let mut registry = JobRegistry::default();
        registry.record_rejected(job(4), AppError::file_not_found("/tmp/4.png"));

        let snapshot = registry.get(4).unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert!(snapshot.started_at.is_none());
        assert!(snapshot.url.is_none());
    }

    #[test]
    fn test_unknown_settlement_is_ignored() {
        let mut registry = JobRegistry::default();
        assert!(registry.settle(9, Ok("https://x".to_string())).is_none());
        assert_eq!(registry.completed_len(), 0);
    }

    #[test]
    fn test_size_cap_evicts_oldest() {
        let mut registry = JobRegistry::new(RetentionPolicy {
            max_completed: Some(2),
            ttl: None,
        });
        for id in 1..=3 {
            registry.record_rejected(job(id), AppError::NoUrlFound);
        }

        assert!(registry.get(1).is_none());
        assert!(registry.get(2).is_some());
        assert!(registry.get(3).is_some());
    }

    #[test]
    fn test_ttl_evicts_expired_jobs() {
        let mut registry = JobRegistry::new(RetentionPolicy {
            max_completed: None,
            ttl: Some(Duration::from_secs(60)),
        });
        registry.record_rejected(job(1), AppError::NoUrlFound);
        assert_eq!(registry.completed_len(), 1);

        let later = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(registry.evict(later), 1);
        assert!(registry.get(1).is_none());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_settled(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// What the transport needs to perform one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub file_path: PathBuf,
    pub channel_id: String,
    pub message: String,
}

/// Read-only view of a job handed out by lookups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub url: Option<String>,
    pub file_name: String,
    pub message: String,
    pub channel_id: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One file upload tracked from submission to settlement
#[derive(Debug)]
pub struct Job {
    id: JobId,
    request: UploadRequest,
    status: JobStatus,
    url: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    completion: Option<oneshot::Sender<AppResult<String>>>,
}

impl Job {
    /// Create a pending job together with the handle its submitter awaits
    pub fn new(id: JobId, request: UploadRequest) -> (Self, JobHandle) {
        let (sender, receiver) = oneshot::channel();
        let job = Self {
            id,
            request,
            status: JobStatus::Pending,
            url: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            completion: Some(sender),
        };
        (job, JobHandle { id, receiver })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn request(&self) -> &UploadRequest {
        &self.request
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn mark_running(&mut self) {
        if self.status != JobStatus::Pending {
            log::warn!(
                "Job {} cannot start from status {:?}; ignoring",
                self.id,
                self.status
            );
            return;
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Record the outcome and resolve the submitter's handle. A job settles once.
    pub fn settle(&mut self, result: AppResult<String>) {
        if self.status.is_settled() {
            log::warn!("Job {} already settled as {:?}", self.id, self.status);
            return;
        }

        match &result {
            Ok(url) => {
                self.status = JobStatus::Done;
                self.url = Some(url.clone());
            }
            Err(e) => {
                self.status = JobStatus::Failed;
                self.error = Some(e.to_string());
            }
        }
        self.finished_at = Some(Utc::now());

        if let Some(sender) = self.completion.take() {
            if sender.send(result).is_err() {
                log::debug!("Handle for job {} was dropped before settlement", self.id);
            }
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            status: self.status,
            url: self.url.clone(),
            file_name: InputValidator::upload_file_name(&self.request.file_path),
            message: self.request.message.clone(),
            channel_id: self.request.channel_id.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Resolves to the uploaded attachment URL once the job settles
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    receiver: oneshot::Receiver<AppResult<String>>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }
}

impl Future for JobHandle {
    type Output = AppResult<String>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(AppError::QueueClosed)))
    }
}

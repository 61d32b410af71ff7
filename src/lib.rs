//! Paced job queue for uploading files to Discord channels.
//!
//! Files are submitted to an [`UploadQueue`], which dispatches them in
//! submission order through the attachment-slot upload protocol and lets
//! callers look up each job's status by id.

pub mod config;
pub mod errors;
pub mod security;
pub mod uploader;

pub use config::UploaderConfig;
pub use errors::{AppError, AppResult};
pub use uploader::{JobHandle, JobId, JobSnapshot, JobStatus, QueueSettings, UploadQueue};

// Uploader module - queues files and pushes them to Discord one job at a time
//
// The queue owns pacing and job bookkeeping; the Discord client owns the wire protocol

pub mod discord_client;
pub mod job;
pub mod registry;
pub mod upload_queue;

pub use discord_client::{DiscordClient, UploadTransport};
pub use job::{JobHandle, JobId, JobSnapshot, JobStatus, UploadRequest};
pub use registry::RetentionPolicy;
pub use upload_queue::{QueueSettings, UploadQueue};

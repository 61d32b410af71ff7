use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::config::{validate_config, UploaderConfig};
use crate::errors::{safe_registry_read, safe_registry_update, AppError, AppResult, RegistryState};

use super::discord_client::{DiscordClient, UploadTransport};
use super::job::{Job, JobHandle, JobId, JobSnapshot, UploadRequest};
use super::registry::{JobRegistry, RetentionPolicy};

/// Pacing and retention knobs for one queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    /// Wait for each job to settle before starting the next
    pub wait_for_completion: bool,
    /// Pause between jobs; only honoured when waiting for completion
    pub inter_job_delay: Duration,
    pub retention: RetentionPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from(&UploaderConfig::default())
    }
}

impl From<&UploaderConfig> for QueueSettings {
    fn from(config: &UploaderConfig) -> Self {
        Self {
            wait_for_completion: config.wait_for_completion,
            inter_job_delay: config.inter_job_delay(),
            retention: RetentionPolicy {
                max_completed: config.max_completed_jobs,
                ttl: config.completed_job_ttl(),
            },
        }
    }
}

/// Single-lane FIFO upload queue.
///
/// A background worker owns dispatch: it sleeps while the queue is empty, is
/// woken by [`UploadQueue::submit`], and hands jobs to the transport in
/// submission order. With `wait_for_completion` set, at most one job runs at a
/// time and `inter_job_delay` separates consecutive jobs. Without it, the worker
/// starts every pending job at once and drives them all itself. Dropping the
/// queue stops the worker along with any in-flight uploads; handles of jobs
/// that never settled resolve to [`AppError::QueueClosed`].
///
/// Must be created inside a tokio runtime.
pub struct UploadQueue {
    registry: RegistryState,
    next_id: AtomicU64,
    wakeup: Arc<Notify>,
    worker: JoinHandle<()>,
}

impl UploadQueue {
    /// Build a queue that uploads through the Discord API
    pub fn new(config: &UploaderConfig) -> AppResult<Self> {
        validate_config(config)?;
        let client = DiscordClient::new(config)?;
        Ok(Self::with_transport(
            Arc::new(client),
            QueueSettings::from(config),
        ))
    }

    pub fn with_transport(transport: Arc<dyn UploadTransport>, settings: QueueSettings) -> Self {
        let registry: RegistryState = Arc::new(Mutex::new(JobRegistry::new(settings.retention)));
        let wakeup = Arc::new(Notify::new());

        log::info!(
            "Upload queue started (wait_for_completion: {}, inter_job_delay: {:?})",
            settings.wait_for_completion,
            settings.inter_job_delay
        );

        let worker = tokio::spawn(run_worker(
            registry.clone(),
            transport,
            settings,
            wakeup.clone(),
        ));

        Self {
            registry,
            next_id: AtomicU64::new(1),
            wakeup,
            worker,
        }
    }

    /// Queue a file for upload.
    ///
    /// The file is read here so an unreadable path fails immediately: the job
    /// still gets an id but goes straight to `failed` without ever running.
    pub fn submit(
        &self,
        file_path: impl AsRef<Path>,
        channel_id: &str,
        message: Option<&str>,
    ) -> (JobHandle, JobId) {
        let file_path = file_path.as_ref();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (job, handle) = Job::new(
            id,
            UploadRequest {
                file_path: file_path.to_path_buf(),
                channel_id: channel_id.to_string(),
                message: message.unwrap_or_default().to_string(),
            },
        );

        match std::fs::read(file_path) {
            Ok(bytes) => {
                log::info!(
                    "Queued job {} for {} ({} bytes) to channel {}",
                    id,
                    file_path.display(),
                    bytes.len(),
                    channel_id
                );
                safe_registry_update(&self.registry, "submit job", |registry| {
                    registry.push_pending(job)
                });
                self.wakeup.notify_one();
            }
            Err(e) => {
                log::error!("Failed to read {} for job {}: {}", file_path.display(), id, e);
                let error = AppError::from_read_error(&file_path.to_string_lossy(), e);
                safe_registry_update(&self.registry, "reject job", |registry| {
                    registry.record_rejected(job, error)
                });
            }
        }

        (handle, id)
    }

    /// Look up a job by id across pending, running and completed jobs
    pub fn get_job(&self, id: JobId) -> Option<JobSnapshot> {
        safe_registry_read(&self.registry, "get job", |registry| registry.get(id))
    }

    pub fn pending_count(&self) -> usize {
        safe_registry_read(&self.registry, "pending count", JobRegistry::pending_len)
    }

    pub fn running_count(&self) -> usize {
        safe_registry_read(&self.registry, "running count", JobRegistry::running_len)
    }

    pub fn completed_count(&self) -> usize {
        safe_registry_read(&self.registry, "completed count", JobRegistry::completed_len)
    }

    /// True when nothing is waiting or in flight
    pub fn is_idle(&self) -> bool {
        safe_registry_read(&self.registry, "idle check", |registry| {
            registry.pending_len() == 0 && registry.running_len() == 0
        })
    }
}

impl Drop for UploadQueue {
    fn drop(&mut self) {
        self.worker.abort();
        log::debug!("Upload queue worker stopped");
    }
}

async fn run_worker(
    registry: RegistryState,
    transport: Arc<dyn UploadTransport>,
    settings: QueueSettings,
    wakeup: Arc<Notify>,
) {
    // Unpaced uploads stay on this task so they start in dispatch order
    let mut in_flight: FuturesUnordered<BoxFuture<'static, ()>> = FuturesUnordered::new();
    let mut draining = false;

    loop {
        let next = safe_registry_update(&registry, "dequeue job", JobRegistry::start_next);

        let Some((id, request)) = next else {
            if in_flight.is_empty() {
                if draining {
                    log::info!("Upload queue drained");
                    draining = false;
                }
                wakeup.notified().await;
            } else {
                tokio::select! {
                    _ = wakeup.notified() => {}
                    Some(()) = in_flight.next() => {}
                }
            }
            continue;
        };
        draining = true;

        log::info!(
            "Dispatching job {} ({}) to channel {}",
            id,
            request.file_path.display(),
            request.channel_id
        );

        let dispatch = dispatch_job(registry.clone(), transport.clone(), id, request);

        if settings.wait_for_completion {
            dispatch.await;

            let more_pending = safe_registry_read(&registry, "pending check", |registry| {
                registry.pending_len() > 0
            });
            if more_pending && !settings.inter_job_delay.is_zero() {
                log::debug!("Waiting {:?} before next job", settings.inter_job_delay);
                sleep(settings.inter_job_delay).await;
            }
        } else {
            in_flight.push(Box::pin(dispatch));
        }
    }
}

async fn dispatch_job(
    registry: RegistryState,
    transport: Arc<dyn UploadTransport>,
    id: JobId,
    request: UploadRequest,
) {
    let result = transport.upload(&request).await;

    match &result {
        Ok(url) => log::info!("Job {} done: {}", id, url),
        Err(e) => log::warn!("Job {} failed: {}", id, e),
    }

    safe_registry_update(&registry, "settle job", |registry| registry.settle(id, result));
}

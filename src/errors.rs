use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::uploader::registry::JobRegistry;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No token set")]
    MissingCredential,

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Discord API error {status} during {step}: {body}")]
    Http {
        step: &'static str,
        status: u16,
        body: String,
    },

    #[error("Unexpected response during {step}: {reason}")]
    UnexpectedResponse { step: &'static str, reason: String },

    #[error("No URL found in message response")]
    NoUrlFound,

    #[error("Rate limit exceeded during {step}. Retry after {retry_after_ms}ms")]
    RateLimit {
        step: &'static str,
        retry_after_ms: u64,
    },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upload queue was shut down before the job settled")]
    QueueClosed,
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn file_not_found(path: &str) -> Self {
        Self::FileNotFound {
            path: path.to_string(),
        }
    }

    /// Map a failed file read, keeping the path when the file is simply missing
    pub fn from_read_error(path: &str, error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::NotFound {
            Self::file_not_found(path)
        } else {
            Self::Io(error)
        }
    }

    pub fn unexpected_response(step: &'static str, reason: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            step,
            reason: reason.into(),
        }
    }
}

/// Shared registry state type
pub type RegistryState = Arc<Mutex<JobRegistry>>;

fn lock_registry<'a>(registry: &'a RegistryState, operation: &str) -> MutexGuard<'a, JobRegistry> {
    match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::error!(
                "Job registry lock poisoned during {} (recovering): {}",
                operation,
                poisoned
            );
            poisoned.into_inner()
        }
    }
}

/// Safe registry update
pub fn safe_registry_update<F, R>(registry: &RegistryState, operation: &str, f: F) -> R
where
    F: FnOnce(&mut JobRegistry) -> R,
{
    let mut guard = lock_registry(registry, operation);
    f(&mut guard)
}

pub fn safe_registry_read<F, R>(registry: &RegistryState, operation: &str, f: F) -> R
where
    F: FnOnce(&JobRegistry) -> R,
{
    let guard = lock_registry(registry, operation);
    f(&guard)
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{AppError, AppResult};

/// Environment variable that overrides the stored credential
pub const CREDENTIAL_ENV_VAR: &str = "DISCORD_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    pub credential: Option<String>,
    pub wait_for_completion: bool,
    pub inter_job_delay_seconds: f64,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub step_delay_ms: u64,
    pub max_retry_attempts: u32,
    pub max_completed_jobs: Option<usize>,
    pub completed_job_ttl_secs: Option<u64>,
    pub log_level: String,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            credential: None,
            wait_for_completion: true,
            inter_job_delay_seconds: 1.0,
            api_base_url: "https://discord.com/api/v9".to_string(),
            request_timeout_secs: 120,
            step_delay_ms: 100,
            max_retry_attempts: 3,
            max_completed_jobs: Some(10_000),
            completed_job_ttl_secs: None,
            log_level: "info".to_string(),
        }
    }
}

impl UploaderConfig {
    pub fn inter_job_delay(&self) -> Duration {
        if self.inter_job_delay_seconds.is_finite() && self.inter_job_delay_seconds > 0.0 {
            Duration::from_secs_f64(self.inter_job_delay_seconds)
        } else {
            Duration::ZERO
        }
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn completed_job_ttl(&self) -> Option<Duration> {
        self.completed_job_ttl_secs.map(Duration::from_secs)
    }

    /// Replace the credential when an override is present and non-empty
    pub fn apply_credential_override(&mut self, credential: Option<String>) {
        if let Some(token) = credential.filter(|t| !t.trim().is_empty()) {
            self.credential = Some(token.trim().to_string());
        }
    }

    pub fn apply_env_overrides(&mut self) {
        let token = std::env::var(CREDENTIAL_ENV_VAR).ok();
        if token.is_some() {
            log::debug!("Using credential from {}", CREDENTIAL_ENV_VAR);
        }
        self.apply_credential_override(token);
    }
}

pub fn get_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join("discord-upload-queue");

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir.join("config.json"))
}

pub fn load_config() -> AppResult<UploaderConfig> {
    let mut config = load_config_from(&get_config_path()?)?;
    config.apply_env_overrides();
    validate_config(&config)?;
    Ok(config)
}

pub fn load_config_from(config_path: &Path) -> AppResult<UploaderConfig> {
    if config_path.exists() {
        let config_str = fs::read_to_string(config_path)?;
        let config: UploaderConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
            log::warn!("Failed to parse config file: {}. Using defaults.", e);
            UploaderConfig::default()
        });

        validate_config(&config)?;
        Ok(config)
    } else {
        let default_config = UploaderConfig::default();
        save_config_to(config_path, &default_config)?;
        Ok(default_config)
    }
}

pub fn save_config_to(config_path: &Path, config: &UploaderConfig) -> AppResult<()> {
    validate_config(config)?;

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Create backup of existing config
    if config_path.exists() {
        let backup_path = config_path.with_extension("json.bak");
        if let Err(e) = fs::copy(config_path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(config_path, config_str)?;

    log::info!("Configuration saved to {}", config_path.display());
    Ok(())
}

pub fn validate_config(config: &UploaderConfig) -> AppResult<()> {
    if let Some(credential) = &config.credential {
        if credential.trim().is_empty() {
            return Err(AppError::validation("credential", "Must not be empty when set"));
        }
    }

    if !config.inter_job_delay_seconds.is_finite() || config.inter_job_delay_seconds < 0.0 {
        return Err(AppError::validation(
            "inter_job_delay_seconds",
            "Must be a non-negative number",
        ));
    }

    if !(config.api_base_url.starts_with("https://") || config.api_base_url.starts_with("http://"))
    {
        return Err(AppError::validation("api_base_url", "Must be an http(s) URL"));
    }

    if config.request_timeout_secs == 0 {
        return Err(AppError::validation("request_timeout_secs", "Must be greater than 0"));
    }

    if config.step_delay_ms > 10_000 {
        return Err(AppError::validation("step_delay_ms", "Must be 10000ms or less"));
    }

    if config.max_retry_attempts > 10 {
        return Err(AppError::validation("max_retry_attempts", "Must be 10 or fewer"));
    }

    if config.max_completed_jobs == Some(0) {
        return Err(AppError::validation("max_completed_jobs", "Must be greater than 0"));
    }

    if config.completed_job_ttl_secs == Some(0) {
        return Err(AppError::validation("completed_job_ttl_secs", "Must be greater than 0"));
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}

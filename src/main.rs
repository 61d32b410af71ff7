use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use discord_upload_queue::config::{self, UploaderConfig};
use discord_upload_queue::security::InputValidator;
use discord_upload_queue::UploadQueue;

#[derive(Debug, Parser)]
#[command(name = "discord-upload-queue", version, about = "Upload files to Discord channels without tripping rate limits")]
struct Cli {
    /// Config file to use instead of the per-user default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Queue files for upload and wait for every job to settle
    Upload {
        /// Destination channel ID
        #[arg(long)]
        channel: String,

        /// Message text sent with each file
        #[arg(long)]
        message: Option<String>,

        /// Token to use (overrides config and DISCORD_TOKEN)
        #[arg(long)]
        token: Option<String>,

        /// Dispatch jobs back to back without waiting for each to finish
        #[arg(long)]
        no_wait: bool,

        /// Seconds to wait between jobs
        #[arg(long)]
        delay: Option<f64>,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Write the default config file and print its location
    InitConfig,
}

fn load(path: Option<&PathBuf>) -> anyhow::Result<UploaderConfig> {
    let config = match path {
        Some(path) => {
            let mut config = config::load_config_from(path)?;
            config.apply_env_overrides();
            config
        }
        None => config::load_config()?,
    };
    Ok(config)
}

/// Start logging at `info` so config loading is visible; `RUST_LOG` wins when set
fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Trace)
        .parse_default_env()
        .init();

    if std::env::var_os("RUST_LOG").is_none() {
        log::set_max_level(log::LevelFilter::Info);
    }
}

fn configured_level(config: &UploaderConfig) -> Option<log::LevelFilter> {
    config.log_level.parse::<log::LevelFilter>().ok()
}

/// Narrow or widen logging to the config's `log_level` once it is known
fn apply_log_level(config: &UploaderConfig) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    match configured_level(config) {
        Some(level) => log::set_max_level(level),
        None => log::warn!("Unknown log level '{}', staying at info", config.log_level),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();
    let mut config = load(cli.config.as_ref()).context("Failed to load configuration")?;
    apply_log_level(&config);

    match cli.command {
        Command::InitConfig => {
            let path = match cli.config {
                Some(path) => path,
                None => config::get_config_path()?,
            };
            config::save_config_to(&path, &config)?;
            println!("{}", path.display());
            Ok(())
        }
        Command::Upload {
            channel,
            message,
            token,
            no_wait,
            delay,
            files,
        } => {
            config.apply_credential_override(token);
            if no_wait {
                config.wait_for_completion = false;
            }
            if let Some(delay) = delay {
                config.inter_job_delay_seconds = delay;
            }
            config::validate_config(&config)?;
            InputValidator::validate_channel_id(&channel)?;

            log::info!("Starting upload of {} file(s) to channel {}", files.len(), channel);
            upload_files(&config, channel.trim(), message.as_deref(), files).await
        }
    }
}

async fn upload_files(
    config: &UploaderConfig,
    channel: &str,
    message: Option<&str>,
    files: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let queue = UploadQueue::new(config)?;

    let mut submitted = Vec::new();
    for file in &files {
        if let Err(e) = InputValidator::validate_file_path(&file.to_string_lossy()) {
            log::warn!("{} failed validation: {}", file.display(), e);
        }
        submitted.push(queue.submit(file, channel, message));
    }

    let mut failed = 0;
    for (handle, id) in submitted {
        if let Err(e) = handle.await {
            log::error!("Job {} failed: {}", id, e);
            failed += 1;
        }
        match queue.get_job(id) {
            Some(snapshot) => println!("{}", serde_json::to_string(&snapshot)?),
            None => log::warn!("Job {} was evicted before it could be reported", id),
        }
    }

    if failed > 0 {
        bail!("{} of {} upload(s) failed", failed, files.len());
    }
    log::info!("All {} upload(s) finished", files.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_level_parses_names() {
        let config = UploaderConfig {
            log_level: "debug".to_string(),
            ..UploaderConfig::default()
        };
        assert_eq!(configured_level(&config), Some(log::LevelFilter::Debug));

        let config = UploaderConfig {
            log_level: "WARN".to_string(),
            ..UploaderConfig::default()
        };
        assert_eq!(configured_level(&config), Some(log::LevelFilter::Warn));

        let config = UploaderConfig {
            log_level: "chatty".to_string(),
            ..UploaderConfig::default()
        };
        assert_eq!(configured_level(&config), None);
    }

    #[test]
    fn test_cli_parses_upload_flags() {
        let cli = Cli::try_parse_from([
            "discord-upload-queue",
            "upload",
            "--channel",
            "123456789012345678",
            "--no-wait",
            "a.png",
            "b.png",
        ])
        .unwrap();

        match cli.command {
            Command::Upload { no_wait, files, .. } => {
                assert!(no_wait);
                assert_eq!(files, vec![PathBuf::from("a.png"), PathBuf::from("b.png")]);
            }
            Command::InitConfig => panic!("expected upload"),
        }
    }
}

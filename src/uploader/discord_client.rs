use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::cmp::min;
use tokio::time::{sleep, Duration};

use super::job::UploadRequest;
use crate::config::UploaderConfig;
use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;

const STEP_CREATE_SLOT: &str = "create attachment slot";
const STEP_UPLOAD_BYTES: &str = "upload bytes";
const STEP_POST_MESSAGE: &str = "post message";

/// Performs one upload end to end and yields the attachment URL
#[async_trait]
pub trait UploadTransport: Send + Sync + 'static {
    async fn upload(&self, request: &UploadRequest) -> AppResult<String>;
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(120),
            exponential_base: 2.0,
        }
    }
}

/// Upload slot issued by Discord for a single file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AttachmentSlot {
    pub upload_url: String,
    pub upload_filename: String,
}

#[derive(Debug, Serialize)]
struct SlotRequest<'a> {
    files: Vec<SlotFile<'a>>,
}

#[derive(Debug, Serialize)]
struct SlotFile<'a> {
    filename: &'a str,
    file_size: u64,
    is_clip: bool,
}

#[derive(Debug, Deserialize)]
struct SlotResponse {
    #[serde(default)]
    attachments: Vec<AttachmentSlot>,
}

#[derive(Debug, Serialize)]
struct MessagePayload<'a> {
    content: &'a str,
    channel_id: &'a str,
    #[serde(rename = "type")]
    kind: u8,
    sticker_ids: Vec<String>,
    attachments: Vec<MessageAttachment<'a>>,
}

#[derive(Debug, Serialize)]
struct MessageAttachment<'a> {
    id: &'a str,
    filename: &'a str,
    uploaded_filename: &'a str,
}

/// Discord API client speaking the attachment-slot upload protocol
pub struct DiscordClient {
    client: Client,
    credential: Option<String>,
    api_base_url: String,
    step_delay: Duration,
    retry_config: RetryConfig,
}

impl DiscordClient {
    pub fn new(config: &UploaderConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            credential: config.credential.clone(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            step_delay: config.step_delay(),
            retry_config: RetryConfig {
                max_retries: config.max_retry_attempts,
                ..RetryConfig::default()
            },
        })
    }

    fn credential(&self) -> AppResult<&str> {
        self.credential.as_deref().ok_or(AppError::MissingCredential)
    }

    fn json_headers(&self, credential: &str) -> AppResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(credential)
                .map_err(|_| AppError::Config("Token contains invalid header characters".to_string()))?,
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Step 1: ask Discord for somewhere to put the bytes
    pub async fn create_attachment_slot(
        &self,
        channel_id: &str,
        file_name: &str,
        file_size: u64,
    ) -> AppResult<AttachmentSlot> {
        let body = SlotRequest {
            files: vec![SlotFile {
                filename: file_name,
                file_size,
                is_clip: false,
            }],
        };
        let url = format!("{}/channels/{}/attachments", self.api_base_url, channel_id);
        let response_text = self.send_json(STEP_CREATE_SLOT, &url, &body).await?;

        let response: SlotResponse = serde_json::from_str(&response_text)?;
        let slot = response.attachments.into_iter().next().ok_or_else(|| {
            AppError::unexpected_response(STEP_CREATE_SLOT, "response contained no attachment slots")
        })?;

        log::debug!(
            "Got upload slot for {} (server filename {})",
            file_name,
            slot.upload_filename
        );
        Ok(slot)
    }

    /// Step 2: PUT the raw file bytes to the slot
    pub async fn upload_bytes(&self, slot: &AttachmentSlot, bytes: Vec<u8>) -> AppResult<()> {
        let size = bytes.len();
        let response = self.client.put(&slot.upload_url).body(bytes).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Http {
                step: STEP_UPLOAD_BYTES,
                status: status.as_u16(),
                body,
            });
        }

        log::debug!("Uploaded {} bytes to slot {}", size, slot.upload_filename);
        Ok(())
    }

    /// Step 3: post a message referencing the uploaded file and return its URL
    pub async fn post_message(
        &self,
        channel_id: &str,
        message: &str,
        file_name: &str,
        slot: &AttachmentSlot,
    ) -> AppResult<String> {
        let payload = MessagePayload {
            content: message,
            channel_id,
            kind: 0,
            sticker_ids: Vec::new(),
            attachments: vec![MessageAttachment {
                id: "0",
                filename: file_name,
                uploaded_filename: &slot.upload_filename,
            }],
        };
        let url = format!("{}/channels/{}/messages", self.api_base_url, channel_id);
        let response_text = self.send_json(STEP_POST_MESSAGE, &url, &payload).await?;

        extract_attachment_url(&response_text)
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        step: &'static str,
        url: &str,
        body: &T,
    ) -> AppResult<String> {
        let headers = self.json_headers(self.credential()?)?;
        let body = serde_json::to_vec(body)?;
        let mut attempt = 0;

        loop {
            log::debug!("{}: POST {}", step, url);
            let response = self
                .client
                .post(url)
                .headers(headers.clone())
                .body(body.clone())
                .send()
                .await?;

            let status = response.status();
            let response_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            if status.is_success() {
                log::debug!(
                    "{} response (first 300 chars): {}",
                    step,
                    truncate(&response_text, 300)
                );
                return Ok(response_text);
            }

            if status.as_u16() != 429 {
                return Err(AppError::Http {
                    step,
                    status: status.as_u16(),
                    body: response_text,
                });
            }

            attempt += 1;
            let delay = extract_retry_after(&response_text, self.retry_config.max_delay)
                .unwrap_or_else(|| self.calculate_backoff_delay(attempt));

            if attempt > self.retry_config.max_retries {
                return Err(AppError::RateLimit {
                    step,
                    retry_after_ms: delay.as_millis() as u64,
                });
            }

            log::warn!(
                "Rate limited during {} (attempt {}), retrying in {:?}",
                step,
                attempt,
                delay
            );
            sleep(delay).await;
        }
    }

    fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.retry_config.base_delay.as_millis() as f64
            * self.retry_config.exponential_base.powi(attempt as i32 - 1);

        let delay = Duration::from_millis(delay_ms as u64);
        min(delay, self.retry_config.max_delay)
    }
}

#[async_trait]
impl UploadTransport for DiscordClient {
    async fn upload(&self, request: &UploadRequest) -> AppResult<String> {
        self.credential()?;

        let path_display = request.file_path.to_string_lossy().to_string();
        let bytes = tokio::fs::read(&request.file_path)
            .await
            .map_err(|e| AppError::from_read_error(&path_display, e))?;
        let file_name = InputValidator::upload_file_name(&request.file_path);

        let slot = self
            .create_attachment_slot(&request.channel_id, &file_name, bytes.len() as u64)
            .await?;

        sleep(self.step_delay).await;
        self.upload_bytes(&slot, bytes).await?;

        sleep(self.step_delay).await;
        self.post_message(&request.channel_id, &request.message, &file_name, &slot)
            .await
    }
}

/// Pull the first attachment URL out of a message response
pub fn extract_attachment_url(response_data: &str) -> AppResult<String> {
    let json: serde_json::Value = serde_json::from_str(response_data)?;

    let url = json
        .get("attachments")
        .and_then(|attachments| attachments.as_array())
        .and_then(|attachments| attachments.first())
        .and_then(|attachment| attachment.get("url"))
        .and_then(|url| url.as_str());

    match url {
        Some(url) => Ok(url.to_string()),
        None => {
            // Discord accepts the message but drops attachments it can't process
            log::error!(
                "No attachment URL in message response: {}",
                truncate(response_data, 300)
            );
            Err(AppError::NoUrlFound)
        }
    }
}

/// Server-provided wait from a 429 body, capped at `max_delay`
fn extract_retry_after(error_text: &str, max_delay: Duration) -> Option<Duration> {
    let seconds = serde_json::from_str::<serde_json::Value>(error_text)
        .ok()?
        .get("retry_after")?
        .as_f64()
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)?;

    let delay = Duration::try_from_secs_f64(seconds).unwrap_or(max_delay);
    Some(min(delay, max_delay))
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_attachment_url() {
        let body = r#"{"id":"1","attachments":[{"id":"9","url":"https://cdn.discordapp.com/a/b.png"}]}"#;
        assert_eq!(
            extract_attachment_url(body).unwrap(),
            "https://cdn.discordapp.com/a/b.png"
        );
    }

    #[test]
    fn test_extract_attachment_url_missing() {
        assert!(matches!(
            extract_attachment_url(r#"{"id":"1","attachments":[]}"#),
            Err(AppError::NoUrlFound)
        ));
        assert!(matches!(
            extract_attachment_url(r#"{"id":"1"}"#),
            Err(AppError::NoUrlFound)
        ));
        assert!(matches!(
            extract_attachment_url(r#"{"attachments":[{"id":"0"}]}"#),
            Err(AppError::NoUrlFound)
        ));
        assert!(matches!(
            extract_attachment_url("<html>"),
            Err(AppError::Json(_))
        ));
    }

    #[test]
    fn test_extract_retry_after() {
        assert_eq!(
            extract_retry_after(
                r#"{"message":"You are being rate limited.","retry_after":0.25,"global":false}"#,
                Duration::from_secs(120)
            ),
            Some(Duration::from_millis(250))
        );
        assert_eq!(extract_retry_after("not json", Duration::from_secs(120)), None);
        assert_eq!(
            extract_retry_after(r#"{"retry_after":-1}"#, Duration::from_secs(120)),
            None
        );
    }

    #[test]
    fn test_extract_retry_after_caps_huge_values() {
        let max = Duration::from_secs(120);
        assert_eq!(extract_retry_after(r#"{"retry_after":1e20}"#, max), Some(max));
        assert_eq!(extract_retry_after(r#"{"retry_after":500}"#, max), Some(max));
    }

    #[test]
    fn test_backoff_is_capped() {
        let client = DiscordClient::new(&UploaderConfig::default()).unwrap();
        assert_eq!(client.calculate_backoff_delay(1), Duration::from_secs(1));
        assert_eq!(client.calculate_backoff_delay(3), Duration::from_secs(4));
        assert_eq!(client.calculate_backoff_delay(20), Duration::from_secs(120));
    }

    #[test]
    fn test_message_payload_shape() {
        let slot = AttachmentSlot {
            upload_url: "https://upload.example/slot".to_string(),
            upload_filename: "server/cat.png".to_string(),
        };
        let payload = MessagePayload {
            content: "hi",
            channel_id: "123",
            kind: 0,
            sticker_ids: Vec::new(),
            attachments: vec![MessageAttachment {
                id: "0",
                filename: "cat.png",
                uploaded_filename: &slot.upload_filename,
            }],
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "content": "hi",
                "channel_id": "123",
                "type": 0,
                "sticker_ids": [],
                "attachments": [{"id": "0", "filename": "cat.png", "uploaded_filename": "server/cat.png"}]
            })
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 300), "hi");
    }
}

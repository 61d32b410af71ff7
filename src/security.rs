use crate::errors::{AppError, AppResult};
use regex::Regex;
use std::path::Path;

pub struct InputValidator;

impl InputValidator {
    pub fn validate_channel_id(channel_id: &str) -> AppResult<()> {
        let trimmed = channel_id.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("channel_id", "Channel ID cannot be empty"));
        }

        // Discord snowflakes are 17-20 decimal digits
        let snowflake = Regex::new(r"^\d{17,20}$").unwrap();
        if !snowflake.is_match(trimmed) {
            return Err(AppError::validation(
                "channel_id",
                "Channel ID must be a numeric Discord snowflake",
            ));
        }

        Ok(())
    }

    pub fn validate_file_path(path: &str) -> AppResult<()> {
        if path.trim().is_empty() {
            return Err(AppError::validation("file_path", "File path cannot be empty"));
        }

        let path_obj = Path::new(path);

        if !path_obj.exists() {
            return Err(AppError::file_not_found(path));
        }

        if !path_obj.is_file() {
            return Err(AppError::validation("file_path", "Path is not a file"));
        }

        Ok(())
    }

    /// Name announced to Discord for an upload: the basename of the path, as is
    pub fn upload_file_name(path: &Path) -> String {
        path.file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_channel_id_validation() {
        assert!(InputValidator::validate_channel_id("123456789012345678").is_ok());
        assert!(InputValidator::validate_channel_id(" 12345678901234567890 ").is_ok());
        assert!(InputValidator::validate_channel_id("").is_err());
        assert!(InputValidator::validate_channel_id("1234").is_err());
        assert!(InputValidator::validate_channel_id("12345678901234567a").is_err());
    }

    #[test]
    fn test_validate_file_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"data").unwrap();
        let path = file.path().to_string_lossy().to_string();

        assert!(InputValidator::validate_file_path(&path).is_ok());

        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().to_string_lossy().to_string();
        assert!(InputValidator::validate_file_path(&dir_path).is_err());

        assert!(matches!(
            InputValidator::validate_file_path("/definitely/not/here.png"),
            Err(AppError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_upload_file_name_uses_basename() {
        let name = InputValidator::upload_file_name(Path::new("/home/user/shots/photo 1.png"));
        assert_eq!(name, "photo 1.png");

        // Sent verbatim; Discord does its own normalisation
        let name = InputValidator::upload_file_name(Path::new("/tmp/weird<name>:v2.png"));
        assert_eq!(name, "weird<name>:v2.png");

        let name = InputValidator::upload_file_name(Path::new("  spaced .png"));
        assert_eq!(name, "  spaced .png");
    }
}

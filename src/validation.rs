//! Input validation for anything that becomes a path or a stored message field.

use std::path::{Path, PathBuf};

/// Longest sender/receiver name stored in a header.
pub const MAX_PARTICIPANT_NAME: usize = 36;

#[derive(Debug, PartialEq, Eq)]
pub enum SecurityError {
    /// The area name contains invalid characters, is too long or reserved
    InvalidAreaName { reason: String },

    /// A sender or receiver name cannot be stored
    InvalidParticipant { reason: String },

    /// Content is too long
    ContentTooLong { max_length: usize },

    /// Path contains invalid characters or attempts directory traversal
    InvalidPath,
}

impl std::fmt::Display for SecurityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityError::InvalidAreaName { reason } => write!(f, "Invalid area name: {}", reason),
            SecurityError::InvalidParticipant { reason } => write!(f, "Invalid name: {}", reason),
            SecurityError::ContentTooLong { max_length } => write!(f, "Content too long (max {} bytes)", max_length),
            SecurityError::InvalidPath => write!(f, "Invalid path or path traversal attempt"),
        }
    }
}

impl std::error::Error for SecurityError {}

/// Validate an area name for filesystem safety. Returns the lowercased name.
pub fn validate_area_name(area: &str) -> Result<String, SecurityError> {
    let trimmed = area.trim();

    if trimmed.is_empty() {
        return Err(SecurityError::InvalidAreaName {
            reason: "Area name cannot be empty".to_string(),
        });
    }

    if trimmed.len() > 50 {
        return Err(SecurityError::InvalidAreaName {
            reason: "Area name too long (max 50 characters)".to_string(),
        });
    }

    // Only allow alphanumeric, underscore, and hyphen
    if !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(SecurityError::InvalidAreaName {
            reason: "Area name must contain only letters, numbers, underscore, and hyphen".to_string(),
        });
    }

    let lower = trimmed.to_lowercase();
    if matches!(
        lower.as_str(),
        "con" | "prn" | "aux" | "nul"
            | "com1" | "com2" | "com3" | "com4" | "com5" | "com6" | "com7" | "com8" | "com9"
            | "lpt1" | "lpt2" | "lpt3" | "lpt4" | "lpt5" | "lpt6" | "lpt7" | "lpt8" | "lpt9"
            | "config" | "data" | "admin" | "backups"
    ) {
        return Err(SecurityError::InvalidAreaName {
            reason: "Area name is reserved".to_string(),
        });
    }

    Ok(lower)
}

/// Validate a sender or receiver name. Empty names are allowed (unaddressed echo mail).
pub fn validate_participant_name(name: &str) -> Result<(), SecurityError> {
    if name.len() > MAX_PARTICIPANT_NAME {
        return Err(SecurityError::InvalidParticipant {
            reason: format!("longer than {} bytes", MAX_PARTICIPANT_NAME),
        });
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(SecurityError::InvalidParticipant {
            reason: "contains control characters".to_string(),
        });
    }
    Ok(())
}

/// Sanitize message content (remove control characters, validate length).
/// Line breaks (`\r`, `\n`) and tabs are kept.
pub fn sanitize_message_content(content: &str, max_bytes: usize) -> Result<String, SecurityError> {
    if content.len() > max_bytes {
        return Err(SecurityError::ContentTooLong { max_length: max_bytes });
    }

    Ok(content
        .chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\r' || c == '\t')
        .collect())
}

/// Base path (without extension) of an area's message base.
pub fn secure_area_path(data_dir: &Path, area: &str) -> Result<PathBuf, SecurityError> {
    let validated = validate_area_name(area)?;

    let path = data_dir.join("messages").join(&validated);

    // Ensure the path is still within our data directory
    if !path.starts_with(data_dir) {
        return Err(SecurityError::InvalidPath);
    }

    Ok(path)
}

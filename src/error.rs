use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl SyncError {
    /// Truncate a response body to avoid logging excessive data.
    /// The cut lands on a char boundary so multi-byte bodies cannot panic.
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}... (truncated, {} total bytes)",
            &body[..end],
            body.len()
        )
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => SyncError::Unauthorized,
            403 => SyncError::AccessDenied(truncated),
            404 => SyncError::NotFound(truncated),
            429 => SyncError::RateLimited,
            500..=599 => SyncError::ServerError(truncated),
            _ => SyncError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }
}

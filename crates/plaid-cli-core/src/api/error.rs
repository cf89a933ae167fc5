use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Plaid error {code} ({status}): {message}")]
    Plaid {
        status: u16,
        error_type: String,
        code: String,
        message: String,
    },

    #[error("Unauthorized - check the Plaid client id and secret")]
    Unauthorized,

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Error body Plaid returns alongside non-2xx statuses.
#[derive(Debug, Deserialize)]
struct PlaidErrorBody {
    error_type: String,
    error_code: String,
    error_message: String,
    #[serde(default)]
    display_message: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        if let Ok(err) = serde_json::from_str::<PlaidErrorBody>(body) {
            if err.error_code == "RATE_LIMIT_EXCEEDED" || status.as_u16() == 429 {
                return ApiError::RateLimited;
            }
            return ApiError::Plaid {
                status: status.as_u16(),
                error_type: err.error_type,
                code: err.error_code,
                message: err.display_message.unwrap_or(err.error_message),
            };
        }

        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Plaid error code, if the provider returned one.
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Plaid { code, .. } => Some(code),
            _ => None,
        }
    }
}

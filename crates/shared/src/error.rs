use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Validation,
    RateLimited,
    Internal,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            404 | 406 => ErrorCode::NotFound,
            409 => ErrorCode::Conflict,
            429 => ErrorCode::RateLimited,
            400..=499 => ErrorCode::Validation,
            _ => ErrorCode::Internal,
        }
    }
}

/// Failure reported by the hosted backend, normalised across the row and storage APIs.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            backend_code: None,
            hint: None,
        }
    }

    pub fn from_response(status: u16, body: &str) -> Self {
        let code = ErrorCode::from_status(status);
        let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) else {
            let message = if body.trim().is_empty() {
                format!("http status {status}")
            } else {
                body.trim().to_string()
            };
            return Self::new(code, message);
        };

        let mut message = parsed
            .message
            .or(parsed.error)
            .unwrap_or_else(|| format!("http status {status}"));
        if let Some(details) = parsed.details.filter(|d| !d.is_empty()) {
            message = format!("{message} ({details})");
        }

        Self {
            code,
            message,
            backend_code: parsed.code.map(|value| match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
            hint: parsed.hint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_row_api_error_body() {
        let err = ApiError::from_response(
            409,
            r#"{"code":"23505","message":"duplicate key value","details":"Key (username) exists","hint":null}"#,
        );
        assert_eq!(err.code, ErrorCode::Conflict);
        assert_eq!(err.backend_code.as_deref(), Some("23505"));
        assert_eq!(err.message, "duplicate key value (Key (username) exists)");
    }

    #[test]
    fn decodes_storage_error_body_with_numeric_status() {
        let err = ApiError::from_response(
            400,
            r#"{"statusCode":"400","error":"Duplicate","message":"The resource already exists"}"#,
        );
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(err.message, "The resource already exists");
    }

    #[test]
    fn keeps_plain_text_bodies() {
        let err = ApiError::from_response(502, "bad gateway\n");
        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(err.message, "bad gateway");

        let empty = ApiError::from_response(503, "");
        assert_eq!(empty.message, "http status 503");
    }
}

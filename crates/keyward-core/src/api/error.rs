use serde::Deserialize;
use thiserror::Error;

use crate::auth::SessionError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Unexpected status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Service message for a login that needs a 2FA code.
const MISSING_2FA: &str = "Missing 2FA";

/// Service messages for a rejected login.
const BAD_LOGIN_MESSAGES: [&str; 2] = ["Bad login credentials", "Malformed parameters"];

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
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

    /// The `message` field of a JSON error body, else the truncated body.
    fn message_from_body(body: &str) -> String {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => parsed.message,
            Err(_) => Self::truncate_body(body.trim()),
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = Self::message_from_body(body);
        match status.as_u16() {
            400 => ApiError::BadRequest(message),
            401 => ApiError::Unauthorized(message),
            403 => ApiError::AccessDenied(message),
            404 => ApiError::NotFound(message),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(message),
            code => ApiError::UnexpectedStatus {
                status: code,
                message,
            },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::BadRequest(_) => Some(400),
            ApiError::Unauthorized(_) => Some(401),
            ApiError::AccessDenied(_) => Some(403),
            ApiError::NotFound(_) => Some(404),
            ApiError::RateLimited => Some(429),
            ApiError::ServerError(_) => Some(500),
            ApiError::UnexpectedStatus { status, .. } => Some(*status),
            ApiError::NetworkError(e) => e.status().map(|s| s.as_u16()),
            ApiError::InvalidResponse(_) => None,
        }
    }

    /// Message reported by the service, if it answered at all.
    pub fn service_message(&self) -> Option<&str> {
        match self {
            ApiError::BadRequest(m)
            | ApiError::Unauthorized(m)
            | ApiError::AccessDenied(m)
            | ApiError::NotFound(m)
            | ApiError::ServerError(m)
            | ApiError::UnexpectedStatus { message: m, .. } => Some(m),
            _ => None,
        }
    }

    fn is_transport(&self) -> bool {
        matches!(self, ApiError::NetworkError(_) | ApiError::InvalidResponse(_))
    }

    fn into_service_error(self) -> SessionError {
        let status = self.status().unwrap_or_default();
        let message = self
            .service_message()
            .map(str::to_string)
            .unwrap_or_else(|| self.to_string());
        SessionError::Service { status, message }
    }

    /// Classify a failed token authentication.
    pub fn into_token_error(self) -> SessionError {
        if self.is_transport() {
            return SessionError::transport(self);
        }
        match self {
            ApiError::Unauthorized(m) | ApiError::AccessDenied(m) => SessionError::Rejected(m),
            other => other.into_service_error(),
        }
    }

    /// Classify a failed username/password login.
    pub fn into_login_error(self) -> SessionError {
        if self.is_transport() {
            return SessionError::transport(self);
        }
        let message = self.service_message().unwrap_or_default().to_string();
        if message.contains(MISSING_2FA) {
            return SessionError::MissingSecondFactor;
        }
        let bad_login = BAD_LOGIN_MESSAGES.iter().any(|m| message.contains(m))
            || matches!(
                self,
                ApiError::BadRequest(_) | ApiError::Unauthorized(_) | ApiError::AccessDenied(_)
            );
        if bad_login {
            SessionError::BadCredentials(message)
        } else {
            self.into_service_error()
        }
    }

    /// Classify any other failed session request.
    pub fn into_session_error(self) -> SessionError {
        if self.is_transport() {
            SessionError::transport(self)
        } else {
            self.into_service_error()
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    #[test]
    fn test_from_status_reads_json_message() {
        let err =
            ApiError::from_status(StatusCode::UNAUTHORIZED, r#"{"message": "token expired"}"#);
        assert!(matches!(err, ApiError::Unauthorized(ref m) if m == "token expired"));
        assert_eq!(err.status(), Some(401));
    }

    #[test]
    fn test_from_status_plain_body() {
        let err = ApiError::from_status(StatusCode::BAD_GATEWAY, " upstream down \n");
        assert!(matches!(err, ApiError::ServerError(ref m) if m == "upstream down"));
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(MAX_ERROR_BODY_LENGTH + 10);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.contains("truncated, 510 total bytes"));

        // never split a multi-byte character
        let wide = "é".repeat(MAX_ERROR_BODY_LENGTH);
        assert!(ApiError::truncate_body(&wide).contains("truncated"));
    }

    #[test]
    fn test_token_classification() {
        let rejected = ApiError::Unauthorized("expired".to_string()).into_token_error();
        assert!(matches!(rejected, SessionError::Rejected(ref m) if m == "expired"));

        let server = ApiError::ServerError("boom".to_string()).into_token_error();
        assert!(matches!(server, SessionError::Service { status: 500, .. }));

        let invalid = ApiError::InvalidResponse("not json".to_string()).into_token_error();
        assert!(matches!(invalid, SessionError::Transport(_)));
    }

    #[test]
    fn test_login_classification() {
        let missing = ApiError::from_status(
            StatusCode::UNAUTHORIZED,
            r#"{"message": "Missing 2FA code"}"#,
        )
        .into_login_error();
        assert!(matches!(missing, SessionError::MissingSecondFactor));

        let bad = ApiError::from_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message": "Malformed parameters: username"}"#,
        )
        .into_login_error();
        assert!(matches!(bad, SessionError::BadCredentials(_)));

        let denied = ApiError::AccessDenied("locked".to_string()).into_login_error();
        assert!(matches!(denied, SessionError::BadCredentials(ref m) if m == "locked"));

        let limited = ApiError::RateLimited.into_login_error();
        assert!(matches!(limited, SessionError::Service { status: 429, .. }));
    }
}

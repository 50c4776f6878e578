use std::fmt;

/// Classified oracle failure: tells the caller *why* the completion call
/// failed so it can pick the right recovery strategy. Parse-shaped problems
/// are not errors at all; they surface as `ParseOutcome::Fallback`.
#[derive(Debug)]
pub struct OracleError {
    pub kind: OracleErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Seconds to wait before retrying (from a 429 Retry-After body field).
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleErrorKind {
    /// 401/403, bad API key or permissions.
    Auth,
    /// 429, rate limited; check retry_after_secs.
    RateLimit,
    /// 404 or "model not found", bad model name.
    NotFound,
    /// 408, request timeout, or the oracle took too long.
    Timeout,
    /// Connection refused, DNS failure, reset, etc.
    Network,
    /// 500/502/503/504, provider-side outage.
    ServerError,
    /// Anything else.
    Unknown,
}

impl OracleError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => OracleErrorKind::Auth,
            404 => OracleErrorKind::NotFound,
            408 => OracleErrorKind::Timeout,
            429 => OracleErrorKind::RateLimit,
            500 | 502 | 503 | 504 => OracleErrorKind::ServerError,
            _ => OracleErrorKind::Unknown,
        };

        let retry_after_secs = if kind == OracleErrorKind::RateLimit {
            extract_retry_after(body)
        } else {
            None
        };

        Self {
            kind,
            status: Some(status),
            message: truncate_body(body),
            retry_after_secs,
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            OracleErrorKind::Timeout
        } else {
            OracleErrorKind::Network
        };
        Self {
            kind,
            status: None,
            message: err.to_string(),
            retry_after_secs: None,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: OracleErrorKind::Unknown,
            status: None,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Whether this error is worth retrying (same request, same model).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            OracleErrorKind::RateLimit
                | OracleErrorKind::Timeout
                | OracleErrorKind::Network
                | OracleErrorKind::ServerError
        )
    }
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "oracle error ({}, {:?}): {}", status, self.kind, self.message)
        } else {
            write!(f, "oracle error ({:?}): {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for OracleError {}

/// Try to parse retry_after from a JSON response body.
/// Handles: {"error": {"retry_after": 5}} and {"retry_after": 5}
fn extract_retry_after(body: &str) -> Option<u64> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    v["error"]["retry_after"]
        .as_u64()
        .or_else(|| v["retry_after"].as_u64())
        .or_else(|| {
            v["error"]["retry_after"]
                .as_f64()
                .or_else(|| v["retry_after"].as_f64())
                .map(|f| f.ceil() as u64)
        })
}

fn truncate_body(body: &str) -> String {
    if body.len() > 300 {
        let cut = body
            .char_indices()
            .take_while(|(i, _)| *i < 300)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_statuses() {
        assert_eq!(OracleError::from_status(401, "").kind, OracleErrorKind::Auth);
        assert_eq!(OracleError::from_status(429, "").kind, OracleErrorKind::RateLimit);
        assert_eq!(OracleError::from_status(503, "").kind, OracleErrorKind::ServerError);
        assert_eq!(OracleError::from_status(418, "").kind, OracleErrorKind::Unknown);
    }

    #[test]
    fn rate_limit_extracts_retry_after() {
        let err = OracleError::from_status(429, r#"{"error": {"retry_after": 7}}"#);
        assert_eq!(err.retry_after_secs, Some(7));
        assert!(err.is_retryable());
    }

    #[test]
    fn auth_errors_are_not_retryable() {
        assert!(!OracleError::from_status(403, "forbidden").is_retryable());
    }
}

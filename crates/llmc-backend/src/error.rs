//! Backend error taxonomy.
//!
//! Categories drive three different reactions:
//! - retryable errors are retried with backoff by the middleware,
//! - escalating errors move the span to the next cascade tier,
//! - fatal errors are recorded and skipped.

use thiserror::Error;

/// Errors that can occur during backend generate calls.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    /// Request exceeded the per-request timeout
    #[error("backend request timed out")]
    Timeout,

    /// HTTP error status from the endpoint
    #[error("backend HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// Response body could not be parsed (including empty completions)
    #[error("backend response parse error: {0}")]
    Parse(String),

    /// Provider reports its quota is exhausted
    #[error("backend quota exhausted: {0}")]
    QuotaExhausted(String),

    /// A spend ceiling would be exceeded; checked before the call
    #[error("budget exceeded for '{backend}': spent ${spent_usd:.3} of ${cap_usd:.3} cap")]
    BudgetExceeded {
        backend: String,
        spent_usd: f64,
        cap_usd: f64,
    },

    /// Circuit breaker is open; the call was not issued
    #[error("circuit open for '{backend}', retry in {retry_in_secs}s")]
    CircuitOpen { backend: String, retry_in_secs: u64 },

    /// Cooperative cancellation; a successful abort, never a failure
    #[error("cancelled")]
    Cancelled,

    /// Connection-level failure (DNS, refused, reset)
    #[error("backend transport error: {0}")]
    Transport(String),
}

impl BackendError {
    /// Map an HTTP status and body to the right category.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = body.chars().take(300).collect::<String>();
        if status == 429 && looks_like_quota(&message) {
            return BackendError::QuotaExhausted(message);
        }
        BackendError::HttpStatus { status, message }
    }

    /// Retried with backoff under the same tier.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Timeout | BackendError::Transport(_) | BackendError::Parse(_) => true,
            BackendError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// Moves the span to the next cascade tier once retries are spent.
    pub fn escalates(&self) -> bool {
        matches!(
            self,
            BackendError::Parse(_)
                | BackendError::QuotaExhausted(_)
                | BackendError::BudgetExceeded { .. }
                | BackendError::CircuitOpen { .. }
        )
    }

    /// Recorded as a failure and skipped; never blocks the pipeline.
    pub fn is_fatal(&self) -> bool {
        match self {
            BackendError::HttpStatus { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            _ => false,
        }
    }

    /// Counts toward the circuit breaker's consecutive-failure window.
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            BackendError::Timeout
                | BackendError::Transport(_)
                | BackendError::HttpStatus { .. }
                | BackendError::QuotaExhausted(_)
        )
    }

    /// Short stable label for metrics and failure records.
    pub fn reason(&self) -> &'static str {
        match self {
            BackendError::Timeout => "timeout",
            BackendError::HttpStatus { status, .. } if *status >= 500 => "http_5xx",
            BackendError::HttpStatus { status, .. } if *status == 408 || *status == 429 => {
                "http_4xx_retryable"
            }
            BackendError::HttpStatus { .. } => "http_4xx_fatal",
            BackendError::Parse(_) => "parse_error",
            BackendError::QuotaExhausted(_) => "quota_exhausted",
            BackendError::BudgetExceeded { .. } => "budget_exceeded",
            BackendError::CircuitOpen { .. } => "circuit_open",
            BackendError::Cancelled => "cancelled",
            BackendError::Transport(_) => "transport",
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if let Some(status) = err.status() {
            BackendError::HttpStatus {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

fn looks_like_quota(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("quota") || lower.contains("billing") || lower.contains("credit")
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_categorization() {
        assert!(BackendError::from_status(500, "oops").is_retryable());
        assert!(BackendError::from_status(429, "slow down").is_retryable());
        assert!(BackendError::from_status(408, "timeout").is_retryable());
        assert!(!BackendError::from_status(400, "bad request").is_retryable());
        assert!(BackendError::from_status(400, "bad request").is_fatal());
        assert!(!BackendError::from_status(500, "oops").is_fatal());
    }

    #[test]
    fn test_quota_detection() {
        let err = BackendError::from_status(429, "monthly quota exceeded");
        assert!(matches!(err, BackendError::QuotaExhausted(_)));
        assert!(err.escalates());

        let err = BackendError::from_status(429, "rate limited, retry soon");
        assert!(matches!(err, BackendError::HttpStatus { .. }));
    }

    #[test]
    fn test_parse_retries_then_escalates() {
        let err = BackendError::Parse("empty completion".to_string());
        assert!(err.is_retryable());
        assert!(err.escalates());
    }

    #[test]
    fn test_cancelled_is_not_failure_shaped() {
        let err = BackendError::Cancelled;
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
        assert!(!err.trips_breaker());
    }

    #[test]
    fn test_reason_labels() {
        assert_eq!(BackendError::Timeout.reason(), "timeout");
        assert_eq!(BackendError::from_status(503, "x").reason(), "http_5xx");
        assert_eq!(BackendError::from_status(404, "x").reason(), "http_4xx_fatal");
    }
}

//! Unified Error Type System
//!
//! A single error type for the whole crate: one `ErrorKind` tag plus a uniform
//! payload (HTTP-like status, human detail, structured extensions).
//!
//! ## Error Kinds
//!
//! - **Auth**: Credentials rejected (fail fast)
//! - **RateLimit**: Upstream throttling (wait and retry)
//! - **NotFound**: Repository or resource missing
//! - **Api**: Generic upstream failure (retry on 5xx)
//! - **Crawler**: Repository crawl failed or matched nothing
//! - **Cache**: Cache save/load/clear failed
//! - **Generation**: A pipeline phase rejected model output
//! - **Validation**: A field failed validation
//! - **Network** / **Timeout**: Transport problems (retry with backoff)
//!
//! ## Design Principles
//!
//! - Kinds are data, not types: dispatch with `match err.kind`
//! - Retry decisions derive from the kind alone
//! - No panic/unwrap - all errors are propagated

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::constants::network as net_constants;

// =============================================================================
// Error Kinds
// =============================================================================

/// Which cache operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    Save,
    Load,
    Clear,
}

impl fmt::Display for CacheOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Save => write!(f, "save"),
            Self::Load => write!(f, "load"),
            Self::Clear => write!(f, "clear"),
        }
    }
}

/// Machine-readable error classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Authentication failed - fail fast, don't retry
    Auth,
    /// Rate limited - wait then retry
    RateLimit,
    /// Target does not exist
    NotFound,
    /// Generic upstream API failure
    Api,
    /// Repository crawl failed
    Crawler,
    /// Cache persistence failure
    Cache { op: CacheOp },
    /// Pipeline phase failure, optionally pinned to a chapter
    Generation {
        phase: String,
        chapter: Option<String>,
    },
    /// Field-level validation failure
    Validation { field: String },
    /// Connectivity issue - retry with backoff
    Network,
    /// Operation exceeded its deadline
    Timeout,
    /// Storage backend is out of space
    QuotaExceeded,
    /// Invalid configuration
    Config,
    /// Local I/O failure
    Io,
    /// Run aborted before completion
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth => write!(f, "AUTH"),
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::Api => write!(f, "API"),
            Self::Crawler => write!(f, "CRAWLER"),
            Self::Cache { op } => write!(f, "CACHE_{}", op.to_string().to_uppercase()),
            Self::Generation {
                phase,
                chapter: Some(chapter),
            } => write!(f, "GENERATION[{}/{}]", phase, chapter),
            Self::Generation { phase, .. } => write!(f, "GENERATION[{}]", phase),
            Self::Validation { field } => write!(f, "VALIDATION[{}]", field),
            Self::Network => write!(f, "NETWORK"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::QuotaExceeded => write!(f, "QUOTA_EXCEEDED"),
            Self::Config => write!(f, "CONFIG"),
            Self::Io => write!(f, "IO"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl ErrorKind {
    /// Default HTTP-like status for this kind
    pub fn default_status(&self) -> u16 {
        match self {
            Self::Auth => 401,
            Self::RateLimit => 429,
            Self::NotFound => 404,
            Self::Api => 502,
            Self::Crawler => 502,
            Self::Cache { .. } => 500,
            Self::Generation { .. } => 500,
            Self::Validation { .. } => 422,
            Self::Network => 503,
            Self::Timeout => 504,
            Self::QuotaExceeded => 507,
            Self::Config => 400,
            Self::Io => 500,
            Self::Cancelled => 499,
        }
    }
}

// =============================================================================
// Extensions
// =============================================================================

/// Optional structured context attached to an error
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorExtensions {
    /// What the user can do about it
    pub remediation: Option<String>,
    /// Suggested wait before retrying
    pub retry_after: Option<Duration>,
    /// Remaining requests in the current rate-limit window
    pub rate_limit_remaining: Option<u32>,
    /// When the rate-limit window resets
    pub rate_limit_reset: Option<DateTime<Utc>>,
    /// Upstream that produced the error
    pub provider: Option<String>,
    /// Offending field, preserved when a validation error is re-tagged
    pub field: Option<String>,
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Clone, Error)]
#[error("[{kind}] {detail}")]
pub struct TutorError {
    pub kind: ErrorKind,
    pub status: u16,
    pub detail: String,
    pub extensions: ErrorExtensions,
}

pub type Result<T> = std::result::Result<T, TutorError>;

impl TutorError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            status: kind.default_status(),
            kind,
            detail: detail.into(),
            extensions: ErrorExtensions::default(),
        }
    }

    pub fn auth(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, detail)
            .with_remediation("Check the configured API key or access token")
    }

    pub fn rate_limit(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, detail).with_retry_after(Duration::from_secs(
            net_constants::DEFAULT_RATE_LIMIT_WAIT_SECS,
        ))
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, detail)
    }

    pub fn api(status: u16, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Api, detail).with_status(status)
    }

    pub fn crawler(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Crawler, detail)
    }

    pub fn cache(op: CacheOp, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cache { op }, detail)
    }

    pub fn generation(
        phase: impl Into<String>,
        chapter: Option<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorKind::Generation {
                phase: phase.into(),
                chapter,
            },
            detail,
        )
    }

    pub fn validation(field: impl Into<String>, detail: impl Into<String>) -> Self {
        let field = field.into();
        let mut err = Self::new(ErrorKind::Validation { field: field.clone() }, detail);
        err.extensions.field = Some(field);
        err
    }

    pub fn network(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, detail).with_retry_after(Duration::from_secs(5))
    }

    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("{} timed out after {:?}", operation.into(), duration),
        )
    }

    pub fn quota_exceeded(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, detail)
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, detail)
    }

    pub fn io(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, detail)
    }

    pub fn cancelled(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, detail)
    }

    // -------------------------------------------------------------------------
    // Builders
    // -------------------------------------------------------------------------

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.extensions.remediation = Some(remediation.into());
        self
    }

    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.extensions.retry_after = Some(duration);
        self
    }

    pub fn with_rate_limit(mut self, remaining: Option<u32>, reset: Option<DateTime<Utc>>) -> Self {
        self.extensions.rate_limit_remaining = remaining;
        self.extensions.rate_limit_reset = reset;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.extensions.provider = Some(provider.into());
        self
    }

    /// Re-tag as a generation error for `phase`, keeping detail and extensions.
    ///
    /// Errors that already carry a transport/auth kind are passed through so
    /// callers can still make retry decisions on them.
    pub fn in_phase(self, phase: &str, chapter: Option<&str>) -> Self {
        match self.kind {
            ErrorKind::Validation { .. } | ErrorKind::Generation { .. } => Self {
                kind: ErrorKind::Generation {
                    phase: phase.to_string(),
                    chapter: chapter.map(String::from),
                },
                status: 500,
                detail: self.detail,
                extensions: self.extensions,
            },
            _ => self,
        }
    }

    // -------------------------------------------------------------------------
    // Predicates
    // -------------------------------------------------------------------------

    /// Rate-limit, network and timeout errors are retryable; so are 5xx API errors.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::RateLimit | ErrorKind::Network | ErrorKind::Timeout => true,
            ErrorKind::Api => self.status >= 500,
            _ => false,
        }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        self.kind == ErrorKind::QuotaExceeded
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Suggested wait before retrying, if the upstream or kind provides one
    pub fn recommended_delay(&self) -> Option<Duration> {
        self.extensions.retry_after
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<std::io::Error> for TutorError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            return Self::io(err.to_string()).with_status(404);
        }
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for TutorError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation("json", err.to_string())
    }
}

impl From<serde_yaml::Error> for TutorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::validation("yaml", err.to_string())
    }
}

impl From<rusqlite::Error> for TutorError {
    fn from(err: rusqlite::Error) -> Self {
        Self::io(format!("SQLite error: {}", err))
    }
}

impl From<reqwest::Error> for TutorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::new(ErrorKind::Timeout, err.to_string());
        }
        if err.is_connect() {
            return Self::network(err.to_string());
        }
        if let Some(status) = err.status() {
            return ErrorClassifier::classify_http_status(status.as_u16(), &err.to_string());
        }
        Self::network(err.to_string())
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Maps upstream signals (status codes, free-text messages) onto error kinds
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify HTTP status code directly (more accurate than string matching)
    pub fn classify_http_status(status: u16, message: &str) -> TutorError {
        match status {
            401 | 403 => TutorError::auth(message).with_status(status),
            404 => TutorError::not_found(message),
            408 => TutorError::new(ErrorKind::Timeout, message).with_status(408),
            429 => TutorError::rate_limit(message),
            400..=499 => TutorError::api(status, message),
            500..=599 => TutorError::api(status, message).with_retry_after(Duration::from_secs(5)),
            _ => TutorError::api(status, message),
        }
    }

    /// Classify an error message when no status code is available
    pub fn classify(message: &str) -> TutorError {
        let lower = message.to_lowercase();

        if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("too many requests")
            || lower.contains("quota exceeded")
        {
            return TutorError::rate_limit(message);
        }

        if lower.contains("401")
            || lower.contains("403")
            || lower.contains("unauthorized")
            || lower.contains("api key")
            || lower.contains("bad credentials")
            || lower.contains("permission denied")
        {
            return TutorError::auth(message);
        }

        if lower.contains("timed out") || lower.contains("timeout") {
            return TutorError::new(ErrorKind::Timeout, message);
        }

        if lower.contains("connection")
            || lower.contains("network")
            || lower.contains("dns")
            || lower.contains("unreachable")
        {
            return TutorError::network(message);
        }

        if lower.contains("not found") || lower.contains("404") {
            return TutorError::not_found(message);
        }

        if lower.contains("503")
            || lower.contains("502")
            || lower.contains("500")
            || lower.contains("overloaded")
            || lower.contains("service unavailable")
        {
            return TutorError::api(503, message);
        }

        // Unknown upstream failure: conservative retry
        TutorError::api(500, message)
    }
}

/// Context extension trait for adding context to foreign errors
pub trait ResultExt<T> {
    /// Wrap any error as an I/O error prefixed with `context`
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Wrap any error as a cache error for `op`
    fn cache_context<C: Into<String>>(self, op: CacheOp, context: C) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| TutorError::io(format!("{}: {}", context.into(), e)))
    }

    fn cache_context<C: Into<String>>(self, op: CacheOp, context: C) -> Result<T> {
        self.map_err(|e| TutorError::cache(op, format!("{}: {}", context.into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::RateLimit.to_string(), "RATE_LIMIT");
        assert_eq!(ErrorKind::Cache { op: CacheOp::Save }.to_string(), "CACHE_SAVE");
        assert_eq!(
            ErrorKind::Generation {
                phase: "WriteChapters".into(),
                chapter: Some("intro".into())
            }
            .to_string(),
            "GENERATION[WriteChapters/intro]"
        );
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(TutorError::rate_limit("slow down").is_retryable());
        assert!(TutorError::network("reset").is_retryable());
        assert!(TutorError::timeout("call", Duration::from_secs(1)).is_retryable());
        assert!(TutorError::api(503, "overloaded").is_retryable());

        assert!(!TutorError::auth("nope").is_retryable());
        assert!(!TutorError::not_found("gone").is_retryable());
        assert!(!TutorError::validation("file_indices", "bad").is_retryable());
        assert!(!TutorError::api(400, "bad request").is_retryable());
    }

    #[test]
    fn test_default_statuses() {
        assert_eq!(TutorError::auth("x").status, 401);
        assert_eq!(TutorError::rate_limit("x").status, 429);
        assert_eq!(TutorError::validation("f", "x").status, 422);
        assert_eq!(TutorError::cache(CacheOp::Load, "x").status, 500);
    }

    #[test]
    fn test_rate_limit_carries_retry_hint() {
        let err = TutorError::rate_limit("429").with_rate_limit(Some(0), None);
        assert!(err.recommended_delay().is_some());
        assert_eq!(err.extensions.rate_limit_remaining, Some(0));
    }

    #[test]
    fn test_in_phase_retags_validation() {
        let err = TutorError::validation("file_indices", "index 9 out of range")
            .in_phase("IdentifyAbstractions", None);
        assert_eq!(
            err.kind,
            ErrorKind::Generation {
                phase: "IdentifyAbstractions".into(),
                chapter: None
            }
        );
        assert_eq!(err.extensions.field.as_deref(), Some("file_indices"));
        assert!(err.detail.contains("out of range"));
    }

    #[test]
    fn test_in_phase_keeps_transport_errors() {
        let err = TutorError::network("reset").in_phase("OrderChapters", None);
        assert_eq!(err.kind, ErrorKind::Network);
    }

    #[test]
    fn test_classify_http_status() {
        assert_eq!(ErrorClassifier::classify_http_status(429, "x").kind, ErrorKind::RateLimit);
        assert_eq!(ErrorClassifier::classify_http_status(401, "x").kind, ErrorKind::Auth);
        assert_eq!(ErrorClassifier::classify_http_status(404, "x").kind, ErrorKind::NotFound);

        let server = ErrorClassifier::classify_http_status(500, "x");
        assert_eq!(server.kind, ErrorKind::Api);
        assert!(server.is_retryable());
    }

    #[test]
    fn test_classify_messages() {
        assert_eq!(ErrorClassifier::classify("Rate limit exceeded").kind, ErrorKind::RateLimit);
        assert_eq!(ErrorClassifier::classify("Invalid API key").kind, ErrorKind::Auth);
        assert_eq!(ErrorClassifier::classify("Connection refused").kind, ErrorKind::Network);
        assert_eq!(ErrorClassifier::classify("request timed out").kind, ErrorKind::Timeout);
        assert_eq!(ErrorClassifier::classify("something weird").kind, ErrorKind::Api);
    }

    #[test]
    fn test_display() {
        let err = TutorError::crawler("no files matched");
        assert_eq!(err.to_string(), "[CRAWLER] no files matched");
    }
}

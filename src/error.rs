//! Custom error types for scopus-miscite.
//!
//! All library functions return `Result<T, ScopusError>` instead of using `unwrap()`.
//! Per-identifier failures are logged by the stages and never abort a run;
//! these errors only surface for things a re-run cannot fix on its own.

use thiserror::Error;

/// Main error type for scopus-miscite operations.
#[derive(Debug, Error)]
pub enum ScopusError {
    /// Page rendering error (session renderer or external browser)
    #[error("Browser error: {0}")]
    Browser(String),

    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// HTML or JSON payload did not have the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Rate limited by the database
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// Database returned an unexpected HTTP status
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Error message
        message: String,
    },

    /// Login flow did not reach the authenticated landing page
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Session cookies were rejected (403 or bounced to the login page)
    #[error("Session is not authenticated")]
    Unauthenticated,

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Result list has more pages than the configured limit
    #[error("Result list for {query} exceeds {max_pages} pages")]
    Truncated {
        /// Query label
        query: String,
        /// Page limit in force
        max_pages: u32,
    },

    /// Input data violates a pipeline invariant
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias using `ScopusError`
pub type Result<T> = std::result::Result<T, ScopusError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| ScopusError::Parse(msg.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_or_parse() {
        let missing: Option<u32> = None;
        let err = missing.ok_or_parse("no title").expect_err("should fail");
        assert_eq!(err.to_string(), "Parse error: no title");
        assert_eq!(Some(3).ok_or_parse("unused").expect("present"), 3);
    }

    #[test]
    fn test_api_error_display() {
        let err = ScopusError::Api {
            code: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 500 - boom");
    }
}

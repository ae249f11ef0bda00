//! Error types for GitHub operations

use thiserror::Error;

/// Result type for GitHub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during GitHub operations
#[derive(Error, Debug)]
pub enum Error {
    /// GitHub API error
    #[error("GitHub API error: {0}")]
    Api(#[source] octocrab::Error),

    /// Raw HTTP error (diff downloads)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Authentication error
    #[error("GitHub authentication error: {0}")]
    Auth(String),

    /// git CLI failure
    #[error("git error: {0}")]
    Git(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Whether a GitHub response status means the credentials were rejected
///
/// GitHub also answers 403 when a rate limit is hit, which is transient.
pub(crate) fn is_auth_failure(status: u16, message: &str) -> bool {
    match status {
        401 => true,
        403 => !message.to_ascii_lowercase().contains("rate limit"),
        _ => false,
    }
}

impl From<octocrab::Error> for Error {
    fn from(err: octocrab::Error) -> Self {
        if let octocrab::Error::GitHub { source, .. } = &err {
            if is_auth_failure(source.status_code.as_u16(), &source.message) {
                return Error::Auth(format!(
                    "GitHub rejected the credentials ({}): {}",
                    source.status_code, source.message
                ));
            }
        }
        Error::Api(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<Error> for pullwise_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Auth(msg) => pullwise_core::Error::Unauthorized(msg),
            other => pullwise_core::Error::Vcs(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_statuses() {
        assert!(is_auth_failure(401, "Bad credentials"));
        assert!(is_auth_failure(403, "Resource not accessible by integration"));
        assert!(!is_auth_failure(403, "API rate limit exceeded for user"));
        assert!(!is_auth_failure(404, "Not Found"));
        assert!(!is_auth_failure(502, "Bad Gateway"));
    }

    #[test]
    fn test_auth_errors_are_not_retried() {
        let core: pullwise_core::Error = Error::Auth("Bad credentials".to_string()).into();
        assert!(matches!(core, pullwise_core::Error::Unauthorized(_)));
        assert!(!core.is_retryable());

        let core: pullwise_core::Error = Error::Git("connection reset".to_string()).into();
        assert!(matches!(core, pullwise_core::Error::Vcs(_)));
        assert!(core.is_retryable());
    }
}

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("No photos found for this location")]
    NoResults,

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    Parse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl RemoteError {
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

    /// Any non-success HTTP status is a transport failure.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        RemoteError::Transport(format!("Status {}: {}", status, Self::truncate_body(body)))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Parse(e.to_string())
        } else if e.is_timeout() {
            RemoteError::Transport(format!("request timed out: {}", e))
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_is_transport() {
        let err = RemoteError::from_status(reqwest::StatusCode::SERVICE_UNAVAILABLE, "down");
        assert_eq!(
            err,
            RemoteError::Transport("Status 503 Service Unavailable: down".to_string())
        );
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(2000);
        let RemoteError::Transport(msg) =
            RemoteError::from_status(reqwest::StatusCode::BAD_GATEWAY, &body)
        else {
            panic!("expected transport error");
        };
        assert!(msg.contains("truncated, 2000 total bytes"));
        assert!(msg.len() < 600);
    }
}

use std::fmt;

/// Errors that can occur while talking to an external provider
#[derive(Debug)]
pub enum ConnectorError {
    /// HTTP request/response error
    HttpError(String),
    /// Provider unreachable or timed out
    ServiceUnavailable(String),
    /// Response body did not have the expected shape, or the provider reported `success: false`
    InvalidResponse(String),
    /// Authentication error (401/403)
    Unauthorized(String),
    NotFound(String),
    RateLimited(String),
    Internal(String),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpError(msg) => write!(f, "HTTP error: {}", msg),
            Self::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            Self::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            Self::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::RateLimited(msg) => write!(f, "Rate limited: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ConnectorError {}

impl ConnectorError {
    /// Map a non-success HTTP status to the matching variant.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        use reqwest::StatusCode;

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized(body),
            StatusCode::NOT_FOUND => Self::NotFound(body),
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited(body),
            status if status.is_server_error() => {
                Self::ServiceUnavailable(format!("{}: {}", status, body))
            }
            status => Self::HttpError(format!("{}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::ServiceUnavailable(format!("Request timeout: {}", err))
        } else if err.is_connect() {
            Self::ServiceUnavailable(format!("Connection failed: {}", err))
        } else {
            Self::HttpError(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ConnectorError::from_status(StatusCode::FORBIDDEN, "no".into()),
            ConnectorError::Unauthorized(_)
        ));
        assert!(matches!(
            ConnectorError::from_status(StatusCode::BAD_GATEWAY, "down".into()),
            ConnectorError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            ConnectorError::from_status(StatusCode::BAD_REQUEST, "bad".into()),
            ConnectorError::HttpError(_)
        ));
    }
}

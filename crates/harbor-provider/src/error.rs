use harbor_security::SecurityError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Any non-success response, with the raw status and body.
    #[error("provider request failed with status {status}: {body}")]
    Http { status: u16, body: String },
    /// The delta cursor is no longer accepted; a full resync is required.
    #[error("sync cursor expired")]
    CursorExpired,
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("oauth error: {0}")]
    OAuth(#[from] SecurityError),
    #[error("mail parse error: {0}")]
    MailParse(#[from] mailparse::MailParseError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("data error: {0}")]
    Data(String),
    #[error("message build error: {0}")]
    Build(String),
    #[error("no adapter registered for {0}")]
    Unsupported(String),
}

impl ProviderError {
    /// Rate limits, timeouts and server-side failures; worth retrying on the next run.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::Request(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Http { status: 401, .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status: 404, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        let limited = ProviderError::Http {
            status: 429,
            body: String::new(),
        };
        let unauthorized = ProviderError::Http {
            status: 401,
            body: String::new(),
        };

        assert!(limited.is_transient());
        assert!(!unauthorized.is_transient());
        assert!(unauthorized.is_unauthorized());
        assert!(!ProviderError::CursorExpired.is_transient());
    }
}

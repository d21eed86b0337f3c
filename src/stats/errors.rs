//! Error types for the stats API client.

#[derive(Debug, thiserror::Error)]
pub enum StatsApiError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },
    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("Failed to parse response")]
    ParseFailed {
        status: u16,
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    RequestFailed(#[from] reqwest::Error),
}

impl StatsApiError {
    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// Timeouts, connection failures and 5xx responses are transient; a 4xx or a
    /// payload we cannot decode will come back the same way next time.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::ParseFailed { .. } => false,
            Self::RequestFailed(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        }
    }
}

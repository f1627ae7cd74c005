use std::time::Duration;

use time::Date;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No credential is stored for the session.
    #[error("Authentication required")]
    AuthRequired,

    /// OAuth client material is missing or unparseable.
    #[error("OAuth client misconfigured: {0}")]
    ClientMisconfigured(String),

    /// The refresh call was rejected; the session credential has been destroyed.
    #[error("Session expired: credential refresh failed: {0}")]
    RefreshFailed(String),

    /// A caller waited longer than the configured bound for an in-flight refresh.
    #[error("Timed out after {waited:?} waiting for credential refresh")]
    RefreshTimeout { waited: Duration },

    #[error("Invalid date range: {end} is before {start}")]
    InvalidRange { start: Date, end: Date },

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// Non-success response from the stats service or the token endpoint.
    #[error("Upstream {operation} failed (status {status:?}): {detail}")]
    Upstream {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },

    #[cfg(feature = "client")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Credential store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the caller must re-authenticate before retrying.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthRequired | Self::ClientMisconfigured(_) | Self::RefreshFailed(_)
        )
    }

    /// Upstream statuses that mean "no data for this day" rather than a failure.
    #[must_use]
    pub fn is_upstream_absent_status(status: u16) -> bool {
        matches!(status, 400 | 404)
    }

    pub(crate) fn store(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Store(e.to_string())
    }
}

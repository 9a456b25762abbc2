//! Error types for the portal client.

/// HTTP statuses the portal answers with once a login session has lapsed.
pub const SESSION_EXPIRED_STATUSES: [u16; 2] = [901, 910];

/// Returns true when `status` is one of the portal's session-expired codes.
pub fn is_session_expired(status: u16) -> bool {
    SESSION_EXPIRED_STATUSES.contains(&status)
}

#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("portal credential is missing or empty")]
    CredentialMissing,
    /// Degraded mode: the page lacked data and a documented default was substituted.
    #[error("portal page was missing expected parameters: {0}")]
    ParameterHarvestIncomplete(String),
    #[error("portal session is invalid or expired (HTTP {status})")]
    SessionExpired { status: u16 },
    #[error("portal request failed: {0}")]
    RequestFailed(String),
    #[error("portal response was not JSON (HTTP {status}): {snippet}")]
    ResponseNotJson { status: u16, snippet: String },
    #[error("Failed to parse response")]
    ParseFailed {
        status: u16,
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("portal rejected the selection (flag {flag}): {message}")]
    SelectionRejected { flag: String, message: String },
}

impl From<reqwest::Error> for PortalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PortalError::RequestFailed(format!("timed out: {err}"))
        } else {
            PortalError::RequestFailed(err.to_string())
        }
    }
}

/// Trim a response body down to something safe to put in a log line.
pub fn body_snippet(body: &str) -> String {
    const MAX_CHARS: usize = 200;
    let collapsed: String = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_CHARS {
        collapsed
    } else {
        let mut cut: String = collapsed.chars().take(MAX_CHARS).collect();
        cut.push_str("...");
        cut
    }
}

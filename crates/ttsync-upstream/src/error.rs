//! Upstream client errors.

use thiserror::Error;

/// Errors surfaced by the upstream timetable client.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// HTTP transport failure. Transient; the caller retries on a later tick.
    #[error("request to timetable site failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The site kept rejecting our session even after a fresh login.
    #[error("session rejected after re-login")]
    SessionRejected,

    /// Login succeeded but no session cookie came back.
    #[error("no session cookie in login response")]
    MissingSessionCookie,

    /// A page or response did not have the expected shape.
    #[error("unexpected upstream content: {0}")]
    Parse(String),
}

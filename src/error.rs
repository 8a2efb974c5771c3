use std::time::Duration;

use thiserror::Error;

/// A block declaration or address that could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty declaration")]
    Empty,
    #[error("invalid IPv4 address: {0}")]
    InvalidAddress(String),
    #[error("invalid prefix length: {0}")]
    InvalidPrefix(String),
    #[error("prefix length out of range (0..=32): {0}")]
    PrefixOutOfRange(i64),
}

/// Transport-level failure of a single probe.
///
/// Never propagated past the probe: it is rendered into `ProbeOutcome::error`.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("connection failed: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl ProbeError {
    /// Sort a client error into connect, timeout or other failures.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout(timeout)
        } else if err.is_connect() {
            ProbeError::Connect(err)
        } else {
            ProbeError::Request(err)
        }
    }
}

/// Setup failures that abort an operation before anything is dispatched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no probe targets (no address blocks or alive addresses loaded)")]
    NoTargets,
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("sample cap must be at least 1 (use force-all for no limit)")]
    ZeroCap,
    #[error("invalid target URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

//! Error types shared by fetchers, coordinators and query scopes.
//!
//! Every error that reaches a caller of [`load`] is cloned once per waiting
//! future, so all of these types are `Clone` and carry their causes as
//! rendered strings rather than as boxed sources.
//!
//! [`load`]: crate::Coordinator::load

use thiserror::Error;

/// A failure of one bulk upstream call. This always fails the whole batch
/// window it was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The request never produced a response (connection refused, timeout,
    /// and so on).
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// The upstream answered with a non-success status.
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },

    /// The response body was not the expected JSON array.
    #[error("malformed response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// The error delivered to a single `load` caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error(transparent)]
    Upstream(#[from] FetchError),

    /// The fetcher broke its contract and returned a different number of
    /// values than it was given keys.
    #[error("fetcher returned {actual} values for {expected} keys")]
    LengthMismatch { expected: usize, actual: usize },

    /// The owning query scope was cancelled before this load resolved.
    #[error("query scope was cancelled")]
    Cancelled,

    #[error("query deadline of {millis}ms exceeded")]
    DeadlineExceeded { millis: u64 },
}

/// Result type for batched loads.
pub type LoadResult<T> = Result<T, LoadError>;

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// The HTTP client for an upstream could not be built.
    #[error("failed to build HTTP client for {base_url}: {message}")]
    HttpClient { base_url: String, message: String },
}

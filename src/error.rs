// src/error.rs
//! Error taxonomy. `FetchError` never leaves the fetcher (it is folded into
//! `FetchResult::Failed`); the others surface to callers.

/// Failure to retrieve a README from one candidate URL.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("unrecognized repository URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} failed: {message}")]
    Network { url: String, message: String },
}

/// A provider could not open a token stream, or the stream broke mid-way.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("AI provider is disabled")]
    Disabled,

    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider stream failed: {0}")]
    Stream(String),
}

/// The model layer gave up after its attempt budget.
#[derive(Debug, Clone, thiserror::Error)]
#[error("model invocation failed after {attempts} attempt(s): {source}")]
pub struct ModelInvocationError {
    pub attempts: u32,
    #[source]
    pub source: ProviderError,
}

/// Storage read/write failure.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("storage I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("storage lock poisoned")]
    Poisoned,
}

/// Errors seen by the validator client driving the HTTP surface.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// README could not be fetched (both branches failed).
    #[error("Failed to fetch README content: {0}")]
    Fetch(String),

    /// The fetch workflow itself errored server-side.
    #[error("README fetch workflow failed: {0}")]
    Workflow(String),

    /// Poll cap exceeded before the workflow finished.
    #[error("Timeout waiting for README fetch to complete after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("polling was cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected request with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
}

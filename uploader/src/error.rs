//! Error types returned by the upload flow.

use reqwest::StatusCode;
use thiserror::Error;
use tokio::io;

/// Failure of a single request against the upload API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error("unexpected status code {0}")]
    Status(StatusCode),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// A successful commit response did not carry any entry.
    #[error("commit response has no entry")]
    MissingEntry,
}

/// Failure of a whole upload.
///
/// Every variant is fatal to the upload it was raised by. The session has already been deleted (or its deletion attempted)
/// by the time any of them reaches the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// The path denotes something a file cannot be written to.
    #[error("invalid upload target `{path}`: {reason}")]
    InvalidTarget { path: String, reason: &'static str },
    #[error("failed to create upload session")]
    SessionCreate(#[source] ApiError),
    #[error("failed to upload chunk #{index} at offset {offset}")]
    ChunkUpload {
        index: usize,
        offset: u64,
        #[source]
        source: ApiError,
    },
    /// The commit returned a terminal status other than `201 Created`.
    #[error("commit failed with status code {0}")]
    Commit(StatusCode),
    #[error("commit still processing after {0} attempts")]
    CommitRetryExhausted(u32),
    #[error("failed to delete upload session `{id}`")]
    SessionDelete {
        id: String,
        #[source]
        source: ApiError,
    },
    /// The source did not yield as many bytes as announced when the session was created.
    #[error("source size changed: expected {expected} bytes, read {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    /// The negotiated part size would split the file into more parts than a session can hold.
    #[error("{count} parts exceed the limit of {limit} parts per session")]
    TooManyParts { count: u64, limit: u64 },
    /// The server expects a different number of parts than the part size yields.
    #[error("server expects {announced} parts, the part size yields {computed}")]
    PartCount { announced: u64, computed: u64 },
    #[error("part list cannot be ordered: {0}")]
    PartOrder(String),
    #[error("failed to resolve upload target")]
    Resolve(#[source] ApiError),
    #[error(transparent)]
    Pool(#[from] crate::task::Closed),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

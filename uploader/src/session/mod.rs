//! Upload session data model and the remote API it is driven through.

use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::digest::Sha1Digest;
use crate::error::ApiError;

mod http;
pub use http::*;

/// Upload destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// Parent folder id.
    pub folder_id: String,
    /// Name of the stored file.
    pub file_name: String,
    /// Id of the file to overwrite, if any.
    pub file_id: Option<String>,
}

impl UploadTarget {
    /// Target a new file named `file_name` in folder `folder_id`.
    pub fn new(folder_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            folder_id: folder_id.into(),
            file_name: file_name.into(),
            file_id: None,
        }
    }

    /// Build a new `UploadTarget` overwriting the existing file `file_id`.
    #[inline]
    pub fn with_file_id(self, file_id: impl Into<String>) -> Self {
        Self {
            file_id: Some(file_id.into()),
            ..self
        }
    }

    #[inline]
    pub fn is_overwrite(&self) -> bool {
        self.file_id.is_some()
    }
}

/// Server-side upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    /// Server-assigned session id.
    pub id: String,
    /// Negotiated part size in bytes.
    pub part_size: u64,
    /// Announced file size in bytes.
    pub file_size: u64,
    /// Number of parts expected by the server, when it tells.
    pub total_parts: Option<u64>,
}

/// Opaque descriptor of an uploaded part, echoed back verbatim on commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Part(pub serde_json::Value);

/// Stored object returned by a successful commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitResult {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Remaining metadata.
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Outcome of a single commit attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitStatus {
    /// `202 Accepted`: the server is still processing parts.
    Processing,
    /// `201 Created`: the session has been turned into stored objects.
    Created(Vec<CommitResult>),
    /// Any other status.
    Unexpected(StatusCode),
}

/// Upload session API.
///
/// [`HttpSessionApi`] implements it over HTTP. Keeping it a trait decouples the upload flow from the transport.
pub trait SessionApi: Send + Sync + 'static {
    /// Create a session for `file_size` bytes to be stored at `target`.
    fn create_session<'a>(&'a self, target: &'a UploadTarget, file_size: u64) -> BoxFuture<'a, Result<UploadSession, ApiError>>;

    /// Upload one chunk whose digest is `digest`.
    fn upload_part<'a>(
        &'a self,
        session: &'a UploadSession,
        chunk: &'a Chunk,
        digest: &'a Sha1Digest,
    ) -> BoxFuture<'a, Result<Part, ApiError>>;

    /// Submit one commit attempt with `parts` in ascending offset order.
    fn commit<'a>(
        &'a self,
        session: &'a UploadSession,
        digest: &'a Sha1Digest,
        parts: &'a [Part],
    ) -> BoxFuture<'a, Result<CommitStatus, ApiError>>;

    /// Delete the session.
    fn delete_session<'a>(&'a self, session: &'a UploadSession) -> BoxFuture<'a, Result<(), ApiError>>;
}

//! Session commit, retried while the server is still processing parts.

use std::time::Duration;

use crate::digest::Sha1Digest;
use crate::error::{ApiError, Error};
use crate::session::{CommitResult, CommitStatus, Part, SessionApi, UploadSession};

/// Default maximum number of commit submissions.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;
/// Default delay between two commit submissions.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

/// Bounds of the commit retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPolicy {
    /// Maximum number of submissions, the first one included.
    pub max_attempts: u32,
    /// Fixed delay before each resubmission.
    pub backoff: Duration,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// Commit attempt state.
#[derive(Debug)]
enum CommitState {
    /// Nothing submitted yet.
    Pending,
    /// The server accepted the last submission but is still working on it.
    Processing,
    /// Terminal success.
    Done(CommitResult),
}

/// Commit `session` with its `parts` (in ascending offset order) and the `digest` of the whole file.
///
/// The commit is resubmitted after `policy.backoff` as long as the server answers it is still processing, up to
/// `policy.max_attempts` submissions in total.
pub async fn commit_session<A: SessionApi + ?Sized>(
    api: &A,
    session: &UploadSession,
    digest: &Sha1Digest,
    parts: &[Part],
    policy: &CommitPolicy,
) -> Result<CommitResult, Error> {
    let mut state = CommitState::Pending;
    let mut attempts = 0;

    loop {
        state = match state {
            CommitState::Done(result) => {
                tracing::debug!("Committed session `{}` after {attempts} attempt(s): `{}`", session.id, result.id);

                return Ok(result);
            }
            CommitState::Pending | CommitState::Processing if attempts >= policy.max_attempts => {
                return Err(Error::CommitRetryExhausted(policy.max_attempts));
            }
            CommitState::Processing => {
                tokio::time::sleep(policy.backoff).await;
                submit(api, session, digest, parts, &mut attempts).await?
            }
            CommitState::Pending => submit(api, session, digest, parts, &mut attempts).await?,
        };
    }
}

async fn submit<A: SessionApi + ?Sized>(
    api: &A,
    session: &UploadSession,
    digest: &Sha1Digest,
    parts: &[Part],
    attempts: &mut u32,
) -> Result<CommitState, Error> {
    *attempts += 1;

    tracing::trace!("Committing session `{}` with {} parts (attempt #{attempts})", session.id, parts.len());

    match api.commit(session, digest, parts).await? {
        CommitStatus::Processing => Ok(CommitState::Processing),
        CommitStatus::Created(entries) => {
            let result = entries.into_iter().next().ok_or(ApiError::MissingEntry)?;
            Ok(CommitState::Done(result))
        }
        CommitStatus::Unexpected(status) => Err(Error::Commit(status)),
    }
}

use std::num::NonZeroU8;
use std::time::Duration;

use crate::commit::CommitPolicy;
use crate::parts::DEFAULT_CONCURRENCY;

/// Upload tuning.
///
/// ```
/// # use std::time::Duration;
/// # use uploader::UploadConfig;
/// let config = UploadConfig::default()
///     .with_concurrency(8.try_into().unwrap())
///     .with_commit_backoff(Duration::from_millis(500));
///
/// assert_eq!(config.commit.max_attempts, 20);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadConfig {
    /// Maximum number of part uploads in flight.
    pub concurrency: NonZeroU8,
    /// Commit retry bounds.
    pub commit: CommitPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            commit: CommitPolicy::default(),
        }
    }
}

impl UploadConfig {
    #[inline]
    pub fn with_concurrency(self, concurrency: NonZeroU8) -> Self {
        Self { concurrency, ..self }
    }

    #[inline]
    pub fn with_commit_policy(self, commit: CommitPolicy) -> Self {
        Self { commit, ..self }
    }

    #[inline]
    pub fn with_commit_backoff(self, backoff: Duration) -> Self {
        self.with_commit_policy(CommitPolicy { backoff, ..self.commit })
    }

    #[inline]
    pub fn with_commit_attempts(self, max_attempts: u32) -> Self {
        self.with_commit_policy(CommitPolicy { max_attempts, ..self.commit })
    }
}

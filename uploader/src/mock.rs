//! Scripted in-memory upload API for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use reqwest::StatusCode;
use serde_json::json;

use crate::chunk::{chunk_count, Chunk};
use crate::digest::Sha1Digest;
use crate::error::ApiError;
use crate::session::*;

/// A request received by [`MockApi`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateSession { target: UploadTarget, file_size: u64 },
    UploadPart { index: usize, content_range: String, digest: Sha1Digest },
    Commit { digest: Sha1Digest, parts: Vec<Part> },
    DeleteSession { id: String },
}

#[derive(Debug)]
pub struct MockApi {
    part_size: u64,
    fail_create: bool,
    fail_part: Option<usize>,
    fail_delete: bool,
    delete_delay: Duration,
    /// Reverse completion order by delaying earlier chunks longer.
    shuffle: bool,
    commits: Mutex<VecDeque<CommitStatus>>,
    calls: Mutex<Vec<Call>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl MockApi {
    pub fn new(part_size: u64) -> Self {
        Self {
            part_size,
            fail_create: false,
            fail_part: None,
            fail_delete: false,
            delete_delay: Duration::ZERO,
            shuffle: false,
            commits: Default::default(),
            calls: Default::default(),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn failing_create(self) -> Self {
        Self { fail_create: true, ..self }
    }

    pub fn failing_part(self, index: usize) -> Self {
        Self {
            fail_part: Some(index),
            ..self
        }
    }

    pub fn failing_delete(self) -> Self {
        Self { fail_delete: true, ..self }
    }

    /// Delay every session deletion, the call being recorded once the delay has elapsed.
    pub fn with_delete_delay(self, delete_delay: Duration) -> Self {
        Self { delete_delay, ..self }
    }

    pub fn shuffled(self) -> Self {
        Self { shuffle: true, ..self }
    }

    /// Statuses returned by successive commit attempts, then `201 Created` once exhausted.
    pub fn with_commits(self, commits: impl IntoIterator<Item = CommitStatus>) -> Self {
        Self {
            commits: Mutex::new(commits.into_iter().collect()),
            ..self
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, f: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| f(call)).count()
    }

    pub fn deletes(&self) -> usize {
        self.count(|call| matches!(call, Call::DeleteSession { .. }))
    }

    pub fn commit_attempts(&self) -> usize {
        self.count(|call| matches!(call, Call::Commit { .. }))
    }

    /// Highest number of part uploads seen in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

pub fn committed(id: &str) -> CommitResult {
    serde_json::from_value(json!({ "id": id, "type": "file", "name": "test.dat" })).unwrap()
}

impl SessionApi for MockApi {
    fn create_session<'a>(&'a self, target: &'a UploadTarget, file_size: u64) -> BoxFuture<'a, Result<UploadSession, ApiError>> {
        async move {
            self.record(Call::CreateSession {
                target: target.clone(),
                file_size,
            });

            if self.fail_create {
                return Err(ApiError::Status(StatusCode::CONFLICT));
            }

            Ok(UploadSession {
                id: "D5E3F7A1".into(),
                part_size: self.part_size,
                file_size,
                total_parts: Some(chunk_count(file_size, self.part_size) as u64),
            })
        }
        .boxed()
    }

    fn upload_part<'a>(
        &'a self,
        session: &'a UploadSession,
        chunk: &'a Chunk,
        digest: &'a Sha1Digest,
    ) -> BoxFuture<'a, Result<Part, ApiError>> {
        async move {
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);

            if self.shuffle {
                let count = chunk_count(session.file_size, session.part_size);
                tokio::time::sleep(Duration::from_millis(2 * (count - chunk.index) as u64)).await;
            } else {
                tokio::task::yield_now().await;
            }

            self.running.fetch_sub(1, Ordering::SeqCst);
            self.record(Call::UploadPart {
                index: chunk.index,
                content_range: chunk.content_range(session.file_size),
                digest: *digest,
            });

            if self.fail_part == Some(chunk.index) {
                return Err(ApiError::Status(StatusCode::RANGE_NOT_SATISFIABLE));
            }

            Ok(Part(json!({
                "part_id": format!("{:08X}", chunk.index),
                "offset": chunk.offset,
                "size": chunk.len(),
                "sha1": digest.to_string(),
            })))
        }
        .boxed()
    }

    fn commit<'a>(
        &'a self,
        _session: &'a UploadSession,
        digest: &'a Sha1Digest,
        parts: &'a [Part],
    ) -> BoxFuture<'a, Result<CommitStatus, ApiError>> {
        async move {
            self.record(Call::Commit {
                digest: *digest,
                parts: parts.to_vec(),
            });

            let status = self.commits.lock().unwrap().pop_front();

            Ok(status.unwrap_or_else(|| CommitStatus::Created(vec![committed("987654321")])))
        }
        .boxed()
    }

    fn delete_session<'a>(&'a self, session: &'a UploadSession) -> BoxFuture<'a, Result<(), ApiError>> {
        async move {
            if !self.delete_delay.is_zero() {
                tokio::time::sleep(self.delete_delay).await;
            }

            self.record(Call::DeleteSession { id: session.id.clone() });

            match self.fail_delete {
                true => Err(ApiError::Status(StatusCode::INTERNAL_SERVER_ERROR)),
                false => Ok(()),
            }
        }
        .boxed()
    }
}

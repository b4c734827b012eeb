//! Concurrent part uploads.

use std::num::NonZeroU8;
use std::sync::Arc;

use futures::future::{Future, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::io::AsyncRead;

use crate::chunk::{Chunk, ChunkReader};
use crate::digest::Sha1Digest;
use crate::error::Error;
use crate::session::{Part, SessionApi, UploadSession};
use crate::task::Pool;

/// Default maximum number of part uploads in flight.
pub const DEFAULT_CONCURRENCY: NonZeroU8 = match NonZeroU8::new(5) {
    Some(concurrency) => concurrency,
    None => unreachable!(),
};

/// Maximum number of parts a single session can hold.
pub const MAX_PARTS: u64 = 10_000;

/// Number of parts `session` will be uploaded in, checked against the server's expectations.
fn part_count(session: &UploadSession) -> Result<usize, Error> {
    let count = session.file_size.div_ceil(session.part_size.max(1));

    if count > MAX_PARTS {
        return Err(Error::TooManyParts { count, limit: MAX_PARTS });
    }

    match session.total_parts {
        Some(announced) if announced != count => Err(Error::PartCount { announced, computed: count }),
        _ => Ok(count as usize),
    }
}

/// Parts collected in completion order and handed out in chunk order.
///
/// There is exactly one slot per expected chunk, each one written once by whichever upload completes the chunk.
#[derive(Debug)]
pub struct PartCollector {
    slots: Vec<Option<Part>>,
}

impl PartCollector {
    pub fn new(count: usize) -> Self {
        Self { slots: vec![None; count] }
    }

    /// Record the part of chunk `index`.
    pub fn insert(&mut self, index: usize, part: Part) -> Result<(), Error> {
        let count = self.slots.len();

        match self.slots.get_mut(index) {
            Some(Some(_)) => Err(Error::PartOrder(format!("part #{index} completed twice"))),
            Some(slot) => {
                *slot = Some(part);
                Ok(())
            }
            None => Err(Error::PartOrder(format!("part #{index} exceeds the {count} expected parts"))),
        }
    }

    /// Parts in ascending chunk order, failing if any of them is missing.
    pub fn into_ordered(self) -> Result<Vec<Part>, Error> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.ok_or_else(|| Error::PartOrder(format!("part #{index} is missing"))))
            .collect()
    }
}

/// Uploads the chunks of a source through a pool of `concurrency` workers.
#[derive(Debug)]
pub struct PartUploader<A> {
    api: Arc<A>,
    concurrency: NonZeroU8,
}

impl<A: SessionApi> PartUploader<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    #[inline]
    pub fn with_concurrency(self, concurrency: NonZeroU8) -> Self {
        Self { concurrency, ..self }
    }

    /// Upload every chunk of `source` to `session` and return their parts ordered by ascending offset.
    ///
    /// The first failing chunk fails the whole operation: uploads still queued or in flight are cancelled and the error is
    /// returned as is, leaving the session to the caller.
    pub async fn upload_parts<R: AsyncRead + Unpin>(&self, source: R, session: &UploadSession) -> Result<Vec<Part>, Error> {
        tracing::debug!(
            "Uploading {} bytes in parts of {} bytes to session `{}` with {} workers",
            session.file_size,
            session.part_size,
            session.id,
            self.concurrency
        );

        let mut pool = Pool::default();
        pool.start(self.concurrency);

        let parts = self.dispatch(&pool, source, session).await;

        // pending handles have been dropped on failure, cancelling their tasks
        pool.close().await;

        parts
    }

    async fn dispatch<R: AsyncRead + Unpin>(&self, pool: &Pool, source: R, session: &UploadSession) -> Result<Vec<Part>, Error> {
        let mut reader = ChunkReader::new(source, session.part_size)?;
        let mut parts = PartCollector::new(part_count(session)?);
        let mut pending = FuturesUnordered::new();

        let session = Arc::new(session.clone());

        while let Some(chunk) = reader.next_chunk().await? {
            if reader.position() > session.file_size {
                return Err(Error::SizeMismatch {
                    expected: session.file_size,
                    actual: reader.position(),
                });
            }

            pending.push(pool.execute(self.upload_part(Arc::clone(&session), chunk)).await?);

            // fail fast on uploads that already completed
            while let Some(done) = pending.next().now_or_never().flatten() {
                let (index, part) = done?;
                parts.insert(index, part)?;
            }
        }

        if reader.position() != session.file_size {
            return Err(Error::SizeMismatch {
                expected: session.file_size,
                actual: reader.position(),
            });
        }

        while let Some(done) = pending.next().await {
            let (index, part) = done?;
            parts.insert(index, part)?;
        }

        parts.into_ordered()
    }

    fn upload_part(&self, session: Arc<UploadSession>, chunk: Chunk) -> impl Future<Output = Result<(usize, Part), Error>> + Send + 'static {
        let api = Arc::clone(&self.api);

        async move {
            let digest = Sha1Digest::of(&chunk.data);

            match api.upload_part(&session, &chunk, &digest).await {
                Ok(part) => {
                    tracing::debug!("Uploaded chunk #{}: {}", chunk.index, chunk.content_range(session.file_size));

                    Ok((chunk.index, part))
                }
                Err(source) => Err(Error::ChunkUpload {
                    index: chunk.index,
                    offset: chunk.offset,
                    source,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::mock::{Call, MockApi};
    use crate::session::UploadTarget;

    const KIB: u64 = 1_024;
    const MIB: u64 = 1_024 * KIB;

    async fn session_for<A: SessionApi>(api: &A, file_size: u64) -> UploadSession {
        api.create_session(&UploadTarget::new("0", "test.dat"), file_size).await.unwrap()
    }

    fn offsets(parts: &[Part]) -> Vec<u64> {
        parts.iter().map(|part| part.0["offset"].as_u64().unwrap()).collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    #[tracing_test::traced_test]
    async fn test_twelve_mib_in_three_parts() {
        let api = Arc::new(MockApi::new(4 * MIB));
        let data = vec![0x41; (12 * MIB) as usize];
        let session = session_for(&*api, data.len() as u64).await;

        let parts = PartUploader::new(Arc::clone(&api)).upload_parts(&data[..], &session).await.unwrap();

        assert_eq!(offsets(&parts), [0, 4 * MIB, 8 * MIB]);

        let mut ranges: Vec<_> = api
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::UploadPart { content_range, digest, .. } => {
                    assert_eq!(digest, Sha1Digest::of(&data[..(4 * MIB) as usize]));
                    Some(content_range)
                }
                _ => None,
            })
            .collect();
        ranges.sort();

        assert_eq!(
            ranges,
            [
                "bytes 0-4194303/12582912",
                "bytes 4194304-8388607/12582912",
                "bytes 8388608-12582911/12582912",
            ]
        );
        assert!(logs_contain("Uploading 12582912 bytes"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_out_of_order_completions_are_sorted() {
        let api = Arc::new(MockApi::new(KIB).shuffled());
        let data: Vec<u8> = (0..20 * KIB + 100).map(|i| i as u8).collect();
        let session = session_for(&*api, data.len() as u64).await;

        let parts = PartUploader::new(Arc::clone(&api))
            .with_concurrency(4.try_into().unwrap())
            .upload_parts(&data[..], &session)
            .await
            .unwrap();

        let completed: Vec<_> = api
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::UploadPart { index, .. } => Some(index),
                _ => None,
            })
            .collect();

        assert_ne!(completed, (0..21).collect::<Vec<_>>(), "completions were expected out of order");
        assert_eq!(offsets(&parts), (0..21).map(|i| i * KIB).collect::<Vec<_>>());
        assert!(api.peak() <= 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failing_chunk_fails_the_upload() {
        let api = Arc::new(MockApi::new(KIB).failing_part(3));
        let data = vec![0; (10 * KIB) as usize];
        let session = session_for(&*api, data.len() as u64).await;

        let err = PartUploader::new(Arc::clone(&api)).upload_parts(&data[..], &session).await.unwrap_err();

        assert!(matches!(err, Error::ChunkUpload { index: 3, offset, .. } if offset == 3 * KIB), "{err:?}");
    }

    #[tokio::test]
    async fn test_empty_source_has_no_parts() {
        let api = Arc::new(MockApi::new(KIB));
        let session = session_for(&*api, 0).await;

        let parts = PartUploader::new(Arc::clone(&api)).upload_parts(&b""[..], &session).await.unwrap();

        assert!(parts.is_empty());
    }

    #[tokio::test]
    async fn test_source_size_changed() {
        let api = Arc::new(MockApi::new(KIB));
        let session = session_for(&*api, 3 * KIB).await;

        let short = vec![0; (2 * KIB) as usize];
        let err = PartUploader::new(Arc::clone(&api)).upload_parts(&short[..], &session).await.unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { expected, actual } if expected == 3 * KIB && actual == 2 * KIB));

        let long = vec![0; (4 * KIB) as usize];
        let err = PartUploader::new(Arc::clone(&api)).upload_parts(&long[..], &session).await.unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { expected, .. } if expected == 3 * KIB));
    }

    #[tokio::test]
    async fn test_tiny_part_size_is_rejected() {
        let api = Arc::new(MockApi::new(1));
        let session = UploadSession {
            id: "D5E3F7A1".into(),
            part_size: 1,
            file_size: 10 * 1_024 * MIB,
            total_parts: None,
        };

        let err = PartUploader::new(Arc::clone(&api)).upload_parts(&b""[..], &session).await.unwrap_err();

        assert!(matches!(err, Error::TooManyParts { count, limit: MAX_PARTS } if count == 10 * 1_024 * MIB), "{err:?}");
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_announced_part_count_mismatch() {
        let api = Arc::new(MockApi::new(KIB));
        let session = UploadSession {
            total_parts: Some(4),
            ..session_for(&*api, 3 * KIB).await
        };

        let data = vec![0; (3 * KIB) as usize];
        let err = PartUploader::new(Arc::clone(&api)).upload_parts(&data[..], &session).await.unwrap_err();

        assert!(matches!(err, Error::PartCount { announced: 4, computed: 3 }), "{err:?}");
        assert_eq!(api.count(|call| matches!(call, Call::UploadPart { .. })), 0);
    }

    #[test]
    fn test_part_count_boundaries() {
        let session = |file_size, total_parts| UploadSession {
            id: "D5E3F7A1".into(),
            part_size: KIB,
            file_size,
            total_parts,
        };

        assert_eq!(part_count(&session(0, Some(0))).unwrap(), 0);
        assert_eq!(part_count(&session(KIB + 1, None)).unwrap(), 2);
        assert_eq!(part_count(&session(MAX_PARTS * KIB, Some(MAX_PARTS))).unwrap(), MAX_PARTS as usize);
        assert!(matches!(part_count(&session(MAX_PARTS * KIB + 1, None)), Err(Error::TooManyParts { .. })));
    }

    #[test]
    fn test_collector_rejects_duplicates_and_gaps() {
        let mut parts = PartCollector::new(2);

        parts.insert(1, Part(json!(1))).unwrap();
        assert!(matches!(parts.insert(1, Part(json!(1))), Err(Error::PartOrder(_))));
        assert!(matches!(parts.insert(2, Part(json!(2))), Err(Error::PartOrder(_))));
        assert!(matches!(parts.into_ordered(), Err(Error::PartOrder(_))));
    }

    proptest! {
        #[test]
        fn collector_orders_any_completion_permutation(
            order in (1usize..64).prop_flat_map(|count| Just((0..count).collect::<Vec<_>>()).prop_shuffle())
        ) {
            let mut parts = PartCollector::new(order.len());

            for &index in &order {
                parts.insert(index, Part(json!({ "offset": index * 1_024 }))).unwrap();
            }

            let ordered = parts.into_ordered().unwrap();

            prop_assert_eq!(offsets(&ordered), (0..order.len() as u64).map(|i| i * 1_024).collect::<Vec<_>>());
        }
    }
}

//! Upload orchestration: target resolution, session lifecycle, part uploads and commit.

use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncSeek};

use crate::commit::commit_session;
use crate::config::UploadConfig;
use crate::digest::Sha1Digest;
use crate::error::{ApiError, Error};
use crate::parts::PartUploader;
use crate::session::{CommitResult, SessionApi, UploadSession, UploadTarget};

const PATH_SEPARATOR: char = '/';

/// Kind of an existing item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    File,
    Folder,
}

/// Existing item a path resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub id: String,
    pub kind: ItemKind,
}

/// Maps logical paths to remote items.
pub trait PathResolver: Send + Sync {
    /// Find the item stored at `path`, if any.
    fn resolve<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<ItemInfo>, ApiError>>;

    /// Return the id of the folder containing `path`, creating every missing folder on the way.
    fn ensure_parent_folders<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<String, ApiError>>;
}

/// Metadata cache kept by the path resolver's owner.
pub trait MetadataCache: Send + Sync {
    fn put(&self, path: &str, info: &CommitResult);
}

/// Exclusive ownership of a remote upload session.
///
/// The session is deleted exactly once: either explicitly with [`SessionGuard::release()`], or in the background when the guard is
/// dropped without being released (eg. the upload future has been cancelled).
#[derive(Debug)]
pub struct SessionGuard<A: SessionApi> {
    api: Arc<A>,
    session: UploadSession,
    released: bool,
}

impl<A: SessionApi> SessionGuard<A> {
    pub fn new(api: Arc<A>, session: UploadSession) -> Self {
        Self {
            api,
            session,
            released: false,
        }
    }

    #[inline]
    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    /// Delete the session.
    ///
    /// The guard stays armed until the request completes: cancelling the release falls back to the background delete.
    pub async fn release(mut self) -> Result<(), Error> {
        tracing::debug!("Deleting upload session `{}`", self.session.id);

        let result = self.api.delete_session(&self.session).await;
        self.released = true;

        result.map_err(|source| Error::SessionDelete {
            id: self.session.id.clone(),
            source,
        })
    }
}

impl<A: SessionApi> Drop for SessionGuard<A> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        tracing::warn!("Upload session `{}` dropped unreleased, deleting it in the background", self.session.id);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let api = Arc::clone(&self.api);
                let session = self.session.clone();

                handle.spawn(async move {
                    if let Err(err) = api.delete_session(&session).await {
                        tracing::error!("Failed to delete upload session `{}`: {err}", session.id);
                    }
                });
            }
            Err(_) => tracing::error!("No runtime to delete upload session `{}`, it is left to expire", self.session.id),
        }
    }
}

/// Upload orchestrator.
///
/// # Example
/// ```no_run
/// # tokio_test::block_on(async {
/// # use uploader::{HttpSessionApi, UploadTarget, Uploader};
/// let api = HttpSessionApi::new("https://upload.box.com/api/2.0/files/".parse().unwrap(), "token");
/// let uploader = Uploader::new(api);
///
/// let result = uploader.upload_file(&UploadTarget::new("0", "test.dat"), "data/test.dat").await.unwrap();
///
/// println!("Stored file `{}`", result.id);
/// # })
/// ```
pub struct Uploader<A> {
    api: Arc<A>,
    config: UploadConfig,
    resolver: Option<Arc<dyn PathResolver>>,
    cache: Option<Arc<dyn MetadataCache>>,
}

impl<A: SessionApi> Uploader<A> {
    pub fn new(api: A) -> Self {
        Self::with_api(Arc::new(api))
    }

    pub fn with_api(api: Arc<A>) -> Self {
        Self {
            api,
            config: UploadConfig::default(),
            resolver: None,
            cache: None,
        }
    }

    #[inline]
    pub fn with_config(self, config: UploadConfig) -> Self {
        Self { config, ..self }
    }

    #[inline]
    pub fn with_resolver(self, resolver: impl PathResolver + 'static) -> Self {
        Self {
            resolver: Some(Arc::new(resolver)),
            ..self
        }
    }

    #[inline]
    pub fn with_cache(self, cache: impl MetadataCache + 'static) -> Self {
        Self {
            cache: Some(Arc::new(cache)),
            ..self
        }
    }

    #[inline]
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Upload the content of `source`, from its current position to its end, to `target`.
    ///
    /// Once created, the upload session is always deleted before returning. When the upload fails, the upload error is returned
    /// even if the deletion fails as well; the deletion failure is only logged.
    pub async fn upload<S>(&self, target: &UploadTarget, mut source: S) -> Result<CommitResult, Error>
    where
        S: AsyncRead + AsyncSeek + Unpin,
    {
        let (digest, file_size) = Sha1Digest::whole_file(&mut source).await?;

        tracing::debug!("Uploading `{}` ({file_size} bytes, sha1 {digest})", target.file_name);

        let session = self.api.create_session(target, file_size).await.map_err(Error::SessionCreate)?;

        tracing::debug!(
            "Created upload session `{}` for `{}` with parts of {} bytes",
            session.id,
            target.file_name,
            session.part_size
        );

        let guard = SessionGuard::new(Arc::clone(&self.api), session);

        let result = self.transfer(guard.session(), source, &digest).await;
        let cleanup = guard.release().await;

        match (result, cleanup) {
            (Ok(result), Ok(())) => Ok(result),
            (Ok(result), Err(err)) => {
                tracing::warn!("Uploaded `{}` but failed to clean up: {err}", target.file_name);
                Ok(result)
            }
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(cleanup)) => {
                tracing::error!("Upload of `{}` aborted, and failed to clean up: {cleanup}", target.file_name);
                Err(err)
            }
        }
    }

    /// Upload the local file at `path` to `target`.
    pub async fn upload_file(&self, target: &UploadTarget, path: impl AsRef<Path>) -> Result<CommitResult, Error> {
        let file = tokio::fs::File::open(path).await?;

        self.upload(target, file).await
    }

    /// Upload the content of `source` to the logical `path`, overwriting the file already stored there if any.
    ///
    /// Missing parent folders are created. The metadata cache, if any, is updated on success.
    pub async fn upload_path<S>(&self, path: &str, source: S) -> Result<CommitResult, Error>
    where
        S: AsyncRead + AsyncSeek + Unpin,
    {
        let target = self.resolve(path).await?;

        let result = self.upload(&target, source).await?;

        if let Some(ref cache) = self.cache {
            cache.put(path, &result);
        }

        Ok(result)
    }

    async fn resolve(&self, path: &str) -> Result<UploadTarget, Error> {
        let invalid = |reason| Error::InvalidTarget {
            path: path.to_owned(),
            reason,
        };

        let resolver = self.resolver.as_deref().ok_or_else(|| invalid("no path resolver"))?;

        let file_name = path
            .rsplit(PATH_SEPARATOR)
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| invalid("file name is required"))?;

        let file_id = match resolver.resolve(path).await.map_err(Error::Resolve)? {
            Some(ItemInfo { kind: ItemKind::Folder, .. }) => return Err(invalid("path is a folder")),
            Some(ItemInfo { id, kind: ItemKind::File }) => Some(id),
            None => None,
        };

        let folder_id = resolver.ensure_parent_folders(path).await.map_err(Error::Resolve)?;

        Ok(UploadTarget {
            folder_id,
            file_name: file_name.to_owned(),
            file_id,
        })
    }

    async fn transfer<S>(&self, session: &UploadSession, source: S, digest: &Sha1Digest) -> Result<CommitResult, Error>
    where
        S: AsyncRead + Unpin,
    {
        let parts = PartUploader::new(Arc::clone(&self.api))
            .with_concurrency(self.config.concurrency)
            .upload_parts(source, session)
            .await?;

        commit_session(&*self.api, session, digest, &parts, &self.config.commit).await
    }
}

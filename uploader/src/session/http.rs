use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use reqwest::header::{HeaderName, HeaderValue, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::{Client, Request, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

use super::*;

const DIGEST: HeaderName = HeaderName::from_static("digest");
const OCTET_STREAM: HeaderValue = HeaderValue::from_static("application/octet-stream");

#[derive(Debug, Serialize)]
struct CreateSessionBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    folder_id: Option<&'a str>,
    file_size: u64,
    file_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    id: String,
    part_size: u64,
    #[serde(default)]
    total_parts: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct UploadPartResponse {
    part: Part,
}

#[derive(Debug, Serialize)]
struct CommitBody<'a> {
    parts: &'a [Part],
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    entries: Vec<CommitResult>,
}

/// Upload session API over HTTP.
///
/// Every request is sent relative to the uploads root (eg. `https://upload.box.com/api/2.0/files/`) and authenticated with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpSessionApi {
    client: Client,
    root: Url,
    token: String,
}

impl HttpSessionApi {
    pub fn new(mut root: Url, token: impl Into<String>) -> Self {
        // relative joins would otherwise replace the last path segment
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }

        Self {
            client: Client::default(),
            root,
            token: token.into(),
        }
    }

    #[inline]
    pub fn with_client(self, client: Client) -> Self {
        Self { client, ..self }
    }

    #[inline]
    pub fn root(&self) -> &Url {
        &self.root
    }

    fn session_url(&self, session: &UploadSession) -> Result<Url, ApiError> {
        Ok(self.root.join(&format!("upload_sessions/{}", session.id))?)
    }

    /// Build the session creation request: overwriting an existing file targets it directly and leaves the folder out.
    pub fn create_session_request(&self, target: &UploadTarget, file_size: u64) -> Result<Request, ApiError> {
        let (url, folder_id) = match target.file_id {
            Some(ref file_id) => (self.root.join(&format!("{file_id}/upload_sessions"))?, None),
            None => (self.root.join("upload_sessions")?, Some(target.folder_id.as_str())),
        };

        let body = CreateSessionBody {
            folder_id,
            file_size,
            file_name: &target.file_name,
        };

        Ok(self.client.post(url).bearer_auth(&self.token).json(&body).build()?)
    }

    pub fn upload_part_request(&self, session: &UploadSession, chunk: &Chunk, digest: &Sha1Digest) -> Result<Request, ApiError> {
        Ok(self
            .client
            .put(self.session_url(session)?)
            .bearer_auth(&self.token)
            .header(DIGEST, digest.header_value())
            .header(CONTENT_RANGE, chunk.content_range(session.file_size))
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(chunk.data.clone())
            .build()?)
    }

    pub fn commit_request(&self, session: &UploadSession, digest: &Sha1Digest, parts: &[Part]) -> Result<Request, ApiError> {
        let url = self.root.join(&format!("upload_sessions/{}/commit", session.id))?;

        Ok(self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .header(DIGEST, digest.header_value())
            .json(&CommitBody { parts })
            .build()?)
    }

    pub fn delete_session_request(&self, session: &UploadSession) -> Result<Request, ApiError> {
        Ok(self.client.delete(self.session_url(session)?).bearer_auth(&self.token).build()?)
    }

    async fn send(&self, request: Request) -> Result<Response, ApiError> {
        tracing::trace!("{} {}", request.method(), request.url());

        Ok(self.client.execute(request).await?)
    }
}

/// Read a JSON body out of a successful response.
async fn json_body<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let status = resp.status();

    if !status.is_success() {
        return Err(ApiError::Status(status));
    }

    let body: Bytes = resp.bytes().await?;

    Ok(serde_json::from_slice(&body)?)
}

async fn session_from(resp: Response, file_size: u64) -> Result<UploadSession, ApiError> {
    let resp: CreateSessionResponse = json_body(resp).await?;

    Ok(UploadSession {
        id: resp.id,
        part_size: resp.part_size,
        file_size,
        total_parts: resp.total_parts,
    })
}

async fn part_from(resp: Response) -> Result<Part, ApiError> {
    let resp: UploadPartResponse = json_body(resp).await?;

    Ok(resp.part)
}

/// Map a commit response: `202 Accepted` while parts are still being processed, `201 Created` with the stored entries once done.
async fn commit_status(resp: Response) -> Result<CommitStatus, ApiError> {
    match resp.status() {
        StatusCode::ACCEPTED => Ok(CommitStatus::Processing),
        StatusCode::CREATED => {
            let resp: CommitResponse = json_body(resp).await?;
            Ok(CommitStatus::Created(resp.entries))
        }
        status => Ok(CommitStatus::Unexpected(status)),
    }
}

impl SessionApi for HttpSessionApi {
    fn create_session<'a>(&'a self, target: &'a UploadTarget, file_size: u64) -> BoxFuture<'a, Result<UploadSession, ApiError>> {
        async move {
            let request = self.create_session_request(target, file_size)?;

            session_from(self.send(request).await?, file_size).await
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
            let request = self.upload_part_request(session, chunk, digest)?;

            part_from(self.send(request).await?).await
        }
        .boxed()
    }

    fn commit<'a>(
        &'a self,
        session: &'a UploadSession,
        digest: &'a Sha1Digest,
        parts: &'a [Part],
    ) -> BoxFuture<'a, Result<CommitStatus, ApiError>> {
        async move {
            let request = self.commit_request(session, digest, parts)?;

            commit_status(self.send(request).await?).await
        }
        .boxed()
    }

    fn delete_session<'a>(&'a self, session: &'a UploadSession) -> BoxFuture<'a, Result<(), ApiError>> {
        async move {
            let request = self.delete_session_request(session)?;
            let status = self.send(request).await?.status();

            match status.is_success() {
                true => Ok(()),
                false => Err(ApiError::Status(status)),
            }
        }
        .boxed()
    }
}

//! A crate uploading large files through chunked upload sessions.
//!
//! An upload session is a server-side context accumulating the parts of a file before atomically turning them into a single stored
//! object. Uploading a file through a session goes as follows:
//! - the whole file is hashed (SHA-1) once, before any of its content is sent;
//! - a session is created for the file size, either for a new file in a folder or to overwrite an existing file, and the server
//!   answers with the part size to use;
//! - the file is read sequentially in chunks of that size, each one being uploaded by a bounded pool of workers with its own
//!   `Digest` and `Content-Range` headers, and answered with an opaque part descriptor;
//! - parts complete in any order but are always sorted back by ascending offset before the session is committed with the whole
//!   file digest, the commit being resubmitted a bounded number of times while the server is still processing it;
//! - the session is finally deleted, whether the upload succeeded or not.
//!
//! ```text
//!     resolve target ─► digest file ─► create session ─┬─► upload parts ─► commit ─┬─► delete session
//!                                                      └────────── on failure ─────┘
//! ```
//!
//! The remote API is abstracted behind the [`SessionApi`] trait, implemented over HTTP by [`HttpSessionApi`]. Mapping logical
//! paths to folders and files is left to a [`PathResolver`] implementor, optionally completed by a [`MetadataCache`].

pub mod chunk;
pub mod commit;
mod config;
pub mod digest;
mod error;
pub mod parts;
pub mod session;
pub mod task;
mod upload;

#[cfg(test)]
mod mock;

pub use commit::CommitPolicy;
pub use config::UploadConfig;
pub use error::{ApiError, Error};
pub use session::{CommitResult, HttpSessionApi, Part, SessionApi, UploadSession, UploadTarget};
pub use upload::*;

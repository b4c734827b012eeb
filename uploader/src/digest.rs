//! SHA-1 content digests as carried by the `Digest` header.

use std::fmt;
use std::io::SeekFrom;

use base64::engine::{general_purpose::STANDARD, Engine};
use sha1::{Digest, Sha1};
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

const BUF_SIZE: usize = 64 * 1_024;

/// A 160-bit SHA-1 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha1Digest([u8; 20]);

impl Sha1Digest {
    /// Digest of `data`.
    pub fn of(data: impl AsRef<[u8]>) -> Self {
        Self(Sha1::digest(data.as_ref()).into())
    }

    /// Digest of everything left in `reader`, together with the number of bytes read.
    pub async fn of_reader<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<(Self, u64)> {
        let mut hasher = Sha1::new();
        let mut buf = vec![0; BUF_SIZE];
        let mut size = 0;

        loop {
            match reader.read(&mut buf).await? {
                0 => break,
                n => {
                    hasher.update(&buf[..n]);
                    size += n as u64;
                }
            }
        }

        Ok((Self(hasher.finalize().into()), size))
    }

    /// Digest of the whole `source` from its current position, leaving the position untouched.
    ///
    /// The returned size is the number of bytes from that position to the end of stream.
    pub async fn whole_file<S: AsyncRead + AsyncSeek + Unpin>(source: &mut S) -> io::Result<(Self, u64)> {
        let start = source.stream_position().await?;
        let digest = Self::of_reader(source).await?;
        source.seek(SeekFrom::Start(start)).await?;

        Ok(digest)
    }

    /// Raw 20-byte digest.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Standard base64 encoding of the raw digest.
    #[inline]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.as_bytes())
    }

    /// Value of the `Digest` header carrying this digest.
    ///
    /// ```
    /// # use uploader::digest::Sha1Digest;
    /// assert_eq!(Sha1Digest::of("abc").header_value(), "sha=qZk+NkcGgWq6PiVxeFDCbJzQ2J0=");
    /// ```
    #[inline]
    pub fn header_value(&self) -> String {
        format!("sha={}", self.to_base64())
    }
}

impl fmt::Debug for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sha1Digest").field(&self.to_base64()).finish()
    }
}

impl fmt::Display for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_bytes().iter().try_for_each(|byte| write!(f, "{byte:02x}"))
    }
}

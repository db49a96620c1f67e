use std::io::{self, Read, Write};

use sha2::{Digest, Sha256};

use crate::error::{RepoError, Result};

/// A streaming artifact with integrity checks at end of stream.
///
/// Bytes pass through untouched while a running SHA-256 and byte count
/// accumulate; when the underlying stream ends, both must match the trusted
/// declaration or the final read fails. Anything already handed to the
/// caller before a failure is poisoned and must be discarded.
pub struct ArtifactStream<R> {
    inner: R,
    resource: String,
    expected_sha256: String,
    expected_length: u64,
    hasher: Sha256,
    seen: u64,
    finished: bool,
}

impl<R> std::fmt::Debug for ArtifactStream<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStream")
            .field("resource", &self.resource)
            .field("expected_sha256", &self.expected_sha256)
            .field("expected_length", &self.expected_length)
            .field("seen", &self.seen)
            .field("finished", &self.finished)
            .finish()
    }
}

impl<R: Read> ArtifactStream<R> {
    pub(crate) fn new(
        inner: R,
        resource: impl Into<String>,
        expected_sha256: String,
        expected_length: u64,
    ) -> Self {
        Self {
            inner,
            resource: resource.into(),
            expected_sha256,
            expected_length,
            hasher: Sha256::new(),
            seen: 0,
            finished: false,
        }
    }

    /// Drain the stream into `dest`, returning the verified byte count.
    pub fn copy_to<W: Write>(mut self, dest: &mut W) -> Result<u64> {
        let resource = self.resource.clone();
        io::copy(&mut self, dest).map_err(|e| RepoError::from_stream(e, &resource))
    }

    fn finish(&mut self) -> io::Result<()> {
        self.finished = true;
        if self.seen != self.expected_length {
            return Err(RepoError::Integrity {
                resource: self.resource.clone(),
                reason: format!(
                    "length {} does not match declared {}",
                    self.seen, self.expected_length
                ),
            }
            .into_io());
        }
        let actual = hex::encode(self.hasher.finalize_reset());
        if actual != self.expected_sha256 {
            return Err(RepoError::Integrity {
                resource: self.resource.clone(),
                reason: format!("sha256 {actual} does not match declared {}", self.expected_sha256),
            }
            .into_io());
        }
        Ok(())
    }
}

impl<R: Read> Read for ArtifactStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n == 0 {
            self.finish()?;
            return Ok(0);
        }
        self.hasher.update(&buf[..n]);
        self.seen += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &[u8] = b"just some string for testing";
    // sha256 of PAYLOAD
    const DIGEST: &str = "963ba8374bac92a8a00fc21ca458e0c2016bf8930519e5271f7b49d16762a184";

    fn stream(expected_sha256: &str, expected_length: u64) -> ArtifactStream<&'static [u8]> {
        ArtifactStream::new(PAYLOAD, "/foo-2.0.1.tar.gz", expected_sha256.to_string(), expected_length)
    }

    #[test]
    fn matching_stream_passes_through() {
        let mut out = Vec::new();
        let n = stream(DIGEST, PAYLOAD.len() as u64)
            .copy_to(&mut out)
            .unwrap();
        assert_eq!(n, PAYLOAD.len() as u64);
        assert_eq!(out, PAYLOAD);
    }

    #[test]
    fn digest_mismatch_is_integrity_failure() {
        let mut out = Vec::new();
        let err = stream(&"0".repeat(64), PAYLOAD.len() as u64)
            .copy_to(&mut out)
            .unwrap_err();
        assert!(matches!(err, RepoError::Integrity { .. }));
    }

    #[test]
    fn short_declaration_is_integrity_failure() {
        // The caller bounds the fetch separately; if extra bytes slip
        // through, the stream still refuses them.
        let mut out = Vec::new();
        let err = stream(DIGEST, PAYLOAD.len() as u64 - 2)
            .copy_to(&mut out)
            .unwrap_err();
        assert!(matches!(err, RepoError::Integrity { .. }));
    }
}

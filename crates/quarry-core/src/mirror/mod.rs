//! Byte-level access to a remote mirror.
//!
//! A [`Mirror`] hands out length-bounded readers for opaque resource paths;
//! it interprets no manifest semantics. Every backend wraps its stream in a
//! [`BoundedReader`] so an endless-data response fails with an oversize
//! error instead of filling the disk.

pub mod fs;
pub mod http;
pub mod memory;

use std::io::{self, Read};

use crate::error::{RepoError, Result};

pub use fs::FsMirror;
pub use http::HttpMirror;
pub use memory::MemoryMirror;

/// A source of named resources.
pub trait Mirror {
    /// Open `path` for reading, failing the stream once more than
    /// `max_length` bytes are produced.
    fn open(&self, path: &str, max_length: u64) -> Result<Box<dyn Read + Send>>;
}

impl<M: Mirror + ?Sized> Mirror for Box<M> {
    fn open(&self, path: &str, max_length: u64) -> Result<Box<dyn Read + Send>> {
        (**self).open(path, max_length)
    }
}

/// Drain a bounded resource into memory. Stream failures are mapped back to
/// repo errors (oversize bounds included).
pub fn fetch_bytes(mirror: &impl Mirror, path: &str, max_length: u64) -> Result<Vec<u8>> {
    let mut reader = mirror.open(path, max_length)?;
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .map_err(|e| RepoError::from_stream(e, path))?;
    Ok(buf)
}

/// Enforces a byte bound over an inner reader.
pub struct BoundedReader<R> {
    inner: R,
    resource: String,
    limit: u64,
    seen: u64,
}

impl<R: Read> BoundedReader<R> {
    pub fn new(inner: R, resource: impl Into<String>, limit: u64) -> Self {
        Self {
            inner,
            resource: resource.into(),
            limit,
            seen: 0,
        }
    }
}

impl<R: Read> Read for BoundedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.seen += n as u64;
        if self.seen > self.limit {
            return Err(RepoError::Oversize {
                resource: self.resource.clone(),
                limit: self.limit,
            }
            .into_io());
        }
        Ok(n)
    }
}

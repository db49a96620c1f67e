use std::io;

use chrono::{DateTime, Utc};

/// Result alias used throughout the core.
pub type Result<T, E = RepoError> = std::result::Result<T, E>;

/// Failure kinds surfaced by the sync and fetch pipelines.
///
/// `NotFound` on the next root version is the only kind the core converts to
/// success internally; everything else aborts the current operation.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("resource not found on mirror: {resource}")]
    NotFound { resource: String },

    #[error("transport failure fetching {resource}")]
    Transport {
        resource: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{resource} exceeded its {limit}-byte bound")]
    Oversize { resource: String, limit: u64 },

    #[error("integrity failure for {resource}: {reason}")]
    Integrity { resource: String, reason: String },

    #[error("signature threshold not met for {role}: required {threshold}, valid {valid}")]
    Signature {
        role: String,
        threshold: u32,
        valid: u32,
    },

    #[error("malformed manifest {resource}: {reason}")]
    Schema { resource: String, reason: String },

    #[error("{role} manifest expired at {expires}")]
    Expired {
        role: String,
        expires: DateTime<Utc>,
    },

    #[error("unexpected {role} version: trusted {current}, received {received}")]
    Version {
        role: String,
        current: u64,
        received: u64,
    },

    #[error("inconsistent manifests: {0}")]
    Inconsistent(String),

    #[error("unknown component `{0}`")]
    UnknownComponent(String),

    #[error("component `{0}` has been yanked")]
    ComponentYanked(String),

    #[error("component `{component}` has no version `{version}`")]
    UnknownVersion { component: String, version: String },

    #[error("component `{component}` has no versions for this platform")]
    NoVersions { component: String },

    #[error("store failure at {path}")]
    Store {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl RepoError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::NotFound { .. })
    }

    pub fn is_signature(&self) -> bool {
        matches!(self, RepoError::Signature { .. })
    }

    /// Smuggle a repo error through an `io::Read` boundary.
    pub(crate) fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, self)
    }

    /// Recover a repo error previously wrapped with [`into_io`], falling back
    /// to a transport failure for genuine IO errors.
    ///
    /// [`into_io`]: RepoError::into_io
    pub(crate) fn from_stream(err: io::Error, resource: &str) -> RepoError {
        let kind = err.kind();
        match err.into_inner() {
            Some(inner) => match inner.downcast::<RepoError>() {
                Ok(repo) => *repo,
                Err(other) => RepoError::Transport {
                    resource: resource.to_string(),
                    source: other,
                },
            },
            None => RepoError::Transport {
                resource: resource.to_string(),
                source: Box::new(io::Error::from(kind)),
            },
        }
    }
}

//! Secure metadata engine for the quarry component package manager.
//!
//! This crate keeps a local set of signed role manifests (root, timestamp,
//! snapshot, index, per-component) synchronized with a remote mirror,
//! enforcing rollback, freshness, and signature-threshold invariants, and
//! resolves verified component artifacts out of that metadata. It is not
//! meant to be driven directly by end users; the `quarry` binary wraps it
//! with the canonical front-end.

pub mod config;
pub mod crypto;
pub mod error;
pub mod manifest;
pub mod mirror;
pub mod repository;
pub mod store;

pub use config::{MirrorLocation, RepoConfig};
pub use error::{RepoError, Result};
pub use mirror::{FsMirror, HttpMirror, MemoryMirror, Mirror};
pub use repository::{ArtifactStream, Repository, component_filename};
pub use store::{DiskStore, ManifestStore, MemoryStore};

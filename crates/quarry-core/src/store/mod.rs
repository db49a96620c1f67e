//! Persistence of trusted manifest documents.
//!
//! The store holds raw envelope bytes keyed by canonical filename, so saved
//! documents stay byte-identical to what was fetched and verified. Rotated
//! roots are additionally retained under `<version>.root.json`; other roles
//! occupy one canonical filename each.

pub mod disk;
pub mod memory;

use std::io;

use crate::error::{RepoError, Result};
use crate::manifest::FILENAME_ROOT;

pub use disk::DiskStore;
pub use memory::MemoryStore;

pub trait ManifestStore {
    /// Read a trusted manifest; `None` when nothing is stored under
    /// `filename`.
    fn load(&self, filename: &str) -> Result<Option<Vec<u8>>>;

    /// Persist a manifest. The write must be atomic: a concurrent or
    /// subsequent `load` sees either the old document or the new one.
    fn save(&self, filename: &str, bytes: &[u8]) -> Result<()>;

    /// The trusted root. Unlike other manifests this must always be present;
    /// it is the bootstrap anchor every verification chains back to.
    fn load_root(&self) -> Result<Vec<u8>> {
        self.load(FILENAME_ROOT)?.ok_or_else(|| RepoError::Store {
            path: FILENAME_ROOT.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "trust anchor missing"),
        })
    }
}

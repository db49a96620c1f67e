use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{RepoError, Result};

use super::ManifestStore;

/// An in-memory store that records the order of saves, for tests and
/// ephemeral embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    manifests: BTreeMap<String, Vec<u8>>,
    saved: Vec<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a manifest without recording it as a save.
    pub fn seed(&self, filename: impl Into<String>, bytes: Vec<u8>) {
        if let Ok(mut state) = self.state.lock() {
            state.manifests.insert(filename.into(), bytes);
        }
    }

    /// Filenames written through [`ManifestStore::save`] since the last
    /// [`clear_saved`](Self::clear_saved).
    pub fn saved(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.saved.clone())
            .unwrap_or_default()
    }

    pub fn clear_saved(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.saved.clear();
        }
    }
}

impl ManifestStore for MemoryStore {
    fn load(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock().map_err(|_| poisoned(filename))?;
        Ok(state.manifests.get(filename).cloned())
    }

    fn save(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| poisoned(filename))?;
        state.manifests.insert(filename.to_string(), bytes.to_vec());
        state.saved.push(filename.to_string());
        Ok(())
    }
}

fn poisoned(filename: &str) -> RepoError {
    RepoError::Store {
        path: filename.to_string(),
        source: std::io::Error::other("store state poisoned"),
    }
}

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::Mutex;

use crate::error::{RepoError, Result};

use super::{BoundedReader, Mirror};

/// An in-memory mirror. The deterministic collaborator for tests, also handy
/// for embedding fixtures.
#[derive(Debug, Default)]
pub struct MemoryMirror {
    resources: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, bytes: Vec<u8>) {
        if let Ok(mut resources) = self.resources.lock() {
            resources.insert(path.into(), bytes);
        }
    }

    pub fn remove(&self, path: &str) {
        if let Ok(mut resources) = self.resources.lock() {
            resources.remove(path);
        }
    }
}

impl Mirror for MemoryMirror {
    fn open(&self, path: &str, max_length: u64) -> Result<Box<dyn Read + Send>> {
        let resources = self.resources.lock().map_err(|_| RepoError::Transport {
            resource: path.to_string(),
            source: "mirror state poisoned".into(),
        })?;
        let bytes = resources.get(path).ok_or_else(|| RepoError::NotFound {
            resource: path.to_string(),
        })?;
        Ok(Box::new(BoundedReader::new(
            Cursor::new(bytes.clone()),
            path,
            max_length,
        )))
    }
}

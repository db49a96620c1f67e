use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{RepoError, Result};
use crate::manifest::{FILENAME_INDEX, FILENAME_ROOT, FILENAME_SNAPSHOT, FILENAME_TIMESTAMP};

use super::ManifestStore;

/// Manifest persistence in a local directory, one file per manifest.
///
/// Writes go through a temp file in a sibling `tmp/` directory and land with
/// `rename`, so readers never observe a partial document.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| store_err(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Component manifests currently trusted, by id. Role manifests and
    /// retained versioned roots are skipped.
    pub fn component_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.root).map_err(|e| store_err(&self.root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| store_err(&self.root, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            if is_role_filename(name) || is_versioned(name) {
                continue;
            }
            ids.push(id.to_string());
        }
        ids.sort();
        Ok(ids)
    }

    fn tmp_path(&self, filename: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let pid = std::process::id();
        let leaf = filename.replace(['/', '\\'], "_");
        self.root.join("tmp").join(format!("{pid}_{nanos}_{leaf}"))
    }
}

impl ManifestStore for DiskStore {
    fn load(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        let path = self.root.join(filename);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_err(&path, e)),
        }
    }

    fn save(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        let tmp = self.tmp_path(filename);
        if let Some(parent) = tmp.parent() {
            fs::create_dir_all(parent).map_err(|e| store_err(parent, e))?;
        }
        fs::write(&tmp, bytes).map_err(|e| store_err(&tmp, e))?;
        let dest = self.root.join(filename);
        fs::rename(&tmp, &dest).map_err(|e| store_err(&dest, e))?;
        Ok(())
    }
}

fn store_err(path: &Path, source: std::io::Error) -> RepoError {
    RepoError::Store {
        path: path.display().to_string(),
        source,
    }
}

fn is_role_filename(name: &str) -> bool {
    matches!(
        name,
        FILENAME_ROOT | FILENAME_TIMESTAMP | FILENAME_SNAPSHOT | FILENAME_INDEX
    )
}

/// `42.root.json` and friends: a leading all-digit segment marks a retained
/// versioned manifest.
fn is_versioned(name: &str) -> bool {
    name.split_once('.')
        .is_some_and(|(head, _)| !head.is_empty() && head.bytes().all(|b| b.is_ascii_digit()))
}

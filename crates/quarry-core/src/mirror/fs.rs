use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use crate::error::{RepoError, Result};

use super::{BoundedReader, Mirror};

/// A mirror rooted at a local directory. Resource paths are resolved
/// relative to the root; a leading `/` is the mirror root, not the
/// filesystem root.
#[derive(Debug, Clone)]
pub struct FsMirror {
    root: PathBuf,
}

impl FsMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a resource path under the root. Paths must stay inside the
    /// mirror: parent-directory and absolute components are refused.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(RepoError::Schema {
                        resource: path.to_string(),
                        reason: "resource path escapes the mirror root".to_string(),
                    });
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

impl Mirror for FsMirror {
    fn open(&self, path: &str, max_length: u64) -> Result<Box<dyn Read + Send>> {
        let full = self.resolve(path)?;
        let file = File::open(&full).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => RepoError::NotFound {
                resource: path.to_string(),
            },
            _ => RepoError::Transport {
                resource: path.to_string(),
                source: Box::new(e),
            },
        })?;
        Ok(Box::new(BoundedReader::new(file, path, max_length)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::fetch_bytes;

    #[test]
    fn reads_relative_to_root() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join("timestamp.json"), b"{}").unwrap();
        let mirror = FsMirror::new(dir.path());
        assert_eq!(fetch_bytes(&mirror, "/timestamp.json", 16).unwrap(), b"{}");
        assert_eq!(fetch_bytes(&mirror, "timestamp.json", 16).unwrap(), b"{}");
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mirror = FsMirror::new(dir.path());
        let err = fetch_bytes(&mirror, "/absent.json", 16).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn traversal_outside_the_root_is_refused() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = dir.path().join("mirror");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(dir.path().join("secret.json"), b"{}").unwrap();
        let mirror = FsMirror::new(&root);

        for path in ["../secret.json", "/../secret.json", "a/../../secret.json"] {
            let err = fetch_bytes(&mirror, path, 16).unwrap_err();
            assert!(
                matches!(err, RepoError::Schema { .. }),
                "expected refusal for {path}, got {err:?}"
            );
        }

        // Plain subdirectory paths still resolve.
        std::fs::create_dir(root.join("nested")).unwrap();
        std::fs::write(root.join("nested/root.json"), b"{}").unwrap();
        assert_eq!(fetch_bytes(&mirror, "/nested/root.json", 16).unwrap(), b"{}");
    }
}

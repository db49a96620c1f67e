//! The sync driver: trust-chain updates, component resolution, artifact
//! download.
//!
//! One sync runs the roles in fixed order root → timestamp → snapshot →
//! index, because each step's authority derives from the previous one. The
//! driver is sequential by design; callers wanting concurrent syncs of
//! several repositories instantiate independent [`Repository`] values over
//! separate stores.

mod download;

use std::collections::BTreeMap;
use std::io::Read;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::RepoConfig;
use crate::error::{RepoError, Result};
use crate::manifest::envelope;
use crate::manifest::{
    Component, FILENAME_INDEX, FILENAME_ROOT, FILENAME_SNAPSHOT, FILENAME_TIMESTAMP, FileHash,
    Index, RoleKind, RoleManifest, Root, Snapshot, Timestamp, URL_INDEX, URL_ROOT, URL_SNAPSHOT,
    URL_TIMESTAMP, VersionItem, fname_with_version,
};
use crate::mirror::{self, Mirror};
use crate::store::ManifestStore;

pub use download::ArtifactStream;

#[cfg(test)]
mod tests;

/// Canonical store filename for a component manifest.
pub fn component_filename(id: &str) -> String {
    format!("{id}.json")
}

/// Outcome of the speculative root refresh after a signature failure; a
/// second failure in the refreshed state is final.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RefreshState {
    Initial,
    RootRefreshed,
}

/// A client view of one remote repository: a mirror to fetch from, a store
/// of trusted manifests, and the verification pipeline between them.
#[derive(Debug)]
pub struct Repository<M, S> {
    mirror: M,
    store: S,
    config: RepoConfig,
}

impl<M: Mirror, S: ManifestStore> Repository<M, S> {
    pub fn new(mirror: M, store: S, config: RepoConfig) -> Self {
        Self {
            mirror,
            store,
            config,
        }
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn mirror(&self) -> &M {
        &self.mirror
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Bring the four role manifests up to date against the mirror.
    ///
    /// Returns whether any manifest was committed to the store. Fatal errors
    /// leave already-committed manifests in place and everything else
    /// untouched.
    pub fn ensure_manifests(&self) -> Result<bool> {
        let changed = self.update_local_root()?;
        let Some(declared) = self.with_root_refresh(|repo| repo.check_timestamp())? else {
            debug!("manifests already up to date");
            return Ok(changed);
        };
        // The snapshot step retries against the declared hash from above, so
        // a timestamp committed by the first attempt cannot turn a failing
        // retry into a no-op.
        let snapshot = self.with_root_refresh(|repo| repo.fetch_snapshot(&declared))?;

        // A mirror that rotated the root but still serves the old snapshot
        // (or vice versa) is lying to someone.
        let root = self.trusted_root()?;
        let declared_root = snapshot.declared_version(URL_ROOT)?;
        if declared_root != root.base.version {
            return Err(RepoError::Inconsistent(format!(
                "snapshot declares root version {declared_root}, trusted root is {}",
                root.base.version
            )));
        }

        self.update_local_index(&snapshot)?;
        Ok(true)
    }

    /// Walk `<v+1>.root.json` upward from the trusted root, committing each
    /// link of the rotation chain. Returns whether any rotation landed.
    pub fn update_local_root(&self) -> Result<bool> {
        let mut root = self.trusted_root()?;
        let mut changed = false;
        loop {
            let next = root.base.version + 1;
            let url = fname_with_version(URL_ROOT, next);
            let bytes = match mirror::fetch_bytes(&self.mirror, &url, self.config.max_root_bytes) {
                Ok(bytes) => bytes,
                Err(err) if err.is_not_found() => break,
                Err(err) => return Err(err),
            };
            let decoded = envelope::decode::<Root>(&bytes, &url)?;
            let candidate = &decoded.manifest;
            if candidate.base.version != next {
                return Err(RepoError::Version {
                    role: RoleKind::Root.to_string(),
                    current: root.base.version,
                    received: candidate.base.version,
                });
            }

            // The rotation must be authorized by the keys we already trust
            // and self-consistent under the keys it introduces.
            let old_role = root.role(RoleKind::Root)?;
            decoded.verify(RoleKind::Root.as_str(), &old_role.keys, old_role.threshold)?;
            let new_role = candidate.role(RoleKind::Root)?;
            decoded.verify(RoleKind::Root.as_str(), &new_role.keys, new_role.threshold)?;
            candidate.base.check_expired(Utc::now())?;

            self.store
                .save(&fname_with_version(FILENAME_ROOT, next), &bytes)?;
            self.store.save(FILENAME_ROOT, &bytes)?;
            info!(version = next, "accepted rotated root manifest");
            root = decoded.manifest;
            changed = true;
        }
        Ok(changed)
    }

    /// Fetch and validate the remote timestamp. `None` means the trusted
    /// snapshot is still current; `Some` carries the declared snapshot hash
    /// to fetch against.
    pub fn check_timestamp(&self) -> Result<Option<FileHash>> {
        let root = self.trusted_root()?;
        let bytes =
            mirror::fetch_bytes(&self.mirror, URL_TIMESTAMP, self.config.max_timestamp_bytes)?;
        let decoded = envelope::decode::<Timestamp>(&bytes, URL_TIMESTAMP)?;
        let role = root.role(RoleKind::Timestamp)?;
        decoded.verify(RoleKind::Timestamp.as_str(), &role.keys, role.threshold)?;
        let remote = &decoded.manifest;
        remote.base.check_expired(Utc::now())?;
        let declared = remote.snapshot_hash()?.clone();

        if let Some(local) = self.local_manifest::<Timestamp>(FILENAME_TIMESTAMP)? {
            if remote.base.version < local.base.version {
                return Err(RepoError::Version {
                    role: RoleKind::Timestamp.to_string(),
                    current: local.base.version,
                    received: remote.base.version,
                });
            }
            if remote.base.version == local.base.version
                && local.snapshot_hash().is_ok_and(|hash| *hash == declared)
            {
                if self.snapshot_matches(&declared)? {
                    debug!("timestamp unchanged");
                    return Ok(None);
                }
                // The stored snapshot does not match the trusted declaration:
                // an earlier sync committed this timestamp and then failed on
                // the snapshot. Re-fetch it instead of rewriting the
                // identical timestamp.
                return Ok(Some(declared));
            }
        }

        self.store.save(FILENAME_TIMESTAMP, &bytes)?;
        Ok(Some(declared))
    }

    /// Whether the stored snapshot's raw bytes satisfy `declared`.
    fn snapshot_matches(&self, declared: &FileHash) -> Result<bool> {
        let Some(bytes) = self.store.load(FILENAME_SNAPSHOT)? else {
            return Ok(false);
        };
        let expected = declared.sha256()?;
        Ok(bytes.len() as u64 == declared.length
            && hex::encode(Sha256::digest(&bytes)) == expected)
    }

    /// Refresh the snapshot when the timestamp says it moved. The raw bytes
    /// must hash to the timestamp's declaration before anything is parsed.
    pub fn update_local_snapshot(&self) -> Result<Option<Snapshot>> {
        match self.check_timestamp()? {
            Some(declared) => Ok(Some(self.fetch_snapshot(&declared)?)),
            None => Ok(None),
        }
    }

    /// Fetch, verify, and commit the snapshot a timestamp declaration points
    /// at.
    fn fetch_snapshot(&self, declared: &FileHash) -> Result<Snapshot> {
        let expected = declared.sha256()?;
        let bytes = mirror::fetch_bytes(&self.mirror, URL_SNAPSHOT, declared.length)?;
        let actual = hex::encode(Sha256::digest(&bytes));
        if actual != expected {
            return Err(RepoError::Integrity {
                resource: URL_SNAPSHOT.to_string(),
                reason: format!("sha256 {actual} does not match declared {expected}"),
            });
        }

        let decoded = envelope::decode::<Snapshot>(&bytes, URL_SNAPSHOT)?;
        let root = self.trusted_root()?;
        let role = root.role(RoleKind::Snapshot)?;
        decoded.verify(RoleKind::Snapshot.as_str(), &role.keys, role.threshold)?;
        let remote = decoded.manifest;
        remote.base.check_expired(Utc::now())?;

        // No manifest the local snapshot already tracks may move backwards.
        if let Some(local) = self.local_manifest::<Snapshot>(FILENAME_SNAPSHOT)? {
            for (url, local_version) in &local.meta {
                if let Some(remote_version) = remote.meta.get(url)
                    && remote_version.version < local_version.version
                {
                    return Err(RepoError::Version {
                        role: format!("snapshot entry {url}"),
                        current: local_version.version,
                        received: remote_version.version,
                    });
                }
            }
        }

        self.store.save(FILENAME_SNAPSHOT, &bytes)?;
        info!(version = remote.base.version, "accepted snapshot manifest");
        Ok(remote)
    }

    /// Fetch the index version the snapshot declares, unless the trusted
    /// index is already at it.
    pub fn update_local_index(&self, snapshot: &Snapshot) -> Result<bool> {
        let (url, declared) = snapshot.versioned_url(URL_INDEX)?;
        if let Some(local) = self.local_manifest::<Index>(FILENAME_INDEX)? {
            if local.base.version == declared {
                return Ok(false);
            }
            if local.base.version > declared {
                return Err(RepoError::Version {
                    role: RoleKind::Index.to_string(),
                    current: local.base.version,
                    received: declared,
                });
            }
        }

        let bytes = mirror::fetch_bytes(&self.mirror, &url, self.config.max_manifest_bytes)?;
        let decoded = envelope::decode::<Index>(&bytes, &url)?;
        let root = self.trusted_root()?;
        let role = root.role(RoleKind::Index)?;
        decoded.verify(RoleKind::Index.as_str(), &role.keys, role.threshold)?;
        let remote = &decoded.manifest;
        if remote.base.version != declared {
            return Err(RepoError::Version {
                role: RoleKind::Index.to_string(),
                current: declared,
                received: remote.base.version,
            });
        }
        remote.base.check_expired(Utc::now())?;

        self.store.save(FILENAME_INDEX, &bytes)?;
        info!(version = declared, "accepted index manifest");
        Ok(true)
    }

    /// Bring one component manifest to the version the snapshot declares and
    /// return it. Skips the fetch when the local copy is already current.
    pub fn update_component_manifest(&self, id: &str) -> Result<Component> {
        let index = self
            .trusted_index()?
            .ok_or_else(|| RepoError::Inconsistent("no trusted index; sync first".to_string()))?;
        let item = index.component(id)?;
        if item.yanked && !self.config.allow_yanked {
            return Err(RepoError::ComponentYanked(id.to_string()));
        }
        let snapshot = self.trusted_snapshot()?.ok_or_else(|| {
            RepoError::Inconsistent("no trusted snapshot; sync first".to_string())
        })?;
        let declared = snapshot.declared_version(&item.url)?;

        let filename = component_filename(id);
        let local = self.local_manifest::<Component>(&filename)?;
        if let Some(local) = &local {
            if local.base.version == declared {
                debug!(component = id, version = declared, "component manifest current");
                return Ok(local.clone());
            }
            if declared < local.base.version {
                return Err(RepoError::Version {
                    role: id.to_string(),
                    current: local.base.version,
                    received: declared,
                });
            }
        }

        let url = fname_with_version(&item.url, declared);
        let bytes = mirror::fetch_bytes(&self.mirror, &url, self.config.max_manifest_bytes)?;
        let decoded = envelope::decode::<Component>(&bytes, &url)?;
        let keys = index.owner_keys(&item.owner)?;
        decoded.verify(id, keys, item.threshold)?;
        let remote = decoded.manifest;
        remote.base.check_expired(Utc::now())?;
        if remote.base.version != declared {
            return Err(RepoError::Version {
                role: id.to_string(),
                current: declared,
                received: remote.base.version,
            });
        }

        self.store.save(&filename, &bytes)?;
        info!(component = id, version = declared, "accepted component manifest");
        Ok(remote)
    }

    /// Open a verified artifact stream for a version item. The stream checks
    /// the declared sha256 and byte length as it is drained; content read
    /// before a failure must be discarded.
    pub fn download_component(&self, item: &VersionItem) -> Result<ArtifactStream<Box<dyn Read + Send>>> {
        let expected = item.hash.sha256()?.to_string();
        let reader = self.mirror.open(&item.url, item.hash.length)?;
        Ok(ArtifactStream::new(
            reader,
            &item.url,
            expected,
            item.hash.length,
        ))
    }

    /// Pick a version from a component's platform map.
    ///
    /// An empty `requested` selects the maximum by semver precedence, with
    /// non-semver strings ordering after every valid semver version.
    pub fn select_version(
        &self,
        id: &str,
        available: &BTreeMap<String, VersionItem>,
        requested: &str,
    ) -> Result<(String, VersionItem)> {
        if available.is_empty() {
            return Err(RepoError::NoVersions {
                component: id.to_string(),
            });
        }
        if requested.is_empty() {
            let best = available
                .keys()
                .max_by(|a, b| compare_versions(a, b))
                .ok_or_else(|| RepoError::NoVersions {
                    component: id.to_string(),
                })?;
            return Ok((best.clone(), available[best].clone()));
        }
        match available.get(requested) {
            Some(item) => Ok((requested.to_string(), item.clone())),
            None => Err(RepoError::UnknownVersion {
                component: id.to_string(),
                version: requested.to_string(),
            }),
        }
    }

    /// Resolve a component id (and optional explicit version) to a concrete
    /// artifact for the configured platform.
    pub fn select_component(&self, id: &str, requested: &str) -> Result<(String, VersionItem)> {
        let component = self.update_component_manifest(id)?;
        let empty = BTreeMap::new();
        let available = component
            .versions_for(&self.config.platform)
            .unwrap_or(&empty);
        self.select_version(id, available, requested)
    }

    /// The trusted root, decoded. Present by construction: the store's
    /// bootstrap anchor.
    pub fn trusted_root(&self) -> Result<Root> {
        let bytes = self.store.load_root()?;
        Ok(envelope::decode::<Root>(&bytes, FILENAME_ROOT)?.manifest)
    }

    pub fn trusted_snapshot(&self) -> Result<Option<Snapshot>> {
        self.local_manifest(FILENAME_SNAPSHOT)
    }

    pub fn trusted_index(&self) -> Result<Option<Index>> {
        self.local_manifest(FILENAME_INDEX)
    }

    /// Decode a manifest already committed to the store. Trusted at save
    /// time, so signatures are not re-checked here.
    fn local_manifest<T: RoleManifest>(&self, filename: &str) -> Result<Option<T>> {
        match self.store.load(filename)? {
            Some(bytes) => Ok(Some(envelope::decode::<T>(&bytes, filename)?.manifest)),
            None => Ok(None),
        }
    }

    /// Run `op`, allowing one speculative root refresh on a signature
    /// failure: the mirror may have rotated keys we have not observed yet.
    fn with_root_refresh<T>(&self, op: impl Fn(&Self) -> Result<T>) -> Result<T> {
        let mut state = RefreshState::Initial;
        loop {
            match op(self) {
                Err(err) if err.is_signature() && state == RefreshState::Initial => {
                    warn!(error = %err, "signature failure, refreshing root and retrying once");
                    self.update_local_root()?;
                    state = RefreshState::RootRefreshed;
                }
                result => return result,
            }
        }
    }
}

/// Ascending version order: semver precedence among valid versions,
/// lexicographic among the rest, and every non-semver string after every
/// semver one.
fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

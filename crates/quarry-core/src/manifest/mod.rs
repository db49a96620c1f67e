//! Role manifest payloads and their invariant checks.
//!
//! Five manifest kinds share a common [`SignedBase`] header: root, timestamp,
//! snapshot, index, and per-component manifests. The signed envelope around
//! them lives in [`envelope`]; this module holds the payload shapes, the
//! canonical filenames and mirror URLs, and the version/expiry/spec checks
//! each payload must pass before it is trusted.

pub mod envelope;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::crypto::KeyInfo;
use crate::error::{RepoError, Result};

/// Specification version this implementation writes and accepts (same major).
pub const SPEC_VERSION: &str = "0.1.0";

/// Hash algorithm key that must be present in every [`FileHash`].
pub const SHA256: &str = "sha256";

pub const FILENAME_ROOT: &str = "root.json";
pub const FILENAME_TIMESTAMP: &str = "timestamp.json";
pub const FILENAME_SNAPSHOT: &str = "snapshot.json";
pub const FILENAME_INDEX: &str = "index.json";

pub const URL_ROOT: &str = "/root.json";
pub const URL_TIMESTAMP: &str = "/timestamp.json";
pub const URL_SNAPSHOT: &str = "/snapshot.json";
pub const URL_INDEX: &str = "/index.json";

/// Versioned variant of a manifest name: the version prefixes the final path
/// segment, any directory prefix is preserved.
pub fn fname_with_version(fname: &str, version: u64) -> String {
    match fname.rsplit_once('/') {
        Some((dir, base)) => format!("{dir}/{version}.{base}"),
        None => format!("{version}.{fname}"),
    }
}

/// The manifest kinds, as spelled in the `_type` field and in root role maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Root,
    Timestamp,
    Snapshot,
    Index,
    Component,
}

impl RoleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RoleKind::Root => "root",
            RoleKind::Timestamp => "timestamp",
            RoleKind::Snapshot => "snapshot",
            RoleKind::Index => "index",
            RoleKind::Component => "component",
        }
    }
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header shared by every role manifest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedBase {
    #[serde(rename = "_type")]
    pub ty: RoleKind,
    pub spec_version: String,
    pub expires: DateTime<Utc>,
    pub version: u64,
}

impl SignedBase {
    /// Reject manifests past their expiration instant. No skew tolerance.
    pub fn check_expired(&self, now: DateTime<Utc>) -> Result<()> {
        if self.expires < now {
            return Err(RepoError::Expired {
                role: self.ty.to_string(),
                expires: self.expires,
            });
        }
        Ok(())
    }

    /// Spec-version compatibility: the major version must match ours;
    /// minor/patch skew is tolerated.
    pub fn check_spec_version(&self) -> Result<()> {
        let ours = semver::Version::parse(SPEC_VERSION).map_err(|e| RepoError::Schema {
            resource: self.ty.to_string(),
            reason: format!("built-in spec version is invalid: {e}"),
        })?;
        let theirs =
            semver::Version::parse(&self.spec_version).map_err(|e| RepoError::Schema {
                resource: self.ty.to_string(),
                reason: format!("unparseable spec_version `{}`: {e}", self.spec_version),
            })?;
        if theirs.major != ours.major {
            return Err(RepoError::Schema {
                resource: self.ty.to_string(),
                reason: format!(
                    "incompatible spec_version `{}` (supported major: {})",
                    self.spec_version, ours.major
                ),
            });
        }
        Ok(())
    }
}

/// Integrity declaration for a dependent file: per-algorithm digests plus the
/// exact byte length.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHash {
    pub hashes: BTreeMap<String, String>,
    pub length: u64,
}

impl FileHash {
    /// The mandatory sha256 digest. Unknown algorithms in the map are
    /// ignored; a missing sha256 entry makes the declaration unusable.
    pub fn sha256(&self) -> Result<&str> {
        self.hashes
            .get(SHA256)
            .map(String::as_str)
            .ok_or_else(|| RepoError::Schema {
                resource: "file hash".to_string(),
                reason: "no sha256 digest declared".to_string(),
            })
    }
}

/// Freshness declaration for a dependent manifest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    pub version: u64,
}

/// One role's entry in the root manifest: where to fetch it, who may sign it,
/// and how many of them must.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub keys: BTreeMap<String, KeyInfo>,
    pub threshold: u32,
}

/// Root manifest: the trust anchor mapping each role to its key set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Root {
    #[serde(flatten)]
    pub base: SignedBase,
    pub roles: BTreeMap<RoleKind, Role>,
}

impl Root {
    pub fn role(&self, kind: RoleKind) -> Result<&Role> {
        self.roles.get(&kind).ok_or_else(|| RepoError::Schema {
            resource: RoleKind::Root.to_string(),
            reason: format!("no `{kind}` role declared"),
        })
    }
}

/// Timestamp manifest: pins the snapshot's digest and length.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Timestamp {
    #[serde(flatten)]
    pub base: SignedBase,
    pub meta: BTreeMap<String, FileHash>,
}

impl Timestamp {
    /// The declared hash of the snapshot resource.
    pub fn snapshot_hash(&self) -> Result<&FileHash> {
        self.meta.get(URL_SNAPSHOT).ok_or_else(|| RepoError::Schema {
            resource: RoleKind::Timestamp.to_string(),
            reason: format!("no entry for {URL_SNAPSHOT}"),
        })
    }
}

/// Snapshot manifest: the version of every non-timestamp manifest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(flatten)]
    pub base: SignedBase,
    pub meta: BTreeMap<String, FileVersion>,
}

impl Snapshot {
    pub fn declared_version(&self, url: &str) -> Result<u64> {
        self.meta
            .get(url)
            .map(|fv| fv.version)
            .ok_or_else(|| RepoError::Inconsistent(format!("snapshot has no entry for {url}")))
    }

    /// Versioned mirror URL for a manifest the snapshot declares.
    pub fn versioned_url(&self, url: &str) -> Result<(String, u64)> {
        let version = self.declared_version(url)?;
        Ok((fname_with_version(url, version), version))
    }
}

/// An owner in the index: display name plus the keys component manifests are
/// verified against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub name: String,
    pub keys: BTreeMap<String, KeyInfo>,
}

/// A component's registration in the index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentItem {
    pub owner: String,
    pub url: String,
    pub threshold: u32,
    pub yanked: bool,
}

/// Index manifest: owner registry, component registry, defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Index {
    #[serde(flatten)]
    pub base: SignedBase,
    pub owners: BTreeMap<String, Owner>,
    pub components: BTreeMap<String, ComponentItem>,
    pub default_components: Vec<String>,
}

impl Index {
    pub fn component(&self, id: &str) -> Result<&ComponentItem> {
        self.components
            .get(id)
            .ok_or_else(|| RepoError::UnknownComponent(id.to_string()))
    }

    pub fn owner_keys(&self, owner_id: &str) -> Result<&BTreeMap<String, KeyInfo>> {
        self.owners
            .get(owner_id)
            .map(|owner| &owner.keys)
            .ok_or_else(|| RepoError::Schema {
                resource: RoleKind::Index.to_string(),
                reason: format!("component references unknown owner `{owner_id}`"),
            })
    }
}

/// A downloadable artifact for one platform/version pair. `entry` and
/// `dependencies` are carried verbatim for the installer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionItem {
    pub url: String,
    #[serde(flatten)]
    pub hash: FileHash,
    #[serde(default)]
    pub entry: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Component manifest: platform → version string → artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Component {
    #[serde(flatten)]
    pub base: SignedBase,
    pub name: String,
    pub description: String,
    pub platforms: BTreeMap<String, BTreeMap<String, VersionItem>>,
}

impl Component {
    /// Versions published for one platform, if any.
    pub fn versions_for(&self, platform: &str) -> Option<&BTreeMap<String, VersionItem>> {
        self.platforms.get(platform)
    }
}

/// Implemented by every role payload so generic decode/verify paths can name
/// the expected kind and reach the shared header.
pub trait RoleManifest: Serialize + DeserializeOwned {
    const KIND: RoleKind;

    fn base(&self) -> &SignedBase;
}

macro_rules! role_manifest {
    ($ty:ident, $kind:expr) => {
        impl RoleManifest for $ty {
            const KIND: RoleKind = $kind;

            fn base(&self) -> &SignedBase {
                &self.base
            }
        }
    };
}

role_manifest!(Root, RoleKind::Root);
role_manifest!(Timestamp, RoleKind::Timestamp);
role_manifest!(Snapshot, RoleKind::Snapshot);
role_manifest!(Index, RoleKind::Index);
role_manifest!(Component, RoleKind::Component);

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn base(ty: RoleKind) -> SignedBase {
        SignedBase {
            ty,
            spec_version: SPEC_VERSION.to_string(),
            expires: Utc.with_ymd_and_hms(2220, 5, 11, 4, 51, 8).unwrap(),
            version: 42,
        }
    }

    #[test]
    fn fname_with_version_prefixes_the_leaf() {
        assert_eq!(fname_with_version("root.json", 1), "1.root.json");
        assert_eq!(fname_with_version("/root.json", 1), "/1.root.json");
        assert_eq!(fname_with_version("/foo/root.json", 7), "/foo/7.root.json");
    }

    #[test]
    fn expired_manifest_is_rejected() {
        let mut b = base(RoleKind::Timestamp);
        assert!(b.check_expired(Utc::now()).is_ok());
        b.expires = Utc.with_ymd_and_hms(2000, 5, 12, 4, 51, 8).unwrap();
        let err = b.check_expired(Utc::now()).unwrap_err();
        assert!(matches!(err, RepoError::Expired { .. }));
    }

    #[test]
    fn spec_version_major_must_match() {
        let mut b = base(RoleKind::Timestamp);
        assert!(b.check_spec_version().is_ok());
        b.spec_version = "0.9.3".to_string();
        assert!(b.check_spec_version().is_ok());
        b.spec_version = "10.1.0".to_string();
        assert!(matches!(
            b.check_spec_version().unwrap_err(),
            RepoError::Schema { .. }
        ));
        b.spec_version = "not-a-version".to_string();
        assert!(matches!(
            b.check_spec_version().unwrap_err(),
            RepoError::Schema { .. }
        ));
    }

    #[test]
    fn file_hash_requires_sha256() {
        let mut hash = FileHash {
            hashes: BTreeMap::from([("blake3".to_string(), "aa".to_string())]),
            length: 10,
        };
        assert!(hash.sha256().is_err());
        hash.hashes.insert(SHA256.to_string(), "123456".to_string());
        assert_eq!(hash.sha256().unwrap(), "123456");
    }

    #[test]
    fn snapshot_versioned_url() {
        let snapshot = Snapshot {
            base: base(RoleKind::Snapshot),
            meta: BTreeMap::from([("/index.json".to_string(), FileVersion { version: 5 })]),
        };
        assert_eq!(
            snapshot.versioned_url(URL_INDEX).unwrap(),
            ("/5.index.json".to_string(), 5)
        );
        assert!(snapshot.versioned_url("/missing.json").is_err());
    }
}

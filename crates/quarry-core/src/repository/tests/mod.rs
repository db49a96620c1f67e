
use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

use crate::config::RepoConfig;
use crate::crypto::PrivateKey;
use crate::manifest::envelope;
use crate::manifest::{
    Component, ComponentItem, FILENAME_ROOT, FileHash, FileVersion, Index, Owner, Role,
    RoleKind, RoleManifest, Root, SHA256, SPEC_VERSION, SignedBase, Snapshot, Timestamp,
    URL_INDEX, URL_ROOT, URL_SNAPSHOT, URL_TIMESTAMP, VersionItem,
};
use crate::mirror::MemoryMirror;
use crate::store::MemoryStore;

use super::Repository;

pub(super) const TEST_PLATFORM: &str = "a-platform";
pub(super) const ARTIFACT: &[u8] = b"just some string for testing";
pub(super) const ARTIFACT_SHA256: &str =
    "963ba8374bac92a8a00fc21ca458e0c2016bf8930519e5271f7b49d16762a184";

pub(super) fn far_future() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2220, 5, 11, 4, 51, 8).unwrap()
}

pub(super) fn long_expired() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 5, 11, 4, 51, 8).unwrap()
}

pub(super) fn base(ty: RoleKind, version: u64) -> SignedBase {
    SignedBase {
        ty,
        spec_version: SPEC_VERSION.to_string(),
        expires: far_future(),
        version,
    }
}

/// A root where every role is held by `key` with threshold 1.
pub(super) fn root_manifest(key: &PrivateKey, version: u64) -> Root {
    let keys = BTreeMap::from([(key.key_id(), key.public())]);
    let role = |url: Option<&str>| Role {
        url: url.map(str::to_string),
        keys: keys.clone(),
        threshold: 1,
    };
    Root {
        base: base(RoleKind::Root, version),
        roles: BTreeMap::from([
            (RoleKind::Root, role(Some(URL_ROOT))),
            (RoleKind::Timestamp, role(Some(URL_TIMESTAMP))),
            (RoleKind::Snapshot, role(Some(URL_SNAPSHOT))),
            (RoleKind::Index, role(Some(URL_INDEX))),
            (RoleKind::Component, role(None)),
        ]),
    }
}

pub(super) fn snapshot_manifest(version: u64, root_version: u64, index_version: u64) -> Snapshot {
    Snapshot {
        base: base(RoleKind::Snapshot, version),
        meta: BTreeMap::from([
            (URL_ROOT.to_string(), FileVersion { version: root_version }),
            (URL_INDEX.to_string(), FileVersion { version: index_version }),
            ("/foo.json".to_string(), FileVersion { version: 7 }),
        ]),
    }
}

/// A timestamp declaring `snapshot_bytes` at `version`.
pub(super) fn timestamp_for(version: u64, snapshot_bytes: &[u8]) -> Timestamp {
    Timestamp {
        base: base(RoleKind::Timestamp, version),
        meta: BTreeMap::from([(
            URL_SNAPSHOT.to_string(),
            FileHash {
                hashes: BTreeMap::from([(SHA256.to_string(), sha256_hex(snapshot_bytes))]),
                length: snapshot_bytes.len() as u64,
            },
        )]),
    }
}

pub(super) fn index_manifest(version: u64, owner_key: &PrivateKey, yanked: bool) -> Index {
    Index {
        base: base(RoleKind::Index, version),
        owners: BTreeMap::from([(
            "bar".to_string(),
            Owner {
                name: "Bar".to_string(),
                keys: BTreeMap::from([(owner_key.key_id(), owner_key.public())]),
            },
        )]),
        components: BTreeMap::from([(
            "foo".to_string(),
            ComponentItem {
                owner: "bar".to_string(),
                url: "/foo.json".to_string(),
                threshold: 1,
                yanked,
            },
        )]),
        default_components: Vec::new(),
    }
}

pub(super) fn component_manifest(version: u64) -> Component {
    Component {
        base: base(RoleKind::Component, version),
        name: "Foo".to_string(),
        description: "foo does stuff".to_string(),
        platforms: BTreeMap::from([(
            TEST_PLATFORM.to_string(),
            BTreeMap::from([("2.0.1".to_string(), version_item())]),
        )]),
    }
}

pub(super) fn version_item() -> VersionItem {
    VersionItem {
        url: "/foo-2.0.1.tar.gz".to_string(),
        hash: FileHash {
            hashes: BTreeMap::from([(SHA256.to_string(), ARTIFACT_SHA256.to_string())]),
            length: ARTIFACT.len() as u64,
        },
        entry: String::new(),
        dependencies: Vec::new(),
    }
}

pub(super) fn encode_signed<T: RoleManifest>(manifest: &T, keys: &[&PrivateKey]) -> Vec<u8> {
    let owned: Vec<PrivateKey> = keys.iter().map(|key| (*key).clone()).collect();
    envelope::encode(manifest, &owned).expect("encode manifest")
}

pub(super) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A repository over in-memory collaborators, bootstrapped with a trusted
/// root at version 42.
pub(super) fn new_repo() -> (Repository<MemoryMirror, MemoryStore>, PrivateKey) {
    let key = PrivateKey::from_seed(&[42u8; 32]);
    let store = MemoryStore::new();
    store.seed(
        FILENAME_ROOT,
        encode_signed(&root_manifest(&key, 42), &[&key]),
    );
    let config = RepoConfig {
        platform: TEST_PLATFORM.to_string(),
        ..RepoConfig::default()
    };
    (Repository::new(MemoryMirror::new(), store, config), key)
}

/// Publish a consistent timestamp/snapshot/index set to the mirror, all
/// signed by `key`.
pub(super) fn publish_chain(
    repo: &Repository<MemoryMirror, MemoryStore>,
    key: &PrivateKey,
    timestamp_version: u64,
    snapshot: &Snapshot,
    index: &Index,
) {
    let mirror = repo.mirror();
    let (index_url, _) = snapshot.versioned_url(URL_INDEX).expect("index entry");
    mirror.insert(index_url, encode_signed(index, &[key]));
    let snapshot_bytes = encode_signed(snapshot, &[key]);
    let timestamp = timestamp_for(timestamp_version, &snapshot_bytes);
    mirror.insert(URL_SNAPSHOT, snapshot_bytes);
    mirror.insert(URL_TIMESTAMP, encode_signed(&timestamp, &[key]));
}

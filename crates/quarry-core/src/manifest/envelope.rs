//! The signed-document envelope: `{signed: payload, signatures: [...]}`.
//!
//! Canonicalization is serde_json with sorted map keys, so a payload encodes
//! to the same bytes on every side and digests reproduce. Verification runs
//! over the canonical bytes of the `signed` subtree as re-encoded from the
//! parsed document, never over the raw transport bytes.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::crypto::{KeyInfo, PrivateKey};
use crate::error::{RepoError, Result};
use crate::manifest::RoleManifest;

/// One signature over the canonical `signed` bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub keyid: String,
    /// Base64-encoded ed25519 signature.
    pub sig: String,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    signed: serde_json::Value,
    signatures: Vec<Signature>,
}

/// A decoded manifest together with what is needed to verify it.
#[derive(Debug)]
pub struct Decoded<T> {
    pub manifest: T,
    pub signatures: Vec<Signature>,
    /// Canonical bytes of the `signed` subtree.
    pub signed_bytes: Vec<u8>,
}

impl<T> Decoded<T> {
    /// Enforce the role's signature threshold over this document.
    pub fn verify(&self, role: &str, keys: &BTreeMap<String, KeyInfo>, threshold: u32) -> Result<()> {
        verify_threshold(role, &self.signed_bytes, &self.signatures, keys, threshold)
    }
}

/// Parse an envelope and extract a payload of the expected kind.
///
/// Validates the `_type` tag and spec-version compatibility; signature,
/// expiry, and version checks are the caller's responsibility because they
/// need context (key sets, wall clock, trusted versions).
pub fn decode<T: RoleManifest>(bytes: &[u8], resource: &str) -> Result<Decoded<T>> {
    let envelope: Envelope = serde_json::from_slice(bytes).map_err(|e| RepoError::Schema {
        resource: resource.to_string(),
        reason: format!("not a signed manifest: {e}"),
    })?;
    let signed_bytes = canonical_bytes(&envelope.signed, resource)?;
    let manifest: T =
        serde_json::from_value(envelope.signed).map_err(|e| RepoError::Schema {
            resource: resource.to_string(),
            reason: format!("payload does not match `{}` layout: {e}", T::KIND),
        })?;
    if manifest.base().ty != T::KIND {
        return Err(RepoError::Schema {
            resource: resource.to_string(),
            reason: format!("expected `{}`, found `{}`", T::KIND, manifest.base().ty),
        });
    }
    manifest.base().check_spec_version()?;
    Ok(Decoded {
        manifest,
        signatures: envelope.signatures,
        signed_bytes,
    })
}

/// Produce the canonical signed document for a payload, signed by `signers`.
pub fn encode<T: RoleManifest>(payload: &T, signers: &[PrivateKey]) -> Result<Vec<u8>> {
    let signed = serde_json::to_value(payload).map_err(|e| RepoError::Schema {
        resource: T::KIND.to_string(),
        reason: format!("unencodable payload: {e}"),
    })?;
    let signed_bytes = canonical_bytes(&signed, T::KIND.as_str())?;
    let signatures = signers
        .iter()
        .map(|key| Signature {
            keyid: key.key_id(),
            sig: key.sign(&signed_bytes),
        })
        .collect();
    let envelope = Envelope { signed, signatures };
    serde_json::to_vec(&envelope).map_err(|e| RepoError::Schema {
        resource: T::KIND.to_string(),
        reason: format!("unencodable envelope: {e}"),
    })
}

/// Count distinct authorized keys with a valid signature; at least
/// `threshold` of them must sign. Unknown keys and duplicate key ids are
/// ignored rather than rejected.
pub fn verify_threshold(
    role: &str,
    signed_bytes: &[u8],
    signatures: &[Signature],
    keys: &BTreeMap<String, KeyInfo>,
    threshold: u32,
) -> Result<()> {
    let mut valid: BTreeSet<&str> = BTreeSet::new();
    for signature in signatures {
        if valid.contains(signature.keyid.as_str()) {
            continue;
        }
        let Some(key) = keys.get(&signature.keyid) else {
            continue;
        };
        if key.signature_valid(signed_bytes, &signature.sig) {
            valid.insert(&signature.keyid);
        }
    }
    if (valid.len() as u32) < threshold {
        return Err(RepoError::Signature {
            role: role.to_string(),
            threshold,
            valid: valid.len() as u32,
        });
    }
    Ok(())
}

fn canonical_bytes(signed: &serde_json::Value, resource: &str) -> Result<Vec<u8>> {
    serde_json::to_vec(signed).map_err(|e| RepoError::Schema {
        resource: resource.to_string(),
        reason: format!("uncanonicalizable payload: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::manifest::{FileHash, RoleKind, SHA256, SignedBase, Timestamp, URL_SNAPSHOT, SPEC_VERSION};

    fn timestamp() -> Timestamp {
        Timestamp {
            base: SignedBase {
                ty: RoleKind::Timestamp,
                spec_version: SPEC_VERSION.to_string(),
                expires: Utc.with_ymd_and_hms(2220, 5, 11, 4, 51, 8).unwrap(),
                version: 42,
            },
            meta: BTreeMap::from([(
                URL_SNAPSHOT.to_string(),
                FileHash {
                    hashes: BTreeMap::from([(SHA256.to_string(), "123456".to_string())]),
                    length: 1001,
                },
            )]),
        }
    }

    fn keyring(keys: &[&PrivateKey]) -> BTreeMap<String, KeyInfo> {
        keys.iter().map(|k| (k.key_id(), k.public())).collect()
    }

    #[test]
    fn decode_encode_roundtrip() {
        let key = PrivateKey::from_seed(&[1u8; 32]);
        let bytes = encode(&timestamp(), std::slice::from_ref(&key)).unwrap();
        let decoded: Decoded<Timestamp> = decode(&bytes, "timestamp.json").unwrap();
        assert_eq!(decoded.manifest, timestamp());
        assert_eq!(decoded.signatures.len(), 1);
        decoded.verify("timestamp", &keyring(&[&key]), 1).unwrap();

        let reencoded = encode(&decoded.manifest, std::slice::from_ref(&key)).unwrap();
        assert_eq!(bytes, reencoded);
    }

    #[test]
    fn wrong_kind_is_a_schema_error() {
        let key = PrivateKey::from_seed(&[1u8; 32]);
        let bytes = encode(&timestamp(), std::slice::from_ref(&key)).unwrap();
        let err = decode::<crate::manifest::Snapshot>(&bytes, "snapshot.json").unwrap_err();
        assert!(matches!(err, RepoError::Schema { .. }));
    }

    #[test]
    fn threshold_counts_distinct_authorized_keys() {
        let k1 = PrivateKey::from_seed(&[1u8; 32]);
        let k2 = PrivateKey::from_seed(&[2u8; 32]);
        let outsider = PrivateKey::from_seed(&[3u8; 32]);
        let bytes = encode(&timestamp(), &[k1.clone(), k2.clone()]).unwrap();
        let decoded: Decoded<Timestamp> = decode(&bytes, "timestamp.json").unwrap();

        let authorized = keyring(&[&k1, &k2]);
        decoded.verify("timestamp", &authorized, 2).unwrap();

        // One signer short of the threshold.
        let err = decoded
            .verify("timestamp", &keyring(&[&k1]), 2)
            .unwrap_err();
        assert!(matches!(
            err,
            RepoError::Signature {
                threshold: 2,
                valid: 1,
                ..
            }
        ));

        // A valid signature from an unauthorized key does not count.
        let outsider_signed = encode(&timestamp(), &[k1.clone(), outsider]).unwrap();
        let decoded: Decoded<Timestamp> = decode(&outsider_signed, "timestamp.json").unwrap();
        let err = decoded.verify("timestamp", &authorized, 2).unwrap_err();
        assert!(matches!(err, RepoError::Signature { valid: 1, .. }));
    }

    #[test]
    fn duplicate_signatures_count_once() {
        let key = PrivateKey::from_seed(&[1u8; 32]);
        let bytes = encode(&timestamp(), &[key.clone(), key.clone()]).unwrap();
        let decoded: Decoded<Timestamp> = decode(&bytes, "timestamp.json").unwrap();
        let err = decoded.verify("timestamp", &keyring(&[&key]), 2).unwrap_err();
        assert!(matches!(err, RepoError::Signature { valid: 1, .. }));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let key = PrivateKey::from_seed(&[1u8; 32]);
        let bytes = encode(&timestamp(), std::slice::from_ref(&key)).unwrap();
        let tampered = String::from_utf8(bytes).unwrap().replace("1001", "1002");
        let decoded: Decoded<Timestamp> = decode(tampered.as_bytes(), "timestamp.json").unwrap();
        let err = decoded.verify("timestamp", &keyring(&[&key]), 1).unwrap_err();
        assert!(matches!(err, RepoError::Signature { .. }));
    }
}

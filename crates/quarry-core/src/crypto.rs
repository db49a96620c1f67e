//! Ed25519 key material for manifest signing and verification.
//!
//! Public keys travel inside manifests as [`KeyInfo`] records; a key's id is
//! the SHA-256 over its scheme tag and public value, so both sides derive the
//! same id without coordination. Private keys exist only for tests and for
//! the repository-authoring side of the house.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RepoError, Result};

/// Key scheme tag carried in every [`KeyInfo`].
pub const KEY_TYPE_ED25519: &str = "ed25519";

/// A public key as it appears in root and index manifests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    #[serde(rename = "keytype")]
    pub key_type: String,
    /// Base64-encoded 32-byte ed25519 public key.
    pub value: String,
}

impl KeyInfo {
    pub fn new_ed25519(public: &VerifyingKey) -> Self {
        Self {
            key_type: KEY_TYPE_ED25519.to_string(),
            value: BASE64.encode(public.to_bytes()),
        }
    }

    /// Derive the key id: hex SHA-256 over the scheme tag and public value.
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key_type.as_bytes());
        hasher.update(b":");
        hasher.update(self.value.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn verifying_key(&self) -> Result<VerifyingKey> {
        if self.key_type != KEY_TYPE_ED25519 {
            return Err(RepoError::Schema {
                resource: "key".to_string(),
                reason: format!("unsupported key type `{}`", self.key_type),
            });
        }
        let bytes = BASE64.decode(&self.value).map_err(|e| RepoError::Schema {
            resource: "key".to_string(),
            reason: format!("public key is not valid base64: {e}"),
        })?;
        let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| RepoError::Schema {
            resource: "key".to_string(),
            reason: "public key must be exactly 32 bytes".to_string(),
        })?;
        VerifyingKey::from_bytes(&bytes).map_err(|e| RepoError::Schema {
            resource: "key".to_string(),
            reason: format!("invalid ed25519 public key: {e}"),
        })
    }

    /// Check a base64 signature over `message`. Any decoding or scheme
    /// problem counts as an invalid signature rather than an error, so a
    /// single garbage signature cannot abort threshold counting.
    pub fn signature_valid(&self, message: &[u8], sig_b64: &str) -> bool {
        let Ok(key) = self.verifying_key() else {
            return false;
        };
        let Ok(sig_bytes) = BASE64.decode(sig_b64) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
            return false;
        };
        key.verify(message, &Signature::from_bytes(&sig_bytes)).is_ok()
    }
}

/// Signing half of a keypair. Kept out of manifests; used by tests and by
/// tooling that publishes to a mirror.
#[derive(Clone)]
pub struct PrivateKey {
    signing: SigningKey,
}

impl PrivateKey {
    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    pub fn public(&self) -> KeyInfo {
        KeyInfo::new_ed25519(&self.signing.verifying_key())
    }

    pub fn key_id(&self) -> String {
        self.public().id()
    }

    /// Sign `message`, returning the base64 signature used in envelopes.
    pub fn sign(&self, message: &[u8]) -> String {
        BASE64.encode(self.signing.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("key_id", &self.key_id())
            .finish()
    }
}

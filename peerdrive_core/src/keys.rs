//! Key derivation for the two logs of a drive.
//!
//! A drive has one root of trust: the metadata log's keypair. The content
//! log's keypair is derived deterministically from the metadata secret
//! key, so holding the metadata secret is enough to write both logs, and
//! a reader that only has the metadata public key recovers the content
//! public key from the metadata header instead.
//!
//! ## Derivation chain
//!
//! ```text
//! metadata secret key [64 bytes]
//!     |
//!     v
//! blake3::derive_key("hyperdri", secret || le64(1)) -> seed [32 bytes]
//!     |
//!     v
//! Ed25519 seed keypair -> (content public, content secret)
//! ```
//!
//! The seed and the KDF input are zeroized before returning.

use ed25519_dalek::{SigningKey, VerifyingKey};
use zeroize::Zeroize;

use crate::{PUBLIC_KEY_SIZE, SECRET_KEY_SIZE};

/// KDF context for content-keypair derivation. Fixed by the wire format.
pub const CONTENT_KDF_CONTEXT: &str = "hyperdri";

/// Subkey id for the content keypair.
const CONTENT_SUBKEY_ID: u64 = 1;

/// KDF context for discovery keys.
const DISCOVERY_CONTEXT: &str = "pd/discovery";

/// An Ed25519 keypair in the layout the logs persist: 32-byte public key
/// and 64-byte secret key (seed plus public half).
#[derive(Clone)]
pub struct Keypair {
    pub public: [u8; PUBLIC_KEY_SIZE],
    pub secret: [u8; SECRET_KEY_SIZE],
}

impl Keypair {
    /// Builds the persisted layout from a signing key.
    pub fn from_signing_key(signing: &SigningKey) -> Self {
        Self {
            public: signing.verifying_key().to_bytes(),
            secret: signing.to_keypair_bytes(),
        }
    }

    pub fn signing_key(&self) -> Result<SigningKey, ed25519_dalek::SignatureError> {
        SigningKey::from_keypair_bytes(&self.secret)
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey, ed25519_dalek::SignatureError> {
        VerifyingKey::from_bytes(&self.public)
    }
}

impl Drop for Keypair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret half.
        f.debug_struct("Keypair")
            .field("public", &data_hex(&self.public))
            .finish_non_exhaustive()
    }
}

fn data_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Derives the content log's keypair from the metadata log's secret key.
///
/// Pure and deterministic: the same metadata secret always yields the same
/// content keypair.
pub fn derive_content_keypair(metadata_secret: &[u8; SECRET_KEY_SIZE]) -> Keypair {
    let mut input = [0u8; SECRET_KEY_SIZE + 8];
    input[..SECRET_KEY_SIZE].copy_from_slice(metadata_secret);
    input[SECRET_KEY_SIZE..].copy_from_slice(&CONTENT_SUBKEY_ID.to_le_bytes());

    let mut seed = blake3::derive_key(CONTENT_KDF_CONTEXT, &input);
    let signing = SigningKey::from_bytes(&seed);
    let keypair = Keypair::from_signing_key(&signing);

    input.zeroize();
    seed.zeroize();

    keypair
}

/// Derives a log's discovery key: a public, non-reversible tag used to
/// rendezvous with peers without revealing the public key itself.
pub fn discovery_key(public_key: &[u8; PUBLIC_KEY_SIZE]) -> [u8; 32] {
    blake3::derive_key(DISCOVERY_CONTEXT, public_key)
}

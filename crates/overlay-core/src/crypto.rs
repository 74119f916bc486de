//! Cryptographic primitives for the overlay.
//!
//! Provides two things:
//!   1. BLAKE3 hashing: service ids and peer mids
//!   2. Ed25519 identities: every message is signed by its sender
//!
//! Private key bytes live in `Zeroizing` buffers and are wiped on drop.
//! There is no unsafe code in this module.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::wire::{PUBLIC_KEY_LEN, SIGNATURE_LEN};

// ── BLAKE3 ───────────────────────────────────────────────────────────────────

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Member id of a public key: the digest peers are logged and indexed by.
pub fn mid(public_key: &[u8; PUBLIC_KEY_LEN]) -> [u8; 32] {
    hash(public_key)
}

// ── Keypair ──────────────────────────────────────────────────────────────────

/// A peer's long-term Ed25519 identity.
///
/// Loaded (or generated) once at startup. The public key rides in the auth
/// payload of every message; the private key never leaves this struct.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Keypair {
    /// Private key seed. Zeroized on drop, never exposed directly.
    private: Zeroizing<[u8; 32]>,
    /// Public key, included in every outgoing message.
    pub public: [u8; PUBLIC_KEY_LEN],
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut *seed);
        Self::from_private(*seed)
    }

    /// Reconstruct a keypair from stored private key bytes.
    /// The public key is derived deterministically from the private key.
    pub fn from_private(private_bytes: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&private_bytes);
        Self {
            private: Zeroizing::new(private_bytes),
            public: signing.verifying_key().to_bytes(),
        }
    }

    /// Serialize the private key for persistent storage.
    ///
    /// The public key is not stored; it is derived on load.
    pub fn private_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(*self.private)
    }

    /// Sign `data`, returning the raw 64-byte signature.
    pub fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_LEN] {
        SigningKey::from_bytes(&self.private).sign(data).to_bytes()
    }

    pub fn mid(&self) -> [u8; 32] {
        mid(&self.public)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

/// Check `signature` over `data` against a claimed public key.
pub fn verify(
    public_key: &[u8; PUBLIC_KEY_LEN],
    data: &[u8],
    signature: &[u8; SIGNATURE_LEN],
) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature = Signature::from_bytes(signature);
    key.verify(data, &signature)
        .map_err(|_| CryptoError::BadSignature)
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("public key is not a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("signature verification failed")]
    BadSignature,

    #[error("key must be {expected} bytes, got {got}")]
    KeyLength { expected: usize, got: usize },
}

/// Turn length-prefixed key bytes from the wire into a fixed key.
pub fn public_key_from_slice(bytes: &[u8]) -> Result<[u8; PUBLIC_KEY_LEN], CryptoError> {
    <[u8; PUBLIC_KEY_LEN]>::try_from(bytes).map_err(|_| CryptoError::KeyLength {
        expected: PUBLIC_KEY_LEN,
        got: bytes.len(),
    })
}

// ── Tests ────────────────────────────────────────────────────────────────────

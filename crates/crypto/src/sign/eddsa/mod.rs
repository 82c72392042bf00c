//! Ed25519 signing and verification, wrapped behind relay-owned types.
//!
//! Handlers and tests deal in these newtypes only; the backing library never
//! leaks into the protocol or service crates.

use crate::error::CryptoError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signer, Verifier};
use rand::rngs::OsRng;

/// Length of a serialized public key.
pub const PUBLIC_KEY_LEN: usize = 32;
/// Length of a serialized signature.
pub const SIGNATURE_LEN: usize = 64;

/// An Ed25519 key pair. Generated by clients; the server only ever verifies.
#[derive(Clone)]
pub struct Ed25519KeyPair {
    signing: ed25519_dalek::SigningKey,
}

/// An Ed25519 public (verification) key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ed25519PublicKey(ed25519_dalek::VerifyingKey);

/// A detached Ed25519 signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ed25519Signature(ed25519_dalek::Signature);

impl Ed25519KeyPair {
    /// Generates a fresh key pair from the OS RNG.
    pub fn generate() -> Self {
        Ed25519KeyPair {
            signing: ed25519_dalek::SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstructs a key pair from a 32-byte seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoError> {
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("seed must be 32 bytes".to_string()))?;
        Ok(Ed25519KeyPair {
            signing: ed25519_dalek::SigningKey::from_bytes(&seed),
        })
    }

    /// The verification half of this key pair.
    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.signing.verifying_key())
    }

    /// Signs a message. Ed25519 signing is deterministic.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.signing.sign(message))
    }

    /// The 32-byte seed, for persisting a client identity.
    pub fn seed(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }
}

impl Ed25519PublicKey {
    /// Parses a public key from its 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let raw: [u8; PUBLIC_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected {PUBLIC_KEY_LEN} bytes")))?;
        ed25519_dalek::VerifyingKey::from_bytes(&raw)
            .map(Ed25519PublicKey)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    /// Parses a public key from its lowercase-hex wire form.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// The 32 raw key bytes.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.0.to_bytes()
    }

    /// The lowercase-hex wire form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Verifies a detached signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), CryptoError> {
        self.0
            .verify(message, &signature.0)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl Ed25519Signature {
    /// Parses a signature from its 64 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let raw: [u8; SIGNATURE_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidSignature(format!("expected {SIGNATURE_LEN} bytes")))?;
        Ok(Ed25519Signature(ed25519_dalek::Signature::from_bytes(&raw)))
    }

    /// Parses a signature from its base64 wire form.
    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(s)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// The 64 raw signature bytes.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        self.0.to_bytes()
    }

    /// The base64 wire form.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }
}

#[cfg(test)]
mod tests;

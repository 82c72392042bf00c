//! Errors from cryptographic operations.

use thiserror::Error;

/// Errors from signature and hashing primitives.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The signature failed cryptographic verification.
    #[error("signature verification failed")]
    VerificationFailed,
    /// The provided key material is malformed for the algorithm.
    #[error("invalid cryptographic key: {0}")]
    InvalidKey(String),
    /// The provided signature material is malformed for the algorithm.
    #[error("invalid signature format: {0}")]
    InvalidSignature(String),
    /// An input could not be serialized canonically for hashing.
    #[error("canonical serialization failed: {0}")]
    Canonicalization(String),
}

//! Cryptographic primitives for the AgentChat relay: Ed25519 signing
//! wrappers and the SHA-256 helpers used for ids, commitments, and
//! deterministic panel selection.

#![forbid(unsafe_code)]

/// Error types for cryptographic operations.
pub mod error;
/// SHA-256 helpers, canonical-JSON hashing, and the digest chain.
pub mod hash;
/// Signature schemes.
pub mod sign;

pub use error::CryptoError;

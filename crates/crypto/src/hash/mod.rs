//! SHA-256 helpers: commitments, canonical-JSON integrity hashes, and the
//! digest chain that drives deterministic panel selection.

use crate::error::CryptoError;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 of a byte slice.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 of a byte slice, lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// SHA-256 over the RFC 8785 (JCS) canonical JSON serialization of a value.
///
/// Sorted-key canonical form means signer and verifier hash identical bytes
/// no matter how the value was produced.
pub fn canonical_json_sha256<T: Serialize>(value: &T) -> Result<String, CryptoError> {
    let canonical =
        serde_jcs::to_string(value).map_err(|e| CryptoError::Canonicalization(e.to_string()))?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Canonical (JCS) JSON serialization of a value, for signing-string use.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, CryptoError> {
    serde_jcs::to_string(value).map_err(|e| CryptoError::Canonicalization(e.to_string()))
}

/// A SHA-256 hash chain emitting bounded indices.
///
/// Each step hashes the previous digest and interprets the first 8 bytes as
/// a big-endian integer. Identical seeds produce identical index streams on
/// any implementation, which is what makes panel selection verifiable.
pub struct DigestChain {
    state: [u8; 32],
}

impl DigestChain {
    /// Starts a chain at `seed`.
    pub fn new(seed: [u8; 32]) -> Self {
        DigestChain { state: seed }
    }

    /// Advances the chain and returns an index in `0..bound`.
    pub fn next_index(&mut self, bound: usize) -> usize {
        debug_assert!(bound > 0);
        self.state = sha256(&self.state);
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.state[..8]);
        (u64::from_be_bytes(raw) % bound.max(1) as u64) as usize
    }
}

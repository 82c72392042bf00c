//! Deterministic panel selection.
//!
//! Given the same `(proposal_id, revealed nonce, server nonce, pool)` every
//! implementation must produce the same arbiter ordering, so selection is a
//! Fisher–Yates shuffle driven by a SHA-256 digest chain over a canonical,
//! sorted pool.

use agentchat_crypto::hash::{sha256, DigestChain};
use agentchat_types::ids::AgentId;

/// `seed = SHA-256(proposal_id || nonce || server_nonce)`.
pub fn compute_seed(proposal_id: &str, nonce: &str, server_nonce: &str) -> [u8; 32] {
    let mut material = Vec::with_capacity(proposal_id.len() + nonce.len() + server_nonce.len());
    material.extend_from_slice(proposal_id.as_bytes());
    material.extend_from_slice(nonce.as_bytes());
    material.extend_from_slice(server_nonce.as_bytes());
    sha256(&material)
}

/// Orders the candidate pool deterministically. The pool is first sorted by
/// agent id so the shuffle input is canonical regardless of how the caller
/// collected it; each Fisher–Yates step draws its index from the chain.
pub fn deterministic_order(seed: [u8; 32], mut pool: Vec<AgentId>) -> Vec<AgentId> {
    pool.sort();
    pool.dedup();
    let mut chain = DigestChain::new(seed);
    for i in (1..pool.len()).rev() {
        let j = chain.next_index(i + 1);
        pool.swap(i, j);
    }
    pool
}

//! Identifier newtypes for agents, proposals, disputes, and challenges.
//!
//! Agent ids for persistent identities are derived from key material so the
//! same public key always maps to the same id, on any node.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Number of raw bytes taken from the pubkey digest (16 hex chars).
const AGENT_ID_BYTES: usize = 8;

/// A short agent identifier. Stored as bare lowercase hex; rendered with the
/// `@` prefix everywhere it is shown on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Assigns a random id for an ephemeral (keyless) session.
    pub fn random() -> Self {
        let mut raw = [0u8; AGENT_ID_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut raw);
        AgentId(hex::encode(raw))
    }

    /// The bare 16-hex-char form, without the display prefix.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

impl FromStr for AgentId {
    type Err = String;

    /// Accepts both the bare hex form and the `@`-prefixed display form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bare = s.strip_prefix('@').unwrap_or(s);
        if bare.len() != AGENT_ID_BYTES * 2 {
            return Err(format!("agent id must be {} hex chars", AGENT_ID_BYTES * 2));
        }
        if !bare.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("agent id must be lowercase hex".to_string());
        }
        Ok(AgentId(bare.to_ascii_lowercase()))
    }
}

/// Derives the canonical agent id for a public key: the first 8 bytes of
/// `SHA-256(pubkey)`, lowercase hex. Pure: equal key bytes give equal ids.
pub fn agent_id_from_pubkey(pubkey: &[u8]) -> AgentId {
    let digest = Sha256::digest(pubkey);
    AgentId(hex::encode(&digest[..AGENT_ID_BYTES]))
}

macro_rules! prefixed_id {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw id, checking the expected prefix.
            pub fn parse(s: &str) -> Result<Self, String> {
                if !s.starts_with($prefix) {
                    return Err(format!("expected `{}` prefix", $prefix));
                }
                if s.len() <= $prefix.len() || s.len() > 64 {
                    return Err("id has invalid length".to_string());
                }
                Ok(Self(s.to_string()))
            }

            /// The full id string, prefix included.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

prefixed_id!(ProposalId, "prop_", "A work-proposal id (`prop_` + base36 ms + hex suffix).");
prefixed_id!(DisputeId, "disp_", "A dispute id (`disp_` + base36 ms + hex suffix).");
prefixed_id!(ChallengeId, "chal_", "An auth challenge id (`chal_` + random hex).");

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn rand_hex(bytes: usize) -> String {
    let mut raw = vec![0u8; bytes];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    hex::encode(raw)
}

impl ProposalId {
    /// Mints a fresh proposal id from the current time.
    pub fn generate(now_ms: u64) -> Self {
        ProposalId(format!("prop_{}{}", base36(now_ms), rand_hex(2)))
    }
}

impl DisputeId {
    /// Mints a fresh dispute id from the current time.
    pub fn generate(now_ms: u64) -> Self {
        DisputeId(format!("disp_{}{}", base36(now_ms), rand_hex(2)))
    }
}

impl ChallengeId {
    /// Mints a fresh challenge id.
    pub fn generate() -> Self {
        ChallengeId(format!("chal_{}", rand_hex(8)))
    }
}

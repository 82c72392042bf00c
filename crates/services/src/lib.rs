//! Stateful relay services: the skill/proposal marketplace, the Agentcourt
//! dispute engine, and the pubkey allowlist. All of them are shared across
//! sessions and safe for concurrent use.

#![forbid(unsafe_code)]

/// Agentcourt: commit-reveal filing, panel selection, evidence, voting.
pub mod agentcourt;
/// Optional pubkey gating with admin-key mutations.
pub mod allowlist;
/// Skill registry and the signed proposal lifecycle.
pub mod marketplace;
/// The delivery seam back into the session layer.
pub mod outbound;

pub use agentcourt::CourtEngine;
pub use allowlist::Allowlist;
pub use marketplace::Marketplace;
pub use outbound::Outbound;

//! Core data structures shared by every AgentChat relay crate.

/// Shared configuration structures for the relay and its subsystems.
pub mod config;
/// Error enums with stable wire codes.
pub mod error;
/// Identifier newtypes and their derivation rules.
pub mod ids;
/// Millisecond wall-clock helpers.
pub mod time;

pub use config::ServerConfig;
pub use error::{ErrorCode, RelayError};
pub use ids::{agent_id_from_pubkey, AgentId, ChallengeId, DisputeId, ProposalId};

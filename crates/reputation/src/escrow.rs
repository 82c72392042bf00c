//! Escrow records and the pluggable event sink observing their lifecycle.

use agentchat_types::ids::AgentId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from escrow accounting.
#[derive(Debug, Error)]
pub enum EscrowError {
    /// The party's free rating cannot cover the requested stake.
    #[error("insufficient free rating for {agent}: need {need}, have {have}")]
    InsufficientReputation { agent: AgentId, need: u64, have: i64 },
    /// An escrow row with this id already exists.
    #[error("escrow {0} already held")]
    Duplicate(String),
    /// No escrow row with this id exists.
    #[error("escrow {0} not found")]
    NotFound(String),
}

/// Lifecycle state of an escrow row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscrowState {
    Held,
    Released,
}

/// Reputation stakes held by the server while a proposal or dispute is live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowRecord {
    /// Escrow id: the proposal id, or `fee:<dispute_id>` for filing fees.
    pub id: String,
    pub proposer: AgentId,
    pub acceptor: AgentId,
    pub proposer_stake: u64,
    pub acceptor_stake: u64,
    pub state: EscrowState,
    pub created_ms: u64,
}

impl EscrowRecord {
    /// Total stake this row holds against `agent`.
    pub fn stake_of(&self, agent: &AgentId) -> u64 {
        let mut held = 0;
        if &self.proposer == agent {
            held += self.proposer_stake;
        }
        if &self.acceptor == agent {
            held += self.acceptor_stake;
        }
        held
    }
}

/// An escrow transition observable by external integrations.
#[derive(Debug, Clone)]
pub enum EscrowEvent {
    /// Stakes were placed under hold.
    Created(EscrowRecord),
    /// Stakes were returned without settlement.
    Released(EscrowRecord),
    /// Stakes were released as part of a settlement.
    Settled(EscrowRecord),
}

type EscrowHandler = Box<dyn Fn(&EscrowEvent) -> anyhow::Result<()> + Send + Sync>;

/// Registered-handler list invoked synchronously in registration order. A
/// failing handler is logged and the remaining handlers still run; the
/// triggering state transition is never rolled back.
#[derive(Default)]
pub struct EscrowHooks {
    handlers: Vec<EscrowHandler>,
}

impl EscrowHooks {
    pub fn register(&mut self, handler: EscrowHandler) {
        self.handlers.push(handler);
    }

    pub fn fire(&self, event: &EscrowEvent) {
        for (i, handler) in self.handlers.iter().enumerate() {
            if let Err(e) = handler(event) {
                tracing::warn!(target: "reputation", handler = i, error = %e, "escrow hook failed");
            }
        }
    }
}

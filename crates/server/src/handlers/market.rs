//! Marketplace handlers: skills and the signed proposal lifecycle. Only
//! persistent sessions may propose, be proposed to, or sign transitions.

use crate::session::Session;
use crate::ServerState;
use agentchat_crypto::sign::eddsa::Ed25519PublicKey;
use agentchat_protocol::frames::{Skill, Stakes};
use agentchat_types::error::{AuthError, ChannelError, ProtocolError, RelayError};
use agentchat_types::ids::AgentId;
use std::sync::Arc;

fn require_persistent(session: &Session) -> Result<&Ed25519PublicKey, RelayError> {
    session.pubkey.as_ref().ok_or_else(|| {
        RelayError::Auth(AuthError::NoPubkey(
            "marketplace operations require a persistent identity".to_string(),
        ))
    })
}

fn parse_agent(raw: &str) -> Result<AgentId, RelayError> {
    raw.parse()
        .map_err(|e: String| RelayError::Protocol(ProtocolError::InvalidName(e)))
}

#[allow(clippy::too_many_arguments)]
pub fn proposal(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    id: &str,
    to: &str,
    task: &str,
    amount: Option<u64>,
    currency: Option<String>,
    capability: Option<String>,
    stakes: Option<Stakes>,
    expires: Option<u64>,
    sig: &str,
) -> Result<(), RelayError> {
    let pubkey = require_persistent(session)?;
    let acceptor = parse_agent(to)?;
    let peer = state
        .registry
        .by_agent(&acceptor)
        .ok_or_else(|| ChannelError::AgentNotFound(to.to_string()))?;
    if !peer.persistent() {
        return Err(RelayError::Auth(AuthError::NoPubkey(format!(
            "{acceptor} is ephemeral and cannot receive proposals"
        ))));
    }

    let relay = state.market.propose(
        &session.agent_id,
        pubkey,
        id,
        &acceptor,
        task,
        amount,
        currency,
        capability,
        stakes,
        expires,
        sig,
    )?;
    peer.send(relay);
    Ok(())
}

pub fn accept(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    proposal_id: &str,
    payment_code: Option<String>,
    sig: &str,
) -> Result<(), RelayError> {
    let pubkey = require_persistent(session)?;
    let (relay, proposer) =
        state
            .market
            .accept(&session.agent_id, pubkey, proposal_id, payment_code, sig)?;
    state.registry.deliver_to(&proposer, relay);
    Ok(())
}

pub fn reject(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    proposal_id: &str,
    reason: Option<String>,
    sig: &str,
) -> Result<(), RelayError> {
    let pubkey = require_persistent(session)?;
    let (relay, proposer) =
        state
            .market
            .reject(&session.agent_id, pubkey, proposal_id, reason, sig)?;
    state.registry.deliver_to(&proposer, relay);
    Ok(())
}

pub fn complete(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    proposal_id: &str,
    proof: Option<String>,
    sig: &str,
) -> Result<(), RelayError> {
    let pubkey = require_persistent(session)?;
    let (relay, other) =
        state
            .market
            .complete(&session.agent_id, pubkey, proposal_id, proof, sig)?;
    // Both parties see the settlement, deltas included.
    state.registry.deliver_to(&other, relay.clone());
    session.send(relay);
    Ok(())
}

pub fn register_skills(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    skills: Vec<Skill>,
    sig: &str,
) -> Result<(), RelayError> {
    let pubkey = require_persistent(session)?;
    let ack = state
        .market
        .register_skills(&session.agent_id, pubkey, skills, sig)?;
    session.send(ack);
    Ok(())
}

pub fn search_skills(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    query: &str,
) -> Result<(), RelayError> {
    session.send(state.market.search_skills(query));
    Ok(())
}

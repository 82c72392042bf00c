//! Agentcourt handlers. Every dispute frame requires a persistent session;
//! the engine itself enforces phase and party rules.

use crate::session::Session;
use crate::ServerState;
use agentchat_crypto::sign::eddsa::Ed25519PublicKey;
use agentchat_protocol::frames::Verdict;
use agentchat_types::error::{AuthError, RelayError};
use serde_json::Value;
use std::sync::Arc;

fn require_persistent(session: &Session) -> Result<&Ed25519PublicKey, RelayError> {
    session.pubkey.as_ref().ok_or_else(|| {
        RelayError::Auth(AuthError::NoPubkey(
            "dispute operations require a persistent identity".to_string(),
        ))
    })
}

pub async fn legacy(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    proposal_id: &str,
    reason: &str,
    sig: &str,
) -> Result<(), RelayError> {
    let pubkey = require_persistent(session)?;
    state
        .court
        .file_legacy(&session.agent_id, pubkey, proposal_id, reason, sig)
        .await?;
    Ok(())
}

pub async fn intent(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    proposal_id: &str,
    reason: &str,
    commitment: &str,
    sig: &str,
) -> Result<(), RelayError> {
    let pubkey = require_persistent(session)?;
    let ack = state
        .court
        .file_intent(&session.agent_id, pubkey, proposal_id, reason, commitment, sig)
        .await?;
    session.send(ack);
    Ok(())
}

pub async fn reveal(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    dispute_id: &str,
    nonce: &str,
    sig: &str,
) -> Result<(), RelayError> {
    let pubkey = require_persistent(session)?;
    let reply = state
        .court
        .reveal(&session.agent_id, pubkey, dispute_id, nonce, sig)
        .await?;
    session.send(reply);
    Ok(())
}

pub async fn evidence(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    dispute_id: &str,
    items: Vec<Value>,
    statement: &str,
    sig: &str,
) -> Result<(), RelayError> {
    let pubkey = require_persistent(session)?;
    let ack = state
        .court
        .submit_evidence(&session.agent_id, pubkey, dispute_id, items, statement, sig)
        .await?;
    session.send(ack);
    Ok(())
}

pub async fn arbiter_accept(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    dispute_id: &str,
    sig: &str,
) -> Result<(), RelayError> {
    let pubkey = require_persistent(session)?;
    state
        .court
        .arbiter_accept(&session.agent_id, pubkey, dispute_id, sig)
        .await?;
    Ok(())
}

pub async fn arbiter_decline(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    dispute_id: &str,
    reason: Option<&str>,
    sig: &str,
) -> Result<(), RelayError> {
    let pubkey = require_persistent(session)?;
    state
        .court
        .arbiter_decline(&session.agent_id, pubkey, dispute_id, reason, sig)
        .await?;
    Ok(())
}

pub async fn arbiter_vote(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    dispute_id: &str,
    verdict: Verdict,
    reasoning: &str,
    sig: &str,
) -> Result<(), RelayError> {
    let pubkey = require_persistent(session)?;
    state
        .court
        .arbiter_vote(&session.agent_id, pubkey, dispute_id, verdict, reasoning, sig)
        .await?;
    Ok(())
}

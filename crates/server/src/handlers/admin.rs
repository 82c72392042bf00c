//! Admin-key authenticated allowlist mutations.

use crate::session::Session;
use crate::ServerState;
use agentchat_protocol::ServerFrame;
use agentchat_types::error::RelayError;
use std::sync::Arc;

pub fn approve(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    pubkey: &str,
    note: Option<String>,
    key: &str,
) -> Result<(), RelayError> {
    state
        .allowlist
        .approve(key, pubkey, note, &session.agent_id)
        .map_err(RelayError::Auth)?;
    session.send(ServerFrame::AdminResult {
        action: "approve".to_string(),
        ok: true,
        entries: None,
        message: Some(format!("approved {pubkey}")),
    });
    Ok(())
}

pub fn revoke(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    identifier: &str,
    key: &str,
) -> Result<(), RelayError> {
    let removed = state
        .allowlist
        .revoke(key, identifier)
        .map_err(RelayError::Auth)?;
    session.send(ServerFrame::AdminResult {
        action: "revoke".to_string(),
        ok: removed,
        entries: None,
        message: (!removed).then(|| format!("{identifier} was not on the allowlist")),
    });
    Ok(())
}

pub fn list(state: &Arc<ServerState>, session: &Arc<Session>, key: &str) -> Result<(), RelayError> {
    let entries = state.allowlist.list(key).map_err(RelayError::Auth)?;
    session.send(ServerFrame::AdminResult {
        action: "list".to_string(),
        ok: true,
        entries: Some(entries),
        message: None,
    });
    Ok(())
}

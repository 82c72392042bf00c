//! Channel, direct-message, presence, and peer-verification handlers.

use crate::session::Session;
use crate::ServerState;
use agentchat_protocol::signing;
use agentchat_protocol::ServerFrame;
use agentchat_types::error::{AuthError, ChannelError, ProtocolError, RelayError};
use agentchat_types::ids::AgentId;
use std::sync::Arc;

pub fn join(state: &Arc<ServerState>, session: &Arc<Session>, channel: &str) -> Result<(), RelayError> {
    let (agents, replay) = state.channels.join(channel, session)?;
    session.send(ServerFrame::Joined { channel: channel.to_string(), agents });
    for frame in replay {
        session.send(frame);
    }
    Ok(())
}

pub fn leave(state: &Arc<ServerState>, session: &Arc<Session>, channel: &str) -> Result<(), RelayError> {
    state.channels.leave(channel, session)?;
    session.send(ServerFrame::Left { channel: channel.to_string() });
    Ok(())
}

pub fn msg(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    to: &str,
    content: &str,
) -> Result<(), RelayError> {
    if to.starts_with('#') {
        state.channels.broadcast_msg(to, session, content)?;
        return Ok(());
    }

    let target: AgentId = to
        .parse()
        .map_err(|e: String| RelayError::Protocol(ProtocolError::InvalidName(e)))?;
    let peer = state
        .registry
        .by_agent(&target)
        .ok_or_else(|| ChannelError::AgentNotFound(to.to_string()))?;
    let frame = ServerFrame::Msg {
        from: session.agent_id.to_string(),
        to: to.to_string(),
        content: content.to_string(),
        replay: false,
    };
    peer.send(frame.clone());
    // Echo back so the sender sees the message as delivered.
    if peer.id != session.id {
        session.send(frame);
    }
    Ok(())
}

pub fn list_channels(state: &Arc<ServerState>, session: &Arc<Session>) -> Result<(), RelayError> {
    session.send(ServerFrame::Channels { channels: state.channels.list_public() });
    Ok(())
}

pub fn list_agents(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    channel: Option<&str>,
) -> Result<(), RelayError> {
    let agents = match channel {
        Some(name) => state.channels.agents_in(name)?,
        None => state
            .registry
            .all()
            .iter()
            .map(|s| s.agent_id.to_string())
            .collect(),
    };
    session.send(ServerFrame::Agents {
        channel: channel.map(|c| c.to_string()),
        agents,
    });
    Ok(())
}

pub fn create_channel(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    channel: &str,
    invite_only: bool,
) -> Result<(), RelayError> {
    let (agents, _replay) = state.channels.create(channel, invite_only, session)?;
    session.send(ServerFrame::Joined { channel: channel.to_string(), agents });
    Ok(())
}

pub fn invite(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    channel: &str,
    agent: &str,
) -> Result<(), RelayError> {
    let target: AgentId = agent
        .parse()
        .map_err(|e: String| RelayError::Protocol(ProtocolError::InvalidName(e)))?;
    state.channels.invite(channel, session, &target)?;
    // Courtesy notice when the invitee is connected.
    if let Some(peer) = state.registry.by_agent(&target) {
        peer.send(ServerFrame::Msg {
            from: session.agent_id.to_string(),
            to: target.to_string(),
            content: format!("invited you to {channel}"),
            replay: false,
        });
    }
    Ok(())
}

pub fn set_presence(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    status: String,
) -> Result<(), RelayError> {
    *session.presence.lock().unwrap_or_else(|e| e.into_inner()) = status.clone();
    let frame = ServerFrame::PresenceChanged {
        agent: session.agent_id.to_string(),
        status,
    };
    state.channels.broadcast_to_joined(session, &frame);
    session.send(frame);
    Ok(())
}

pub fn verify_request(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    agent: &str,
    nonce: &str,
) -> Result<(), RelayError> {
    let target: AgentId = agent
        .parse()
        .map_err(|e: String| RelayError::Protocol(ProtocolError::InvalidName(e)))?;
    let peer = state
        .registry
        .by_agent(&target)
        .ok_or_else(|| ChannelError::AgentNotFound(agent.to_string()))?;
    if !peer.persistent() {
        return Err(RelayError::Auth(AuthError::NoPubkey(format!(
            "{target} has no pubkey to prove"
        ))));
    }
    peer.send(ServerFrame::VerifyRequest {
        from: session.agent_id.to_string(),
        nonce: nonce.to_string(),
    });
    Ok(())
}

pub fn verify_response(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    agent: &str,
    nonce: &str,
    signature: &str,
) -> Result<(), RelayError> {
    let requester: AgentId = agent
        .parse()
        .map_err(|e: String| RelayError::Protocol(ProtocolError::InvalidName(e)))?;
    let peer = state
        .registry
        .by_agent(&requester)
        .ok_or_else(|| ChannelError::AgentNotFound(agent.to_string()))?;
    let Some(pubkey) = session.pubkey.as_ref() else {
        return Err(RelayError::Auth(AuthError::NoPubkey(
            "responding to a verification requires a pubkey".to_string(),
        )));
    };

    // Relay the raw response, then the server's own judgement.
    peer.send(ServerFrame::VerifyResponse {
        from: session.agent_id.to_string(),
        nonce: nonce.to_string(),
        signature: signature.to_string(),
    });

    let payload = signing::peer_verify(nonce, &session.agent_id.to_string());
    let verdict = agentchat_crypto::sign::eddsa::Ed25519Signature::from_base64(signature)
        .ok()
        .filter(|sig| pubkey.verify(payload.as_bytes(), sig).is_ok());
    match verdict {
        Some(_) => peer.send(ServerFrame::VerifySuccess {
            agent: session.agent_id.to_string(),
            nonce: nonce.to_string(),
        }),
        None => peer.send(ServerFrame::VerifyFailed {
            agent: session.agent_id.to_string(),
            reason: "signature did not verify".to_string(),
        }),
    };
    Ok(())
}

//! The identification flow: ephemeral `IDENTIFY`, and the challenge–response
//! handshake for persistent identities.

use crate::session::{Session, WriterMsg};
use crate::ServerState;
use agentchat_crypto::sign::eddsa::{Ed25519PublicKey, Ed25519Signature};
use agentchat_protocol::signing;
use agentchat_protocol::ServerFrame;
use agentchat_types::error::{AuthError, RelayError};
use agentchat_types::ids::{agent_id_from_pubkey, AgentId, ChallengeId};
use agentchat_types::time::now_ms;
use rand::RngCore;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A challenge bound to the connection that sent `IDENTIFY` with a pubkey.
/// `VERIFY_IDENTITY` must arrive on the same connection; expiry is checked
/// lazily when it does.
pub struct PendingChallenge {
    pub challenge_id: ChallengeId,
    pub name: String,
    pub pubkey_hex: String,
    pub nonce: String,
    pub server_time: u64,
    pub expires_ms: u64,
}

/// Result of a valid `IDENTIFY`.
pub enum PreAuth {
    /// Ephemeral identity: the session is installed, greet it.
    Welcome(Arc<Session>),
    /// Persistent identity: a challenge was issued, the session is not
    /// installed yet.
    Challenged(PendingChallenge, ServerFrame),
}

pub fn handle_identify(
    state: &Arc<ServerState>,
    tx: &mpsc::Sender<WriterMsg>,
    name: String,
    pubkey_hex: Option<String>,
) -> Result<PreAuth, RelayError> {
    state
        .allowlist
        .gate_identify(pubkey_hex.as_deref())
        .map_err(RelayError::Auth)?;

    match pubkey_hex {
        None => {
            let session = state.new_session(AgentId::random(), name, None, tx.clone());
            // Random 64-bit ids do not collide in practice, but install
            // handles an eviction all the same.
            if let Some(old) = state.registry.install(session.clone()) {
                state.channels.detach(&old);
                old.close();
            }
            Ok(PreAuth::Welcome(session))
        }
        Some(pubkey_hex) => {
            // Reject unparseable keys before issuing a challenge.
            Ed25519PublicKey::from_hex(&pubkey_hex)
                .map_err(|_| RelayError::Auth(AuthError::VerificationFailed))?;

            let mut raw = [0u8; 16];
            rand::rngs::OsRng.fill_bytes(&mut raw);
            let challenge = PendingChallenge {
                challenge_id: ChallengeId::generate(),
                name,
                pubkey_hex,
                nonce: hex::encode(raw),
                server_time: now_ms(),
                expires_ms: now_ms() + state.cfg.limits.challenge_ttl_ms,
            };
            let frame = ServerFrame::Challenge {
                challenge_id: challenge.challenge_id.to_string(),
                nonce: challenge.nonce.clone(),
                server_time: challenge.server_time,
            };
            Ok(PreAuth::Challenged(challenge, frame))
        }
    }
}

/// Completes the handshake. On success the new session is installed and any
/// prior holder of the same agent id is returned for the caller to detach
/// and close.
pub fn handle_verify(
    state: &Arc<ServerState>,
    tx: &mpsc::Sender<WriterMsg>,
    challenge: Option<PendingChallenge>,
    challenge_id: &str,
    signature_b64: &str,
) -> Result<(Arc<Session>, Option<Arc<Session>>), RelayError> {
    let challenge = challenge
        .filter(|c| c.challenge_id.as_str() == challenge_id)
        .ok_or(RelayError::Auth(AuthError::VerificationFailed))?;
    if now_ms() > challenge.expires_ms {
        return Err(RelayError::Auth(AuthError::VerificationExpired));
    }

    let pubkey = Ed25519PublicKey::from_hex(&challenge.pubkey_hex)
        .map_err(|_| RelayError::Auth(AuthError::VerificationFailed))?;
    let signature = Ed25519Signature::from_base64(signature_b64)
        .map_err(|_| RelayError::Auth(AuthError::VerificationFailed))?;
    let payload = signing::auth(
        &challenge.nonce,
        challenge.challenge_id.as_str(),
        challenge.server_time,
    );
    pubkey
        .verify(payload.as_bytes(), &signature)
        .map_err(|_| RelayError::Auth(AuthError::VerificationFailed))?;

    let agent_id = agent_id_from_pubkey(&pubkey.to_bytes());
    let session = state.new_session(agent_id, challenge.name, Some(pubkey), tx.clone());
    let evicted = state.registry.install(session.clone());
    Ok((session, evicted))
}

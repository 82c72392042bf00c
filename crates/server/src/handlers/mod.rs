//! Frame dispatch for authenticated sessions. Each frame type maps to one
//! handler; errors bubble up as `RelayError` and the connection loop turns
//! them into `ERROR` frames without disconnecting.

use crate::session::Session;
use crate::ServerState;
use agentchat_protocol::ClientFrame;
use agentchat_types::error::RelayError;
use std::sync::Arc;

pub mod admin;
pub mod chat;
pub mod dispute;
pub mod identify;
pub mod market;

/// Frames that produce a broadcast consume a rate-limit token.
fn consumes_token(frame: &ClientFrame) -> bool {
    matches!(
        frame,
        ClientFrame::Msg { .. }
            | ClientFrame::SetPresence { .. }
            | ClientFrame::Join { .. }
            | ClientFrame::Leave { .. }
    )
}

pub async fn dispatch(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    frame: ClientFrame,
) -> Result<(), RelayError> {
    if consumes_token(&frame) && !session.rate_check() {
        return Err(RelayError::RateLimited);
    }

    match frame {
        // A second IDENTIFY on a live session is a no-op greeting.
        ClientFrame::Identify { .. } | ClientFrame::VerifyIdentity { .. } => {
            session.send(agentchat_protocol::ServerFrame::Welcome {
                agent_id: session.agent_id.to_string(),
                server: state.cfg.server_name.clone(),
            });
            Ok(())
        }
        ClientFrame::Ping { ts } => {
            session.send(agentchat_protocol::ServerFrame::Pong { ts });
            Ok(())
        }

        ClientFrame::Join { channel } => chat::join(state, session, &channel),
        ClientFrame::Leave { channel } => chat::leave(state, session, &channel),
        ClientFrame::Msg { to, content } => chat::msg(state, session, &to, &content),
        ClientFrame::ListChannels {} => chat::list_channels(state, session),
        ClientFrame::ListAgents { channel } => chat::list_agents(state, session, channel.as_deref()),
        ClientFrame::CreateChannel { channel, invite_only } => {
            chat::create_channel(state, session, &channel, invite_only)
        }
        ClientFrame::Invite { channel, agent } => chat::invite(state, session, &channel, &agent),
        ClientFrame::SetPresence { status } => chat::set_presence(state, session, status),
        ClientFrame::VerifyRequest { agent, nonce } => {
            chat::verify_request(state, session, &agent, &nonce)
        }
        ClientFrame::VerifyResponse { agent, nonce, signature } => {
            chat::verify_response(state, session, &agent, &nonce, &signature)
        }

        ClientFrame::Proposal {
            id,
            to,
            task,
            amount,
            currency,
            capability,
            stakes,
            expires,
            sig,
        } => market::proposal(
            state, session, &id, &to, &task, amount, currency, capability, stakes, expires, &sig,
        ),
        ClientFrame::Accept { proposal_id, payment_code, sig } => {
            market::accept(state, session, &proposal_id, payment_code, &sig)
        }
        ClientFrame::Reject { proposal_id, reason, sig } => {
            market::reject(state, session, &proposal_id, reason, &sig)
        }
        ClientFrame::Complete { proposal_id, proof, sig } => {
            market::complete(state, session, &proposal_id, proof, &sig)
        }
        ClientFrame::RegisterSkills { skills, sig } => {
            market::register_skills(state, session, skills, &sig)
        }
        ClientFrame::SearchSkills { query } => market::search_skills(state, session, &query),

        ClientFrame::Dispute { proposal_id, reason, sig } => {
            dispute::legacy(state, session, &proposal_id, &reason, &sig).await
        }
        ClientFrame::DisputeIntent { proposal_id, reason, commitment, sig } => {
            dispute::intent(state, session, &proposal_id, &reason, &commitment, &sig).await
        }
        ClientFrame::DisputeReveal { dispute_id, nonce, sig } => {
            dispute::reveal(state, session, &dispute_id, &nonce, &sig).await
        }
        ClientFrame::Evidence { dispute_id, items, statement, sig } => {
            dispute::evidence(state, session, &dispute_id, items, &statement, &sig).await
        }
        ClientFrame::ArbiterAccept { dispute_id, sig } => {
            dispute::arbiter_accept(state, session, &dispute_id, &sig).await
        }
        ClientFrame::ArbiterDecline { dispute_id, reason, sig } => {
            dispute::arbiter_decline(state, session, &dispute_id, reason.as_deref(), &sig).await
        }
        ClientFrame::ArbiterVote { dispute_id, verdict, reasoning, sig } => {
            dispute::arbiter_vote(state, session, &dispute_id, verdict, &reasoning, &sig).await
        }

        ClientFrame::AdminApprove { pubkey, note, key } => {
            admin::approve(state, session, &pubkey, note, &key)
        }
        ClientFrame::AdminRevoke { identifier, key } => {
            admin::revoke(state, session, &identifier, &key)
        }
        ClientFrame::AdminList { key } => admin::list(state, session, &key),
    }
}

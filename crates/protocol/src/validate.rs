//! Stateless frame validation: naming rules, size bounds, and field shape.
//! Anything stateful (membership, lifecycle, signatures) belongs to the
//! subsystems behind the dispatcher.

use crate::frames::ClientFrame;
use agentchat_types::error::ProtocolError;
use agentchat_types::ids::AgentId;

/// Maximum accepted length for one encoded frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 65_536;
/// Agent display names: 1–24 printable chars, no whitespace, no `#`/`@`.
pub const NAME_MAX: usize = 24;
/// Channel names: `#` plus up to 31 printable chars.
pub const CHANNEL_MAX: usize = 32;
/// Upper bound for chat content, task text, and dispute reasons.
pub const TEXT_MAX: usize = 4_096;
/// Evidence bounds from the dispute contract.
pub const EVIDENCE_ITEMS_MAX: usize = 10;
pub const STATEMENT_MAX: usize = 2_000;
pub const REASONING_MAX: usize = 500;
/// Presence status bound.
pub const STATUS_MAX: usize = 64;

fn printable_no_ws(s: &str) -> bool {
    s.chars().all(|c| !c.is_whitespace() && !c.is_control())
}

/// Checks an agent display name: 1–24 printable non-whitespace characters,
/// excluding the `#` and `@` target prefixes.
pub fn validate_agent_name(name: &str) -> Result<(), ProtocolError> {
    let count = name.chars().count();
    if count == 0 || count > NAME_MAX {
        return Err(ProtocolError::InvalidName(format!(
            "name must be 1-{NAME_MAX} characters"
        )));
    }
    if !printable_no_ws(name) || name.contains(['#', '@']) {
        return Err(ProtocolError::InvalidName(
            "name must be printable, without whitespace or #/@".to_string(),
        ));
    }
    Ok(())
}

/// Checks a channel name: leading `#`, then printable non-whitespace
/// characters, at most 32 total.
pub fn validate_channel_name(channel: &str) -> Result<(), ProtocolError> {
    let Some(rest) = channel.strip_prefix('#') else {
        return Err(ProtocolError::InvalidName(
            "channel names start with #".to_string(),
        ));
    };
    let count = channel.chars().count();
    if rest.is_empty() || count > CHANNEL_MAX {
        return Err(ProtocolError::InvalidName(format!(
            "channel must be 2-{CHANNEL_MAX} characters"
        )));
    }
    if !printable_no_ws(rest) || rest.contains(['#', '@']) {
        return Err(ProtocolError::InvalidName(
            "channel must be printable, without whitespace or #/@".to_string(),
        ));
    }
    Ok(())
}

fn validate_agent_target(s: &str) -> Result<(), ProtocolError> {
    s.parse::<AgentId>()
        .map(|_| ())
        .map_err(ProtocolError::InvalidName)
}

fn bounded(field: &str, s: &str, max: usize) -> Result<(), ProtocolError> {
    if s.is_empty() {
        return Err(ProtocolError::InvalidFrame(format!("{field} is empty")));
    }
    if s.chars().count() > max {
        return Err(ProtocolError::InvalidFrame(format!(
            "{field} exceeds {max} characters"
        )));
    }
    Ok(())
}

fn hex_field(field: &str, s: &str, len: usize) -> Result<(), ProtocolError> {
    if s.len() != len || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ProtocolError::InvalidFrame(format!(
            "{field} must be {len} hex characters"
        )));
    }
    Ok(())
}

/// Parses one raw line into a client frame, enforcing the length bound.
pub fn parse_client_frame(raw: &str, max_len: usize) -> Result<ClientFrame, ProtocolError> {
    if raw.len() > max_len {
        return Err(ProtocolError::InvalidFrame(format!(
            "frame exceeds {max_len} bytes"
        )));
    }
    let frame: ClientFrame = serde_json::from_str(raw)
        .map_err(|e| ProtocolError::InvalidFrame(e.to_string()))?;
    validate_frame(&frame)?;
    Ok(frame)
}

/// Stateless shape validation for a parsed frame.
pub fn validate_frame(frame: &ClientFrame) -> Result<(), ProtocolError> {
    match frame {
        ClientFrame::Identify { name, pubkey } => {
            validate_agent_name(name)?;
            if let Some(pk) = pubkey {
                hex_field("pubkey", pk, 64)?;
            }
            Ok(())
        }
        ClientFrame::VerifyIdentity { challenge_id, signature } => {
            bounded("challenge_id", challenge_id, 64)?;
            bounded("signature", signature, 128)
        }
        ClientFrame::Join { channel } | ClientFrame::Leave { channel } => {
            validate_channel_name(channel)
        }
        ClientFrame::Msg { to, content } => {
            bounded("content", content, TEXT_MAX)?;
            if to.starts_with('#') {
                validate_channel_name(to)
            } else if to.starts_with('@') {
                validate_agent_target(to)
            } else {
                Err(ProtocolError::InvalidFrame(
                    "target must start with # or @".to_string(),
                ))
            }
        }
        ClientFrame::ListChannels {} | ClientFrame::Ping { .. } => Ok(()),
        ClientFrame::ListAgents { channel } => match channel {
            Some(c) => validate_channel_name(c),
            None => Ok(()),
        },
        ClientFrame::CreateChannel { channel, .. } => validate_channel_name(channel),
        ClientFrame::Invite { channel, agent } => {
            validate_channel_name(channel)?;
            validate_agent_target(agent)
        }
        ClientFrame::SetPresence { status } => bounded("status", status, STATUS_MAX),
        ClientFrame::Proposal { id, to, task, stakes, sig, .. } => {
            if !id.starts_with("prop_") {
                return Err(ProtocolError::InvalidFrame(
                    "proposal id must start with prop_".to_string(),
                ));
            }
            bounded("id", id, 64)?;
            validate_agent_target(to)?;
            bounded("task", task, TEXT_MAX)?;
            if let Some(s) = stakes {
                if s.proposer == 0 && s.acceptor == 0 {
                    return Err(ProtocolError::InvalidFrame(
                        "stakes must hold at least one non-zero amount".to_string(),
                    ));
                }
            }
            bounded("sig", sig, 128)
        }
        ClientFrame::Accept { proposal_id, sig, .. }
        | ClientFrame::Reject { proposal_id, sig, .. }
        | ClientFrame::Complete { proposal_id, sig, .. } => {
            bounded("proposal_id", proposal_id, 64)?;
            bounded("sig", sig, 128)
        }
        ClientFrame::Dispute { proposal_id, reason, sig } => {
            bounded("proposal_id", proposal_id, 64)?;
            bounded("reason", reason, TEXT_MAX)?;
            bounded("sig", sig, 128)
        }
        ClientFrame::RegisterSkills { skills, sig } => {
            if skills.is_empty() || skills.len() > 64 {
                return Err(ProtocolError::InvalidFrame(
                    "skills list must hold 1-64 entries".to_string(),
                ));
            }
            for skill in skills {
                bounded("skill name", &skill.name, 128)?;
            }
            bounded("sig", sig, 128)
        }
        ClientFrame::SearchSkills { query } => bounded("query", query, 256),
        ClientFrame::VerifyRequest { agent, nonce } => {
            validate_agent_target(agent)?;
            bounded("nonce", nonce, 64)
        }
        ClientFrame::VerifyResponse { agent, nonce, signature } => {
            validate_agent_target(agent)?;
            bounded("nonce", nonce, 64)?;
            bounded("signature", signature, 128)
        }
        ClientFrame::AdminApprove { pubkey, key, .. } => {
            hex_field("pubkey", pubkey, 64)?;
            bounded("key", key, 256)
        }
        ClientFrame::AdminRevoke { identifier, key } => {
            bounded("identifier", identifier, 64)?;
            bounded("key", key, 256)
        }
        ClientFrame::AdminList { key } => bounded("key", key, 256),
        ClientFrame::DisputeIntent { proposal_id, reason, commitment, sig } => {
            bounded("proposal_id", proposal_id, 64)?;
            bounded("reason", reason, TEXT_MAX)?;
            hex_field("commitment", commitment, 64)?;
            bounded("sig", sig, 128)
        }
        ClientFrame::DisputeReveal { dispute_id, nonce, sig } => {
            bounded("dispute_id", dispute_id, 64)?;
            bounded("nonce", nonce, 256)?;
            bounded("sig", sig, 128)
        }
        ClientFrame::Evidence { dispute_id, items, statement, sig } => {
            bounded("dispute_id", dispute_id, 64)?;
            if items.len() > EVIDENCE_ITEMS_MAX {
                return Err(ProtocolError::InvalidFrame(format!(
                    "at most {EVIDENCE_ITEMS_MAX} evidence items"
                )));
            }
            if statement.chars().count() > STATEMENT_MAX {
                return Err(ProtocolError::InvalidFrame(format!(
                    "statement exceeds {STATEMENT_MAX} characters"
                )));
            }
            bounded("sig", sig, 128)
        }
        ClientFrame::ArbiterAccept { dispute_id, sig } => {
            bounded("dispute_id", dispute_id, 64)?;
            bounded("sig", sig, 128)
        }
        ClientFrame::ArbiterDecline { dispute_id, sig, .. } => {
            bounded("dispute_id", dispute_id, 64)?;
            bounded("sig", sig, 128)
        }
        ClientFrame::ArbiterVote { dispute_id, reasoning, sig, .. } => {
            bounded("dispute_id", dispute_id, 64)?;
            if reasoning.chars().count() > REASONING_MAX {
                return Err(ProtocolError::InvalidFrame(format!(
                    "reasoning exceeds {REASONING_MAX} characters"
                )));
            }
            bounded("sig", sig, 128)
        }
    }
}

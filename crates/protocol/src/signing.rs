//! Canonical signing-string builders, one per signed operation.
//!
//! Signer and verifier must agree byte-for-byte, so every builder lives here
//! and nowhere else. Optional fields render as empty strings; numeric fields
//! render in decimal.

use crate::frames::Verdict;

fn opt(value: Option<&str>) -> &str {
    value.unwrap_or("")
}

fn opt_num(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// `AUTH|<nonce>|<challenge_id>|<server_time>` — challenge–response login.
pub fn auth(nonce: &str, challenge_id: &str, server_time: u64) -> String {
    format!("AUTH|{nonce}|{challenge_id}|{server_time}")
}

/// `PROPOSAL|<id>|<from>|<to>|<task>|<amount>|<currency>|<capability>`.
pub fn proposal(
    id: &str,
    from: &str,
    to: &str,
    task: &str,
    amount: Option<u64>,
    currency: Option<&str>,
    capability: Option<&str>,
) -> String {
    format!(
        "PROPOSAL|{id}|{from}|{to}|{task}|{}|{}|{}",
        opt_num(amount),
        opt(currency),
        opt(capability)
    )
}

/// `ACCEPT|<proposal_id>|<payment_code>`.
pub fn accept(proposal_id: &str, payment_code: Option<&str>) -> String {
    format!("ACCEPT|{proposal_id}|{}", opt(payment_code))
}

/// `REJECT|<proposal_id>|<reason>`.
pub fn reject(proposal_id: &str, reason: Option<&str>) -> String {
    format!("REJECT|{proposal_id}|{}", opt(reason))
}

/// `COMPLETE|<proposal_id>|<proof>`.
pub fn complete(proposal_id: &str, proof: Option<&str>) -> String {
    format!("COMPLETE|{proposal_id}|{}", opt(proof))
}

/// `REGISTER_SKILLS|<agent>|<canonical-json-skills>`.
///
/// The caller supplies the RFC 8785 canonical serialization of the skills
/// list so the builder stays free of serialization concerns.
pub fn register_skills(agent: &str, canonical_skills: &str) -> String {
    format!("REGISTER_SKILLS|{agent}|{canonical_skills}")
}

/// `DISPUTE|<proposal_id>|<reason>` — the legacy fallback filing.
pub fn dispute(proposal_id: &str, reason: &str) -> String {
    format!("DISPUTE|{proposal_id}|{reason}")
}

/// `DISPUTE_INTENT|<proposal_id>|<reason>|<commitment>`.
pub fn dispute_intent(proposal_id: &str, reason: &str, commitment: &str) -> String {
    format!("DISPUTE_INTENT|{proposal_id}|{reason}|{commitment}")
}

/// `DISPUTE_REVEAL|<dispute_id>|<nonce>`.
pub fn dispute_reveal(dispute_id: &str, nonce: &str) -> String {
    format!("DISPUTE_REVEAL|{dispute_id}|{nonce}")
}

/// `EVIDENCE|<dispute_id>|<items_hash>|<statement>` where `items_hash` is the
/// SHA-256 (hex) of the canonical JSON of the items array.
pub fn evidence(dispute_id: &str, items_hash: &str, statement: &str) -> String {
    format!("EVIDENCE|{dispute_id}|{items_hash}|{statement}")
}

/// `ARBITER_ACCEPT|<dispute_id>`.
pub fn arbiter_accept(dispute_id: &str) -> String {
    format!("ARBITER_ACCEPT|{dispute_id}")
}

/// `ARBITER_DECLINE|<dispute_id>|<reason>`.
pub fn arbiter_decline(dispute_id: &str, reason: Option<&str>) -> String {
    format!("ARBITER_DECLINE|{dispute_id}|{}", opt(reason))
}

/// `ARBITER_VOTE|<dispute_id>|<verdict>|<reasoning>`.
pub fn arbiter_vote(dispute_id: &str, verdict: Verdict, reasoning: &str) -> String {
    format!("ARBITER_VOTE|{dispute_id}|{}|{reasoning}", verdict.as_str())
}

/// `VERIFY|<nonce>|<responder>` — peer identity proof.
pub fn peer_verify(nonce: &str, responder: &str) -> String {
    format!("VERIFY|{nonce}|{responder}")
}

//! Frame definitions. Every frame is a JSON object with a `type` string;
//! signed operations carry a base64 `sig` over the canonical signing string
//! for that operation (see [`crate::signing`]).

use agentchat_types::error::{ErrorCode, RelayError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stake pair offered with a proposal. Amounts are ELO points held in
/// escrow while the proposal is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stakes {
    /// Points escrowed from the proposer on acceptance.
    #[serde(default)]
    pub proposer: u64,
    /// Points escrowed from the acceptor on acceptance.
    #[serde(default)]
    pub acceptor: u64,
}

/// One advertised skill in the marketplace registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Asking rate in the proposer's currency, free-form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<u64>,
}

/// A dispute verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Disputant,
    Respondent,
    Mutual,
}

impl Verdict {
    /// The lowercase wire form, also used in signing strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Disputant => "disputant",
            Verdict::Respondent => "respondent",
            Verdict::Mutual => "mutual",
        }
    }
}

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientFrame {
    Identify {
        name: String,
        /// Lowercase-hex Ed25519 public key; absent for ephemeral sessions.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pubkey: Option<String>,
    },
    VerifyIdentity {
        challenge_id: String,
        signature: String,
    },
    Join {
        channel: String,
    },
    Leave {
        channel: String,
    },
    Msg {
        /// `#channel` or `@agent` target.
        to: String,
        content: String,
    },
    ListChannels {},
    ListAgents {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
    CreateChannel {
        channel: String,
        #[serde(default)]
        invite_only: bool,
    },
    Invite {
        channel: String,
        agent: String,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<u64>,
    },
    SetPresence {
        status: String,
    },
    Proposal {
        /// Client-minted `prop_` id; covered by the signature.
        id: String,
        to: String,
        task: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        currency: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capability: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stakes: Option<Stakes>,
        /// Absolute expiry, ms since epoch.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires: Option<u64>,
        sig: String,
    },
    Accept {
        proposal_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payment_code: Option<String>,
        sig: String,
    },
    Reject {
        proposal_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        sig: String,
    },
    Complete {
        proposal_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        proof: Option<String>,
        sig: String,
    },
    Dispute {
        proposal_id: String,
        reason: String,
        sig: String,
    },
    RegisterSkills {
        skills: Vec<Skill>,
        sig: String,
    },
    SearchSkills {
        query: String,
    },
    VerifyRequest {
        agent: String,
        nonce: String,
    },
    VerifyResponse {
        agent: String,
        nonce: String,
        signature: String,
    },
    AdminApprove {
        pubkey: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
        key: String,
    },
    AdminRevoke {
        /// Pubkey hex or agent id.
        identifier: String,
        key: String,
    },
    AdminList {
        key: String,
    },
    DisputeIntent {
        proposal_id: String,
        reason: String,
        /// `SHA-256(nonce)`, lowercase hex, of the disputant's secret nonce.
        commitment: String,
        sig: String,
    },
    DisputeReveal {
        dispute_id: String,
        nonce: String,
        sig: String,
    },
    Evidence {
        dispute_id: String,
        items: Vec<Value>,
        statement: String,
        sig: String,
    },
    ArbiterAccept {
        dispute_id: String,
        sig: String,
    },
    ArbiterDecline {
        dispute_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        sig: String,
    },
    ArbiterVote {
        dispute_id: String,
        verdict: Verdict,
        reasoning: String,
        sig: String,
    },
}

/// One channel row in a `CHANNELS` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel: String,
    pub agents: usize,
}

/// One registry row in a `SEARCH_RESULTS` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillListing {
    pub agent: String,
    pub skills: Vec<Skill>,
}

/// A per-agent rating change reported with a settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaEntry {
    pub agent: String,
    pub delta: i64,
    pub rating: i64,
}

/// One arbiter's cast vote as reported in a `VERDICT`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteInfo {
    pub arbiter: String,
    pub verdict: Verdict,
    pub reasoning: String,
}

/// A party's evidence bundle as relayed to arbiters in `CASE_READY`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePayload {
    pub items: Vec<Value>,
    /// SHA-256 over each item's canonical JSON, index-aligned with `items`.
    pub item_hashes: Vec<String>,
    pub statement: String,
}

/// One allowlist row in an `ADMIN_RESULT` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowlistEntryInfo {
    pub pubkey: String,
    pub approved_by: String,
    pub approved_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Frames the server may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerFrame {
    Welcome {
        agent_id: String,
        server: String,
    },
    Challenge {
        challenge_id: String,
        nonce: String,
        server_time: u64,
    },
    Msg {
        from: String,
        to: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        replay: bool,
    },
    Joined {
        channel: String,
        agents: Vec<String>,
    },
    Left {
        channel: String,
    },
    AgentJoined {
        channel: String,
        agent: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        replay: bool,
    },
    AgentLeft {
        channel: String,
        agent: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        replay: bool,
    },
    Channels {
        channels: Vec<ChannelInfo>,
    },
    Agents {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        agents: Vec<String>,
    },
    Error {
        code: String,
        message: String,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<u64>,
    },
    PresenceChanged {
        agent: String,
        status: String,
    },
    Proposal {
        id: String,
        from: String,
        to: String,
        task: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        currency: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capability: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stakes: Option<Stakes>,
        expires: u64,
        sig: String,
    },
    Accept {
        proposal_id: String,
        from: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payment_code: Option<String>,
        sig: String,
    },
    Reject {
        proposal_id: String,
        from: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        sig: String,
    },
    Complete {
        proposal_id: String,
        from: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        proof: Option<String>,
        deltas: Vec<DeltaEntry>,
        sig: String,
    },
    Dispute {
        proposal_id: String,
        from: String,
        reason: String,
    },
    SkillsRegistered {
        agent: String,
        count: usize,
    },
    SearchResults {
        query: String,
        results: Vec<SkillListing>,
    },
    VerifyRequest {
        from: String,
        nonce: String,
    },
    VerifyResponse {
        from: String,
        nonce: String,
        signature: String,
    },
    VerifySuccess {
        agent: String,
        nonce: String,
    },
    VerifyFailed {
        agent: String,
        reason: String,
    },
    AdminResult {
        action: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entries: Option<Vec<AllowlistEntryInfo>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    DisputeIntentAck {
        dispute_id: String,
        proposal_id: String,
    },
    DisputeRevealed {
        dispute_id: String,
        phase: String,
    },
    ArbiterAssigned {
        dispute_id: String,
        role: String,
    },
    PanelFormed {
        dispute_id: String,
        arbiters: Vec<String>,
        evidence_deadline: u64,
    },
    EvidenceReceived {
        dispute_id: String,
        party: String,
        items: usize,
    },
    CaseReady {
        dispute_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        disputant_evidence: Option<EvidencePayload>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        respondent_evidence: Option<EvidencePayload>,
        vote_deadline: u64,
    },
    Verdict {
        dispute_id: String,
        verdict: Verdict,
        votes: Vec<VoteInfo>,
    },
    DisputeFallback {
        dispute_id: String,
        reason: String,
    },
}

impl ServerFrame {
    /// Builds an `ERROR` frame from any wire-facing relay error.
    pub fn error(err: &RelayError) -> ServerFrame {
        ServerFrame::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Serializes the frame with the server-assigned `ts` metadata field.
    pub fn encode_with_ts(&self, ts: u64) -> String {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert("ts".to_string(), Value::from(ts));
        }
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentchat_types::error::ChannelError;

    #[test]
    fn client_frame_round_trips_with_screaming_types() {
        let raw = r#"{"type":"IDENTIFY","name":"alice"}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Identify {
                name: "alice".into(),
                pubkey: None
            }
        );

        let raw = r#"{"type":"LIST_CHANNELS"}"#;
        assert_eq!(
            serde_json::from_str::<ClientFrame>(raw).unwrap(),
            ClientFrame::ListChannels {}
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"EXPLODE"}"#).is_err());
        assert!(serde_json::from_str::<ClientFrame>(r#"{"no_type":true}"#).is_err());
    }

    #[test]
    fn verdict_wire_form_is_lowercase() {
        assert_eq!(serde_json::to_string(&Verdict::Disputant).unwrap(), "\"disputant\"");
        assert_eq!(
            serde_json::from_str::<Verdict>("\"mutual\"").unwrap(),
            Verdict::Mutual
        );
        assert_eq!(Verdict::Respondent.as_str(), "respondent");
    }

    #[test]
    fn server_frame_carries_ts() {
        let frame = ServerFrame::Pong { ts: None };
        let encoded = frame.encode_with_ts(1234);
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "PONG");
        assert_eq!(value["ts"], 1234);
    }

    #[test]
    fn replay_flag_is_omitted_when_false() {
        let live = ServerFrame::Msg {
            from: "@aa".into(),
            to: "#general".into(),
            content: "hi".into(),
            replay: false,
        };
        let encoded = serde_json::to_string(&live).unwrap();
        assert!(!encoded.contains("replay"));

        let replayed = ServerFrame::Msg {
            from: "@aa".into(),
            to: "#general".into(),
            content: "hi".into(),
            replay: true,
        };
        let encoded = serde_json::to_string(&replayed).unwrap();
        assert!(encoded.contains("\"replay\":true"));
    }

    #[test]
    fn error_frame_uses_stable_codes() {
        let err: RelayError = ChannelError::NotFound("#nope".into()).into();
        match ServerFrame::error(&err) {
            ServerFrame::Error { code, message } => {
                assert_eq!(code, "CHANNEL_NOT_FOUND");
                assert!(message.contains("#nope"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

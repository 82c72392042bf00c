//! The marketplace: a signed skill registry and the proposal lifecycle.
//!
//! Every transition requires a signature from the acting party over the
//! operation's canonical string. Either party of an ACCEPTED proposal may
//! send the single `COMPLETE`; the first valid one settles (the relay does
//! not run a two-step confirm).

use agentchat_crypto::hash::canonical_json;
use agentchat_crypto::sign::eddsa::{Ed25519PublicKey, Ed25519Signature};
use agentchat_protocol::frames::{DeltaEntry, ServerFrame, Skill, SkillListing, Stakes};
use agentchat_protocol::signing;
use agentchat_reputation::escrow::EscrowError;
use agentchat_reputation::{CompletionMeta, ReputationLedger};
use agentchat_types::config::MarketConfig;
use agentchat_types::error::MarketError;
use agentchat_types::ids::AgentId;
use agentchat_types::time::now_ms;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Lifecycle of a proposal. Transitions only move forward; no state is
/// entered twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalState {
    Pending,
    Accepted,
    Rejected,
    Completed,
    Disputed,
    Expired,
}

/// A stored proposal with its transition signatures.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub id: String,
    pub proposer: AgentId,
    pub acceptor: AgentId,
    pub task: String,
    pub amount: Option<u64>,
    pub currency: Option<String>,
    pub capability: Option<String>,
    pub stakes: Option<Stakes>,
    pub created_ms: u64,
    pub expires_ms: u64,
    pub state: ProposalState,
    /// Signature per transition, keyed by the frame type that caused it.
    pub signatures: BTreeMap<&'static str, String>,
}

/// One agent's registered skill set.
#[derive(Debug, Clone)]
pub struct SkillEntry {
    pub skills: Vec<Skill>,
    pub updated_ms: u64,
}

/// Skill registry plus proposal store. Shared behind an `Arc`.
pub struct Marketplace {
    cfg: MarketConfig,
    ledger: Arc<ReputationLedger>,
    proposals: RwLock<HashMap<String, Proposal>>,
    skills: DashMap<AgentId, SkillEntry>,
}

fn verify_sig(
    pubkey: &Ed25519PublicKey,
    payload: &str,
    sig_b64: &str,
) -> Result<(), MarketError> {
    let sig = Ed25519Signature::from_base64(sig_b64)
        .map_err(|e| MarketError::SignatureRequired(e.to_string()))?;
    pubkey
        .verify(payload.as_bytes(), &sig)
        .map_err(|_| MarketError::SignatureRequired("signature did not verify".to_string()))
}

impl Marketplace {
    pub fn new(cfg: MarketConfig, ledger: Arc<ReputationLedger>) -> Self {
        Marketplace {
            cfg,
            ledger,
            proposals: RwLock::new(HashMap::new()),
            skills: DashMap::new(),
        }
    }

    // --- Skill registry ---

    /// Replaces the agent's registry entry after verifying the signature
    /// over the canonical serialization of the skills list.
    pub fn register_skills(
        &self,
        agent: &AgentId,
        pubkey: &Ed25519PublicKey,
        skills: Vec<Skill>,
        sig: &str,
    ) -> Result<ServerFrame, MarketError> {
        let canonical = canonical_json(&skills)
            .map_err(|e| MarketError::SignatureRequired(e.to_string()))?;
        let payload = signing::register_skills(&agent.to_string(), &canonical);
        verify_sig(pubkey, &payload, sig)?;

        let count = skills.len();
        self.skills.insert(
            agent.clone(),
            SkillEntry { skills, updated_ms: now_ms() },
        );
        Ok(ServerFrame::SkillsRegistered {
            agent: agent.to_string(),
            count,
        })
    }

    /// Case-insensitive substring search over names and descriptions.
    pub fn search_skills(&self, query: &str) -> ServerFrame {
        let needle = query.to_lowercase();
        let mut results: Vec<SkillListing> = self
            .skills
            .iter()
            .filter_map(|entry| {
                let matched: Vec<Skill> = entry
                    .value()
                    .skills
                    .iter()
                    .filter(|s| {
                        s.name.to_lowercase().contains(&needle)
                            || s.description
                                .as_deref()
                                .map(|d| d.to_lowercase().contains(&needle))
                                .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                if matched.is_empty() {
                    None
                } else {
                    Some(SkillListing {
                        agent: entry.key().to_string(),
                        skills: matched,
                    })
                }
            })
            .collect();
        results.sort_by(|a, b| a.agent.cmp(&b.agent));
        ServerFrame::SearchResults {
            query: query.to_string(),
            results,
        }
    }

    // --- Proposal lifecycle ---

    /// Stores a new PENDING proposal and returns the relay frame for the
    /// acceptor.
    #[allow(clippy::too_many_arguments)]
    pub fn propose(
        &self,
        proposer: &AgentId,
        pubkey: &Ed25519PublicKey,
        id: &str,
        acceptor: &AgentId,
        task: &str,
        amount: Option<u64>,
        currency: Option<String>,
        capability: Option<String>,
        stakes: Option<Stakes>,
        expires: Option<u64>,
        sig: &str,
    ) -> Result<ServerFrame, MarketError> {
        let payload = signing::proposal(
            id,
            &proposer.to_string(),
            &acceptor.to_string(),
            task,
            amount,
            currency.as_deref(),
            capability.as_deref(),
        );
        verify_sig(pubkey, &payload, sig)?;

        if proposer == acceptor {
            return Err(MarketError::InvalidTransition(
                "cannot propose to yourself".to_string(),
            ));
        }
        if let Some(s) = &stakes {
            self.validate_stakes(s)?;
        }

        let now = now_ms();
        let expires_ms = expires.unwrap_or(now + self.cfg.default_expiry_ms);
        if expires_ms <= now {
            return Err(MarketError::Expired(id.to_string()));
        }

        let proposal = Proposal {
            id: id.to_string(),
            proposer: proposer.clone(),
            acceptor: acceptor.clone(),
            task: task.to_string(),
            amount,
            currency: currency.clone(),
            capability: capability.clone(),
            stakes,
            created_ms: now,
            expires_ms,
            state: ProposalState::Pending,
            signatures: BTreeMap::from([("PROPOSAL", sig.to_string())]),
        };

        let mut proposals = self.write();
        if proposals.contains_key(id) {
            return Err(MarketError::InvalidTransition(format!(
                "proposal {id} already exists"
            )));
        }
        proposals.insert(id.to_string(), proposal);

        Ok(ServerFrame::Proposal {
            id: id.to_string(),
            from: proposer.to_string(),
            to: acceptor.to_string(),
            task: task.to_string(),
            amount,
            currency,
            capability,
            stakes,
            expires: expires_ms,
            sig: sig.to_string(),
        })
    }

    fn validate_stakes(&self, stakes: &Stakes) -> Result<(), MarketError> {
        if stakes.proposer == 0 && stakes.acceptor == 0 {
            return Err(MarketError::InvalidStake("both stakes are zero".to_string()));
        }
        for amount in [stakes.proposer, stakes.acceptor] {
            if amount > self.cfg.max_stake {
                return Err(MarketError::InvalidStake(format!(
                    "stake {amount} exceeds cap {}",
                    self.cfg.max_stake
                )));
            }
        }
        Ok(())
    }

    /// ACCEPT: acceptor only, PENDING and unexpired; stakes move to escrow.
    /// Returns the relay frame and the proposer to route it to.
    pub fn accept(
        &self,
        sender: &AgentId,
        pubkey: &Ed25519PublicKey,
        proposal_id: &str,
        payment_code: Option<String>,
        sig: &str,
    ) -> Result<(ServerFrame, AgentId), MarketError> {
        let payload = signing::accept(proposal_id, payment_code.as_deref());
        verify_sig(pubkey, &payload, sig)?;

        let mut proposals = self.write();
        let proposal = Self::live_mut(&mut proposals, proposal_id)?;
        if &proposal.acceptor != sender {
            return Err(MarketError::NotParty(proposal_id.to_string()));
        }
        if proposal.state != ProposalState::Pending {
            return Err(MarketError::InvalidTransition(format!(
                "proposal {proposal_id} is not pending"
            )));
        }

        if let Some(stakes) = proposal.stakes {
            self.ledger
                .hold_escrow(
                    proposal_id,
                    &proposal.proposer,
                    &proposal.acceptor,
                    stakes.proposer,
                    stakes.acceptor,
                )
                .map_err(map_escrow)?;
        }

        proposal.state = ProposalState::Accepted;
        proposal.signatures.insert("ACCEPT", sig.to_string());
        let proposer = proposal.proposer.clone();

        Ok((
            ServerFrame::Accept {
                proposal_id: proposal_id.to_string(),
                from: sender.to_string(),
                payment_code,
                sig: sig.to_string(),
            },
            proposer,
        ))
    }

    /// REJECT: acceptor only, PENDING.
    pub fn reject(
        &self,
        sender: &AgentId,
        pubkey: &Ed25519PublicKey,
        proposal_id: &str,
        reason: Option<String>,
        sig: &str,
    ) -> Result<(ServerFrame, AgentId), MarketError> {
        let payload = signing::reject(proposal_id, reason.as_deref());
        verify_sig(pubkey, &payload, sig)?;

        let mut proposals = self.write();
        let proposal = Self::live_mut(&mut proposals, proposal_id)?;
        if &proposal.acceptor != sender {
            return Err(MarketError::NotParty(proposal_id.to_string()));
        }
        if proposal.state != ProposalState::Pending {
            return Err(MarketError::InvalidTransition(format!(
                "proposal {proposal_id} is not pending"
            )));
        }

        proposal.state = ProposalState::Rejected;
        proposal.signatures.insert("REJECT", sig.to_string());
        let proposer = proposal.proposer.clone();
        // Stakes are only held from ACCEPT onward, but release defensively
        // in case a recovery path left a row behind.
        let _ = self.ledger.release_escrow(proposal_id);

        Ok((
            ServerFrame::Reject {
                proposal_id: proposal_id.to_string(),
                from: sender.to_string(),
                reason,
                sig: sig.to_string(),
            },
            proposer,
        ))
    }

    /// COMPLETE: either party, ACCEPTED only. Settles both ratings, releases
    /// escrow, and appends the receipt. Returns the relay frame and the
    /// counterparty.
    pub fn complete(
        &self,
        sender: &AgentId,
        pubkey: &Ed25519PublicKey,
        proposal_id: &str,
        proof: Option<String>,
        sig: &str,
    ) -> Result<(ServerFrame, AgentId), MarketError> {
        let payload = signing::complete(proposal_id, proof.as_deref());
        verify_sig(pubkey, &payload, sig)?;

        let (proposer, acceptor, meta) = {
            let mut proposals = self.write();
            let proposal = Self::live_mut(&mut proposals, proposal_id)?;
            if &proposal.proposer != sender && &proposal.acceptor != sender {
                return Err(MarketError::NotParty(proposal_id.to_string()));
            }
            if proposal.state != ProposalState::Accepted {
                return Err(MarketError::InvalidTransition(format!(
                    "proposal {proposal_id} is not accepted"
                )));
            }
            proposal.state = ProposalState::Completed;
            proposal.signatures.insert("COMPLETE", sig.to_string());
            (
                proposal.proposer.clone(),
                proposal.acceptor.clone(),
                CompletionMeta {
                    proposal_id: proposal_id.to_string(),
                    amount: proposal.amount,
                    currency: proposal.currency.clone(),
                    capability: proposal.capability.clone(),
                    proof: proof.clone(),
                },
            )
        };

        let deltas = self.ledger.settle_completion(&proposer, &acceptor, meta);
        let other = if sender == &proposer { acceptor } else { proposer };

        Ok((
            ServerFrame::Complete {
                proposal_id: proposal_id.to_string(),
                from: sender.to_string(),
                proof,
                deltas: deltas
                    .into_iter()
                    .map(|d| DeltaEntry { agent: d.agent, delta: d.delta, rating: d.rating })
                    .collect(),
                sig: sig.to_string(),
            },
            other,
        ))
    }

    /// Parties and current state, for the dispute engine's filing checks.
    pub fn proposal_parties(
        &self,
        proposal_id: &str,
    ) -> Result<(AgentId, AgentId, ProposalState), MarketError> {
        let mut proposals = self.write();
        let proposal = Self::live_mut(&mut proposals, proposal_id)?;
        Ok((proposal.proposer.clone(), proposal.acceptor.clone(), proposal.state))
    }

    /// ACCEPTED → DISPUTED, called by the dispute engine once a dispute
    /// becomes live.
    pub fn mark_disputed(&self, proposal_id: &str, sig: Option<&str>) -> Result<(), MarketError> {
        let mut proposals = self.write();
        let proposal = Self::live_mut(&mut proposals, proposal_id)?;
        if proposal.state != ProposalState::Accepted {
            return Err(MarketError::InvalidTransition(format!(
                "proposal {proposal_id} is not accepted"
            )));
        }
        proposal.state = ProposalState::Disputed;
        if let Some(sig) = sig {
            proposal.signatures.insert("DISPUTE", sig.to_string());
        }
        Ok(())
    }

    /// Looks up a proposal, applying lazy expiry to PENDING rows first.
    fn live_mut<'a>(
        proposals: &'a mut HashMap<String, Proposal>,
        proposal_id: &str,
    ) -> Result<&'a mut Proposal, MarketError> {
        let proposal = proposals
            .get_mut(proposal_id)
            .ok_or_else(|| MarketError::ProposalNotFound(proposal_id.to_string()))?;
        if proposal.state == ProposalState::Pending && now_ms() > proposal.expires_ms {
            proposal.state = ProposalState::Expired;
        }
        if proposal.state == ProposalState::Expired {
            return Err(MarketError::Expired(proposal_id.to_string()));
        }
        Ok(proposal)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Proposal>> {
        self.proposals.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn map_escrow(e: EscrowError) -> MarketError {
    match e {
        EscrowError::InsufficientReputation { .. } => {
            MarketError::InsufficientReputation(e.to_string())
        }
        EscrowError::Duplicate(_) | EscrowError::NotFound(_) => {
            MarketError::InvalidTransition(e.to_string())
        }
    }
}

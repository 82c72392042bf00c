//! Agentcourt: the panel-arbitrated dispute engine.
//!
//! Filing is commit-reveal so the panel cannot be front-run: the disputant
//! files `SHA-256(nonce)` first and reveals the nonce afterwards, and the
//! selection seed mixes in a server nonce chosen at filing time. Every
//! phase-changing operation on a single dispute serializes through that
//! dispute's own async mutex; phase deadlines are single-fire timers that
//! get cancelled when the phase advances.

use crate::marketplace::Marketplace;
use crate::outbound::Outbound;
use agentchat_crypto::hash::{canonical_json_sha256, sha256_hex};
use agentchat_crypto::sign::eddsa::{Ed25519PublicKey, Ed25519Signature};
use agentchat_protocol::frames::{EvidencePayload, ServerFrame, Verdict, VoteInfo};
use agentchat_protocol::signing;
use agentchat_reputation::{ArbiterOutcome, DisputeOutcome, ReputationLedger};
use agentchat_types::config::CourtConfig;
use agentchat_types::error::{DisputeError, MarketError};
use agentchat_types::ids::{AgentId, DisputeId};
use agentchat_types::time::now_ms;
use rand::RngCore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

pub mod selection;

/// Dispute phases. Phases only advance forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    RevealPending,
    ArbiterResponse,
    Evidence,
    Deliberation,
    Resolved,
    Fallback,
    Voided,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::RevealPending => "reveal_pending",
            Phase::ArbiterResponse => "arbiter_response",
            Phase::Evidence => "evidence",
            Phase::Deliberation => "deliberation",
            Phase::Resolved => "resolved",
            Phase::Fallback => "fallback",
            Phase::Voided => "voided",
        }
    }
}

/// Status of one arbiter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Pending,
    Accepted,
    Declined,
    Replaced,
    Voted,
    Forfeited,
}

/// One seat on the panel, past or present.
#[derive(Debug, Clone)]
pub struct ArbiterSlot {
    pub agent: AgentId,
    pub status: SlotStatus,
    pub vote: Option<Verdict>,
    pub reasoning: Option<String>,
}

impl ArbiterSlot {
    fn active(&self) -> bool {
        matches!(
            self.status,
            SlotStatus::Pending | SlotStatus::Accepted | SlotStatus::Voted | SlotStatus::Forfeited
        )
    }
}

/// A party's evidence, with per-item integrity hashes.
#[derive(Debug, Clone)]
pub struct EvidenceBundle {
    pub items: Vec<Value>,
    pub item_hashes: Vec<String>,
    pub statement: String,
    pub submitted_ms: u64,
}

impl EvidenceBundle {
    fn payload(&self) -> EvidencePayload {
        EvidencePayload {
            items: self.items.clone(),
            item_hashes: self.item_hashes.clone(),
            statement: self.statement.clone(),
        }
    }
}

/// One dispute's full state.
pub struct Dispute {
    pub id: DisputeId,
    pub proposal_id: String,
    pub disputant: AgentId,
    pub respondent: AgentId,
    pub reason: String,
    pub phase: Phase,
    pub commitment: String,
    pub server_nonce: String,
    pub revealed_nonce: Option<String>,
    /// Deterministic candidate ordering; replacements draw from the tail.
    order: Vec<AgentId>,
    next_candidate: usize,
    pub slots: Vec<ArbiterSlot>,
    pub replacement_rounds: u32,
    pub disputant_evidence: Option<EvidenceBundle>,
    pub respondent_evidence: Option<EvidenceBundle>,
    pub verdict: Option<Verdict>,
    pub created_ms: u64,
    pub deadline_ms: u64,
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

impl Dispute {
    fn slot_mut(&mut self, agent: &AgentId) -> Option<&mut ArbiterSlot> {
        self.slots
            .iter_mut()
            .find(|s| &s.agent == agent && s.active())
    }

    fn panel(&self) -> Vec<AgentId> {
        self.slots
            .iter()
            .filter(|s| s.active())
            .map(|s| s.agent.clone())
            .collect()
    }
}

/// The dispute engine. Shared behind an `Arc`; timers re-enter through it.
pub struct CourtEngine {
    cfg: CourtConfig,
    ledger: Arc<ReputationLedger>,
    market: Arc<Marketplace>,
    outbound: Arc<dyn Outbound>,
    disputes: Mutex<HashMap<String, Arc<AsyncMutex<Dispute>>>>,
    by_proposal: Mutex<HashMap<String, String>>,
    last_involvement: Mutex<HashMap<AgentId, u64>>,
}

fn verify_sig(pubkey: &Ed25519PublicKey, payload: &str, sig_b64: &str) -> Result<(), DisputeError> {
    let sig = Ed25519Signature::from_base64(sig_b64)
        .map_err(|e| DisputeError::SignatureRequired(e.to_string()))?;
    pubkey
        .verify(payload.as_bytes(), &sig)
        .map_err(|_| DisputeError::SignatureRequired("signature did not verify".to_string()))
}

fn map_market(e: MarketError, proposal_id: &str) -> DisputeError {
    match e {
        MarketError::ProposalNotFound(_) => DisputeError::NotFound(proposal_id.to_string()),
        other => DisputeError::WrongPhase(other.to_string()),
    }
}

fn fee_key(dispute_id: &DisputeId) -> String {
    format!("fee:{dispute_id}")
}

impl CourtEngine {
    pub fn new(
        cfg: CourtConfig,
        ledger: Arc<ReputationLedger>,
        market: Arc<Marketplace>,
        outbound: Arc<dyn Outbound>,
    ) -> Arc<Self> {
        Arc::new(CourtEngine {
            cfg,
            ledger,
            market,
            outbound,
            disputes: Mutex::new(HashMap::new()),
            by_proposal: Mutex::new(HashMap::new()),
            last_involvement: Mutex::new(HashMap::new()),
        })
    }

    /// Open and resolved dispute counts, for the health endpoint.
    pub async fn counts(&self) -> (usize, usize) {
        let arcs: Vec<_> = self.index().values().cloned().collect();
        let mut open = 0;
        let mut resolved = 0;
        for arc in arcs {
            let dispute = arc.lock().await;
            match dispute.phase {
                Phase::Resolved => resolved += 1,
                Phase::Voided => {}
                _ => open += 1,
            }
        }
        (open, resolved)
    }

    /// Cancels every pending phase timer. Called at shutdown.
    pub async fn shutdown(&self) {
        let arcs: Vec<_> = self.index().values().cloned().collect();
        for arc in arcs {
            let mut dispute = arc.lock().await;
            if let Some(handle) = dispute.timer.take() {
                handle.abort();
            }
        }
    }

    // --- Filing (commit-reveal) ---

    /// `DISPUTE_INTENT`: validates the proposal, escrows the filing fee, and
    /// parks the dispute in `reveal_pending` under a reveal deadline.
    pub async fn file_intent(
        self: &Arc<Self>,
        sender: &AgentId,
        pubkey: &Ed25519PublicKey,
        proposal_id: &str,
        reason: &str,
        commitment: &str,
        sig: &str,
    ) -> Result<ServerFrame, DisputeError> {
        verify_sig(pubkey, &signing::dispute_intent(proposal_id, reason, commitment), sig)?;

        let (proposer, acceptor, state) = self
            .market
            .proposal_parties(proposal_id)
            .map_err(|e| map_market(e, proposal_id))?;
        if state != crate::marketplace::ProposalState::Accepted {
            return Err(DisputeError::WrongPhase(format!(
                "proposal {proposal_id} is not accepted"
            )));
        }
        let respondent = if sender == &proposer {
            acceptor
        } else if sender == &acceptor {
            proposer
        } else {
            return Err(DisputeError::NotParty(proposal_id.to_string()));
        };

        {
            let by_proposal = self.by_proposal.lock().unwrap_or_else(|e| e.into_inner());
            if by_proposal.contains_key(proposal_id) {
                return Err(DisputeError::AlreadyDisputed(proposal_id.to_string()));
            }
        }

        let id = DisputeId::generate(now_ms());
        self.ledger
            .hold_escrow(&fee_key(&id), sender, sender, self.cfg.filing_fee, 0)
            .map_err(|e| DisputeError::InsufficientReputation(e.to_string()))?;

        let mut server_nonce = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut server_nonce);

        let mut dispute = Dispute {
            id: id.clone(),
            proposal_id: proposal_id.to_string(),
            disputant: sender.clone(),
            respondent,
            reason: reason.to_string(),
            phase: Phase::RevealPending,
            commitment: commitment.to_ascii_lowercase(),
            server_nonce: hex::encode(server_nonce),
            revealed_nonce: None,
            order: Vec::new(),
            next_candidate: 0,
            slots: Vec::new(),
            replacement_rounds: 0,
            disputant_evidence: None,
            respondent_evidence: None,
            verdict: None,
            created_ms: now_ms(),
            deadline_ms: 0,
            epoch: 0,
            timer: None,
        };
        self.schedule(&mut dispute, Phase::RevealPending, self.cfg.reveal_window_ms);

        self.touch_involvement(&[dispute.disputant.clone(), dispute.respondent.clone()]);
        {
            let mut by_proposal = self.by_proposal.lock().unwrap_or_else(|e| e.into_inner());
            by_proposal.insert(proposal_id.to_string(), id.to_string());
        }
        self.index().insert(id.to_string(), Arc::new(AsyncMutex::new(dispute)));

        tracing::info!(target: "agentcourt", dispute = %id, proposal = %proposal_id, "dispute intent filed");
        Ok(ServerFrame::DisputeIntentAck {
            dispute_id: id.to_string(),
            proposal_id: proposal_id.to_string(),
        })
    }

    /// `DISPUTE_REVEAL`: checks the commitment, seeds the shuffle, builds the
    /// pool, and either assigns the panel or falls back.
    pub async fn reveal(
        self: &Arc<Self>,
        sender: &AgentId,
        pubkey: &Ed25519PublicKey,
        dispute_id: &str,
        nonce: &str,
        sig: &str,
    ) -> Result<ServerFrame, DisputeError> {
        let arc = self.get(dispute_id)?;
        let mut dispute = arc.lock().await;

        if dispute.phase != Phase::RevealPending {
            return Err(DisputeError::WrongPhase(dispute.phase.as_str().to_string()));
        }
        if sender != &dispute.disputant {
            return Err(DisputeError::NotParty(dispute_id.to_string()));
        }
        verify_sig(pubkey, &signing::dispute_reveal(dispute_id, nonce), sig)?;
        if sha256_hex(nonce.as_bytes()) != dispute.commitment {
            return Err(DisputeError::CommitMismatch);
        }

        self.cancel_timer(&mut dispute);
        dispute.revealed_nonce = Some(nonce.to_string());

        // The proposal may have completed between intent and reveal; if so
        // the dispute dies and the fee goes back.
        if let Err(e) = self.market.mark_disputed(&dispute.proposal_id, Some(sig)) {
            dispute.phase = Phase::Voided;
            let _ = self.ledger.release_escrow(&fee_key(&dispute.id));
            self.forget_proposal(&dispute.proposal_id);
            return Err(map_market(e, &dispute.proposal_id));
        }

        let seed = selection::compute_seed(&dispute.proposal_id, nonce, &dispute.server_nonce);
        let pool = self.build_pool(&dispute.disputant, &dispute.respondent);
        dispute.order = selection::deterministic_order(seed, pool);
        dispute.next_candidate = 0;

        if dispute.order.len() < self.cfg.panel_size {
            self.enter_fallback(&mut dispute, "arbiter pool is too small");
            return Ok(ServerFrame::DisputeRevealed {
                dispute_id: dispute_id.to_string(),
                phase: Phase::Fallback.as_str().to_string(),
            });
        }

        for _ in 0..self.cfg.panel_size {
            let agent = dispute.order[dispute.next_candidate].clone();
            dispute.next_candidate += 1;
            dispute.slots.push(ArbiterSlot {
                agent,
                status: SlotStatus::Pending,
                vote: None,
                reasoning: None,
            });
        }
        dispute.phase = Phase::ArbiterResponse;
        self.schedule(&mut dispute, Phase::ArbiterResponse, self.cfg.response_window_ms);
        self.touch_involvement(&dispute.panel());

        for arbiter in dispute.panel() {
            self.outbound.deliver(
                &arbiter,
                ServerFrame::ArbiterAssigned {
                    dispute_id: dispute_id.to_string(),
                    role: "arbiter".to_string(),
                },
            );
        }
        self.outbound.deliver(
            &dispute.respondent,
            ServerFrame::DisputeRevealed {
                dispute_id: dispute_id.to_string(),
                phase: Phase::ArbiterResponse.as_str().to_string(),
            },
        );

        tracing::info!(target: "agentcourt", dispute = %dispute_id, panel = ?dispute.panel(), "panel selected");
        Ok(ServerFrame::DisputeRevealed {
            dispute_id: dispute_id.to_string(),
            phase: Phase::ArbiterResponse.as_str().to_string(),
        })
    }

    // --- Arbiter response ---

    pub async fn arbiter_accept(
        self: &Arc<Self>,
        sender: &AgentId,
        pubkey: &Ed25519PublicKey,
        dispute_id: &str,
        sig: &str,
    ) -> Result<(), DisputeError> {
        let arc = self.get(dispute_id)?;
        let mut dispute = arc.lock().await;
        if dispute.phase != Phase::ArbiterResponse {
            return Err(DisputeError::WrongPhase(dispute.phase.as_str().to_string()));
        }
        verify_sig(pubkey, &signing::arbiter_accept(dispute_id), sig)?;

        let slot = dispute
            .slot_mut(sender)
            .ok_or_else(|| DisputeError::NotArbiter(dispute_id.to_string()))?;
        if slot.status != SlotStatus::Pending {
            return Err(DisputeError::WrongPhase("slot already answered".to_string()));
        }
        slot.status = SlotStatus::Accepted;

        let accepted = dispute
            .slots
            .iter()
            .filter(|s| s.status == SlotStatus::Accepted)
            .count();
        if accepted == self.cfg.panel_size {
            self.open_evidence(&mut dispute);
        }
        Ok(())
    }

    pub async fn arbiter_decline(
        self: &Arc<Self>,
        sender: &AgentId,
        pubkey: &Ed25519PublicKey,
        dispute_id: &str,
        reason: Option<&str>,
        sig: &str,
    ) -> Result<(), DisputeError> {
        let arc = self.get(dispute_id)?;
        let mut dispute = arc.lock().await;
        if dispute.phase != Phase::ArbiterResponse {
            return Err(DisputeError::WrongPhase(dispute.phase.as_str().to_string()));
        }
        verify_sig(pubkey, &signing::arbiter_decline(dispute_id, reason), sig)?;

        let slot = dispute
            .slot_mut(sender)
            .ok_or_else(|| DisputeError::NotArbiter(dispute_id.to_string()))?;
        if slot.status != SlotStatus::Pending {
            return Err(DisputeError::WrongPhase("slot already answered".to_string()));
        }
        slot.status = SlotStatus::Declined;
        tracing::info!(target: "agentcourt", dispute = %dispute_id, arbiter = %sender, "arbiter declined");

        self.replace_open_slots(&mut dispute, 1);
        Ok(())
    }

    /// Draws replacements for every non-accepted seat. `needed` seats were
    /// vacated by the caller; the replacement-round counter increments once
    /// per sweep and tripping the cap drops the dispute to fallback.
    fn replace_open_slots(self: &Arc<Self>, dispute: &mut Dispute, needed: usize) {
        dispute.replacement_rounds += 1;
        if dispute.replacement_rounds > self.cfg.replacement_cap {
            self.enter_fallback(dispute, "too many arbiter declines");
            return;
        }

        let mut drawn = Vec::new();
        for _ in 0..needed {
            if dispute.next_candidate >= dispute.order.len() {
                self.enter_fallback(dispute, "arbiter pool exhausted");
                return;
            }
            let agent = dispute.order[dispute.next_candidate].clone();
            dispute.next_candidate += 1;
            dispute.slots.push(ArbiterSlot {
                agent: agent.clone(),
                status: SlotStatus::Pending,
                vote: None,
                reasoning: None,
            });
            drawn.push(agent);
        }
        self.touch_involvement(&drawn);
        for agent in &drawn {
            self.outbound.deliver(
                agent,
                ServerFrame::ArbiterAssigned {
                    dispute_id: dispute.id.to_string(),
                    role: "arbiter".to_string(),
                },
            );
        }
    }

    fn open_evidence(self: &Arc<Self>, dispute: &mut Dispute) {
        dispute.phase = Phase::Evidence;
        self.schedule(dispute, Phase::Evidence, self.cfg.evidence_window_ms);
        let frame = ServerFrame::PanelFormed {
            dispute_id: dispute.id.to_string(),
            arbiters: dispute.panel().iter().map(|a| a.to_string()).collect(),
            evidence_deadline: dispute.deadline_ms,
        };
        for agent in dispute
            .panel()
            .iter()
            .chain([dispute.disputant.clone(), dispute.respondent.clone()].iter())
        {
            self.outbound.deliver(agent, frame.clone());
        }
    }

    // --- Evidence ---

    /// One `EVIDENCE` submission per party before the deadline. Items are
    /// hashed over their canonical JSON for integrity.
    pub async fn submit_evidence(
        self: &Arc<Self>,
        sender: &AgentId,
        pubkey: &Ed25519PublicKey,
        dispute_id: &str,
        items: Vec<Value>,
        statement: &str,
        sig: &str,
    ) -> Result<ServerFrame, DisputeError> {
        let arc = self.get(dispute_id)?;
        let mut dispute = arc.lock().await;
        if dispute.phase != Phase::Evidence {
            return Err(DisputeError::WrongPhase(dispute.phase.as_str().to_string()));
        }
        let is_disputant = sender == &dispute.disputant;
        if !is_disputant && sender != &dispute.respondent {
            return Err(DisputeError::NotParty(dispute_id.to_string()));
        }

        let items_hash = canonical_json_sha256(&items)
            .map_err(|e| DisputeError::SignatureRequired(e.to_string()))?;
        verify_sig(pubkey, &signing::evidence(dispute_id, &items_hash, statement), sig)?;

        let slot = if is_disputant {
            &mut dispute.disputant_evidence
        } else {
            &mut dispute.respondent_evidence
        };
        if slot.is_some() {
            return Err(DisputeError::EvidenceAlreadySubmitted(dispute_id.to_string()));
        }

        let item_hashes = items
            .iter()
            .map(canonical_json_sha256)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DisputeError::SignatureRequired(e.to_string()))?;
        let count = items.len();
        *slot = Some(EvidenceBundle {
            items,
            item_hashes,
            statement: statement.to_string(),
            submitted_ms: now_ms(),
        });

        if dispute.disputant_evidence.is_some() && dispute.respondent_evidence.is_some() {
            self.open_deliberation(&mut dispute);
        }

        Ok(ServerFrame::EvidenceReceived {
            dispute_id: dispute_id.to_string(),
            party: sender.to_string(),
            items: count,
        })
    }

    fn open_deliberation(self: &Arc<Self>, dispute: &mut Dispute) {
        dispute.phase = Phase::Deliberation;
        self.schedule(dispute, Phase::Deliberation, self.cfg.vote_window_ms);
        let frame = ServerFrame::CaseReady {
            dispute_id: dispute.id.to_string(),
            disputant_evidence: dispute.disputant_evidence.as_ref().map(|e| e.payload()),
            respondent_evidence: dispute.respondent_evidence.as_ref().map(|e| e.payload()),
            vote_deadline: dispute.deadline_ms,
        };
        for arbiter in dispute.panel() {
            self.outbound.deliver(&arbiter, frame.clone());
        }
    }

    // --- Deliberation ---

    pub async fn arbiter_vote(
        self: &Arc<Self>,
        sender: &AgentId,
        pubkey: &Ed25519PublicKey,
        dispute_id: &str,
        verdict: Verdict,
        reasoning: &str,
        sig: &str,
    ) -> Result<(), DisputeError> {
        let arc = self.get(dispute_id)?;
        let mut dispute = arc.lock().await;
        if dispute.phase != Phase::Deliberation {
            return Err(DisputeError::WrongPhase(dispute.phase.as_str().to_string()));
        }
        verify_sig(pubkey, &signing::arbiter_vote(dispute_id, verdict, reasoning), sig)?;

        let slot = dispute
            .slot_mut(sender)
            .ok_or_else(|| DisputeError::NotArbiter(dispute_id.to_string()))?;
        match slot.status {
            SlotStatus::Accepted => {}
            SlotStatus::Voted => {
                return Err(DisputeError::WrongPhase("vote already cast".to_string()))
            }
            _ => return Err(DisputeError::NotArbiter(dispute_id.to_string())),
        }
        slot.status = SlotStatus::Voted;
        slot.vote = Some(verdict);
        slot.reasoning = Some(reasoning.to_string());

        let outstanding = dispute
            .slots
            .iter()
            .any(|s| s.status == SlotStatus::Accepted);
        if !outstanding {
            self.resolve(&mut dispute);
        }
        Ok(())
    }

    /// Tallies votes, settles, and relays the verdict. Accepted-but-silent
    /// arbiters have already been marked forfeited by the vote timeout.
    fn resolve(self: &Arc<Self>, dispute: &mut Dispute) {
        self.cancel_timer(dispute);

        let majority = self.cfg.panel_size / 2 + 1;
        let count = |v: Verdict| {
            dispute
                .slots
                .iter()
                .filter(|s| s.status == SlotStatus::Voted && s.vote == Some(v))
                .count()
        };
        let verdict = if count(Verdict::Disputant) >= majority {
            Verdict::Disputant
        } else if count(Verdict::Respondent) >= majority {
            Verdict::Respondent
        } else {
            Verdict::Mutual
        };
        dispute.verdict = Some(verdict);
        dispute.phase = Phase::Resolved;

        let arbiters: Vec<(AgentId, ArbiterOutcome)> = dispute
            .slots
            .iter()
            .filter_map(|s| match s.status {
                SlotStatus::Voted if s.vote == Some(verdict) => {
                    Some((s.agent.clone(), ArbiterOutcome::Majority))
                }
                SlotStatus::Voted => Some((s.agent.clone(), ArbiterOutcome::Dissent)),
                SlotStatus::Forfeited => Some((s.agent.clone(), ArbiterOutcome::Forfeit)),
                _ => None,
            })
            .collect();
        let outcome = match verdict {
            Verdict::Disputant => DisputeOutcome::Disputant,
            Verdict::Respondent => DisputeOutcome::Respondent,
            Verdict::Mutual => DisputeOutcome::Mutual,
        };

        self.ledger.settle_dispute(
            dispute.id.as_str(),
            &dispute.proposal_id,
            &dispute.disputant,
            &dispute.respondent,
            outcome,
            &arbiters,
        );

        let mut involved: Vec<AgentId> =
            vec![dispute.disputant.clone(), dispute.respondent.clone()];
        involved.extend(arbiters.iter().map(|(a, _)| a.clone()));
        self.touch_involvement(&involved);

        let votes: Vec<VoteInfo> = dispute
            .slots
            .iter()
            .filter(|s| s.status == SlotStatus::Voted)
            .map(|s| VoteInfo {
                arbiter: s.agent.to_string(),
                verdict: s.vote.unwrap_or(Verdict::Mutual),
                reasoning: s.reasoning.clone().unwrap_or_default(),
            })
            .collect();
        let frame = ServerFrame::Verdict {
            dispute_id: dispute.id.to_string(),
            verdict,
            votes,
        };
        for agent in involved {
            self.outbound.deliver(&agent, frame.clone());
        }
        tracing::info!(target: "agentcourt", dispute = %dispute.id, verdict = verdict.as_str(), "dispute resolved");
    }

    // --- Legacy path ---

    /// The legacy `DISPUTE` frame: marks the proposal disputed and parks a
    /// dispute directly in `fallback` for out-of-band resolution.
    pub async fn file_legacy(
        self: &Arc<Self>,
        sender: &AgentId,
        pubkey: &Ed25519PublicKey,
        proposal_id: &str,
        reason: &str,
        sig: &str,
    ) -> Result<(), DisputeError> {
        verify_sig(pubkey, &signing::dispute(proposal_id, reason), sig)?;

        let (proposer, acceptor, _state) = self
            .market
            .proposal_parties(proposal_id)
            .map_err(|e| map_market(e, proposal_id))?;
        let respondent = if sender == &proposer {
            acceptor
        } else if sender == &acceptor {
            proposer
        } else {
            return Err(DisputeError::NotParty(proposal_id.to_string()));
        };
        {
            let by_proposal = self.by_proposal.lock().unwrap_or_else(|e| e.into_inner());
            if by_proposal.contains_key(proposal_id) {
                return Err(DisputeError::AlreadyDisputed(proposal_id.to_string()));
            }
        }
        self.market
            .mark_disputed(proposal_id, Some(sig))
            .map_err(|e| map_market(e, proposal_id))?;

        let id = DisputeId::generate(now_ms());
        let dispute = Dispute {
            id: id.clone(),
            proposal_id: proposal_id.to_string(),
            disputant: sender.clone(),
            respondent: respondent.clone(),
            reason: reason.to_string(),
            phase: Phase::Fallback,
            commitment: String::new(),
            server_nonce: String::new(),
            revealed_nonce: None,
            order: Vec::new(),
            next_candidate: 0,
            slots: Vec::new(),
            replacement_rounds: 0,
            disputant_evidence: None,
            respondent_evidence: None,
            verdict: None,
            created_ms: now_ms(),
            deadline_ms: 0,
            epoch: 0,
            timer: None,
        };
        {
            let mut by_proposal = self.by_proposal.lock().unwrap_or_else(|e| e.into_inner());
            by_proposal.insert(proposal_id.to_string(), id.to_string());
        }
        self.index().insert(id.to_string(), Arc::new(AsyncMutex::new(dispute)));
        self.touch_involvement(&[sender.clone(), respondent.clone()]);

        self.outbound.deliver(
            &respondent,
            ServerFrame::Dispute {
                proposal_id: proposal_id.to_string(),
                from: sender.to_string(),
                reason: reason.to_string(),
            },
        );
        for agent in [sender, &respondent] {
            self.outbound.deliver(
                agent,
                ServerFrame::DisputeFallback {
                    dispute_id: id.to_string(),
                    reason: "legacy dispute path".to_string(),
                },
            );
        }
        tracing::warn!(target: "agentcourt", dispute = %id, proposal = %proposal_id, "legacy dispute parked in fallback");
        Ok(())
    }

    // --- Timers ---

    fn schedule(self: &Arc<Self>, dispute: &mut Dispute, phase: Phase, delay_ms: u64) {
        self.cancel_timer(dispute);
        dispute.epoch += 1;
        dispute.deadline_ms = now_ms() + delay_ms;
        let engine = Arc::clone(self);
        let id = dispute.id.to_string();
        let epoch = dispute.epoch;
        dispute.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            engine.on_timeout(&id, phase, epoch).await;
        }));
    }

    fn cancel_timer(&self, dispute: &mut Dispute) {
        if let Some(handle) = dispute.timer.take() {
            handle.abort();
        }
    }

    async fn on_timeout(self: &Arc<Self>, dispute_id: &str, phase: Phase, epoch: u64) {
        let Ok(arc) = self.get(dispute_id) else { return };
        let mut dispute = arc.lock().await;
        if dispute.phase != phase || dispute.epoch != epoch {
            return;
        }
        match phase {
            Phase::RevealPending => {
                dispute.phase = Phase::Voided;
                self.ledger.void_dispute(
                    dispute.id.as_str(),
                    &dispute.disputant,
                    self.cfg.filing_fee,
                );
                self.forget_proposal(&dispute.proposal_id);
                self.outbound.deliver(
                    &dispute.disputant,
                    ServerFrame::DisputeRevealed {
                        dispute_id: dispute.id.to_string(),
                        phase: Phase::Voided.as_str().to_string(),
                    },
                );
                tracing::warn!(target: "agentcourt", dispute = %dispute.id, "reveal window elapsed; dispute voided");
            }
            Phase::ArbiterResponse => {
                let stale: Vec<usize> = dispute
                    .slots
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.status == SlotStatus::Pending)
                    .map(|(i, _)| i)
                    .collect();
                for i in &stale {
                    dispute.slots[*i].status = SlotStatus::Replaced;
                }
                if stale.is_empty() {
                    return;
                }
                self.replace_open_slots(&mut dispute, stale.len());
                if dispute.phase == Phase::ArbiterResponse {
                    self.schedule(&mut dispute, Phase::ArbiterResponse, self.cfg.response_window_ms);
                }
            }
            Phase::Evidence => {
                self.open_deliberation(&mut dispute);
            }
            Phase::Deliberation => {
                for slot in dispute.slots.iter_mut() {
                    if slot.status == SlotStatus::Accepted {
                        slot.status = SlotStatus::Forfeited;
                    }
                }
                self.resolve(&mut dispute);
            }
            _ => {}
        }
    }

    // --- Pool building ---

    /// Eligible arbiters: rating and transaction thresholds, independence
    /// window, not a party. Connected candidates are preferred; the pool
    /// widens to disconnected ones only when too few are online.
    fn build_pool(&self, disputant: &AgentId, respondent: &AgentId) -> Vec<AgentId> {
        let records = self.ledger.all_records();
        let involvement = self
            .last_involvement
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let now = now_ms();
        let eligible: Vec<AgentId> = records
            .into_iter()
            .filter(|(agent, record)| {
                agent != disputant
                    && agent != respondent
                    && record.rating >= self.cfg.min_rating
                    && record.transactions >= self.cfg.min_transactions
                    && involvement
                        .get(agent)
                        .map(|last| now.saturating_sub(*last) >= self.cfg.independence_window_ms)
                        .unwrap_or(true)
            })
            .map(|(agent, _)| agent)
            .collect();

        let connected: Vec<AgentId> = eligible
            .iter()
            .filter(|a| self.outbound.is_connected(a))
            .cloned()
            .collect();
        if connected.len() >= self.cfg.panel_size {
            connected
        } else {
            eligible
        }
    }

    fn enter_fallback(self: &Arc<Self>, dispute: &mut Dispute, reason: &str) {
        self.cancel_timer(dispute);
        dispute.phase = Phase::Fallback;
        let _ = self.ledger.release_escrow(&fee_key(&dispute.id));
        let frame = ServerFrame::DisputeFallback {
            dispute_id: dispute.id.to_string(),
            reason: reason.to_string(),
        };
        for agent in dispute
            .panel()
            .iter()
            .chain([dispute.disputant.clone(), dispute.respondent.clone()].iter())
        {
            self.outbound.deliver(agent, frame.clone());
        }
        tracing::warn!(target: "agentcourt", dispute = %dispute.id, reason, "dispute fell back");
    }

    // --- Plumbing ---

    fn touch_involvement(&self, agents: &[AgentId]) {
        let mut involvement = self
            .last_involvement
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let now = now_ms();
        for agent in agents {
            involvement.insert(agent.clone(), now);
        }
    }

    fn forget_proposal(&self, proposal_id: &str) {
        let mut by_proposal = self.by_proposal.lock().unwrap_or_else(|e| e.into_inner());
        by_proposal.remove(proposal_id);
    }

    fn get(&self, dispute_id: &str) -> Result<Arc<AsyncMutex<Dispute>>, DisputeError> {
        self.index()
            .get(dispute_id)
            .cloned()
            .ok_or_else(|| DisputeError::NotFound(dispute_id.to_string()))
    }

    fn index(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AsyncMutex<Dispute>>>> {
        self.disputes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests;

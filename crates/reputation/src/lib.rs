//! The reputation ledger: ELO ratings, escrowed stakes, and append-only
//! settlement receipts.
//!
//! All rating mutations serialize behind one writer lock. Disk writes happen
//! after the lock is released, against a snapshot, with bounded retries; a
//! persistent failure is an operator-visible logged condition, never a
//! rolled-back settlement.

#![forbid(unsafe_code)]

pub mod elo;
pub mod escrow;
pub mod receipts;
pub mod store;

use agentchat_types::error::StoreError;
use agentchat_types::ids::AgentId;
use agentchat_types::time::now_ms;
use escrow::{EscrowError, EscrowEvent, EscrowHooks, EscrowRecord, EscrowState};
use receipts::{Receipt, ReceiptDelta, ReceiptKind, ReceiptWriter};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use store::RatingRecord;

pub use escrow::EscrowError as StakeError;
pub use receipts::{ReceiptDelta as Delta, ReceiptKind as SettlementKind};

const PERSIST_ATTEMPTS: u32 = 3;

/// Outcome of a resolved dispute, as the ledger needs to know it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeOutcome {
    Disputant,
    Respondent,
    Mutual,
}

impl DisputeOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            DisputeOutcome::Disputant => "disputant",
            DisputeOutcome::Respondent => "respondent",
            DisputeOutcome::Mutual => "mutual",
        }
    }
}

/// How one arbiter finished a dispute, for incentive settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterOutcome {
    /// Voted with the majority: +5.
    Majority,
    /// Voted against the majority: net zero, stake returned.
    Dissent,
    /// Never voted: stake forfeited.
    Forfeit,
}

/// Completion metadata carried into the receipt.
#[derive(Debug, Clone, Default)]
pub struct CompletionMeta {
    pub proposal_id: String,
    pub amount: Option<u64>,
    pub currency: Option<String>,
    pub capability: Option<String>,
    pub proof: Option<String>,
}

struct LedgerState {
    ratings: HashMap<AgentId, RatingRecord>,
    escrows: HashMap<String, EscrowRecord>,
}

/// Process-wide reputation state. Cheap to share behind an `Arc`.
pub struct ReputationLedger {
    state: RwLock<LedgerState>,
    hooks: RwLock<EscrowHooks>,
    receipts: ReceiptWriter,
    ratings_path: PathBuf,
}

impl ReputationLedger {
    /// Opens the ledger from `data_dir`, creating empty files as needed.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        let ratings_path = data_dir.join("ratings.json");
        let ratings = store::load_ratings(&ratings_path)?;
        let receipts = ReceiptWriter::open(&data_dir.join("receipts.jsonl"))?;
        Ok(ReputationLedger {
            state: RwLock::new(LedgerState { ratings, escrows: HashMap::new() }),
            hooks: RwLock::new(EscrowHooks::default()),
            receipts,
            ratings_path,
        })
    }

    /// Registers an escrow event sink. Handlers run synchronously in
    /// registration order on every create/release/settle.
    pub fn register_escrow_hook(
        &self,
        handler: Box<dyn Fn(&EscrowEvent) -> anyhow::Result<()> + Send + Sync>,
    ) {
        self.hooks.write().unwrap_or_else(|e| e.into_inner()).register(handler);
    }

    /// Current rating; unseen agents report the initial rating.
    pub fn rating_of(&self, agent: &AgentId) -> i64 {
        let state = self.read();
        state
            .ratings
            .get(agent)
            .map(|r| r.rating)
            .unwrap_or(elo::INITIAL_RATING)
    }

    /// A snapshot of the agent's full record, if one exists.
    pub fn record_of(&self, agent: &AgentId) -> Option<RatingRecord> {
        self.read().ratings.get(agent).cloned()
    }

    /// Snapshot of every known record, for arbiter-pool building.
    pub fn all_records(&self) -> Vec<(AgentId, RatingRecord)> {
        self.read()
            .ratings
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Rating available for new stakes: `rating − floor − Σ held`.
    pub fn free_rating(&self, agent: &AgentId) -> i64 {
        let state = self.read();
        Self::free_rating_locked(&state, agent)
    }

    fn free_rating_locked(state: &LedgerState, agent: &AgentId) -> i64 {
        let rating = state
            .ratings
            .get(agent)
            .map(|r| r.rating)
            .unwrap_or(elo::INITIAL_RATING);
        let held: u64 = state
            .escrows
            .values()
            .filter(|e| e.state == EscrowState::Held)
            .map(|e| e.stake_of(agent))
            .sum();
        rating - elo::RATING_FLOOR - held as i64
    }

    /// Places both parties' stakes under hold, enforcing the free-rating
    /// invariant for each before anything is recorded.
    pub fn hold_escrow(
        &self,
        id: &str,
        proposer: &AgentId,
        acceptor: &AgentId,
        proposer_stake: u64,
        acceptor_stake: u64,
    ) -> Result<(), EscrowError> {
        let record = {
            let mut state = self.write();
            if state.escrows.contains_key(id) {
                return Err(EscrowError::Duplicate(id.to_string()));
            }
            for (agent, stake) in [(proposer, proposer_stake), (acceptor, acceptor_stake)] {
                let free = Self::free_rating_locked(&state, agent);
                if stake > 0 && free < stake as i64 {
                    return Err(EscrowError::InsufficientReputation {
                        agent: agent.clone(),
                        need: stake,
                        have: free,
                    });
                }
            }
            let record = EscrowRecord {
                id: id.to_string(),
                proposer: proposer.clone(),
                acceptor: acceptor.clone(),
                proposer_stake,
                acceptor_stake,
                state: EscrowState::Held,
                created_ms: now_ms(),
            };
            state.escrows.insert(id.to_string(), record.clone());
            record
        };
        self.fire(&EscrowEvent::Created(record));
        Ok(())
    }

    /// Returns held stakes without settlement (reject, fallback, recovery).
    pub fn release_escrow(&self, id: &str) -> Result<(), EscrowError> {
        let record = self.take_escrow(id)?;
        self.fire(&EscrowEvent::Released(record));
        Ok(())
    }

    fn take_escrow(&self, id: &str) -> Result<EscrowRecord, EscrowError> {
        let mut state = self.write();
        let mut record = state
            .escrows
            .remove(id)
            .ok_or_else(|| EscrowError::NotFound(id.to_string()))?;
        record.state = EscrowState::Released;
        Ok(record)
    }

    /// Settles a completed proposal: both parties gain per the completion
    /// split, escrow releases, and a `COMPLETE` receipt is appended.
    pub fn settle_completion(
        &self,
        proposer: &AgentId,
        acceptor: &AgentId,
        meta: CompletionMeta,
    ) -> Vec<ReceiptDelta> {
        let ts = now_ms();
        let (deltas, snapshot, escrow) = {
            let mut state = self.write();
            let rp = Self::rating_locked(&state, proposer);
            let ra = Self::rating_locked(&state, acceptor);
            let kp = elo::k_factor(Self::transactions_locked(&state, proposer));
            let ka = elo::k_factor(Self::transactions_locked(&state, acceptor));

            let gain_p = elo::completion_gain(kp, elo::expected(rp, ra));
            let gain_a = elo::completion_gain(ka, elo::expected(ra, rp));

            let dp = Self::apply_delta(&mut state, proposer, gain_p, ts, true);
            let da = Self::apply_delta(&mut state, acceptor, gain_a, ts, true);
            if let Some(capability) = meta.capability.as_deref() {
                Self::bump_skill(&mut state, proposer, capability, gain_p);
                Self::bump_skill(&mut state, acceptor, capability, gain_a);
            }

            let escrow = state.escrows.remove(&meta.proposal_id).map(|mut e| {
                e.state = EscrowState::Released;
                e
            });
            (vec![dp, da], state.ratings.clone(), escrow)
        };

        if let Some(record) = escrow {
            self.fire(&EscrowEvent::Settled(record));
        }
        self.append_receipt(Receipt {
            kind: ReceiptKind::Complete,
            proposal_id: Some(meta.proposal_id),
            dispute_id: None,
            parties: vec![proposer.to_string(), acceptor.to_string()],
            amount: meta.amount,
            currency: meta.currency,
            capability: meta.capability,
            proof: meta.proof,
            verdict: None,
            deltas: deltas.clone(),
            ts,
        });
        self.persist_snapshot(snapshot);
        deltas
    }

    /// Settles a resolved dispute: party deltas per verdict, arbiter
    /// incentives, a `DISPUTE` receipt, all under one pass of the writer
    /// lock.
    #[allow(clippy::too_many_arguments)]
    pub fn settle_dispute(
        &self,
        dispute_id: &str,
        proposal_id: &str,
        disputant: &AgentId,
        respondent: &AgentId,
        outcome: DisputeOutcome,
        arbiters: &[(AgentId, ArbiterOutcome)],
    ) -> Vec<ReceiptDelta> {
        let ts = now_ms();
        let (deltas, snapshot, escrows) = {
            let mut state = self.write();
            let rd = Self::rating_locked(&state, disputant);
            let rr = Self::rating_locked(&state, respondent);
            let mut deltas = Vec::new();

            match outcome {
                DisputeOutcome::Disputant => {
                    let e_w = elo::expected(rd, rr);
                    deltas.push(Self::apply_delta(
                        &mut state,
                        disputant,
                        elo::dispute_winner_gain(e_w),
                        ts,
                        true,
                    ));
                    deltas.push(Self::apply_delta(
                        &mut state,
                        respondent,
                        -elo::dispute_loser_loss(e_w),
                        ts,
                        true,
                    ));
                }
                DisputeOutcome::Respondent => {
                    let e_w = elo::expected(rr, rd);
                    deltas.push(Self::apply_delta(
                        &mut state,
                        respondent,
                        elo::dispute_winner_gain(e_w),
                        ts,
                        true,
                    ));
                    deltas.push(Self::apply_delta(
                        &mut state,
                        disputant,
                        -elo::dispute_loser_loss(e_w),
                        ts,
                        true,
                    ));
                }
                DisputeOutcome::Mutual => {
                    deltas.push(Self::apply_delta(
                        &mut state,
                        disputant,
                        -elo::dispute_mutual_loss(elo::expected(rd, rr)),
                        ts,
                        true,
                    ));
                    deltas.push(Self::apply_delta(
                        &mut state,
                        respondent,
                        -elo::dispute_mutual_loss(elo::expected(rr, rd)),
                        ts,
                        true,
                    ));
                }
            }

            for (arbiter, arbiter_outcome) in arbiters {
                let delta = match arbiter_outcome {
                    ArbiterOutcome::Majority => elo::ARBITER_MAJORITY_REWARD,
                    ArbiterOutcome::Dissent => 0,
                    ArbiterOutcome::Forfeit => -elo::ARBITER_FORFEIT_PENALTY,
                };
                deltas.push(Self::apply_delta(&mut state, arbiter, delta, ts, false));
            }

            let mut released = Vec::new();
            for key in [proposal_id.to_string(), format!("fee:{dispute_id}")] {
                if let Some(mut record) = state.escrows.remove(&key) {
                    record.state = EscrowState::Released;
                    released.push(record);
                }
            }
            (deltas, state.ratings.clone(), released)
        };

        for record in escrows {
            self.fire(&EscrowEvent::Settled(record));
        }
        self.append_receipt(Receipt {
            kind: ReceiptKind::Dispute,
            proposal_id: Some(proposal_id.to_string()),
            dispute_id: Some(dispute_id.to_string()),
            parties: vec![disputant.to_string(), respondent.to_string()],
            amount: None,
            currency: None,
            capability: None,
            proof: None,
            verdict: Some(outcome.as_str().to_string()),
            deltas: deltas.clone(),
            ts,
        });
        self.persist_snapshot(snapshot);
        deltas
    }

    /// Voids an unrevealed dispute: the filing fee forfeits and a
    /// `DISPUTE_VOIDED` receipt records it.
    pub fn void_dispute(&self, dispute_id: &str, disputant: &AgentId, fee: u64) -> Vec<ReceiptDelta> {
        let ts = now_ms();
        let (deltas, snapshot, escrow) = {
            let mut state = self.write();
            let escrow = state.escrows.remove(&format!("fee:{dispute_id}")).map(|mut e| {
                e.state = EscrowState::Released;
                e
            });
            let delta = Self::apply_delta(&mut state, disputant, -(fee as i64), ts, false);
            (vec![delta], state.ratings.clone(), escrow)
        };
        if let Some(record) = escrow {
            self.fire(&EscrowEvent::Settled(record));
        }
        self.append_receipt(Receipt {
            kind: ReceiptKind::DisputeVoided,
            proposal_id: None,
            dispute_id: Some(dispute_id.to_string()),
            parties: vec![disputant.to_string()],
            amount: Some(fee),
            currency: None,
            capability: None,
            proof: None,
            verdict: None,
            deltas: deltas.clone(),
            ts,
        });
        self.persist_snapshot(snapshot);
        deltas
    }

    /// Flushes the current ratings map to disk. Called at shutdown.
    pub fn flush(&self) {
        let snapshot = self.read().ratings.clone();
        self.persist_snapshot(snapshot);
    }

    fn rating_locked(state: &LedgerState, agent: &AgentId) -> i64 {
        state
            .ratings
            .get(agent)
            .map(|r| r.rating)
            .unwrap_or(elo::INITIAL_RATING)
    }

    fn transactions_locked(state: &LedgerState, agent: &AgentId) -> u64 {
        state.ratings.get(agent).map(|r| r.transactions).unwrap_or(0)
    }

    fn apply_delta(
        state: &mut LedgerState,
        agent: &AgentId,
        delta: i64,
        ts: u64,
        count_transaction: bool,
    ) -> ReceiptDelta {
        let record = state
            .ratings
            .entry(agent.clone())
            .or_insert_with(|| RatingRecord::new(ts));
        let intended = record.rating + delta;
        let clamped = intended < elo::RATING_FLOOR;
        record.rating = intended.max(elo::RATING_FLOOR);
        if count_transaction {
            record.transactions += 1;
        }
        record.updated_ms = ts;
        ReceiptDelta {
            agent: agent.to_string(),
            delta: if clamped { record.rating - (intended - delta) } else { delta },
            rating: record.rating,
            clamped,
        }
    }

    fn bump_skill(state: &mut LedgerState, agent: &AgentId, capability: &str, delta: i64) {
        if let Some(record) = state.ratings.get_mut(agent) {
            let entry = record
                .skills
                .entry(capability.to_string())
                .or_insert(elo::INITIAL_RATING);
            *entry = (*entry + delta).max(elo::RATING_FLOOR);
        }
    }

    fn append_receipt(&self, receipt: Receipt) {
        for attempt in 1..=PERSIST_ATTEMPTS {
            match self.receipts.append(&receipt) {
                Ok(()) => return,
                Err(e) if attempt < PERSIST_ATTEMPTS => {
                    tracing::warn!(target: "reputation", attempt, error = %e, "receipt append failed, retrying");
                }
                Err(e) => {
                    tracing::error!(target: "reputation", error = %e, "receipt append failed; settlement is unrecorded on disk");
                }
            }
        }
    }

    fn persist_snapshot(&self, snapshot: HashMap<AgentId, RatingRecord>) {
        for attempt in 1..=PERSIST_ATTEMPTS {
            match store::save_ratings_atomic(&self.ratings_path, &snapshot) {
                Ok(()) => return,
                Err(e) if attempt < PERSIST_ATTEMPTS => {
                    tracing::warn!(target: "reputation", attempt, error = %e, "ratings persist failed, retrying");
                }
                Err(e) => {
                    tracing::error!(target: "reputation", error = %e, "ratings persist failed; in-memory state is ahead of disk");
                }
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn fire(&self, event: &EscrowEvent) {
        self.hooks.read().unwrap_or_else(|e| e.into_inner()).fire(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> (tempfile::TempDir, ReputationLedger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ReputationLedger::open(dir.path()).unwrap();
        (dir, ledger)
    }

    fn agent(tag: u8) -> AgentId {
        agentchat_types::ids::agent_id_from_pubkey(&[tag; 32])
    }

    #[test]
    fn fresh_agents_settle_eight_each() {
        let (_dir, ledger) = ledger();
        let (a, b) = (agent(1), agent(2));

        let deltas = ledger.settle_completion(
            &a,
            &b,
            CompletionMeta { proposal_id: "prop_1".into(), ..Default::default() },
        );
        assert_eq!(deltas.len(), 2);
        assert!(deltas.iter().all(|d| d.delta == 8));
        assert_eq!(ledger.rating_of(&a), 1208);
        assert_eq!(ledger.rating_of(&b), 1208);
    }

    #[test]
    fn completion_is_persisted_and_receipted() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (agent(1), agent(2));
        {
            let ledger = ReputationLedger::open(dir.path()).unwrap();
            ledger.settle_completion(
                &a,
                &b,
                CompletionMeta {
                    proposal_id: "prop_1".into(),
                    amount: Some(10),
                    currency: Some("ELO".into()),
                    ..Default::default()
                },
            );
        }
        let reopened = ReputationLedger::open(dir.path()).unwrap();
        assert_eq!(reopened.rating_of(&a), 1208);
        assert_eq!(reopened.record_of(&a).unwrap().transactions, 1);

        let receipts = receipts::read_receipts(&dir.path().join("receipts.jsonl")).unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].kind, ReceiptKind::Complete);
        assert_eq!(receipts[0].amount, Some(10));
    }

    #[test]
    fn escrow_enforces_free_rating() {
        let (_dir, ledger) = ledger();
        let (a, b) = (agent(1), agent(2));

        // Fresh rating 1200, floor 100: free rating 1100.
        assert_eq!(ledger.free_rating(&a), 1100);
        assert!(ledger.hold_escrow("prop_1", &a, &b, 1100, 0).is_ok());
        assert_eq!(ledger.free_rating(&a), 0);
        assert!(matches!(
            ledger.hold_escrow("prop_2", &a, &b, 1, 0),
            Err(EscrowError::InsufficientReputation { .. })
        ));

        ledger.release_escrow("prop_1").unwrap();
        assert_eq!(ledger.free_rating(&a), 1100);
    }

    #[test]
    fn duplicate_escrow_is_rejected() {
        let (_dir, ledger) = ledger();
        let (a, b) = (agent(1), agent(2));
        ledger.hold_escrow("prop_1", &a, &b, 5, 5).unwrap();
        assert!(matches!(
            ledger.hold_escrow("prop_1", &a, &b, 5, 5),
            Err(EscrowError::Duplicate(_))
        ));
    }

    #[test]
    fn dispute_settlement_at_parity() {
        let (_dir, ledger) = ledger();
        let (d, r) = (agent(1), agent(2));
        let arbiters = [
            (agent(3), ArbiterOutcome::Majority),
            (agent(4), ArbiterOutcome::Majority),
            (agent(5), ArbiterOutcome::Dissent),
        ];

        let deltas = ledger.settle_dispute(
            "disp_1",
            "prop_1",
            &d,
            &r,
            DisputeOutcome::Disputant,
            &arbiters,
        );

        // K=16, e=0.5: winner +4, loser -8, majority +5, dissent 0.
        assert_eq!(ledger.rating_of(&d), 1204);
        assert_eq!(ledger.rating_of(&r), 1192);
        assert_eq!(ledger.rating_of(&agent(3)), 1205);
        assert_eq!(ledger.rating_of(&agent(5)), 1200);
        assert_eq!(deltas.len(), 5);
    }

    #[test]
    fn forfeited_arbiter_loses_stake() {
        let (_dir, ledger) = ledger();
        let (d, r) = (agent(1), agent(2));
        ledger.settle_dispute(
            "disp_1",
            "prop_1",
            &d,
            &r,
            DisputeOutcome::Mutual,
            &[(agent(3), ArbiterOutcome::Forfeit)],
        );
        assert_eq!(ledger.rating_of(&agent(3)), 1175);
        // Mutual at parity: both lose 8.
        assert_eq!(ledger.rating_of(&d), 1192);
        assert_eq!(ledger.rating_of(&r), 1192);
    }

    #[test]
    fn floor_clamp_is_noted_in_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ReputationLedger::open(dir.path()).unwrap();
        let poor = agent(9);

        // Drive the agent near the floor with repeated mutual losses.
        for n in 0..200 {
            ledger.settle_dispute(
                &format!("disp_{n}"),
                &format!("prop_{n}"),
                &poor,
                &agent(8),
                DisputeOutcome::Mutual,
                &[],
            );
        }
        assert_eq!(ledger.rating_of(&poor), elo::RATING_FLOOR);

        let receipts = receipts::read_receipts(&dir.path().join("receipts.jsonl")).unwrap();
        assert!(receipts.iter().any(|r| r.deltas.iter().any(|d| d.clamped)));
    }

    #[test]
    fn void_dispute_forfeits_fee() {
        let (_dir, ledger) = ledger();
        let d = agent(1);
        ledger
            .hold_escrow("fee:disp_1", &d, &d, 10, 0)
            .unwrap();
        let deltas = ledger.void_dispute("disp_1", &d, 10);
        assert_eq!(deltas[0].delta, -10);
        assert_eq!(ledger.rating_of(&d), 1190);
        // The fee escrow is gone; the rating is free again apart from the loss.
        assert_eq!(ledger.free_rating(&d), 1090);
    }

    #[test]
    fn settlement_fires_escrow_hooks() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let (_dir, ledger) = ledger();
        let settled = Arc::new(AtomicUsize::new(0));
        let observed = settled.clone();
        ledger.register_escrow_hook(Box::new(move |event| {
            if matches!(event, EscrowEvent::Settled(_)) {
                observed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }));

        let (a, b) = (agent(1), agent(2));
        ledger.hold_escrow("prop_1", &a, &b, 5, 5).unwrap();
        ledger.settle_completion(
            &a,
            &b,
            CompletionMeta { proposal_id: "prop_1".into(), ..Default::default() },
        );
        assert_eq!(settled.load(Ordering::SeqCst), 1);
    }
}

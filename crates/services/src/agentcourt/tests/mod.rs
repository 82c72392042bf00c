use super::*;
use crate::marketplace::Marketplace;
use crate::outbound::Outbound;
use agentchat_crypto::hash::sha256_hex;
use agentchat_crypto::sign::eddsa::Ed25519KeyPair;
use agentchat_reputation::store::{save_ratings_atomic, RatingRecord};
use agentchat_types::config::MarketConfig;
use agentchat_types::ids::agent_id_from_pubkey;
use serde_json::json;
use std::collections::HashSet;

struct Capture {
    frames: Mutex<Vec<(AgentId, ServerFrame)>>,
    connected: Mutex<HashSet<AgentId>>,
}

impl Capture {
    fn new() -> Arc<Self> {
        Arc::new(Capture {
            frames: Mutex::new(Vec::new()),
            connected: Mutex::new(HashSet::new()),
        })
    }

    fn connect(&self, agents: &[&Party]) {
        let mut connected = self.connected.lock().unwrap();
        for p in agents {
            connected.insert(p.id.clone());
        }
    }

    fn sent_to(&self, agent: &AgentId) -> Vec<ServerFrame> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == agent)
            .map(|(_, f)| f.clone())
            .collect()
    }

    fn count_of(&self, predicate: impl Fn(&ServerFrame) -> bool) -> usize {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, f)| predicate(f))
            .count()
    }
}

impl Outbound for Capture {
    fn deliver(&self, agent: &AgentId, frame: ServerFrame) {
        self.frames.lock().unwrap().push((agent.clone(), frame));
    }

    fn is_connected(&self, agent: &AgentId) -> bool {
        self.connected.lock().unwrap().contains(agent)
    }
}

struct Party {
    keys: Ed25519KeyPair,
    id: AgentId,
}

fn party() -> Party {
    let keys = Ed25519KeyPair::generate();
    let id = agent_id_from_pubkey(&keys.public_key().to_bytes());
    Party { keys, id }
}

fn sign(p: &Party, payload: &str) -> String {
    p.keys.sign(payload.as_bytes()).to_base64()
}

struct Court {
    _dir: tempfile::TempDir,
    ledger: Arc<ReputationLedger>,
    market: Arc<Marketplace>,
    engine: Arc<CourtEngine>,
    wire: Arc<Capture>,
}

fn court_with(cfg: CourtConfig, arbiters: &[&Party]) -> Court {
    let dir = tempfile::tempdir().unwrap();
    let mut ratings = std::collections::HashMap::new();
    for p in arbiters {
        let mut record = RatingRecord::new(0);
        record.rating = 1300;
        record.transactions = 50;
        ratings.insert(p.id.clone(), record);
    }
    save_ratings_atomic(&dir.path().join("ratings.json"), &ratings).unwrap();

    let ledger = Arc::new(ReputationLedger::open(dir.path()).unwrap());
    let market = Arc::new(Marketplace::new(MarketConfig::default(), ledger.clone()));
    let wire = Capture::new();
    wire.connect(arbiters);
    let engine = CourtEngine::new(cfg, ledger.clone(), market.clone(), wire.clone());
    Court { _dir: dir, ledger, market, engine, wire }
}

fn accepted_proposal(court: &Court, proposer: &Party, acceptor: &Party, id: &str) {
    let payload = signing::proposal(
        id,
        &proposer.id.to_string(),
        &acceptor.id.to_string(),
        "ship feature",
        None,
        None,
        None,
    );
    court
        .market
        .propose(
            &proposer.id,
            &proposer.keys.public_key(),
            id,
            &acceptor.id,
            "ship feature",
            None,
            None,
            None,
            None,
            None,
            &sign(proposer, &payload),
        )
        .unwrap();
    let payload = signing::accept(id, None);
    court
        .market
        .accept(&acceptor.id, &acceptor.keys.public_key(), id, None, &sign(acceptor, &payload))
        .unwrap();
}

async fn file_and_reveal(court: &Court, disputant: &Party, proposal: &str, nonce: &str) -> String {
    let commitment = sha256_hex(nonce.as_bytes());
    let payload = signing::dispute_intent(proposal, "not delivered", &commitment);
    let ack = court
        .engine
        .file_intent(
            &disputant.id,
            &disputant.keys.public_key(),
            proposal,
            "not delivered",
            &commitment,
            &sign(disputant, &payload),
        )
        .await
        .unwrap();
    let dispute_id = match ack {
        ServerFrame::DisputeIntentAck { dispute_id, .. } => dispute_id,
        other => panic!("unexpected ack {other:?}"),
    };

    let payload = signing::dispute_reveal(&dispute_id, nonce);
    court
        .engine
        .reveal(
            &disputant.id,
            &disputant.keys.public_key(),
            &dispute_id,
            nonce,
            &sign(disputant, &payload),
        )
        .await
        .unwrap();
    dispute_id
}

fn assigned_arbiters(wire: &Capture, parties: &[&Party]) -> Vec<AgentId> {
    parties
        .iter()
        .filter(|p| {
            wire.sent_to(&p.id)
                .iter()
                .any(|f| matches!(f, ServerFrame::ArbiterAssigned { .. }))
        })
        .map(|p| p.id.clone())
        .collect()
}

async fn panel_accepts(court: &Court, dispute_id: &str, panel: &[&Party]) {
    for p in panel {
        let payload = signing::arbiter_accept(dispute_id);
        court
            .engine
            .arbiter_accept(&p.id, &p.keys.public_key(), dispute_id, &sign(p, &payload))
            .await
            .unwrap();
    }
}

async fn both_parties_submit_evidence(
    court: &Court,
    dispute_id: &str,
    disputant: &Party,
    respondent: &Party,
) {
    for (p, statement) in [(disputant, "work never arrived"), (respondent, "work was delivered")] {
        let items = vec![json!({"log": statement, "seq": 1})];
        let items_hash = canonical_json_sha256(&items).unwrap();
        let payload = signing::evidence(dispute_id, &items_hash, statement);
        court
            .engine
            .submit_evidence(
                &p.id,
                &p.keys.public_key(),
                dispute_id,
                items,
                statement,
                &sign(p, &payload),
            )
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn full_dispute_reaches_a_majority_verdict() {
    let (alice, bob) = (party(), party());
    let arbiters = [party(), party(), party()];
    let court = court_with(CourtConfig::default(), &[&arbiters[0], &arbiters[1], &arbiters[2]]);
    accepted_proposal(&court, &alice, &bob, "prop_1");

    let dispute_id = file_and_reveal(&court, &alice, "prop_1", "n1").await;
    let panel = assigned_arbiters(&court.wire, &[&arbiters[0], &arbiters[1], &arbiters[2]]);
    assert_eq!(panel.len(), 3);

    panel_accepts(&court, &dispute_id, &[&arbiters[0], &arbiters[1], &arbiters[2]]).await;
    assert_eq!(
        court.wire.count_of(|f| matches!(f, ServerFrame::PanelFormed { .. })),
        5 // three arbiters + both parties
    );

    both_parties_submit_evidence(&court, &dispute_id, &alice, &bob).await;
    assert_eq!(
        court.wire.count_of(|f| matches!(f, ServerFrame::CaseReady { .. })),
        3
    );

    for (p, verdict) in [
        (&arbiters[0], Verdict::Disputant),
        (&arbiters[1], Verdict::Disputant),
        (&arbiters[2], Verdict::Respondent),
    ] {
        let payload = signing::arbiter_vote(&dispute_id, verdict, "reviewed the logs");
        court
            .engine
            .arbiter_vote(
                &p.id,
                &p.keys.public_key(),
                &dispute_id,
                verdict,
                "reviewed the logs",
                &sign(p, &payload),
            )
            .await
            .unwrap();
    }

    let verdicts = court.wire.sent_to(&alice.id);
    let verdict = verdicts
        .iter()
        .find_map(|f| match f {
            ServerFrame::Verdict { verdict, votes, .. } => Some((*verdict, votes.clone())),
            _ => None,
        })
        .expect("disputant receives the verdict");
    assert_eq!(verdict.0, Verdict::Disputant);
    assert_eq!(verdict.1.len(), 3);

    // Parity parties: winner +4, loser -8. Majority arbiters +5, dissent 0.
    assert_eq!(court.ledger.rating_of(&alice.id), 1204);
    assert_eq!(court.ledger.rating_of(&bob.id), 1192);
    assert_eq!(court.ledger.rating_of(&arbiters[0].id), 1305);
    assert_eq!(court.ledger.rating_of(&arbiters[1].id), 1305);
    assert_eq!(court.ledger.rating_of(&arbiters[2].id), 1300);
    // Filing fee released with settlement.
    assert_eq!(court.ledger.free_rating(&alice.id), 1104);

    let (open, resolved) = court.engine.counts().await;
    assert_eq!((open, resolved), (0, 1));
}

#[tokio::test]
async fn small_pool_falls_back_and_returns_the_fee() {
    let (alice, bob) = (party(), party());
    let lone = party();
    let court = court_with(CourtConfig::default(), &[&lone]);
    accepted_proposal(&court, &alice, &bob, "prop_1");

    let commitment = sha256_hex(b"n1");
    let payload = signing::dispute_intent("prop_1", "not delivered", &commitment);
    let ack = court
        .engine
        .file_intent(
            &alice.id,
            &alice.keys.public_key(),
            "prop_1",
            "not delivered",
            &commitment,
            &sign(&alice, &payload),
        )
        .await
        .unwrap();
    let dispute_id = match ack {
        ServerFrame::DisputeIntentAck { dispute_id, .. } => dispute_id,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(court.ledger.free_rating(&alice.id), 1090);

    let payload = signing::dispute_reveal(&dispute_id, "n1");
    let reply = court
        .engine
        .reveal(
            &alice.id,
            &alice.keys.public_key(),
            &dispute_id,
            "n1",
            &sign(&alice, &payload),
        )
        .await
        .unwrap();
    assert!(matches!(
        reply,
        ServerFrame::DisputeRevealed { ref phase, .. } if phase == "fallback"
    ));
    assert!(court
        .wire
        .sent_to(&bob.id)
        .iter()
        .any(|f| matches!(f, ServerFrame::DisputeFallback { .. })));
    // Fee escrow released on fallback.
    assert_eq!(court.ledger.free_rating(&alice.id), 1100);
}

#[tokio::test]
async fn wrong_nonce_is_a_commit_mismatch() {
    let (alice, bob) = (party(), party());
    let arbiters = [party(), party(), party()];
    let court = court_with(CourtConfig::default(), &[&arbiters[0], &arbiters[1], &arbiters[2]]);
    accepted_proposal(&court, &alice, &bob, "prop_1");

    let commitment = sha256_hex(b"right");
    let payload = signing::dispute_intent("prop_1", "reason", &commitment);
    let ack = court
        .engine
        .file_intent(
            &alice.id,
            &alice.keys.public_key(),
            "prop_1",
            "reason",
            &commitment,
            &sign(&alice, &payload),
        )
        .await
        .unwrap();
    let dispute_id = match ack {
        ServerFrame::DisputeIntentAck { dispute_id, .. } => dispute_id,
        other => panic!("unexpected {other:?}"),
    };

    let payload = signing::dispute_reveal(&dispute_id, "wrong");
    let err = court
        .engine
        .reveal(
            &alice.id,
            &alice.keys.public_key(),
            &dispute_id,
            "wrong",
            &sign(&alice, &payload),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DisputeError::CommitMismatch));
}

#[tokio::test]
async fn reveal_timeout_voids_and_forfeits_the_fee() {
    let (alice, bob) = (party(), party());
    let arbiters = [party(), party(), party()];
    let cfg = CourtConfig { reveal_window_ms: 25, ..CourtConfig::default() };
    let court = court_with(cfg, &[&arbiters[0], &arbiters[1], &arbiters[2]]);
    accepted_proposal(&court, &alice, &bob, "prop_1");

    let commitment = sha256_hex(b"n1");
    let payload = signing::dispute_intent("prop_1", "reason", &commitment);
    court
        .engine
        .file_intent(
            &alice.id,
            &alice.keys.public_key(),
            "prop_1",
            "reason",
            &commitment,
            &sign(&alice, &payload),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;

    // Fee forfeited, dispute voided, proposal free to dispute again.
    assert_eq!(court.ledger.rating_of(&alice.id), 1190);
    assert_eq!(court.engine.counts().await, (0, 0));
    let payload = signing::dispute_intent("prop_1", "again", &commitment);
    assert!(court
        .engine
        .file_intent(
            &alice.id,
            &alice.keys.public_key(),
            "prop_1",
            "again",
            &commitment,
            &sign(&alice, &payload),
        )
        .await
        .is_ok());
}

#[tokio::test]
async fn declines_beyond_the_cap_fall_back() {
    let (alice, bob) = (party(), party());
    let arbiters = [party(), party(), party(), party()];
    let refs: Vec<&Party> = arbiters.iter().collect();
    let court = court_with(CourtConfig::default(), &refs);
    accepted_proposal(&court, &alice, &bob, "prop_1");

    let dispute_id = file_and_reveal(&court, &alice, "prop_1", "n1").await;
    let panel = assigned_arbiters(&court.wire, &refs);
    assert_eq!(panel.len(), 3);

    // First decline draws the fourth candidate.
    let first = arbiters.iter().find(|p| panel.contains(&p.id)).unwrap();
    let payload = signing::arbiter_decline(&dispute_id, Some("conflict"));
    court
        .engine
        .arbiter_decline(
            &first.id,
            &first.keys.public_key(),
            &dispute_id,
            Some("conflict"),
            &sign(first, &payload),
        )
        .await
        .unwrap();
    assert_eq!(assigned_arbiters(&court.wire, &refs).len(), 4);

    // A second decline exhausts the four-candidate pool.
    let second = arbiters
        .iter()
        .find(|p| p.id != first.id && panel.contains(&p.id))
        .unwrap();
    let payload = signing::arbiter_decline(&dispute_id, None);
    court
        .engine
        .arbiter_decline(
            &second.id,
            &second.keys.public_key(),
            &dispute_id,
            None,
            &sign(second, &payload),
        )
        .await
        .unwrap();

    assert!(court
        .wire
        .sent_to(&alice.id)
        .iter()
        .any(|f| matches!(f, ServerFrame::DisputeFallback { .. })));
}

#[tokio::test]
async fn evidence_is_one_shot_per_party() {
    let (alice, bob) = (party(), party());
    let arbiters = [party(), party(), party()];
    let refs: Vec<&Party> = arbiters.iter().collect();
    let court = court_with(CourtConfig::default(), &refs);
    accepted_proposal(&court, &alice, &bob, "prop_1");

    let dispute_id = file_and_reveal(&court, &alice, "prop_1", "n1").await;
    panel_accepts(&court, &dispute_id, &refs).await;

    let items = vec![json!({"log": "first"})];
    let items_hash = canonical_json_sha256(&items).unwrap();
    let payload = signing::evidence(&dispute_id, &items_hash, "statement");
    court
        .engine
        .submit_evidence(
            &alice.id,
            &alice.keys.public_key(),
            &dispute_id,
            items.clone(),
            "statement",
            &sign(&alice, &payload),
        )
        .await
        .unwrap();

    let err = court
        .engine
        .submit_evidence(
            &alice.id,
            &alice.keys.public_key(),
            &dispute_id,
            items,
            "statement",
            &sign(&alice, &payload),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DisputeError::EvidenceAlreadySubmitted(_)));
}

#[tokio::test]
async fn vote_timeout_forfeits_silent_arbiters() {
    let (alice, bob) = (party(), party());
    let arbiters = [party(), party(), party()];
    let refs: Vec<&Party> = arbiters.iter().collect();
    let cfg = CourtConfig {
        evidence_window_ms: 3_600_000,
        vote_window_ms: 40,
        ..CourtConfig::default()
    };
    let court = court_with(cfg, &refs);
    accepted_proposal(&court, &alice, &bob, "prop_1");

    let dispute_id = file_and_reveal(&court, &alice, "prop_1", "n1").await;
    panel_accepts(&court, &dispute_id, &refs).await;
    both_parties_submit_evidence(&court, &dispute_id, &alice, &bob).await;

    // Only one arbiter votes before the deadline.
    let voter = &arbiters[0];
    let payload = signing::arbiter_vote(&dispute_id, Verdict::Disputant, "clear");
    court
        .engine
        .arbiter_vote(
            &voter.id,
            &voter.keys.public_key(),
            &dispute_id,
            Verdict::Disputant,
            "clear",
            &sign(voter, &payload),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    // One vote for disputant is short of the majority of a 3-seat panel,
    // so the verdict is mutual; the silent arbiters each lose 25.
    let (open, resolved) = court.engine.counts().await;
    assert_eq!((open, resolved), (0, 1));
    assert_eq!(court.ledger.rating_of(&arbiters[1].id), 1275);
    assert_eq!(court.ledger.rating_of(&arbiters[2].id), 1275);
    // The lone vote dissents from the mutual verdict: stake back, net zero.
    assert_eq!(court.ledger.rating_of(&arbiters[0].id), 1300);
}

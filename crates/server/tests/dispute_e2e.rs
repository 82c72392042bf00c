//! End-to-end Agentcourt: commit-reveal filing, panel formation, evidence,
//! voting, and settlement over the wire.

mod common;

use agentchat_crypto::hash::{canonical_json_sha256, sha256_hex};
use agentchat_crypto::sign::eddsa::Ed25519KeyPair;
use agentchat_protocol::signing;
use agentchat_reputation::store::{save_ratings_atomic, RatingRecord};
use agentchat_types::ids::agent_id_from_pubkey;
use common::{derived_id, keypair, sign, TestClient, TestServer};
use serde_json::json;
use std::collections::HashMap;

/// Pre-seeds panel-eligible rating records for the given keypairs.
fn seed_arbiters(dir: &std::path::Path, keys: &[&Ed25519KeyPair]) {
    let mut ratings = HashMap::new();
    for k in keys {
        let id = agent_id_from_pubkey(&k.public_key().to_bytes());
        let mut record = RatingRecord::new(0);
        record.rating = 1300;
        record.transactions = 50;
        ratings.insert(id, record);
    }
    save_ratings_atomic(&dir.join("ratings.json"), &ratings).unwrap();
}

async fn accepted_proposal(
    alice: &mut TestClient,
    bob: &mut TestClient,
    alice_keys: &Ed25519KeyPair,
    bob_keys: &Ed25519KeyPair,
    proposal_id: &str,
) {
    let alice_id = derived_id(alice_keys);
    let bob_id = derived_id(bob_keys);
    let payload = signing::proposal(proposal_id, &alice_id, &bob_id, "deliver report", None, None, None);
    alice
        .send(json!({
            "type": "PROPOSAL",
            "id": proposal_id,
            "to": bob_id,
            "task": "deliver report",
            "sig": sign(alice_keys, &payload),
        }))
        .await;
    bob.recv_type("PROPOSAL").await;
    let payload = signing::accept(proposal_id, None);
    bob.send(json!({
        "type": "ACCEPT",
        "proposal_id": proposal_id,
        "sig": sign(bob_keys, &payload),
    }))
    .await;
    alice.recv_type("ACCEPT").await;
}

#[tokio::test]
async fn dispute_reaches_verdict_and_settles() {
    let (alice_keys, bob_keys) = (keypair(), keypair());
    let arb_keys = [keypair(), keypair(), keypair()];
    let server = TestServer::start_with(
        |dir| seed_arbiters(dir, &[&arb_keys[0], &arb_keys[1], &arb_keys[2]]),
        |_| {},
    )
    .await;

    let mut alice = TestClient::connect(server.addr).await;
    let mut bob = TestClient::connect(server.addr).await;
    let alice_id = alice.identify_persistent("alice", &alice_keys).await;
    let bob_id = bob.identify_persistent("bob", &bob_keys).await;

    let mut arbiters = Vec::new();
    for (n, keys) in arb_keys.iter().enumerate() {
        let mut client = TestClient::connect(server.addr).await;
        client.identify_persistent(&format!("arb{n}"), keys).await;
        arbiters.push(client);
    }

    accepted_proposal(&mut alice, &mut bob, &alice_keys, &bob_keys, "prop_d1").await;

    // Commit, then reveal.
    let commitment = sha256_hex(b"n1");
    let payload = signing::dispute_intent("prop_d1", "not delivered", &commitment);
    alice
        .send(json!({
            "type": "DISPUTE_INTENT",
            "proposal_id": "prop_d1",
            "reason": "not delivered",
            "commitment": commitment,
            "sig": sign(&alice_keys, &payload),
        }))
        .await;
    let ack = alice.recv_type("DISPUTE_INTENT_ACK").await;
    let dispute_id = ack["dispute_id"].as_str().unwrap().to_string();

    let payload = signing::dispute_reveal(&dispute_id, "n1");
    alice
        .send(json!({
            "type": "DISPUTE_REVEAL",
            "dispute_id": dispute_id,
            "nonce": "n1",
            "sig": sign(&alice_keys, &payload),
        }))
        .await;
    let revealed = alice.recv_type("DISPUTE_REVEALED").await;
    assert_eq!(revealed["phase"], "arbiter_response");

    // Exactly the three eligible arbiters are assigned; all accept.
    for client in arbiters.iter_mut() {
        let assigned = client.recv_type("ARBITER_ASSIGNED").await;
        assert_eq!(assigned["dispute_id"], dispute_id.as_str());
        assert_eq!(assigned["role"], "arbiter");
    }
    for (client, keys) in arbiters.iter_mut().zip(arb_keys.iter()) {
        let payload = signing::arbiter_accept(&dispute_id);
        client
            .send(json!({
                "type": "ARBITER_ACCEPT",
                "dispute_id": dispute_id,
                "sig": sign(keys, &payload),
            }))
            .await;
    }
    let formed = alice.recv_type("PANEL_FORMED").await;
    assert_eq!(formed["arbiters"].as_array().unwrap().len(), 3);

    // Both parties file one evidence bundle each.
    for (client, keys, statement) in [
        (&mut alice, &alice_keys, "never received the report"),
        (&mut bob, &bob_keys, "report was sent on time"),
    ] {
        let items = vec![json!({"log": statement})];
        let items_hash = canonical_json_sha256(&items).unwrap();
        let payload = signing::evidence(&dispute_id, &items_hash, statement);
        client
            .send(json!({
                "type": "EVIDENCE",
                "dispute_id": dispute_id,
                "items": items,
                "statement": statement,
                "sig": sign(keys, &payload),
            }))
            .await;
        let received = client.recv_type("EVIDENCE_RECEIVED").await;
        assert_eq!(received["items"], 1);
    }

    // Arbiters get the case with both bundles, then vote 2-1 for the
    // disputant.
    let verdicts = ["disputant", "disputant", "respondent"];
    for ((client, keys), verdict) in arbiters.iter_mut().zip(arb_keys.iter()).zip(verdicts) {
        let case = client.recv_type("CASE_READY").await;
        assert!(case["disputant_evidence"]["items"].is_array());
        assert!(case["respondent_evidence"]["items"].is_array());

        let wire_verdict = match verdict {
            "disputant" => agentchat_protocol::frames::Verdict::Disputant,
            _ => agentchat_protocol::frames::Verdict::Respondent,
        };
        let payload = signing::arbiter_vote(&dispute_id, wire_verdict, "weighed the logs");
        client
            .send(json!({
                "type": "ARBITER_VOTE",
                "dispute_id": dispute_id,
                "verdict": verdict,
                "reasoning": "weighed the logs",
                "sig": sign(keys, &payload),
            }))
            .await;
    }

    let verdict = alice.recv_type("VERDICT").await;
    assert_eq!(verdict["verdict"], "disputant");
    assert_eq!(verdict["votes"].as_array().unwrap().len(), 3);
    let verdict_b = bob.recv_type("VERDICT").await;
    assert_eq!(verdict_b["verdict"], "disputant");

    // Settlement at parity: disputant +4, respondent -8, majority +5 each.
    let ledger = &server.state.ledger;
    assert_eq!(ledger.rating_of(&alice_id.parse().unwrap()), 1204);
    assert_eq!(ledger.rating_of(&bob_id.parse().unwrap()), 1192);
    let majority: Vec<i64> = arb_keys
        .iter()
        .map(|k| ledger.rating_of(&agent_id_from_pubkey(&k.public_key().to_bytes())))
        .collect();
    assert_eq!(majority.iter().filter(|r| **r == 1305).count(), 2);
    assert_eq!(majority.iter().filter(|r| **r == 1300).count(), 1);
}

#[tokio::test]
async fn too_small_a_pool_falls_back() {
    let (alice_keys, bob_keys) = (keypair(), keypair());
    let server = TestServer::start().await;

    let mut alice = TestClient::connect(server.addr).await;
    let mut bob = TestClient::connect(server.addr).await;
    alice.identify_persistent("alice", &alice_keys).await;
    bob.identify_persistent("bob", &bob_keys).await;
    accepted_proposal(&mut alice, &mut bob, &alice_keys, &bob_keys, "prop_f1").await;

    let commitment = sha256_hex(b"n2");
    let payload = signing::dispute_intent("prop_f1", "no delivery", &commitment);
    alice
        .send(json!({
            "type": "DISPUTE_INTENT",
            "proposal_id": "prop_f1",
            "reason": "no delivery",
            "commitment": commitment,
            "sig": sign(&alice_keys, &payload),
        }))
        .await;
    let ack = alice.recv_type("DISPUTE_INTENT_ACK").await;
    let dispute_id = ack["dispute_id"].as_str().unwrap();

    let payload = signing::dispute_reveal(dispute_id, "n2");
    alice
        .send(json!({
            "type": "DISPUTE_REVEAL",
            "dispute_id": dispute_id,
            "nonce": "n2",
            "sig": sign(&alice_keys, &payload),
        }))
        .await;

    let fallback = alice.recv_type("DISPUTE_FALLBACK").await;
    assert_eq!(fallback["dispute_id"], dispute_id);
    let fallback_b = bob.recv_type("DISPUTE_FALLBACK").await;
    assert_eq!(fallback_b["dispute_id"], dispute_id);
}

#[tokio::test]
async fn reveal_timeout_forfeits_the_filing_fee() {
    let (alice_keys, bob_keys) = (keypair(), keypair());
    let arb_keys = [keypair(), keypair(), keypair()];
    let server = TestServer::start_with(
        |dir| seed_arbiters(dir, &[&arb_keys[0], &arb_keys[1], &arb_keys[2]]),
        |cfg| cfg.court.reveal_window_ms = 50,
    )
    .await;

    let mut alice = TestClient::connect(server.addr).await;
    let mut bob = TestClient::connect(server.addr).await;
    let alice_id = alice.identify_persistent("alice", &alice_keys).await;
    bob.identify_persistent("bob", &bob_keys).await;
    accepted_proposal(&mut alice, &mut bob, &alice_keys, &bob_keys, "prop_t1").await;

    let commitment = sha256_hex(b"never-revealed");
    let payload = signing::dispute_intent("prop_t1", "stalling", &commitment);
    alice
        .send(json!({
            "type": "DISPUTE_INTENT",
            "proposal_id": "prop_t1",
            "reason": "stalling",
            "commitment": commitment,
            "sig": sign(&alice_keys, &payload),
        }))
        .await;
    alice.recv_type("DISPUTE_INTENT_ACK").await;

    // Never reveal; the dispute voids and the fee forfeits.
    let voided = alice.recv_type("DISPUTE_REVEALED").await;
    assert_eq!(voided["phase"], "voided");
    assert_eq!(server.state.ledger.rating_of(&alice_id.parse().unwrap()), 1190);
}

#[tokio::test]
async fn legacy_dispute_parks_in_fallback() {
    let (alice_keys, bob_keys) = (keypair(), keypair());
    let server = TestServer::start().await;
    let mut alice = TestClient::connect(server.addr).await;
    let mut bob = TestClient::connect(server.addr).await;
    let alice_id = alice.identify_persistent("alice", &alice_keys).await;
    bob.identify_persistent("bob", &bob_keys).await;
    accepted_proposal(&mut alice, &mut bob, &alice_keys, &bob_keys, "prop_l1").await;

    let payload = signing::dispute("prop_l1", "handed off stale work");
    alice
        .send(json!({
            "type": "DISPUTE",
            "proposal_id": "prop_l1",
            "reason": "handed off stale work",
            "sig": sign(&alice_keys, &payload),
        }))
        .await;

    let relayed = bob.recv_type("DISPUTE").await;
    assert_eq!(relayed["from"], alice_id.as_str());
    assert_eq!(relayed["reason"], "handed off stale work");
    bob.recv_type("DISPUTE_FALLBACK").await;
    alice.recv_type("DISPUTE_FALLBACK").await;

    let (open, resolved) = server.state.court.counts().await;
    assert_eq!((open, resolved), (1, 0));
}

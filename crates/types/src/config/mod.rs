//! Shared configuration structures for the relay and its subsystems.
//!
//! Every field carries a serde default so a partial (or absent) TOML file
//! yields a runnable configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the framed-message listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Address the HTTP health endpoint binds to.
    #[serde(default = "default_health_addr")]
    pub health_addr: String,
    /// Server name reported in `WELCOME` frames.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Directory holding `ratings.json`, `receipts.jsonl`, `allowlist.json`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Shared secret for `ADMIN_*` frames. Empty disables admin mutations.
    #[serde(default)]
    pub admin_key: String,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub allowlist: AllowlistConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub court: CourtConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: default_listen_addr(),
            health_addr: default_health_addr(),
            server_name: default_server_name(),
            data_dir: default_data_dir(),
            admin_key: String::new(),
            limits: LimitsConfig::default(),
            allowlist: AllowlistConfig::default(),
            market: MarketConfig::default(),
            court: CourtConfig::default(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:6667".to_string()
}
fn default_health_addr() -> String {
    "127.0.0.1:8667".to_string()
}
fn default_server_name() -> String {
    "agentchat".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// Rate limiting, queue sizing, and frame bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Sustained broadcast-frame rate per session, tokens per second.
    #[serde(default = "default_message_rate")]
    pub message_rate: f64,
    /// Token bucket capacity (burst size).
    #[serde(default = "default_message_burst")]
    pub message_burst: u32,
    /// Frames tolerated on a connection before authentication completes.
    #[serde(default = "default_preauth_budget")]
    pub preauth_budget: u32,
    /// Outbound frames buffered per session before the connection is closed.
    #[serde(default = "default_write_queue")]
    pub write_queue: usize,
    /// Broadcast frames retained per channel for late joiners.
    #[serde(default = "default_replay_window")]
    pub replay_window: usize,
    /// Maximum accepted frame length in bytes.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Lifetime of a pending auth challenge.
    #[serde(default = "default_challenge_ttl_ms")]
    pub challenge_ttl_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            message_rate: default_message_rate(),
            message_burst: default_message_burst(),
            preauth_budget: default_preauth_budget(),
            write_queue: default_write_queue(),
            replay_window: default_replay_window(),
            max_frame_len: default_max_frame_len(),
            challenge_ttl_ms: default_challenge_ttl_ms(),
        }
    }
}

fn default_message_rate() -> f64 {
    1.0
}
fn default_message_burst() -> u32 {
    10
}
fn default_preauth_budget() -> u32 {
    8
}
fn default_write_queue() -> usize {
    256
}
fn default_replay_window() -> usize {
    20
}
fn default_max_frame_len() -> usize {
    65_536
}
fn default_challenge_ttl_ms() -> u64 {
    120_000
}

/// Optional pubkey gating.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllowlistConfig {
    /// When true, pubkeys must be approved before they can authenticate.
    #[serde(default)]
    pub enabled: bool,
    /// When true, keyless connections are refused outright; otherwise they
    /// may still join as ephemeral sessions.
    #[serde(default)]
    pub strict: bool,
}

/// Marketplace knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Default proposal lifetime when the proposer sets no expiry.
    #[serde(default = "default_proposal_expiry_ms")]
    pub default_expiry_ms: u64,
    /// Upper bound for a single escrow stake.
    #[serde(default = "default_max_stake")]
    pub max_stake: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        MarketConfig {
            default_expiry_ms: default_proposal_expiry_ms(),
            max_stake: default_max_stake(),
        }
    }
}

fn default_proposal_expiry_ms() -> u64 {
    86_400_000
}
fn default_max_stake() -> u64 {
    200
}

/// Agentcourt timing and panel parameters. All windows are configurable so
/// the integration suite can run with millisecond-scale timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourtConfig {
    #[serde(default = "default_panel_size")]
    pub panel_size: usize,
    #[serde(default = "default_replacement_cap")]
    pub replacement_cap: u32,
    /// Reputation escrowed by the disputant when filing.
    #[serde(default = "default_filing_fee")]
    pub filing_fee: u64,
    /// Minimum rating for panel eligibility.
    #[serde(default = "default_min_rating")]
    pub min_rating: i64,
    /// Minimum settled transactions for panel eligibility.
    #[serde(default = "default_min_transactions")]
    pub min_transactions: u64,
    /// How long since an agent's last dispute involvement before it may sit
    /// on a panel again.
    #[serde(default = "default_independence_window_ms")]
    pub independence_window_ms: u64,
    #[serde(default = "default_reveal_window_ms")]
    pub reveal_window_ms: u64,
    #[serde(default = "default_response_window_ms")]
    pub response_window_ms: u64,
    #[serde(default = "default_evidence_window_ms")]
    pub evidence_window_ms: u64,
    #[serde(default = "default_vote_window_ms")]
    pub vote_window_ms: u64,
}

impl Default for CourtConfig {
    fn default() -> Self {
        CourtConfig {
            panel_size: default_panel_size(),
            replacement_cap: default_replacement_cap(),
            filing_fee: default_filing_fee(),
            min_rating: default_min_rating(),
            min_transactions: default_min_transactions(),
            independence_window_ms: default_independence_window_ms(),
            reveal_window_ms: default_reveal_window_ms(),
            response_window_ms: default_response_window_ms(),
            evidence_window_ms: default_evidence_window_ms(),
            vote_window_ms: default_vote_window_ms(),
        }
    }
}

fn default_panel_size() -> usize {
    3
}
fn default_replacement_cap() -> u32 {
    2
}
fn default_filing_fee() -> u64 {
    10
}
fn default_min_rating() -> i64 {
    1200
}
fn default_min_transactions() -> u64 {
    10
}
fn default_independence_window_ms() -> u64 {
    2_592_000_000
}
fn default_reveal_window_ms() -> u64 {
    600_000
}
fn default_response_window_ms() -> u64 {
    1_800_000
}
fn default_evidence_window_ms() -> u64 {
    3_600_000
}
fn default_vote_window_ms() -> u64 {
    3_600_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_contract() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr, "0.0.0.0:6667");
        assert_eq!(cfg.limits.message_burst, 10);
        assert!((cfg.limits.message_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(cfg.court.panel_size, 3);
        assert_eq!(cfg.court.replacement_cap, 2);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ServerConfig =
            serde_json::from_str(r#"{"listen_addr":"127.0.0.1:1234","court":{"panel_size":5}}"#)
                .unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:1234");
        assert_eq!(cfg.court.panel_size, 5);
        assert_eq!(cfg.court.filing_fee, 10);
        assert_eq!(cfg.limits.replay_window, 20);
    }
}

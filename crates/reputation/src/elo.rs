//! ELO arithmetic for completions, disputes, and arbiter incentives.
//!
//! All deltas round to whole points with a minimum magnitude of 1 so every
//! settlement is visible in the ledger.

/// Ratings never drop below this floor.
pub const RATING_FLOOR: i64 = 100;
/// Rating assigned to an agent's first record.
pub const INITIAL_RATING: i64 = 1200;
/// Effective K-factor for dispute settlements.
pub const DISPUTE_K: f64 = 16.0;
/// Reward for voting with the majority.
pub const ARBITER_MAJORITY_REWARD: i64 = 5;
/// Stake forfeited by an arbiter who never voted.
pub const ARBITER_FORFEIT_PENALTY: i64 = 25;

/// Expected score of a player rated `ra` against one rated `rb`.
pub fn expected(ra: i64, rb: i64) -> f64 {
    1.0 / (1.0 + 10f64.powf((rb - ra) as f64 / 400.0))
}

/// K-factor tiers by settled transaction count.
pub fn k_factor(transactions: u64) -> f64 {
    if transactions < 30 {
        32.0
    } else if transactions < 100 {
        24.0
    } else {
        16.0
    }
}

/// Gain for one party of a completed proposal: half of what that party would
/// win from a 1-on-1 upset, floored at one point. Both parties gain, but the
/// pair never gains more than a single match would transfer.
pub fn completion_gain(k: f64, expected_self: f64) -> i64 {
    (0.5 * k * (1.0 - expected_self)).round().max(1.0) as i64
}

/// Winner's gain for a one-sided dispute verdict.
pub fn dispute_winner_gain(expected_winner: f64) -> i64 {
    (0.5 * DISPUTE_K * expected_winner).round().max(1.0) as i64
}

/// Loser's loss for a one-sided dispute verdict.
pub fn dispute_loser_loss(expected_winner: f64) -> i64 {
    (DISPUTE_K * expected_winner).round().max(1.0) as i64
}

/// Each party's loss under a `mutual` verdict.
pub fn dispute_mutual_loss(expected_self: f64) -> i64 {
    (DISPUTE_K * expected_self).round().max(1.0) as i64
}

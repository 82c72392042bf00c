//! On-disk rating records and their atomic persistence.

use agentchat_types::error::StoreError;
use agentchat_types::ids::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Per-agent rating state as persisted in `ratings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub rating: i64,
    /// Settled transactions (completions and dispute resolutions).
    pub transactions: u64,
    /// Optional per-skill sub-ratings, keyed by capability tag.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub skills: BTreeMap<String, i64>,
    pub updated_ms: u64,
}

impl RatingRecord {
    /// A fresh record at the initial rating.
    pub fn new(now_ms: u64) -> Self {
        RatingRecord {
            rating: crate::elo::INITIAL_RATING,
            transactions: 0,
            skills: BTreeMap::new(),
            updated_ms: now_ms,
        }
    }
}

/// Loads the ratings map; a missing file is an empty ledger.
pub fn load_ratings(path: &Path) -> Result<HashMap<AgentId, RatingRecord>, StoreError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Writes the ratings map atomically: temp file in the same directory,
/// fsync, then rename over the target.
pub fn save_ratings_atomic(
    path: &Path,
    ratings: &HashMap<AgentId, RatingRecord>,
) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    serde_json::to_writer_pretty(&mut tmp, ratings)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratings.json");

        let mut ratings = HashMap::new();
        let id: AgentId = "0011223344556677".parse().unwrap();
        let mut record = RatingRecord::new(42);
        record.rating = 1337;
        record.transactions = 12;
        record.skills.insert("code-review".into(), 1250);
        ratings.insert(id.clone(), record.clone());

        save_ratings_atomic(&path, &ratings).unwrap();
        let back = load_ratings(&path).unwrap();
        assert_eq!(back.get(&id), Some(&record));
    }

    #[test]
    fn missing_file_is_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_ratings(&dir.path().join("ratings.json")).unwrap().is_empty());
    }

    #[test]
    fn save_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratings.json");
        let id: AgentId = "0011223344556677".parse().unwrap();

        let mut ratings = HashMap::new();
        ratings.insert(id.clone(), RatingRecord::new(1));
        save_ratings_atomic(&path, &ratings).unwrap();

        ratings.get_mut(&id).unwrap().rating = 1500;
        save_ratings_atomic(&path, &ratings).unwrap();

        assert_eq!(load_ratings(&path).unwrap()[&id].rating, 1500);
    }
}

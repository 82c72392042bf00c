//! Append-only settlement receipts, one JSON object per line.
//! Receipts are never rewritten; recovery reads the file back in order.

use agentchat_types::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;

/// The terminal outcome a receipt records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptKind {
    Complete,
    Dispute,
    DisputeVoided,
}

/// One rating change applied during a settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptDelta {
    pub agent: String,
    pub delta: i64,
    pub rating: i64,
    /// True when the floor clamp reduced the intended delta.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub clamped: bool,
}

/// Immutable record of a completed or disputed proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(rename = "type")]
    pub kind: ReceiptKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispute_id: Option<String>,
    pub parties: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
    pub deltas: Vec<ReceiptDelta>,
    pub ts: u64,
}

/// Appends receipts to a JSON-Lines file, fsyncing each line.
pub struct ReceiptWriter {
    file: Mutex<File>,
}

impl ReceiptWriter {
    /// Opens (or creates) the receipts file in append mode.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(ReceiptWriter { file: Mutex::new(file) })
    }

    /// Appends one receipt line and syncs it to disk.
    pub fn append(&self, receipt: &Receipt) -> Result<(), StoreError> {
        let line = serde_json::to_string(receipt)?;
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_data()?;
        Ok(())
    }
}

/// Reads every receipt back, in append order. Used at recovery and in tests.
pub fn read_receipts(path: &Path) -> Result<Vec<Receipt>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut receipts = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        receipts.push(serde_json::from_str(&line)?);
    }
    Ok(receipts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(n: u64) -> Receipt {
        Receipt {
            kind: ReceiptKind::Complete,
            proposal_id: Some(format!("prop_{n}")),
            dispute_id: None,
            parties: vec!["@aaaaaaaaaaaaaaaa".into(), "@bbbbbbbbbbbbbbbb".into()],
            amount: Some(10),
            currency: Some("ELO".into()),
            capability: None,
            proof: Some("https://example.test/proof".into()),
            verdict: None,
            deltas: vec![ReceiptDelta {
                agent: "@aaaaaaaaaaaaaaaa".into(),
                delta: 8,
                rating: 1208,
                clamped: false,
            }],
            ts: n,
        }
    }

    #[test]
    fn append_n_read_n_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipts.jsonl");
        let writer = ReceiptWriter::open(&path).unwrap();

        for n in 0..5 {
            writer.append(&receipt(n)).unwrap();
        }

        let back = read_receipts(&path).unwrap();
        assert_eq!(back.len(), 5);
        for (n, r) in back.iter().enumerate() {
            assert_eq!(r.ts, n as u64);
            assert_eq!(r.proposal_id.as_deref(), Some(format!("prop_{n}").as_str()));
        }
    }

    #[test]
    fn reopening_appends_rather_than_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipts.jsonl");

        ReceiptWriter::open(&path).unwrap().append(&receipt(1)).unwrap();
        ReceiptWriter::open(&path).unwrap().append(&receipt(2)).unwrap();

        assert_eq!(read_receipts(&path).unwrap().len(), 2);
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_receipts(&dir.path().join("none.jsonl")).unwrap().is_empty());
    }
}

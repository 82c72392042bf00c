//! Optional pubkey gating. When enabled, only approved keys may complete the
//! challenge–response handshake; strict mode refuses keyless connections
//! outright. Mutations require the configured admin key and persist
//! immediately.

use agentchat_protocol::frames::AllowlistEntryInfo;
use agentchat_types::config::AllowlistConfig;
use agentchat_types::error::{AuthError, StoreError};
use agentchat_types::ids::{agent_id_from_pubkey, AgentId};
use agentchat_types::time::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// One approved pubkey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    /// Agent id of the approving admin session.
    pub approved_by: String,
    pub approved_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// The persisted allowlist plus its gating rules.
pub struct Allowlist {
    cfg: AllowlistConfig,
    admin_key: String,
    path: PathBuf,
    entries: RwLock<HashMap<String, AllowlistEntry>>,
}

impl Allowlist {
    /// Loads the allowlist from `data_dir/allowlist.json` (missing file means
    /// an empty list).
    pub fn open(cfg: AllowlistConfig, admin_key: String, data_dir: &Path) -> Result<Self, StoreError> {
        let path = data_dir.join("allowlist.json");
        let entries = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            HashMap::new()
        };
        Ok(Allowlist {
            cfg,
            admin_key,
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Gate applied to `IDENTIFY`. Returns the error to surface, if any.
    pub fn gate_identify(&self, pubkey_hex: Option<&str>) -> Result<(), AuthError> {
        if !self.cfg.enabled {
            return Ok(());
        }
        match pubkey_hex {
            None if self.cfg.strict => Err(AuthError::NoPubkey(
                "this relay requires a persistent identity".to_string(),
            )),
            None => Ok(()),
            Some(pk) => {
                let entries = self.read();
                if entries.contains_key(&pk.to_ascii_lowercase()) {
                    Ok(())
                } else {
                    Err(AuthError::NotAllowed("pubkey is not approved".to_string()))
                }
            }
        }
    }

    fn check_admin_key(&self, key: &str) -> Result<(), AuthError> {
        if self.admin_key.is_empty() {
            return Err(AuthError::NotAllowed("admin access is disabled".to_string()));
        }
        if key != self.admin_key {
            return Err(AuthError::NotAllowed("admin key mismatch".to_string()));
        }
        Ok(())
    }

    /// Approves a pubkey. Persists before returning.
    pub fn approve(
        &self,
        key: &str,
        pubkey_hex: &str,
        note: Option<String>,
        approver: &AgentId,
    ) -> Result<(), AuthError> {
        self.check_admin_key(key)?;
        let entry = AllowlistEntry {
            approved_by: approver.to_string(),
            approved_at: now_ms(),
            note,
        };
        {
            let mut entries = self.write();
            entries.insert(pubkey_hex.to_ascii_lowercase(), entry);
        }
        self.persist();
        Ok(())
    }

    /// Revokes by pubkey hex or by derived agent id. Returns whether an
    /// entry was removed.
    pub fn revoke(&self, key: &str, identifier: &str) -> Result<bool, AuthError> {
        self.check_admin_key(key)?;
        let removed = {
            let mut entries = self.write();
            let direct = entries.remove(&identifier.to_ascii_lowercase()).is_some();
            if direct {
                true
            } else {
                // Fall back to matching the identifier as a derived agent id.
                let target = entries
                    .keys()
                    .find(|pk| {
                        hex::decode(pk)
                            .map(|raw| {
                                agent_id_from_pubkey(&raw).to_string()
                                    == normalize_agent(identifier)
                            })
                            .unwrap_or(false)
                    })
                    .cloned();
                match target {
                    Some(pk) => entries.remove(&pk).is_some(),
                    None => false,
                }
            }
        };
        if removed {
            self.persist();
        }
        Ok(removed)
    }

    /// Lists all entries, admin-key gated.
    pub fn list(&self, key: &str) -> Result<Vec<AllowlistEntryInfo>, AuthError> {
        self.check_admin_key(key)?;
        let entries = self.read();
        let mut rows: Vec<AllowlistEntryInfo> = entries
            .iter()
            .map(|(pk, e)| AllowlistEntryInfo {
                pubkey: pk.clone(),
                approved_by: e.approved_by.clone(),
                approved_at: e.approved_at,
                note: e.note.clone(),
            })
            .collect();
        rows.sort_by(|a, b| a.pubkey.cmp(&b.pubkey));
        Ok(rows)
    }

    fn persist(&self) {
        let snapshot = self.read().clone();
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let result = tempfile::NamedTempFile::new_in(parent)
            .map_err(StoreError::Io)
            .and_then(|mut tmp| {
                serde_json::to_writer_pretty(&mut tmp, &snapshot)?;
                tmp.as_file().sync_all()?;
                tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
                Ok(())
            });
        if let Err(e) = result {
            tracing::error!(target: "allowlist", error = %e, "failed to persist allowlist");
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, AllowlistEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, AllowlistEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn normalize_agent(identifier: &str) -> String {
    if identifier.starts_with('@') {
        identifier.to_string()
    } else {
        format!("@{identifier}")
    }
}

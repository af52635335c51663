//! Delegate registry: agent id -> domain, keywords, capabilities, status
//!
//! Reads go through an `Arc` snapshot. Every mutation builds a whole new
//! table and swaps it in; mutations are serialized so concurrent writers
//! never drop each other's updates.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DelegateConfig;
use crate::error::RelayError;

use super::matcher::keyword_stems;

/// Lifecycle state of a delegate; only `Active` delegates receive work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Active,
    Inactive,
    Paused,
    Deleted,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Paused => write!(f, "paused"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DelegateEntry {
    pub agent_id: String,
    pub domain: String,
    pub keywords: Vec<String>,
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
    pub priority: Option<u32>,
    /// Registration order, used after `priority` to break ties
    #[serde(skip)]
    pub(crate) seq: u64,
    #[serde(skip)]
    stems: Vec<Vec<String>>,
}

impl DelegateEntry {
    fn from_config(config: &DelegateConfig, seq: u64) -> Self {
        let stems = config
            .keywords
            .iter()
            .map(|k| keyword_stems(k))
            .filter(|s| !s.is_empty())
            .collect();
        Self {
            agent_id: config.agent_id.trim().to_string(),
            domain: config.domain.trim().to_string(),
            keywords: config.keywords.clone(),
            capabilities: config.capabilities.clone(),
            status: config.status,
            priority: config.priority,
            seq,
            stems,
        }
    }

    /// Active and, when `capability` is given, advertising it
    pub fn is_eligible(&self, capability: Option<&str>) -> bool {
        if self.status != AgentStatus::Active {
            return false;
        }
        match capability {
            Some(cap) => self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(cap)),
            None => true,
        }
    }

    /// Normalized keywords, one stem sequence per keyword
    pub(crate) fn keyword_stems(&self) -> &[Vec<String>] {
        &self.stems
    }

    fn to_config(&self) -> DelegateConfig {
        DelegateConfig {
            agent_id: self.agent_id.clone(),
            domain: self.domain.clone(),
            keywords: self.keywords.clone(),
            priority: self.priority,
            capabilities: self.capabilities.clone(),
            status: self.status,
        }
    }
}

/// Validated delegate entries in tie-break order
#[derive(Debug, Clone, Default)]
pub struct DelegateTable {
    entries: Vec<DelegateEntry>,
    next_seq: u64,
    generation: u64,
}

impl DelegateTable {
    pub fn from_configs(configs: &[DelegateConfig]) -> Result<Self, RelayError> {
        let entries = configs
            .iter()
            .enumerate()
            .map(|(seq, c)| DelegateEntry::from_config(c, seq as u64))
            .collect();
        Self::build(entries, configs.len() as u64)
    }

    fn build(mut entries: Vec<DelegateEntry>, next_seq: u64) -> Result<Self, RelayError> {
        let mut ids = HashSet::new();
        let mut domains = HashSet::new();
        for entry in &entries {
            if entry.agent_id.is_empty() {
                return Err(RelayError::ConfigInvalid(
                    "delegate agent_id must not be empty".to_string(),
                ));
            }
            if entry.domain.is_empty() {
                return Err(RelayError::ConfigInvalid(format!(
                    "delegate '{}' has an empty domain",
                    entry.agent_id
                )));
            }
            if !ids.insert(entry.agent_id.to_lowercase()) {
                return Err(RelayError::ConfigInvalid(format!(
                    "duplicate delegate agent_id '{}'",
                    entry.agent_id
                )));
            }
            if !domains.insert(entry.domain.to_lowercase()) {
                return Err(RelayError::ConfigInvalid(format!(
                    "duplicate delegate domain '{}' (agent '{}')",
                    entry.domain, entry.agent_id
                )));
            }
        }

        // explicit priority first (lower wins), then registration order
        entries.sort_by_key(|e| (e.priority.is_none(), e.priority.unwrap_or(0), e.seq));
        Ok(Self {
            entries,
            next_seq,
            generation: 0,
        })
    }

    /// Entries in tie-break order
    pub fn entries(&self) -> &[DelegateEntry] {
        &self.entries
    }

    pub fn get(&self, agent_id: &str) -> Option<&DelegateEntry> {
        self.entries
            .iter()
            .find(|e| e.agent_id.eq_ignore_ascii_case(agent_id))
    }

    pub fn eligible(&self, capability: Option<&str>) -> Vec<&DelegateEntry> {
        self.entries
            .iter()
            .filter(|e| e.is_eligible(capability))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub struct DelegateRegistry {
    writer: Mutex<()>,
    table: RwLock<Arc<DelegateTable>>,
}

impl DelegateRegistry {
    pub fn new(table: DelegateTable) -> Self {
        Self {
            writer: Mutex::new(()),
            table: RwLock::new(Arc::new(table)),
        }
    }

    pub fn from_configs(configs: &[DelegateConfig]) -> Result<Self, RelayError> {
        Ok(Self::new(DelegateTable::from_configs(configs)?))
    }

    pub fn snapshot(&self) -> Arc<DelegateTable> {
        let guard = self.table.read().unwrap_or_else(|poisoned| {
            warn!("Delegate table lock was poisoned, recovering");
            poisoned.into_inner()
        });
        Arc::clone(&guard)
    }

    /// Replace every entry. Registration order restarts from `configs`.
    pub fn reload(&self, configs: &[DelegateConfig]) -> Result<u64, RelayError> {
        self.mutate("reload", |_| DelegateTable::from_configs(configs))
    }

    /// Add a delegate, or replace the one with the same agent id in place
    pub fn upsert(&self, config: DelegateConfig) -> Result<u64, RelayError> {
        self.mutate("upsert", |current| {
            let mut entries = current.entries.clone();
            let mut next_seq = current.next_seq;
            let agent_id = config.agent_id.trim();
            match entries
                .iter_mut()
                .find(|e| e.agent_id.eq_ignore_ascii_case(agent_id))
            {
                Some(existing) => *existing = DelegateEntry::from_config(&config, existing.seq),
                None => {
                    entries.push(DelegateEntry::from_config(&config, next_seq));
                    next_seq += 1;
                }
            }
            DelegateTable::build(entries, next_seq)
        })
    }

    pub fn remove(&self, agent_id: &str) -> Result<u64, RelayError> {
        self.mutate("remove", |current| {
            if current.get(agent_id).is_none() {
                return Err(RelayError::UnknownDelegate(agent_id.to_string()));
            }
            let entries = current
                .entries
                .iter()
                .filter(|e| !e.agent_id.eq_ignore_ascii_case(agent_id))
                .cloned()
                .collect();
            DelegateTable::build(entries, current.next_seq)
        })
    }

    pub fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<u64, RelayError> {
        self.mutate("set_status", |current| {
            let Some(entry) = current.get(agent_id) else {
                return Err(RelayError::UnknownDelegate(agent_id.to_string()));
            };
            let mut config = entry.to_config();
            config.status = status;
            let seq = entry.seq;
            let entries = current
                .entries
                .iter()
                .map(|e| {
                    if e.seq == seq {
                        DelegateEntry::from_config(&config, seq)
                    } else {
                        e.clone()
                    }
                })
                .collect();
            DelegateTable::build(entries, current.next_seq)
        })
    }

    /// Swap in a table that was validated elsewhere
    pub(crate) fn replace(&self, mut table: DelegateTable) -> u64 {
        let _writer = self.lock_writer();
        table.generation = self.snapshot().generation + 1;
        self.install(table, "reload")
    }

    fn mutate(
        &self,
        op: &str,
        f: impl FnOnce(&DelegateTable) -> Result<DelegateTable, RelayError>,
    ) -> Result<u64, RelayError> {
        let _writer = self.lock_writer();
        let current = self.snapshot();
        let mut next = match f(&current) {
            Ok(table) => table,
            Err(e) => {
                warn!("Rejected delegate {}: {}", op, e);
                return Err(e);
            }
        };
        next.generation = current.generation + 1;
        Ok(self.install(next, op))
    }

    fn lock_writer(&self) -> std::sync::MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|poisoned| {
            warn!("Delegate writer mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Callers hold the writer lock
    fn install(&self, table: DelegateTable, op: &str) -> u64 {
        let generation = table.generation;
        let count = table.len();
        let mut guard = self.table.write().unwrap_or_else(|poisoned| {
            warn!("Delegate table lock was poisoned, recovering");
            poisoned.into_inner()
        });
        *guard = Arc::new(table);
        info!(
            "Delegate registry {} applied (generation {}, {} delegates)",
            op, generation, count
        );
        generation
    }
}

//! Provider routing policy
//!
//! Maps (role, task) to an ordered candidate list. The whole table is swapped
//! on reload; readers hold an `Arc` to whichever table was current when they
//! looked, so they never see a mix of old and new rules.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::types::{AgentRole, ProviderId, RateLimit, TaskType};

/// Validated definition of one provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSpec {
    pub id: ProviderId,
    pub vendor: String,
    pub model: String,
    #[serde(skip)]
    pub limit: RateLimit,
    pub cost_per_1k_tokens_usd: f64,
    pub latency_ms_avg: u32,
    pub base_url: Option<String>,
}

/// One rule as listed for operators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyRule {
    pub role: AgentRole,
    pub task: Option<TaskType>,
    pub providers: Vec<ProviderId>,
}

type RuleKey = (AgentRole, Option<TaskType>);

#[derive(Debug, Clone)]
pub struct RoutingTable {
    rules: HashMap<RuleKey, Vec<ProviderId>>,
    providers: BTreeMap<ProviderId, ProviderSpec>,
    universal_fallback: ProviderId,
    generation: u64,
}

impl RoutingTable {
    /// Build a table from configuration, validating it first
    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;

        let providers = config
            .providers
            .iter()
            .map(|(id, p)| {
                let id = ProviderId::new(id.clone());
                let spec = ProviderSpec {
                    id: id.clone(),
                    vendor: p.vendor.clone(),
                    model: p.model.clone(),
                    limit: RateLimit::new(
                        p.requests_per_minute,
                        Duration::from_secs(p.window_seconds),
                    ),
                    cost_per_1k_tokens_usd: p.cost_per_1k_tokens_usd,
                    latency_ms_avg: p.latency_ms_avg,
                    base_url: p.base_url.clone(),
                };
                (id, spec)
            })
            .collect();

        let rules = config
            .routing
            .rules
            .iter()
            .map(|rule| {
                let candidates = rule
                    .providers
                    .iter()
                    .map(|p| ProviderId::new(p.clone()))
                    .collect();
                ((rule.role, rule.task), candidates)
            })
            .collect();

        Ok(Self {
            rules,
            providers,
            universal_fallback: ProviderId::new(config.routing.universal_fallback.clone()),
            generation: 0,
        })
    }

    /// Ordered candidates for (role, task). An exact rule wins over a role-wide
    /// one. Empty when nothing matches.
    pub fn resolve(&self, role: AgentRole, task: TaskType) -> Vec<ProviderId> {
        self.rules
            .get(&(role, Some(task)))
            .or_else(|| self.rules.get(&(role, None)))
            .cloned()
            .unwrap_or_default()
    }

    /// Resolved candidates, or the universal fallback alone when no rule matches
    pub fn candidates(&self, role: AgentRole, task: TaskType) -> Vec<ProviderId> {
        let resolved = self.resolve(role, task);
        if resolved.is_empty() {
            vec![self.universal_fallback.clone()]
        } else {
            resolved
        }
    }

    pub fn provider(&self, id: &ProviderId) -> Option<&ProviderSpec> {
        self.providers.get(id)
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderSpec> {
        self.providers.values()
    }

    pub fn universal_fallback(&self) -> &ProviderId {
        &self.universal_fallback
    }

    /// Bumped on every successful reload
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Rules sorted by role, role-wide rule first
    pub fn rules(&self) -> Vec<PolicyRule> {
        let mut rules: Vec<PolicyRule> = self
            .rules
            .iter()
            .map(|((role, task), providers)| PolicyRule {
                role: *role,
                task: *task,
                providers: providers.clone(),
            })
            .collect();
        rules.sort_by_key(|r| (r.role, r.task));
        rules
    }
}

/// Swap-on-reload holder for the active [`RoutingTable`]
pub struct RoutingPolicy {
    table: RwLock<Arc<RoutingTable>>,
}

impl RoutingPolicy {
    pub fn new(table: RoutingTable) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        Ok(Self::new(RoutingTable::from_config(config)?))
    }

    /// The table current at the time of the call
    pub fn snapshot(&self) -> Arc<RoutingTable> {
        let guard = self.table.read().unwrap_or_else(|poisoned| {
            warn!("Routing table lock was poisoned, recovering");
            poisoned.into_inner()
        });
        Arc::clone(&guard)
    }

    pub fn resolve(&self, role: AgentRole, task: TaskType) -> Vec<ProviderId> {
        self.snapshot().resolve(role, task)
    }

    /// Replace the table. On error the previous table stays active.
    pub fn reload(&self, config: &RelayConfig) -> Result<u64, RelayError> {
        let table = match RoutingTable::from_config(config) {
            Ok(table) => table,
            Err(e) => {
                warn!("Rejected routing table reload: {}", e);
                return Err(e);
            }
        };
        Ok(self.swap(table))
    }

    /// Install an already validated table, returning its generation
    pub(crate) fn swap(&self, mut table: RoutingTable) -> u64 {
        let mut guard = self.table.write().unwrap_or_else(|poisoned| {
            warn!("Routing table lock was poisoned, recovering");
            poisoned.into_inner()
        });
        table.generation = guard.generation + 1;
        let generation = table.generation;
        *guard = Arc::new(table);
        info!(
            "Routing table reloaded (generation {}, {} rules)",
            generation,
            guard.rules.len()
        );
        generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;

    fn sample_config() -> RelayConfig {
        RelayConfig::from_toml_str(SAMPLE).unwrap()
    }

    fn ids(list: &[&str]) -> Vec<ProviderId> {
        list.iter().map(|s| ProviderId::from(*s)).collect()
    }

    #[test]
    fn test_resolve_role_wide_rule() {
        let table = RoutingTable::from_config(&sample_config()).unwrap();
        assert_eq!(
            table.resolve(AgentRole::Supervisor, TaskType::Reasoning),
            ids(&["gemini_flash", "groq_llama_70b"])
        );
        assert_eq!(
            table.resolve(AgentRole::Finance, TaskType::SkillExecution),
            ids(&["groq_llama_70b", "gemini_flash"])
        );
    }

    #[test]
    fn test_exact_rule_beats_role_wide() {
        let table = RoutingTable::from_config(&sample_config()).unwrap();
        assert_eq!(
            table.resolve(AgentRole::Supervisor, TaskType::Delegation),
            ids(&["groq_llama_70b"])
        );
    }

    #[test]
    fn test_unmatched_resolves_empty_and_candidates_fall_back() {
        let table = RoutingTable::from_config(&sample_config()).unwrap();
        assert!(table.resolve(AgentRole::Creative, TaskType::Reasoning).is_empty());
        assert_eq!(
            table.candidates(AgentRole::Creative, TaskType::Reasoning),
            ids(&["groq_llama_70b"])
        );
    }

    #[test]
    fn test_provider_spec_carries_limit() {
        let table = RoutingTable::from_config(&sample_config()).unwrap();
        let spec = table.provider(&ProviderId::from("groq_llama_70b")).unwrap();
        assert_eq!(spec.limit, RateLimit::per_minute(30));
        assert_eq!(spec.vendor, "groq");
        assert_eq!(table.providers().count(), 2);
    }

    #[test]
    fn test_rules_listing_is_sorted() {
        let table = RoutingTable::from_config(&sample_config()).unwrap();
        let rules = table.rules();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].role, AgentRole::Supervisor);
        assert_eq!(rules[0].task, None);
        assert_eq!(rules[1].task, Some(TaskType::Delegation));
        assert_eq!(rules[2].role, AgentRole::Finance);
    }

    #[test]
    fn test_reload_swaps_and_bumps_generation() {
        let policy = RoutingPolicy::from_config(&sample_config()).unwrap();
        assert_eq!(policy.snapshot().generation(), 0);

        let mut config = sample_config();
        config.routing.rules[0].providers = vec!["groq_llama_70b".to_string()];
        assert_eq!(policy.reload(&config).unwrap(), 1);
        assert_eq!(
            policy.resolve(AgentRole::Supervisor, TaskType::Reasoning),
            ids(&["groq_llama_70b"])
        );
    }

    #[test]
    fn test_invalid_reload_keeps_previous_table() {
        let policy = RoutingPolicy::from_config(&sample_config()).unwrap();
        let before = policy.snapshot();

        let mut config = sample_config();
        config.routing.rules[0].providers = vec!["missing".to_string()];
        let err = policy.reload(&config).unwrap_err();
        assert!(matches!(err, RelayError::ConfigInvalid(_)));

        let after = policy.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(
            policy.resolve(AgentRole::Supervisor, TaskType::Reasoning),
            ids(&["gemini_flash", "groq_llama_70b"])
        );
    }

    #[test]
    fn test_snapshot_outlives_reload() {
        let policy = RoutingPolicy::from_config(&sample_config()).unwrap();
        let held = policy.snapshot();

        let mut config = sample_config();
        config.routing.rules.clear();
        policy.reload(&config).unwrap();

        assert_eq!(held.rules().len(), 3);
        assert!(policy.snapshot().rules().is_empty());
    }

    #[test]
    fn test_concurrent_resolve_never_sees_mixed_table() {
        // table "old" routes every rule to gemini, table "new" routes every rule to groq
        let mut old = sample_config();
        let mut new = sample_config();
        for rule in &mut old.routing.rules {
            rule.providers = vec!["gemini_flash".to_string()];
        }
        for rule in &mut new.routing.rules {
            rule.providers = vec!["groq_llama_70b".to_string()];
        }

        let policy = Arc::new(RoutingPolicy::from_config(&old).unwrap());
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let policy = Arc::clone(&policy);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                        let table = policy.snapshot();
                        let a = table.resolve(AgentRole::Supervisor, TaskType::Reasoning);
                        let b = table.resolve(AgentRole::Supervisor, TaskType::Delegation);
                        let c = table.resolve(AgentRole::Finance, TaskType::Reasoning);
                        assert_eq!(a, b);
                        assert_eq!(b, c);
                    }
                })
            })
            .collect();

        for i in 0..200 {
            let config = if i % 2 == 0 { &new } else { &old };
            policy.reload(config).unwrap();
        }
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(policy.snapshot().generation(), 200);
    }
}

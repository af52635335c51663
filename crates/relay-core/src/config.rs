//! Configuration model for providers, routing rules and delegates
//!
//! Parsed from TOML. Role and task names are closed enums, so an unknown
//! name fails deserialization. Cross-reference checks live in
//! [`RelayConfig::validate`]; every failure is [`RelayError::ConfigInvalid`].

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::delegation::AgentStatus;
use crate::error::RelayError;
use crate::types::{AgentRole, TaskType};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    #[serde(default)]
    pub router: RouterSettings,
    #[serde(default)]
    pub delegation: DelegationSettings,
    pub providers: BTreeMap<String, ProviderConfig>,
    pub routing: RoutingSection,
    #[serde(default)]
    pub delegates: Vec<DelegateConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_high_utilization_threshold")]
    pub high_utilization_threshold: f64,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_history_capacity() -> usize {
    200
}
fn default_high_utilization_threshold() -> f64 {
    0.8
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            history_capacity: default_history_capacity(),
            high_utilization_threshold: default_high_utilization_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelegationSettings {
    #[serde(default = "default_true")]
    pub reasoning_enabled: bool,
    #[serde(default = "default_reasoning_role")]
    pub reasoning_role: AgentRole,
}

fn default_true() -> bool {
    true
}

fn default_reasoning_role() -> AgentRole {
    AgentRole::Supervisor
}

impl Default for DelegationSettings {
    fn default() -> Self {
        Self {
            reasoning_enabled: true,
            reasoning_role: default_reasoning_role(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub vendor: String,
    pub model: String,
    pub requests_per_minute: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default)]
    pub cost_per_1k_tokens_usd: f64,
    #[serde(default)]
    pub latency_ms_avg: u32,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: String,
}

fn default_window_seconds() -> u64 {
    60
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("vendor", &self.vendor)
            .field("model", &self.model)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("window_seconds", &self.window_seconds)
            .field("cost_per_1k_tokens_usd", &self.cost_per_1k_tokens_usd)
            .field("latency_ms_avg", &self.latency_ms_avg)
            .field("base_url", &self.base_url)
            .field("api_key", &mask_secret(&self.api_key))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingSection {
    pub universal_fallback: String,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// Ordered provider preference for a role, optionally narrowed to one task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub role: AgentRole,
    #[serde(default)]
    pub task: Option<TaskType>,
    pub providers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelegateConfig {
    pub agent_id: String,
    pub domain: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub status: AgentStatus,
}

/// Mask a secret for Debug output and logs: first 3 and last 4 chars of
/// longer keys, otherwise "***". Unexpanded `${VAR}` references pass through.
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    if s.starts_with("${") {
        return s.to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

impl RelayConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, RelayError> {
        let config: Self =
            toml::from_str(content).map_err(|e| RelayError::ConfigInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-reference checks the type system can't express
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.providers.is_empty() {
            return Err(invalid("at least one provider must be configured"));
        }
        for (id, provider) in &self.providers {
            validate_provider(id, provider)?;
        }

        if !self.providers.contains_key(&self.routing.universal_fallback) {
            return Err(invalid(format!(
                "universal fallback '{}' is not a configured provider",
                self.routing.universal_fallback
            )));
        }

        let mut keys = HashSet::new();
        for rule in &self.routing.rules {
            let label = rule_label(rule);
            if !keys.insert((rule.role, rule.task)) {
                return Err(invalid(format!("duplicate routing rule for {}", label)));
            }
            if rule.providers.is_empty() {
                return Err(invalid(format!("routing rule {} lists no providers", label)));
            }
            let mut seen = HashSet::new();
            for provider in &rule.providers {
                if !self.providers.contains_key(provider) {
                    return Err(invalid(format!(
                        "routing rule {} references unknown provider '{}'",
                        label, provider
                    )));
                }
                if !seen.insert(provider.as_str()) {
                    return Err(invalid(format!(
                        "routing rule {} lists provider '{}' twice",
                        label, provider
                    )));
                }
            }
        }

        if self.router.timeout_secs == 0 {
            return Err(invalid("router.timeout_secs must be greater than zero"));
        }
        if self.router.history_capacity == 0 {
            return Err(invalid("router.history_capacity must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.router.high_utilization_threshold) {
            return Err(invalid(
                "router.high_utilization_threshold must be between 0.0 and 1.0",
            ));
        }

        // delegate checks are shared with runtime registry mutations
        crate::delegation::DelegateTable::from_configs(&self.delegates)?;
        Ok(())
    }
}

fn validate_provider(id: &str, provider: &ProviderConfig) -> Result<(), RelayError> {
    if id.trim().is_empty() {
        return Err(invalid("provider ids must not be empty"));
    }
    if provider.model.trim().is_empty() {
        return Err(invalid(format!("provider '{}' has an empty model", id)));
    }
    if provider.requests_per_minute == 0 {
        return Err(invalid(format!(
            "provider '{}' must allow at least one request per window",
            id
        )));
    }
    if provider.window_seconds == 0 {
        return Err(invalid(format!(
            "provider '{}' window_seconds must be greater than zero",
            id
        )));
    }
    if provider.cost_per_1k_tokens_usd < 0.0 {
        return Err(invalid(format!("provider '{}' has a negative cost", id)));
    }
    if let Some(base_url) = &provider.base_url {
        url::Url::parse(base_url).map_err(|e| {
            invalid(format!(
                "provider '{}' base_url '{}' is not a valid URL: {}",
                id, base_url, e
            ))
        })?;
    }
    Ok(())
}

fn rule_label(rule: &RuleConfig) -> String {
    match rule.task {
        Some(task) => format!("{}/{}", rule.role, task),
        None => format!("{}/*", rule.role),
    }
}

fn invalid(msg: impl Into<String>) -> RelayError {
    RelayError::ConfigInvalid(msg.into())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
[router]
timeout_secs = 10

[providers.gemini_flash]
vendor = "gemini"
model = "google/gemini-2.5-flash"
requests_per_minute = 900
cost_per_1k_tokens_usd = 0.0002
latency_ms_avg = 400

[providers.groq_llama_70b]
vendor = "groq"
model = "llama3-70b-8192"
requests_per_minute = 30
cost_per_1k_tokens_usd = 0.0001
latency_ms_avg = 300
api_key = "${GROQ_API_KEY}"

[routing]
universal_fallback = "groq_llama_70b"

[[routing.rules]]
role = "supervisor"
providers = ["gemini_flash", "groq_llama_70b"]

[[routing.rules]]
role = "finance_agent"
providers = ["groq_llama_70b", "gemini_flash"]

[[routing.rules]]
role = "supervisor"
task = "delegation"
providers = ["groq_llama_70b"]

[[delegates]]
agent_id = "finance-agent"
domain = "finance"
keywords = ["stocks", "market", "investment"]
capabilities = ["finance"]
"#;

    #[test]
    fn test_parse_sample() {
        let config = RelayConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.routing.rules.len(), 3);
        assert_eq!(config.router.timeout_secs, 10);
        assert_eq!(config.router.max_tokens, 2000);
        assert_eq!(config.router.history_capacity, 200);
        assert!(config.delegation.reasoning_enabled);
        assert_eq!(config.delegation.reasoning_role, AgentRole::Supervisor);
        assert_eq!(config.providers["gemini_flash"].window_seconds, 60);
        assert_eq!(config.delegates[0].status, AgentStatus::Active);
        assert_eq!(config.routing.rules[2].task, Some(TaskType::Delegation));
    }

    fn expect_invalid(content: &str, needle: &str) {
        match RelayConfig::from_toml_str(content) {
            Err(RelayError::ConfigInvalid(msg)) => {
                assert!(msg.contains(needle), "'{}' not in '{}'", needle, msg)
            }
            other => panic!("expected ConfigInvalid, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unknown_role_rejected() {
        let content = SAMPLE.replace("role = \"finance_agent\"", "role = \"accountant\"");
        expect_invalid(&content, "accountant");
    }

    #[test]
    fn test_unknown_task_rejected() {
        let content = SAMPLE.replace("task = \"delegation\"", "task = \"chitchat\"");
        expect_invalid(&content, "chitchat");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let content = SAMPLE.replace("[router]", "[router]\nfallback_mode = \"queue\"");
        expect_invalid(&content, "fallback_mode");
    }

    #[test]
    fn test_unknown_provider_in_rule_rejected() {
        let content = SAMPLE.replace(
            "providers = [\"groq_llama_70b\"]",
            "providers = [\"claude\"]",
        );
        expect_invalid(&content, "unknown provider 'claude'");
    }

    #[test]
    fn test_unknown_universal_fallback_rejected() {
        let content = SAMPLE.replace(
            "universal_fallback = \"groq_llama_70b\"",
            "universal_fallback = \"nowhere\"",
        );
        expect_invalid(&content, "universal fallback 'nowhere'");
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let content = format!(
            "{}\n[[routing.rules]]\nrole = \"supervisor\"\nproviders = [\"gemini_flash\"]\n",
            SAMPLE.split("[[delegates]]").next().unwrap()
        );
        expect_invalid(&content, "duplicate routing rule for supervisor/*");
    }

    #[test]
    fn test_repeated_provider_in_rule_rejected() {
        let content = SAMPLE.replace(
            "providers = [\"groq_llama_70b\"]",
            "providers = [\"groq_llama_70b\", \"groq_llama_70b\"]",
        );
        expect_invalid(&content, "twice");
    }

    #[test]
    fn test_zero_rpm_rejected() {
        let content = SAMPLE.replace("requests_per_minute = 30", "requests_per_minute = 0");
        expect_invalid(&content, "groq_llama_70b");
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let content = SAMPLE.replace(
            "latency_ms_avg = 400",
            "latency_ms_avg = 400\nbase_url = \"not a url\"",
        );
        expect_invalid(&content, "not a valid URL");
    }

    #[test]
    fn test_duplicate_domain_rejected() {
        let content = format!(
            "{}\n[[delegates]]\nagent_id = \"other-finance\"\ndomain = \"finance\"\n",
            SAMPLE
        );
        expect_invalid(&content, "domain 'finance'");
    }

    #[test]
    fn test_debug_masks_api_key() {
        let provider = ProviderConfig {
            vendor: "groq".to_string(),
            model: "llama".to_string(),
            requests_per_minute: 1,
            window_seconds: 60,
            cost_per_1k_tokens_usd: 0.0,
            latency_ms_avg: 0,
            base_url: None,
            api_key: "gsk_secret".to_string(),
        };
        let debug = format!("{:?}", provider);
        assert!(!debug.contains("gsk_secret"));
        assert!(debug.contains("gsk...cret"));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(empty)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("${GROQ_API_KEY}"), "${GROQ_API_KEY}");
        assert_eq!(mask_secret("sk-or-v1-abcdef"), "sk-...cdef");
    }
}

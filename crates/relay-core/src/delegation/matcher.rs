//! Domain delegation matcher
//!
//! Decides whether a supervisor answers a query itself or hands it to a
//! specialist. Two tiers run as an explicit state machine:
//!
//! ```text
//! Start -> ReasoningAttempted -> Delegated
//!                             -> KeywordFallback -> Delegated | Direct
//! ```
//!
//! The reasoning tier asks a model (through the router) to name an agent.
//! Any failure there is soft and drops to keyword matching.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::router::{RouteRequest, Router};
use crate::types::{AgentRole, TaskType};

use super::registry::{DelegateEntry, DelegateRegistry, DelegateTable};

/// Lowercase and split on anything that isn't a letter or digit
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Light plural stemming: `companies`->`company`, `taxes`->`tax`, `stocks`->`stock`.
///
/// `es` is only dropped after `ss`, `x`, `z`, `ch` and `sh`, so `houses` and
/// `house` meet at `house`. Plurals like `buses` stem to `buse` and miss `bus`.
pub fn stem(token: &str) -> String {
    if token.len() > 3 && token.ends_with("ies") {
        return format!("{}y", &token[..token.len() - 3]);
    }
    for suffix in ["sses", "xes", "zes", "ches", "shes"] {
        if token.len() > suffix.len() && token.ends_with(suffix) {
            return token[..token.len() - 2].to_string();
        }
    }
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        return token[..token.len() - 1].to_string();
    }
    token.to_string()
}

/// Stem sequence for a keyword; multi-word keywords keep their word order
pub(crate) fn keyword_stems(keyword: &str) -> Vec<String> {
    tokenize(keyword).iter().map(|t| stem(t)).collect()
}

fn contains_run(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchTier {
    Reasoning,
    Keyword,
}

/// What the reasoning tier concluded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "verdict", content = "detail")]
pub enum ReasoningVerdict {
    Selected(String),
    NoMatch,
    Failed(String),
    Skipped,
    Unparseable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum DecisionState {
    Start,
    ReasoningAttempted { verdict: ReasoningVerdict },
    KeywordFallback,
    Delegated { agent_id: String, tier: MatchTier },
    Direct,
}

impl DecisionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delegated { .. } | Self::Direct)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "agent_id")]
pub enum DelegationTarget {
    Delegate(String),
    Direct,
}

#[derive(Debug, Clone, Serialize)]
pub struct DelegationDecision {
    pub target: DelegationTarget,
    /// Every state visited, `Start` first, terminal state last
    pub trace: Vec<DecisionState>,
}

/// Model-backed intent classification: returns the raw reply text
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, prompt: &str, cancel: &CancellationToken) -> Result<String>;
}

/// Classifier that goes through the router under a fixed role
pub struct RoutedClassifier {
    router: Arc<Router>,
    role: AgentRole,
}

impl RoutedClassifier {
    pub fn new(router: Arc<Router>, role: AgentRole) -> Self {
        Self { router, role }
    }
}

#[async_trait]
impl IntentClassifier for RoutedClassifier {
    async fn classify(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        let request = RouteRequest::new(self.role, TaskType::Delegation, prompt)
            .with_temperature(0.0)
            .with_max_tokens(50);
        let outcome = self.router.route(&request, cancel).await?;
        Ok(outcome.text)
    }
}

pub struct DelegationMatcher {
    registry: Arc<DelegateRegistry>,
    classifier: Option<Arc<dyn IntentClassifier>>,
    reasoning_enabled: bool,
}

impl DelegationMatcher {
    pub fn new(registry: Arc<DelegateRegistry>) -> Self {
        Self {
            registry,
            classifier: None,
            reasoning_enabled: true,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_reasoning(mut self, enabled: bool) -> Self {
        self.reasoning_enabled = enabled;
        self
    }

    /// Pick a delegate for `query`, or `Direct`.
    ///
    /// `capability`, when given, must be advertised by the chosen delegate.
    /// A tier that lands on an ineligible delegate ends at `Direct`.
    pub async fn decide(
        &self,
        query: &str,
        capability: Option<&str>,
        cancel: &CancellationToken,
    ) -> DelegationDecision {
        let table = self.registry.snapshot();
        let mut state = DecisionState::Start;
        let mut trace = vec![state.clone()];

        while !state.is_terminal() {
            state = match state {
                DecisionState::Start => DecisionState::ReasoningAttempted {
                    verdict: self.reasoning_tier(query, capability, &table, cancel).await,
                },
                DecisionState::ReasoningAttempted {
                    verdict: ReasoningVerdict::Selected(agent_id),
                } => settle(&table, &agent_id, capability, MatchTier::Reasoning),
                DecisionState::ReasoningAttempted { .. } => DecisionState::KeywordFallback,
                DecisionState::KeywordFallback => match keyword_match(query, &table) {
                    Some(entry) => settle(&table, &entry.agent_id, capability, MatchTier::Keyword),
                    None => {
                        debug!("No delegate keyword overlap, answering directly");
                        DecisionState::Direct
                    }
                },
                terminal => terminal,
            };
            trace.push(state.clone());
        }

        let target = match &state {
            DecisionState::Delegated { agent_id, tier } => {
                info!("Delegating query to {} via {:?} tier", agent_id, tier);
                DelegationTarget::Delegate(agent_id.clone())
            }
            _ => DelegationTarget::Direct,
        };
        DelegationDecision { target, trace }
    }

    async fn reasoning_tier(
        &self,
        query: &str,
        capability: Option<&str>,
        table: &DelegateTable,
        cancel: &CancellationToken,
    ) -> ReasoningVerdict {
        let Some(classifier) = self.classifier.as_ref().filter(|_| self.reasoning_enabled) else {
            return ReasoningVerdict::Skipped;
        };
        let candidates = table.eligible(capability);
        if candidates.is_empty() {
            return ReasoningVerdict::Skipped;
        }

        let prompt = classification_prompt(query, &candidates);
        match classifier.classify(&prompt, cancel).await {
            Ok(reply) => {
                let verdict = parse_reply(&reply, table);
                debug!("Reasoning tier verdict: {:?}", verdict);
                verdict
            }
            Err(e) => {
                debug!("Reasoning tier failed, using keywords: {:#}", e);
                ReasoningVerdict::Failed(format!("{:#}", e))
            }
        }
    }
}

fn classification_prompt(query: &str, candidates: &[&DelegateEntry]) -> String {
    let agents = candidates
        .iter()
        .map(|e| {
            if e.keywords.is_empty() {
                format!("- {}: {}", e.agent_id, e.domain)
            } else {
                format!("- {}: {} ({})", e.agent_id, e.domain, e.keywords.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Pick the agent best suited to handle this query. Respond with ONLY the agent id, \
         or NONE if no agent fits.\n\n\
         Agents:\n{}\n\n\
         Query: {}\n\nAgent:",
        agents, query
    )
}

/// Split a reply into id-shaped words: letters, digits, `-` and `_`
fn reply_words(reply: &str) -> Vec<String> {
    reply
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .map(|w| w.trim_matches(|c| c == '-' || c == '_'))
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

/// Interpret a classifier reply against every registered agent id
fn parse_reply(reply: &str, table: &DelegateTable) -> ReasoningVerdict {
    let words = reply_words(reply);
    if words.first().is_some_and(|w| w == "none") {
        return ReasoningVerdict::NoMatch;
    }
    let cleaned = reply
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .to_lowercase();
    if let Some(entry) = table.get(&cleaned) {
        return ReasoningVerdict::Selected(entry.agent_id.clone());
    }

    let mentioned: Vec<&DelegateEntry> = table
        .entries()
        .iter()
        .filter(|e| {
            let id = e.agent_id.to_lowercase();
            words.iter().any(|w| *w == id)
        })
        .collect();
    match mentioned.as_slice() {
        [only] => ReasoningVerdict::Selected(only.agent_id.clone()),
        _ => ReasoningVerdict::Unparseable(reply.trim().to_string()),
    }
}

/// Highest keyword overlap; the first entry in tie-break order wins a tie
fn keyword_match<'a>(query: &str, table: &'a DelegateTable) -> Option<&'a DelegateEntry> {
    let stems: Vec<String> = tokenize(query).iter().map(|t| stem(t)).collect();
    let mut best: Option<(&DelegateEntry, usize)> = None;
    for entry in table.entries() {
        let overlap = entry
            .keyword_stems()
            .iter()
            .filter(|kw| contains_run(&stems, kw))
            .count();
        if overlap > 0 && best.is_none_or(|(_, top)| overlap > top) {
            best = Some((entry, overlap));
        }
    }
    best.map(|(entry, overlap)| {
        debug!(
            "Keyword tier matched {} (overlap {})",
            entry.agent_id, overlap
        );
        entry
    })
}

fn settle(
    table: &DelegateTable,
    agent_id: &str,
    capability: Option<&str>,
    tier: MatchTier,
) -> DecisionState {
    match table.get(agent_id) {
        Some(entry) if entry.is_eligible(capability) => DecisionState::Delegated {
            agent_id: entry.agent_id.clone(),
            tier,
        },
        Some(entry) => {
            debug!(
                "Delegate {} is not eligible (status {}), answering directly",
                entry.agent_id, entry.status
            );
            DecisionState::Direct
        }
        None => DecisionState::Direct,
    }
}

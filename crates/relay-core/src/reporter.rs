//! Read-only reporting over rate windows, routing policy and decision history

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::history::{DecisionLog, DecisionOutcome, RoutingDecision};
use crate::policy::{PolicyRule, RoutingPolicy};
use crate::rate_tracker::RateTracker;
use crate::types::ProviderId;

/// Current window usage of one provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderUtilization {
    pub provider: ProviderId,
    pub vendor: String,
    pub model: String,
    pub current_count: usize,
    pub limit: u32,
    pub window_seconds: u64,
    pub utilization_percent: f64,
    pub cost_per_1k_tokens_usd: f64,
    pub latency_ms_avg: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning (high utilization)"),
            Self::Degraded => write!(f, "degraded (some providers saturated)"),
            Self::Critical => write!(f, "CRITICAL (all providers saturated)"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutingHealth {
    pub status: HealthStatus,
    /// Below 100% utilization, including high ones
    pub healthy: Vec<ProviderId>,
    /// At or above 100% utilization
    pub saturated: Vec<ProviderId>,
    /// At or above the threshold but not saturated
    pub high_utilization: Vec<ProviderId>,
    pub total_providers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutingStats {
    pub timestamp: DateTime<Utc>,
    /// Requests currently counted in windows, summed over providers
    pub requests_in_window: usize,
    /// Decisions held in the history buffer
    pub decisions: usize,
    /// Share of successful decisions served by a fallback
    pub fallback_rate: f64,
    /// Share of decisions that ended in success
    pub success_rate: f64,
    pub providers: Vec<ProviderUtilization>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyListing {
    pub generation: u64,
    pub universal_fallback: ProviderId,
    pub rules: Vec<PolicyRule>,
}

pub struct UtilizationReporter {
    policy: Arc<RoutingPolicy>,
    tracker: Arc<RateTracker>,
    history: Arc<DecisionLog>,
}

impl UtilizationReporter {
    pub fn new(
        policy: Arc<RoutingPolicy>,
        tracker: Arc<RateTracker>,
        history: Arc<DecisionLog>,
    ) -> Self {
        Self {
            policy,
            tracker,
            history,
        }
    }

    /// Every configured provider, in id order
    pub fn utilization(&self) -> Vec<ProviderUtilization> {
        let table = self.policy.snapshot();
        table
            .providers()
            .map(|spec| {
                let usage = self.tracker.utilization(&spec.id, spec.limit);
                ProviderUtilization {
                    provider: spec.id.clone(),
                    vendor: spec.vendor.clone(),
                    model: spec.model.clone(),
                    current_count: usage.count,
                    limit: usage.limit,
                    window_seconds: spec.limit.window.as_secs(),
                    utilization_percent: usage.percent(),
                    cost_per_1k_tokens_usd: spec.cost_per_1k_tokens_usd,
                    latency_ms_avg: spec.latency_ms_avg,
                }
            })
            .collect()
    }

    pub fn provider(&self, id: &ProviderId) -> Option<ProviderUtilization> {
        self.utilization().into_iter().find(|u| &u.provider == id)
    }

    /// Newest first
    pub fn recent_decisions(&self, limit: usize) -> Vec<RoutingDecision> {
        self.history.recent(limit)
    }

    /// Classify providers against `threshold` (0.0-1.0)
    pub fn health(&self, threshold: f64) -> RoutingHealth {
        let mut health = RoutingHealth {
            status: HealthStatus::Healthy,
            healthy: Vec::new(),
            saturated: Vec::new(),
            high_utilization: Vec::new(),
            total_providers: 0,
        };

        for u in self.utilization() {
            health.total_providers += 1;
            let ratio = u.utilization_percent / 100.0;
            if ratio >= 1.0 {
                health.saturated.push(u.provider);
            } else {
                if ratio >= threshold {
                    health.high_utilization.push(u.provider.clone());
                }
                health.healthy.push(u.provider);
            }
        }

        health.status = if health.total_providers > 0
            && health.saturated.len() == health.total_providers
        {
            HealthStatus::Critical
        } else if !health.saturated.is_empty() {
            HealthStatus::Degraded
        } else if !health.high_utilization.is_empty() {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };
        health
    }

    pub fn stats(&self) -> RoutingStats {
        let providers = self.utilization();
        let decisions = self.history.recent(self.history.capacity());

        let successes: Vec<_> = decisions
            .iter()
            .filter(|d| d.outcome == DecisionOutcome::Success)
            .collect();
        let fallbacks = successes.iter().filter(|d| d.is_fallback()).count();

        RoutingStats {
            timestamp: Utc::now(),
            requests_in_window: providers.iter().map(|p| p.current_count).sum(),
            decisions: decisions.len(),
            fallback_rate: ratio(fallbacks, successes.len()),
            success_rate: ratio(successes.len(), decisions.len()),
            providers,
        }
    }

    pub fn policies(&self) -> PolicyListing {
        let table = self.policy.snapshot();
        PolicyListing {
            generation: table.generation(),
            universal_fallback: table.universal_fallback().clone(),
            rules: table.rules(),
        }
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Render a markdown report for operators
pub fn format_report(stats: &RoutingStats, health: &RoutingHealth) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "## Routing Report ({})\n\n",
        stats.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!("**Health:** {}\n", health.status));
    out.push_str(&format!(
        "**Requests in window:** {}\n",
        stats.requests_in_window
    ));
    out.push_str(&format!("**Recent decisions:** {}\n", stats.decisions));
    out.push_str(&format!(
        "**Success rate:** {:.1}%\n",
        stats.success_rate * 100.0
    ));
    out.push_str(&format!(
        "**Fallback rate:** {:.1}%\n\n",
        stats.fallback_rate * 100.0
    ));

    if !stats.providers.is_empty() {
        out.push_str("### Providers\n\n");
        out.push_str("| Provider | Model | Used | Limit | Utilization | Cost/1k |\n");
        out.push_str("|----------|-------|------|-------|-------------|---------|\n");
        for p in &stats.providers {
            out.push_str(&format!(
                "| {} | {} | {} | {}/{}s | {:.1}% | ${:.4} |\n",
                p.provider,
                p.model,
                p.current_count,
                p.limit,
                p.window_seconds,
                p.utilization_percent,
                p.cost_per_1k_tokens_usd
            ));
        }
        out.push('\n');
    }

    if !health.saturated.is_empty() {
        let ids: Vec<_> = health.saturated.iter().map(|p| p.to_string()).collect();
        out.push_str(&format!("**Saturated:** {}\n", ids.join(", ")));
    }
    if !health.high_utilization.is_empty() {
        let ids: Vec<_> = health
            .high_utilization
            .iter()
            .map(|p| p.to_string())
            .collect();
        out.push_str(&format!("**High utilization:** {}\n", ids.join(", ")));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::router::tests::abc_config;
    use crate::types::{AgentRole, RateLimit, TaskType};
    use std::time::Duration;

    struct Setup {
        reporter: UtilizationReporter,
        tracker: Arc<RateTracker>,
        history: Arc<DecisionLog>,
        clock: Arc<ManualClock>,
    }

    fn setup(limits: [u32; 3]) -> Setup {
        let policy = Arc::new(RoutingPolicy::from_config(&abc_config(limits)).unwrap());
        let clock = Arc::new(ManualClock::new());
        let tracker = Arc::new(RateTracker::with_clock(clock.clone()));
        let history = Arc::new(DecisionLog::new(50));
        let reporter =
            UtilizationReporter::new(policy, Arc::clone(&tracker), Arc::clone(&history));
        Setup {
            reporter,
            tracker,
            history,
            clock,
        }
    }

    fn fill(tracker: &RateTracker, id: &str, n: u32, limit: u32) {
        for _ in 0..n {
            tracker.try_acquire(&ProviderId::from(id), RateLimit::per_minute(limit));
        }
    }

    #[test]
    fn test_utilization_lists_every_provider() {
        let s = setup([4, 10, 10]);
        fill(&s.tracker, "a", 3, 4);

        let all = s.reporter.utilization();
        assert_eq!(all.len(), 3);
        let a = s.reporter.provider(&ProviderId::from("a")).unwrap();
        assert_eq!(a.current_count, 3);
        assert_eq!(a.limit, 4);
        assert!((a.utilization_percent - 75.0).abs() < 1e-9);
        assert_eq!(a.model, "model-a");
        assert_eq!(s.reporter.provider(&ProviderId::from("b")).unwrap().current_count, 0);
        assert!(s.reporter.provider(&ProviderId::from("zzz")).is_none());
    }

    #[test]
    fn test_utilization_decays_with_time() {
        let s = setup([4, 10, 10]);
        fill(&s.tracker, "a", 4, 4);
        s.clock.advance(Duration::from_secs(60));
        assert_eq!(
            s.reporter.provider(&ProviderId::from("a")).unwrap().current_count,
            0
        );
    }

    #[test]
    fn test_health_levels() {
        let s = setup([2, 10, 10]);
        assert_eq!(s.reporter.health(0.8).status, HealthStatus::Healthy);

        fill(&s.tracker, "b", 8, 10);
        let health = s.reporter.health(0.8);
        assert_eq!(health.status, HealthStatus::Warning);
        assert_eq!(health.high_utilization, vec![ProviderId::from("b")]);
        assert_eq!(health.healthy.len(), 3);

        fill(&s.tracker, "a", 2, 2);
        let health = s.reporter.health(0.8);
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.saturated, vec![ProviderId::from("a")]);

        fill(&s.tracker, "b", 2, 10);
        fill(&s.tracker, "c", 10, 10);
        let health = s.reporter.health(0.8);
        assert_eq!(health.status, HealthStatus::Critical);
        assert!(health.healthy.is_empty());
        assert_eq!(health.total_providers, 3);
    }

    #[test]
    fn test_stats_rates() {
        let s = setup([10, 10, 10]);
        fill(&s.tracker, "a", 3, 10);
        fill(&s.tracker, "c", 1, 10);

        let ok = |depth| {
            RoutingDecision::new(AgentRole::Supervisor, TaskType::Reasoning, DecisionOutcome::Success)
                .with_provider(ProviderId::from("a"), depth)
        };
        s.history.record(ok(0));
        s.history.record(ok(0));
        s.history.record(ok(1));
        s.history.record(RoutingDecision::new(
            AgentRole::Supervisor,
            TaskType::Reasoning,
            DecisionOutcome::Exhausted,
        ));

        let stats = s.reporter.stats();
        assert_eq!(stats.requests_in_window, 4);
        assert_eq!(stats.decisions, 4);
        assert!((stats.success_rate - 0.75).abs() < 1e-9);
        assert!((stats.fallback_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_stats_with_no_history() {
        let s = setup([10, 10, 10]);
        let stats = s.reporter.stats();
        assert_eq!(stats.decisions, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.fallback_rate, 0.0);
    }

    #[test]
    fn test_policies_listing() {
        let s = setup([1, 1, 1]);
        let listing = s.reporter.policies();
        assert_eq!(listing.universal_fallback, ProviderId::from("c"));
        assert_eq!(listing.rules.len(), 1);
        assert_eq!(listing.rules[0].providers.len(), 3);
        assert_eq!(listing.generation, 0);
    }

    #[test]
    fn test_format_report() {
        let s = setup([2, 10, 10]);
        fill(&s.tracker, "a", 2, 2);
        let report = format_report(&s.reporter.stats(), &s.reporter.health(0.8));
        assert!(report.contains("## Routing Report"));
        assert!(report.contains("degraded"));
        assert!(report.contains("| a | model-a | 2 | 2/60s | 100.0% |"));
        assert!(report.contains("**Saturated:** a"));
    }
}

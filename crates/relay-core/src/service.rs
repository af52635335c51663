//! Wiring for the routing core: one owner for the policy, rate tracker,
//! decision log, delegate registry, router, matcher and reporter

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::RelayConfig;
use crate::delegation::{
    DelegateRegistry, DelegateTable, DelegationDecision, DelegationMatcher, RoutedClassifier,
};
use crate::error::RelayError;
use crate::history::DecisionLog;
use crate::policy::{RoutingPolicy, RoutingTable};
use crate::providers::ProviderAdapter;
use crate::rate_tracker::RateTracker;
use crate::reporter::{RoutingHealth, UtilizationReporter};
use crate::router::{RouteOutcome, RouteRequest, Router};

/// Generations installed by a successful [`RelayService::reload`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadSummary {
    pub routing_generation: u64,
    pub delegate_generation: u64,
}

pub struct RelayService {
    policy: Arc<RoutingPolicy>,
    tracker: Arc<RateTracker>,
    history: Arc<DecisionLog>,
    registry: Arc<DelegateRegistry>,
    router: Arc<Router>,
    adapter: Arc<dyn ProviderAdapter>,
    matcher: DelegationMatcher,
    reporter: UtilizationReporter,
    high_utilization_threshold: f64,
}

impl RelayService {
    pub fn from_config(
        config: &RelayConfig,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Result<Self, RelayError> {
        Self::with_clock(config, adapter, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &RelayConfig,
        adapter: Arc<dyn ProviderAdapter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RelayError> {
        let policy = Arc::new(RoutingPolicy::from_config(config)?);
        let registry = Arc::new(DelegateRegistry::from_configs(&config.delegates)?);
        let tracker = Arc::new(RateTracker::with_clock(clock));
        let history = Arc::new(DecisionLog::new(config.router.history_capacity));

        let router = Arc::new(Router::new(
            Arc::clone(&policy),
            Arc::clone(&tracker),
            Arc::clone(&adapter),
            Arc::clone(&history),
            &config.router,
        ));

        let classifier = Arc::new(RoutedClassifier::new(
            Arc::clone(&router),
            config.delegation.reasoning_role,
        ));
        let matcher = DelegationMatcher::new(Arc::clone(&registry))
            .with_classifier(classifier)
            .with_reasoning(config.delegation.reasoning_enabled);
        let reporter = UtilizationReporter::new(
            Arc::clone(&policy),
            Arc::clone(&tracker),
            Arc::clone(&history),
        );

        info!(
            "Relay service ready ({} providers, {} rules, {} delegates)",
            config.providers.len(),
            config.routing.rules.len(),
            config.delegates.len()
        );

        Ok(Self {
            policy,
            tracker,
            history,
            registry,
            router,
            adapter,
            matcher,
            reporter,
            high_utilization_threshold: config.router.high_utilization_threshold,
        })
    }

    pub async fn route(
        &self,
        request: &RouteRequest,
        cancel: &CancellationToken,
    ) -> Result<RouteOutcome, RelayError> {
        self.router.route(request, cancel).await
    }

    pub async fn delegate(
        &self,
        query: &str,
        capability: Option<&str>,
        cancel: &CancellationToken,
    ) -> DelegationDecision {
        self.matcher.decide(query, capability, cancel).await
    }

    /// Swap in new routing and delegate tables. Both tables and the
    /// adapter's provider endpoints are checked before either table is
    /// installed; on error neither changes. Rate windows and history carry
    /// over.
    pub fn reload(&self, config: &RelayConfig) -> Result<ReloadSummary, RelayError> {
        let built = RoutingTable::from_config(config)
            .and_then(|routing| Ok((routing, DelegateTable::from_configs(&config.delegates)?)));
        let (routing, delegates) = match built {
            Ok(tables) => tables,
            Err(e) => {
                warn!("Rejected configuration reload: {}", e);
                return Err(e);
            }
        };
        if let Err(e) = self.adapter.reload(config) {
            warn!("Rejected configuration reload: provider endpoints: {:#}", e);
            return Err(RelayError::ConfigInvalid(format!(
                "provider endpoints: {:#}",
                e
            )));
        }

        let summary = ReloadSummary {
            routing_generation: self.policy.swap(routing),
            delegate_generation: self.registry.replace(delegates),
        };
        info!(
            "Configuration reloaded (routing generation {}, delegate generation {})",
            summary.routing_generation, summary.delegate_generation
        );
        Ok(summary)
    }

    pub fn health(&self) -> RoutingHealth {
        self.reporter.health(self.high_utilization_threshold)
    }

    pub fn policy(&self) -> &Arc<RoutingPolicy> {
        &self.policy
    }

    pub fn tracker(&self) -> &Arc<RateTracker> {
        &self.tracker
    }

    pub fn history(&self) -> &Arc<DecisionLog> {
        &self.history
    }

    pub fn registry(&self) -> &Arc<DelegateRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn reporter(&self) -> &UtilizationReporter {
        &self.reporter
    }
}

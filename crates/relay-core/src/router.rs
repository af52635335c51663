//! Router: ordered fallback across candidate providers under rate budgets
//!
//! Candidates come from the routing policy and are tried strictly in order.
//! A candidate over budget is skipped without a call. A failed call keeps its
//! budget slot spent and the next candidate is tried. The first success wins.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RouterSettings;
use crate::error::{Attempt, AttemptFailure, RelayError};
use crate::history::{DecisionLog, DecisionOutcome, RoutingDecision};
use crate::policy::RoutingPolicy;
use crate::providers::ProviderAdapter;
use crate::rate_tracker::RateTracker;
use crate::types::{AgentRole, ProviderId, RateLimit, TaskType};

/// A generation request tagged with the caller's role and task
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub role: AgentRole,
    pub task: TaskType,
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Replaces each candidate's request count for this call; the
    /// configured window still applies
    pub limit_override: Option<u32>,
}

impl RouteRequest {
    pub fn new(role: AgentRole, task: TaskType, prompt: impl Into<String>) -> Self {
        Self {
            role,
            task,
            prompt: prompt.into(),
            max_tokens: None,
            temperature: None,
            limit_override: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_limit(mut self, requests: u32) -> Self {
        self.limit_override = Some(requests);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub text: String,
    pub provider: ProviderId,
    /// Index of `provider` in the candidate list
    pub fallback_depth: usize,
    pub latency: Duration,
}

impl RouteOutcome {
    pub fn is_fallback(&self) -> bool {
        self.fallback_depth > 0
    }
}

pub struct Router {
    policy: Arc<RoutingPolicy>,
    tracker: Arc<RateTracker>,
    adapter: Arc<dyn ProviderAdapter>,
    history: Arc<DecisionLog>,
    timeout: Duration,
    max_tokens: u32,
    temperature: f32,
}

impl Router {
    pub fn new(
        policy: Arc<RoutingPolicy>,
        tracker: Arc<RateTracker>,
        adapter: Arc<dyn ProviderAdapter>,
        history: Arc<DecisionLog>,
        settings: &RouterSettings,
    ) -> Self {
        Self {
            policy,
            tracker,
            adapter,
            history,
            timeout: Duration::from_secs(settings.timeout_secs),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    /// Override the per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fulfil `request` with the first candidate that has budget and succeeds
    pub async fn route(
        &self,
        request: &RouteRequest,
        cancel: &CancellationToken,
    ) -> Result<RouteOutcome, RelayError> {
        let started = Instant::now();
        let table = self.policy.snapshot();
        let candidates = table.candidates(request.role, request.task);
        let max_tokens = request.max_tokens.unwrap_or(self.max_tokens);
        let temperature = request.temperature.unwrap_or(self.temperature);
        let mut attempts: Vec<Attempt> = Vec::new();

        for (idx, provider) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(self.cancelled(request, attempts, started));
            }

            let Some(spec) = table.provider(provider) else {
                warn!("Candidate {} has no provider definition, skipping", provider);
                attempts.push(Attempt {
                    provider: provider.clone(),
                    failure: AttemptFailure::Unconfigured,
                });
                continue;
            };

            let limit = RateLimit {
                requests: request.limit_override.unwrap_or(spec.limit.requests),
                window: spec.limit.window,
            };
            if !self.tracker.try_acquire(provider, limit) {
                debug!(
                    "Provider {} over budget for {}/{}, skipping",
                    provider, request.role, request.task
                );
                attempts.push(Attempt {
                    provider: provider.clone(),
                    failure: AttemptFailure::BudgetExhausted,
                });
                continue;
            }

            debug!(
                "Trying provider {} ({}) for {}/{} (attempt {}/{})",
                provider,
                spec.model,
                request.role,
                request.task,
                idx + 1,
                candidates.len()
            );

            let call = self
                .adapter
                .generate(provider, &request.prompt, max_tokens, temperature);
            let result = tokio::select! {
                _ = cancel.cancelled() => None,
                r = tokio::time::timeout(self.timeout, call) => Some(r),
            };
            let Some(result) = result else {
                info!("Abandoned in-flight call to {} on cancellation", provider);
                return Err(self.cancelled(request, attempts, started));
            };

            match result {
                Ok(Ok(text)) => {
                    let latency = started.elapsed();
                    if idx > 0 {
                        info!(
                            "Request for {}/{} succeeded on fallback provider {} (depth {})",
                            request.role, request.task, provider, idx
                        );
                    }
                    self.history.record(
                        RoutingDecision::new(request.role, request.task, DecisionOutcome::Success)
                            .with_provider(provider.clone(), idx)
                            .with_latency_ms(latency.as_millis() as u64)
                            .with_attempts(&attempts),
                    );
                    return Ok(RouteOutcome {
                        text,
                        provider: provider.clone(),
                        fallback_depth: idx,
                        latency,
                    });
                }
                Ok(Err(e)) => {
                    warn!(
                        "Provider {} failed (attempt {}/{}): {:#}",
                        provider,
                        idx + 1,
                        candidates.len(),
                        e
                    );
                    attempts.push(Attempt {
                        provider: provider.clone(),
                        failure: AttemptFailure::ProviderError(format!("{:#}", e)),
                    });
                }
                Err(_) => {
                    warn!(
                        "Provider {} timed out after {:?} (attempt {}/{})",
                        provider,
                        self.timeout,
                        idx + 1,
                        candidates.len()
                    );
                    attempts.push(Attempt {
                        provider: provider.clone(),
                        failure: AttemptFailure::TimedOut(self.timeout),
                    });
                }
            }
        }

        let err = RelayError::RoutingExhausted {
            role: request.role,
            task: request.task,
            attempts,
        };
        error!("{}", err);
        self.history.record(
            RoutingDecision::new(request.role, request.task, DecisionOutcome::Exhausted)
                .with_latency_ms(started.elapsed().as_millis() as u64)
                .with_attempts(err.attempts()),
        );
        Err(err)
    }

    fn cancelled(
        &self,
        request: &RouteRequest,
        attempts: Vec<Attempt>,
        started: Instant,
    ) -> RelayError {
        self.history.record(
            RoutingDecision::new(request.role, request.task, DecisionOutcome::Cancelled)
                .with_latency_ms(started.elapsed().as_millis() as u64)
                .with_attempts(&attempts),
        );
        RelayError::Cancelled {
            role: request.role,
            task: request.task,
            attempts,
        }
    }
}

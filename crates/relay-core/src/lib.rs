//! relay-core - Capacity-aware model routing and agent delegation
//!
//! This crate provides:
//! - Sliding-window rate tracking per provider
//! - A reloadable (role, task) -> provider routing policy
//! - A router with ordered fallback, timeouts and cancellation
//! - A two-tier delegation matcher (model classification, then keywords)
//! - Read-only utilization, health and decision reporting

pub mod clock;
pub mod config;
pub mod delegation;
pub mod error;
pub mod history;
pub mod policy;
pub mod providers;
pub mod rate_tracker;
pub mod reporter;
pub mod router;
pub mod service;
pub mod types;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RelayConfig;
pub use delegation::{
    AgentStatus, DecisionState, DelegateRegistry, DelegationDecision, DelegationMatcher,
    DelegationTarget,
};
pub use error::{Attempt, AttemptFailure, RelayError};
pub use history::{DecisionLog, DecisionOutcome, RoutingDecision};
pub use policy::{RoutingPolicy, RoutingTable};
pub use providers::{OpenAiCompatAdapter, ProviderAdapter};
pub use rate_tracker::RateTracker;
pub use reporter::{HealthStatus, RoutingHealth, RoutingStats, UtilizationReporter, format_report};
pub use router::{RouteOutcome, RouteRequest, Router};
pub use service::{RelayService, ReloadSummary};
pub use types::{AgentRole, ProviderId, RateLimit, TaskType};

//! Bounded in-memory history of routing decisions

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::Attempt;
use crate::types::{AgentRole, ProviderId, TaskType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionOutcome {
    Success,
    Exhausted,
    Cancelled,
}

/// One `route` call as seen by operators
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: AgentRole,
    pub task: TaskType,
    /// Provider that produced the text, if any
    pub provider: Option<ProviderId>,
    /// 0 for the primary candidate, n for the n-th fallback
    pub fallback_depth: Option<usize>,
    pub latency_ms: u64,
    /// Skipped candidates, formatted as `provider:reason`
    pub attempts: Vec<String>,
    pub outcome: DecisionOutcome,
}

impl RoutingDecision {
    pub fn new(role: AgentRole, task: TaskType, outcome: DecisionOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role,
            task,
            provider: None,
            fallback_depth: None,
            latency_ms: 0,
            attempts: Vec::new(),
            outcome,
        }
    }

    pub fn with_provider(mut self, provider: ProviderId, fallback_depth: usize) -> Self {
        self.provider = Some(provider);
        self.fallback_depth = Some(fallback_depth);
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_attempts(mut self, attempts: &[Attempt]) -> Self {
        self.attempts = attempts.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback_depth.is_some_and(|d| d > 0)
    }
}

/// Ring buffer; the oldest decision is evicted once `capacity` is reached
pub struct DecisionLog {
    capacity: usize,
    entries: Mutex<VecDeque<RoutingDecision>>,
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, decision: RoutingDecision) {
        let mut entries = self.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(decision);
    }

    /// Up to `limit` decisions, newest first
    pub fn recent(&self, limit: usize) -> Vec<RoutingDecision> {
        self.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<RoutingDecision>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("Decision log mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

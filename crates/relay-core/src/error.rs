//! Error taxonomy for routing, delegation and configuration

use std::time::Duration;

use thiserror::Error;

use crate::types::{AgentRole, ProviderId, TaskType};

/// Why a single candidate was skipped during one `route` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// Provider had no budget left in its window; no call was made
    BudgetExhausted,
    /// Transport error, non-success status, or malformed reply from the adapter
    ProviderError(String),
    /// Adapter call did not finish within the router timeout
    TimedOut(Duration),
    /// Candidate has no provider definition in the active table
    Unconfigured,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BudgetExhausted => write!(f, "BudgetExhausted"),
            Self::ProviderError(msg) => write!(f, "ProviderError ({})", msg),
            Self::TimedOut(after) => write!(f, "TimedOut ({}ms)", after.as_millis()),
            Self::Unconfigured => write!(f, "Unconfigured"),
        }
    }
}

/// One candidate tried during a `route` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub provider: ProviderId,
    pub failure: AttemptFailure,
}

impl std::fmt::Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.failure)
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    /// Every candidate was over budget or failed
    #[error("routing exhausted for {role}/{task}: {}", join_attempts(.attempts))]
    RoutingExhausted {
        role: AgentRole,
        task: TaskType,
        attempts: Vec<Attempt>,
    },

    /// The caller's cancellation token fired mid-route
    #[error("routing cancelled for {role}/{task} after {} attempt(s)", .attempts.len())]
    Cancelled {
        role: AgentRole,
        task: TaskType,
        attempts: Vec<Attempt>,
    },

    /// Malformed routing table or delegate registry; the active tables are untouched
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("no delegate registered with agent id '{0}'")]
    UnknownDelegate(String),
}

impl RelayError {
    /// Candidates tried before the failure, if this error came from routing
    pub fn attempts(&self) -> &[Attempt] {
        match self {
            Self::RoutingExhausted { attempts, .. } | Self::Cancelled { attempts, .. } => {
                attempts
            }
            _ => &[],
        }
    }
}

fn join_attempts(attempts: &[Attempt]) -> String {
    if attempts.is_empty() {
        return "no candidates".to_string();
    }
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

//! Shared types for relay-core

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::RelayError;

/// Opaque key identifying a model endpoint (the `[providers.<id>]` table name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProviderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Functional category of the calling agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgentRole {
    #[serde(rename = "supervisor")]
    Supervisor,
    #[serde(rename = "research_agent")]
    Research,
    #[serde(rename = "finance_agent")]
    Finance,
    #[serde(rename = "creative_agent")]
    Creative,
    #[serde(rename = "generic")]
    Generic,
}

impl AgentRole {
    pub const ALL: [AgentRole; 5] = [
        Self::Supervisor,
        Self::Research,
        Self::Finance,
        Self::Creative,
        Self::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supervisor => "supervisor",
            Self::Research => "research_agent",
            Self::Finance => "finance_agent",
            Self::Creative => "creative_agent",
            Self::Generic => "generic",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| RelayError::ConfigInvalid(format!("unknown agent role '{}'", s)))
    }
}

/// Kind of generation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Reasoning,
    SkillExecution,
    ResponseFormulation,
    Delegation,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        Self::Reasoning,
        Self::SkillExecution,
        Self::ResponseFormulation,
        Self::Delegation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::SkillExecution => "skill_execution",
            Self::ResponseFormulation => "response_formulation",
            Self::Delegation => "delegation",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|task| task.as_str() == s)
            .ok_or_else(|| RelayError::ConfigInvalid(format!("unknown task type '{}'", s)))
    }
}

/// Admission budget for one provider: at most `requests` calls per `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(requests: u32, window: Duration) -> Self {
        Self { requests, window }
    }

    pub fn per_minute(requests: u32) -> Self {
        Self::new(requests, Duration::from_secs(60))
    }
}

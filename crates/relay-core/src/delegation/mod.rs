//! Supervisor-to-specialist delegation: the delegate registry and the
//! two-tier matcher that picks from it

pub mod matcher;
pub mod registry;

pub use matcher::{
    DecisionState, DelegationDecision, DelegationMatcher, DelegationTarget, IntentClassifier,
    MatchTier, ReasoningVerdict, RoutedClassifier,
};
pub use registry::{AgentStatus, DelegateEntry, DelegateRegistry, DelegateTable};

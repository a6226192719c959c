//! Engine-wide configuration.

use crate::kind::EagerLimitStrategy;
use relgraph_core::{ConfigurationError, Result};
use relgraph_query::{Dialect, JoinType};
use serde::{Deserialize, Serialize};

/// What a vetoed association mutation returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortPolicy {
    /// Return `Error::CallbackAbort`.
    #[default]
    Raise,
    /// Return `Ok(false)`.
    ReturnFalse,
}

/// Configuration shared by every association in a registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Strategy for limited collection associations that do not set one.
    pub default_limit_strategy: EagerLimitStrategy,
    /// Join type for graph joins that do not set one.
    pub default_graph_join: JoinType,
    /// Behavior when a before-callback vetoes a mutation.
    pub abort_policy: AbortPolicy,
    /// Dialect used when rendering SQL for logs.
    pub dialect: Dialect,
}

impl EngineConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            ConfigurationError::new(format!("invalid engine configuration: {}", e)).into()
        })
    }

    /// Set the default eager limit strategy (builder pattern).
    #[must_use]
    pub fn default_limit_strategy(mut self, strategy: EagerLimitStrategy) -> Self {
        self.default_limit_strategy = strategy;
        self
    }

    /// Set the default graph join type (builder pattern).
    #[must_use]
    pub fn default_graph_join(mut self, join_type: JoinType) -> Self {
        self.default_graph_join = join_type;
        self
    }

    /// Set the callback abort policy (builder pattern).
    #[must_use]
    pub fn abort_policy(mut self, policy: AbortPolicy) -> Self {
        self.abort_policy = policy;
        self
    }

    /// Set the logging dialect (builder pattern).
    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }
}

// ABOUTME: Load balancer contract and strategy selection.
// ABOUTME: Four interchangeable strategies pick one endpoint from a snapshot.

mod hash;
mod random;
mod round_robin;
mod weighted;

pub use hash::HashBalancer;
pub use random::RandomBalancer;
pub use round_robin::RoundRobinBalancer;
pub use weighted::WeightedRoundRobinBalancer;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::error::DiscoveryError;

/// Chooses one endpoint from a snapshot.
///
/// Implementations keep their own counters behind a per-instance lock; no
/// state is shared between instances. `select` on an empty slice fails with
/// [`DiscoveryError::NoEndpointsAvailable`].
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    /// Pick an endpoint from `endpoints`.
    fn select(&self, endpoints: &[Endpoint]) -> Result<Endpoint, DiscoveryError>;

    /// Replace the balancer's view of the endpoint list, resetting cursors and weight tables.
    fn update(&self, endpoints: &[Endpoint]);

    /// Strategy name for logs.
    fn name(&self) -> &'static str;
}

/// Strategy selector used by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancerKind {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    Random,
    Hash,
}

impl BalancerKind {
    /// Create a fresh balancer of this kind.
    pub fn build(self) -> Arc<dyn LoadBalancer> {
        match self {
            BalancerKind::RoundRobin => Arc::new(RoundRobinBalancer::new()),
            BalancerKind::WeightedRoundRobin => Arc::new(WeightedRoundRobinBalancer::new()),
            BalancerKind::Random => Arc::new(RandomBalancer::new()),
            BalancerKind::Hash => Arc::new(HashBalancer::new()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BalancerKind::RoundRobin => "round_robin",
            BalancerKind::WeightedRoundRobin => "weighted_round_robin",
            BalancerKind::Random => "random",
            BalancerKind::Hash => "hash",
        }
    }
}

impl fmt::Display for BalancerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BalancerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "round_robin" | "rr" => Ok(BalancerKind::RoundRobin),
            "weighted_round_robin" | "weighted" | "wrr" => Ok(BalancerKind::WeightedRoundRobin),
            "random" => Ok(BalancerKind::Random),
            "hash" | "consistent_hash" => Ok(BalancerKind::Hash),
            other => Err(format!("unknown load balancer '{}'", other)),
        }
    }
}

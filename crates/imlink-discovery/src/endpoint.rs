// ABOUTME: Endpoint value type describing one reachable service instance.
// ABOUTME: Immutable snapshot produced by registries and consumed by load balancers.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Metadata key holding an endpoint's balancing weight.
pub const WEIGHT_METADATA_KEY: &str = "weight";

/// Health as last reported by the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One addressable service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub health: HealthStatus,
}

impl Endpoint {
    /// Create an endpoint with no tags, no metadata and unknown health.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
            tags: BTreeSet::new(),
            metadata: HashMap::new(),
            health: HealthStatus::Unknown,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_health(mut self, health: HealthStatus) -> Self {
        self.health = health;
        self
    }

    /// `address:port`, the form handed to the dialer.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Balancing weight from the `weight` metadata key.
    ///
    /// Missing, unparsable and non-positive values all count as 1.
    pub fn weight(&self) -> i64 {
        self.metadata
            .get(WEIGHT_METADATA_KEY)
            .and_then(|w| w.trim().parse::<i64>().ok())
            .filter(|w| *w > 0)
            .unwrap_or(1)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.authority())
    }
}

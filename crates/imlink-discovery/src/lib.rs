// ABOUTME: Endpoint discovery and selection for imlink client sessions.
// ABOUTME: Provides the registry contract, an in-memory registry and four load balancers.

pub mod balancer;
pub mod endpoint;
pub mod error;
pub mod registry;

pub use balancer::{
    BalancerKind, HashBalancer, LoadBalancer, RandomBalancer, RoundRobinBalancer,
    WeightedRoundRobinBalancer,
};
pub use endpoint::{Endpoint, HealthStatus, WEIGHT_METADATA_KEY};
pub use error::DiscoveryError;
pub use registry::{EndpointWatch, Registry, StaticRegistry};

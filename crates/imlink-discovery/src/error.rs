// ABOUTME: Error types for the imlink-discovery crate.
// ABOUTME: Covers empty endpoint sets and registry backend failures.

use thiserror::Error;

/// Errors raised by registries and load balancers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Selection was asked to pick from an empty endpoint list.
    #[error("no endpoints available")]
    NoEndpointsAvailable,

    /// The registry backend failed.
    #[error("registry error: {0}")]
    Registry(String),

    /// The registry has been closed.
    #[error("registry closed")]
    RegistryClosed,

    /// An endpoint failed validation on registration.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

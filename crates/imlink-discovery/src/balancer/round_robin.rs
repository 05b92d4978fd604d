// ABOUTME: Round-robin load balancer.
// ABOUTME: Cycles through the snapshot in order using a monotonically increasing cursor.

use std::sync::{Mutex, PoisonError};

use crate::balancer::LoadBalancer;
use crate::endpoint::Endpoint;
use crate::error::DiscoveryError;

/// Returns `endpoints[cursor % len]` and advances the cursor.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    cursor: Mutex<usize>,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select(&self, endpoints: &[Endpoint]) -> Result<Endpoint, DiscoveryError> {
        if endpoints.is_empty() {
            return Err(DiscoveryError::NoEndpointsAvailable);
        }
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let picked = endpoints[*cursor % endpoints.len()].clone();
        *cursor = cursor.wrapping_add(1);
        Ok(picked)
    }

    fn update(&self, _endpoints: &[Endpoint]) {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = 0;
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

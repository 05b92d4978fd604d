// ABOUTME: Uniform random load balancer.
// ABOUTME: Keeps a process-local seeded generator and no endpoint state.

use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::balancer::LoadBalancer;
use crate::endpoint::Endpoint;
use crate::error::DiscoveryError;

#[derive(Debug)]
pub struct RandomBalancer {
    rng: Mutex<StdRng>,
}

impl RandomBalancer {
    /// Balancer seeded from the OS entropy source.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Balancer with a fixed seed, for reproducible selection sequences.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for RandomBalancer {
    fn select(&self, endpoints: &[Endpoint]) -> Result<Endpoint, DiscoveryError> {
        if endpoints.is_empty() {
            return Err(DiscoveryError::NoEndpointsAvailable);
        }
        let index = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(0..endpoints.len());
        Ok(endpoints[index].clone())
    }

    fn update(&self, _endpoints: &[Endpoint]) {}

    fn name(&self) -> &'static str {
        "random"
    }
}

// ABOUTME: Key-hash load balancer (plain hash modulo list length).
// ABOUTME: Same key and same list give the same endpoint; list resizes remap most keys.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::balancer::LoadBalancer;
use crate::endpoint::Endpoint;
use crate::error::DiscoveryError;

/// Deterministic hash-mod selection.
///
/// This is not a hash ring: adding or removing one endpoint changes the
/// result for most keys. Callers that need affinity must use
/// [`HashBalancer::select_by_key`]; the keyless [`LoadBalancer::select`]
/// hashes the current timestamp and behaves like a random pick.
#[derive(Debug, Default)]
pub struct HashBalancer;

impl HashBalancer {
    pub fn new() -> Self {
        Self
    }

    /// `h = h * 31 + byte` over the key's bytes with 64-bit wraparound.
    pub fn hash_key(key: &str) -> u64 {
        let hash = key
            .bytes()
            .fold(0i64, |h, b| h.wrapping_mul(31).wrapping_add(i64::from(b)));
        hash.unsigned_abs()
    }

    /// Pick the endpoint at `hash(key) % len`.
    pub fn select_by_key(
        &self,
        endpoints: &[Endpoint],
        key: &str,
    ) -> Result<Endpoint, DiscoveryError> {
        if endpoints.is_empty() {
            return Err(DiscoveryError::NoEndpointsAvailable);
        }
        let index = (Self::hash_key(key) % endpoints.len() as u64) as usize;
        Ok(endpoints[index].clone())
    }
}

impl LoadBalancer for HashBalancer {
    fn select(&self, endpoints: &[Endpoint]) -> Result<Endpoint, DiscoveryError> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        self.select_by_key(endpoints, &nanos.to_string())
    }

    fn update(&self, _endpoints: &[Endpoint]) {}

    fn name(&self) -> &'static str {
        "hash"
    }
}

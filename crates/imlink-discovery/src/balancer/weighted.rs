// ABOUTME: Smooth weighted round-robin load balancer.
// ABOUTME: Spreads picks in proportion to the "weight" metadata without bursts.

use std::sync::{Mutex, PoisonError};

use crate::balancer::LoadBalancer;
use crate::endpoint::Endpoint;
use crate::error::DiscoveryError;

#[derive(Debug, Default)]
struct WeightTable {
    weights: Vec<i64>,
    current: Vec<i64>,
    total: i64,
}

impl WeightTable {
    fn rebuild(&mut self, endpoints: &[Endpoint]) {
        self.weights = endpoints.iter().map(Endpoint::weight).collect();
        self.current = self.weights.clone();
        self.total = self.weights.iter().sum();
    }

    /// Index with the highest current credit, lowest index on ties.
    fn pick(&mut self) -> usize {
        let mut selected = 0;
        for (i, credit) in self.current.iter().enumerate() {
            if *credit > self.current[selected] {
                selected = i;
            }
        }
        self.current[selected] -= self.total;
        for (credit, weight) in self.current.iter_mut().zip(&self.weights) {
            *credit += weight;
        }
        selected
    }
}

/// Smooth weighted round-robin.
///
/// Weight tables are rebuilt on [`LoadBalancer::update`] and whenever
/// `select` sees a snapshot whose length differs from the table.
#[derive(Debug, Default)]
pub struct WeightedRoundRobinBalancer {
    table: Mutex<WeightTable>,
}

impl WeightedRoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for WeightedRoundRobinBalancer {
    fn select(&self, endpoints: &[Endpoint]) -> Result<Endpoint, DiscoveryError> {
        if endpoints.is_empty() {
            return Err(DiscoveryError::NoEndpointsAvailable);
        }
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if table.weights.len() != endpoints.len() {
            table.rebuild(endpoints);
        }
        let index = table.pick();
        Ok(endpoints[index].clone())
    }

    fn update(&self, endpoints: &[Endpoint]) {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rebuild(endpoints);
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}

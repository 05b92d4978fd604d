// ABOUTME: Service registry contract and an in-memory implementation.
// ABOUTME: Watches deliver full endpoint-list snapshots, never deltas.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::endpoint::{Endpoint, HealthStatus};
use crate::error::DiscoveryError;

/// Source of reachable endpoints for a named service.
///
/// Backends (lease-based key stores, health-polling catalogs, static lists)
/// all look identical to a session through this trait.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Register an endpoint under `endpoint.name`.
    async fn register(&self, endpoint: Endpoint) -> Result<(), DiscoveryError>;

    /// Remove an endpoint by id. Unknown ids are not an error.
    async fn deregister(&self, id: &str) -> Result<(), DiscoveryError>;

    /// Current endpoints for a service. An unknown service yields an empty list.
    async fn discover(&self, service_name: &str) -> Result<Vec<Endpoint>, DiscoveryError>;

    /// Subscribe to endpoint-list snapshots for a service.
    async fn watch(&self, service_name: &str) -> Result<EndpointWatch, DiscoveryError>;

    /// Release backend resources and end all watches.
    async fn close(&self) -> Result<(), DiscoveryError>;
}

/// Subscription to endpoint-list snapshots.
///
/// The snapshot current at subscription time is yielded first; later calls
/// wait for the next replacement. Intermediate snapshots may be skipped
/// when the consumer is slow, only the latest list is ever observed.
#[derive(Debug)]
pub struct EndpointWatch {
    inner: watch::Receiver<Vec<Endpoint>>,
    initial_pending: bool,
}

impl EndpointWatch {
    /// Create a watch pair seeded with `initial`. The sender side belongs to the backend.
    pub fn channel(initial: Vec<Endpoint>) -> (watch::Sender<Vec<Endpoint>>, Self) {
        let (tx, rx) = watch::channel(initial);
        (tx, Self::from_receiver(rx))
    }

    pub fn from_receiver(inner: watch::Receiver<Vec<Endpoint>>) -> Self {
        Self {
            inner,
            initial_pending: true,
        }
    }

    /// Next snapshot, or `None` once the backend stops publishing.
    pub async fn next(&mut self) -> Option<Vec<Endpoint>> {
        if self.initial_pending {
            self.initial_pending = false;
            return Some(self.inner.borrow_and_update().clone());
        }
        self.inner.changed().await.ok()?;
        Some(self.inner.borrow_and_update().clone())
    }
}

#[derive(Default)]
struct RegistryState {
    services: HashMap<String, watch::Sender<Vec<Endpoint>>>,
    closed: bool,
}

/// In-memory registry.
///
/// Used for direct mode (a fixed list supplied by configuration) and for
/// tests. Endpoints reported as [`HealthStatus::Unhealthy`] are filtered out
/// of discovery and watch snapshots.
#[derive(Default)]
pub struct StaticRegistry {
    state: Mutex<RegistryState>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry pre-populated with `endpoints`.
    pub fn with_endpoints(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        let registry = Self::new();
        {
            let mut state = registry.lock();
            for endpoint in endpoints {
                Self::upsert(&mut state, endpoint);
            }
        }
        registry
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn upsert(state: &mut RegistryState, endpoint: Endpoint) {
        let sender = state
            .services
            .entry(endpoint.name.clone())
            .or_insert_with(|| watch::channel(Vec::new()).0);
        sender.send_modify(|list| match list.iter_mut().find(|e| e.id == endpoint.id) {
            Some(existing) => *existing = endpoint,
            None => list.push(endpoint),
        });
    }

    fn visible(list: &[Endpoint]) -> Vec<Endpoint> {
        list.iter()
            .filter(|e| e.health != HealthStatus::Unhealthy)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Registry for StaticRegistry {
    async fn register(&self, endpoint: Endpoint) -> Result<(), DiscoveryError> {
        if endpoint.id.is_empty() {
            return Err(DiscoveryError::InvalidEndpoint("empty id".to_string()));
        }
        if endpoint.name.is_empty() {
            return Err(DiscoveryError::InvalidEndpoint(format!(
                "endpoint '{}' has no service name",
                endpoint.id
            )));
        }
        let mut state = self.lock();
        if state.closed {
            return Err(DiscoveryError::RegistryClosed);
        }
        tracing::debug!(id = %endpoint.id, service = %endpoint.name, "endpoint registered");
        Self::upsert(&mut state, endpoint);
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), DiscoveryError> {
        let state = self.lock();
        if state.closed {
            return Err(DiscoveryError::RegistryClosed);
        }
        for sender in state.services.values() {
            sender.send_if_modified(|list| {
                let before = list.len();
                list.retain(|e| e.id != id);
                list.len() != before
            });
        }
        Ok(())
    }

    async fn discover(&self, service_name: &str) -> Result<Vec<Endpoint>, DiscoveryError> {
        let state = self.lock();
        if state.closed {
            return Err(DiscoveryError::RegistryClosed);
        }
        Ok(state
            .services
            .get(service_name)
            .map(|sender| Self::visible(&sender.borrow()))
            .unwrap_or_default())
    }

    async fn watch(&self, service_name: &str) -> Result<EndpointWatch, DiscoveryError> {
        let mut state = self.lock();
        if state.closed {
            return Err(DiscoveryError::RegistryClosed);
        }
        let sender = state
            .services
            .entry(service_name.to_string())
            .or_insert_with(|| watch::channel(Vec::new()).0);

        // Republish through a filtering relay so unhealthy endpoints never reach watchers.
        let mut source = sender.subscribe();
        let (relay_tx, watch) = EndpointWatch::channel(Self::visible(&source.borrow_and_update()));
        tokio::spawn(async move {
            while source.changed().await.is_ok() {
                let snapshot = Self::visible(&source.borrow_and_update());
                if relay_tx.send(snapshot).is_err() {
                    break;
                }
            }
        });
        Ok(watch)
    }

    async fn close(&self) -> Result<(), DiscoveryError> {
        let mut state = self.lock();
        state.closed = true;
        state.services.clear();
        Ok(())
    }
}

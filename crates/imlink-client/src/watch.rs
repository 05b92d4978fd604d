// ABOUTME: Registry watch task keeping the session's endpoint list current.
// ABOUTME: Each snapshot fully replaces the list and is fed to the load balancer.

use std::sync::Arc;

use imlink_discovery::Registry;
use tokio_util::sync::CancellationToken;

use crate::session::Inner;

pub(crate) async fn run_watch(
    inner: Arc<Inner>,
    registry: Arc<dyn Registry>,
    generation: CancellationToken,
) {
    let service = inner.config.service_name.clone();
    let watched = tokio::select! {
        _ = generation.cancelled() => return,
        watched = registry.watch(&service) => watched,
    };
    let mut watch = match watched {
        Ok(watch) => watch,
        Err(e) => {
            tracing::warn!(service = %service, error = %e, "failed to watch endpoints");
            return;
        }
    };

    loop {
        let snapshot = tokio::select! {
            biased;
            _ = generation.cancelled() => break,
            snapshot = watch.next() => snapshot,
        };
        match snapshot {
            Some(endpoints) => inner.apply_endpoints(endpoints),
            None => {
                tracing::debug!(service = %service, "endpoint watch ended");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use imlink_discovery::{Registry, StaticRegistry};

    use crate::config::SessionConfig;
    use crate::session::Session;
    use crate::testing::{endpoint, wait_for, FakeDialer};

    #[tokio::test]
    async fn test_watch_replaces_endpoint_list() {
        let registry = Arc::new(StaticRegistry::with_endpoints([endpoint("e1", 9001)]));
        let dialer = FakeDialer::new();
        let session = Session::builder(SessionConfig::new("alice"))
            .registry(registry.clone())
            .dialer(dialer.clone())
            .build()
            .unwrap();
        session.connect().await.unwrap();
        assert_eq!(session.endpoints().len(), 1);

        registry.register(endpoint("e2", 9002)).await.unwrap();
        wait_for(|| session.endpoints().len() == 2).await;

        registry.deregister("e1").await.unwrap();
        wait_for(|| {
            let ids: Vec<String> = session.endpoints().into_iter().map(|e| e.id).collect();
            ids == vec!["e2".to_string()]
        })
        .await;

        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_watch_ends_when_registry_closes() {
        let registry = Arc::new(StaticRegistry::with_endpoints([endpoint("e1", 9001)]));
        let dialer = FakeDialer::new();
        let session = Session::builder(SessionConfig::new("alice"))
            .registry(registry.clone())
            .dialer(dialer.clone())
            .build()
            .unwrap();
        session.connect().await.unwrap();
        let with_watch = session.task_count();

        registry.close().await.unwrap();
        wait_for(|| session.task_count() == with_watch - 1).await;
        assert!(session.is_connected());
        assert_eq!(session.endpoints().len(), 1);

        session.disconnect().await.unwrap();
    }
}

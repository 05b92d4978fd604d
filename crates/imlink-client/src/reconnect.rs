// ABOUTME: Reconnect supervisor consuming coalesced failure signals from the pipeline tasks.
// ABOUTME: Runs bounded retry cycles that rediscover, reselect, redial and reopen the stream.

use std::sync::{Arc, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use crate::session::{Inner, SessionState};

/// The newest failure report waiting for the supervisor.
#[derive(Debug)]
pub(crate) struct Failure {
    epoch: u64,
    reason: SessionError,
}

impl Inner {
    /// Report a stream failure seen on stream `epoch`. Never blocks.
    ///
    /// The signal channel holds one token; the report itself lives in a slot
    /// that keeps the newest epoch, so a stale token cannot hide a fresh failure.
    pub(crate) fn signal_reconnect(&self, epoch: u64, reason: SessionError) {
        {
            let mut pending = self
                .pending_failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if pending.as_ref().map_or(true, |p| epoch >= p.epoch) {
                *pending = Some(Failure { epoch, reason });
            }
        }
        if self.reconnect_tx.try_send(()).is_err() {
            tracing::trace!(epoch, "reconnect already pending");
        }
    }

    fn take_failure(&self) -> Option<Failure> {
        self.pending_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

pub(crate) async fn run_supervisor(inner: Arc<Inner>, generation: CancellationToken) {
    let mut signals = tokio::select! {
        _ = generation.cancelled() => return,
        signals = inner.reconnect_rx.lock() => signals,
    };

    loop {
        tokio::select! {
            biased;
            _ = generation.cancelled() => break,
            signal = signals.recv() => if signal.is_none() { break },
        }
        let Some(failure) = inner.take_failure() else {
            continue;
        };
        if !reconnect_cycle(&inner, failure, &generation).await {
            break;
        }
    }
    tracing::debug!("reconnect supervisor stopped");
}

/// One reconnect cycle. Returns false once this generation is finished.
async fn reconnect_cycle(inner: &Arc<Inner>, failure: Failure, generation: &CancellationToken) -> bool {
    let (link, stale_connection) = {
        let mut st = inner.write_conn();
        if st.state != SessionState::Connected || st.epoch != failure.epoch {
            tracing::debug!(
                state = %st.state,
                epoch = failure.epoch,
                current = st.epoch,
                "ignoring stale failure report"
            );
            return true;
        }
        st.state = SessionState::Reconnecting;
        let link = st.link.take();
        let connection = if st.owned {
            st.endpoint = None;
            st.connection.take()
        } else {
            None
        };
        (link, connection)
    };

    tracing::info!(reason = %failure.reason, "connection lost, reconnecting");
    inner.config.handler.on_disconnect(&failure.reason);

    if let Some(link) = link {
        link.close();
    }
    if let Some(connection) = stale_connection {
        connection.close().await;
    }

    let max_retries = inner.config.max_retries;
    for attempt in 1..=max_retries {
        if attempt > 1 {
            tokio::select! {
                _ = generation.cancelled() => return false,
                _ = tokio::time::sleep(inner.config.retry_interval) => {}
            }
        }
        tracing::info!(attempt, max_retries, "reconnect attempt");

        let result = tokio::select! {
            _ = generation.cancelled() => return false,
            result = inner.establish() => result,
        };
        let established = match result {
            Ok(established) => established,
            Err(e) => {
                tracing::warn!(attempt, max_retries, error = %e, "reconnect attempt failed");
                continue;
            }
        };

        let installed = {
            let mut st = inner.write_conn();
            if st.state != SessionState::Reconnecting || generation.is_cancelled() {
                Err(established)
            } else {
                inner.install(&mut st, established, generation);
                st.state = SessionState::Connected;
                Ok(st.endpoint.as_ref().map(|e| e.authority()))
            }
        };
        let endpoint = match installed {
            Ok(endpoint) => endpoint,
            Err(established) => {
                established.discard().await;
                return false;
            }
        };
        tracing::info!(
            attempt,
            endpoint = endpoint.as_deref().unwrap_or("external"),
            "reconnected"
        );
        inner.config.handler.on_connect();
        return true;
    }

    {
        let mut st = inner.write_conn();
        if st.state == SessionState::Reconnecting {
            st.state = SessionState::Disconnected;
            st.generation = None;
            if !st.owned {
                st.connection = None;
            }
        }
    }
    tracing::error!(max_retries, "reconnect attempts exhausted, session disconnected");
    inner
        .config
        .handler
        .on_error(&SessionError::ReconnectExhausted {
            attempts: max_retries,
        });
    generation.cancel();
    false
}

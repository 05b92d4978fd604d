// ABOUTME: Heartbeat task enqueuing a liveness frame every heartbeat interval.
// ABOUTME: Enqueue waits at most five seconds and only logs and reports on timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::frame::OutboundFrame;
use crate::session::{Inner, SessionState};

/// Bounded wait for queue space, independent of the request timeout.
pub const HEARTBEAT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) async fn run_heartbeat(inner: Arc<Inner>, generation: CancellationToken) {
    let period = inner.config.heartbeat_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = generation.cancelled() => break,
            _ = ticker.tick() => {}
        }
        // Nothing to keep alive while a reconnect is in progress.
        if inner.state() != SessionState::Connected {
            continue;
        }

        let frame = OutboundFrame::heartbeat(inner.config.user_id.clone(), inner.config.room());
        let result = tokio::select! {
            _ = generation.cancelled() => break,
            result = inner.enqueue(frame, HEARTBEAT_ENQUEUE_TIMEOUT) => result,
        };
        match result {
            Ok(()) => tracing::trace!("heartbeat queued"),
            Err(err) => {
                tracing::warn!(error = %err, "heartbeat enqueue failed");
                inner.config.handler.on_error(&err);
            }
        }
    }
    tracing::debug!("heartbeat task stopped");
}

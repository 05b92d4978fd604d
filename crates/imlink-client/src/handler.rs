// ABOUTME: Event callbacks a session invokes for messages and lifecycle changes.
// ABOUTME: SessionHandler trait plus a closure-based Callbacks implementation.

use std::fmt;
use std::sync::Arc;

use crate::error::SessionError;
use crate::frame::InboundFrame;

/// Receives session events.
///
/// Every method runs synchronously on a session task: `on_message` on the
/// receiver task, so a slow handler delays consumption of the next frame.
/// Lifecycle callbacks run on whichever task caused the transition.
pub trait SessionHandler: Send + Sync {
    /// An application frame arrived. Heartbeat frames never reach this.
    fn on_message(&self, _frame: &InboundFrame) {}

    /// The session reached `Connected`, initially or after a reconnect.
    fn on_connect(&self) {}

    /// A reconnect cycle started because the connection was lost.
    fn on_disconnect(&self, _reason: &SessionError) {}

    /// A background failure occurred.
    fn on_error(&self, _error: &SessionError) {}
}

/// Handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl SessionHandler for NoopHandler {}

type MessageFn = Arc<dyn Fn(&InboundFrame) + Send + Sync>;
type ConnectFn = Arc<dyn Fn() + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&SessionError) + Send + Sync>;

/// Closure-based handler. Unset callbacks are no-ops.
#[derive(Clone, Default)]
pub struct Callbacks {
    on_message: Option<MessageFn>,
    on_connect: Option<ConnectFn>,
    on_disconnect: Option<ErrorFn>,
    on_error: Option<ErrorFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_message(mut self, f: impl Fn(&InboundFrame) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub fn with_on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    pub fn with_on_disconnect(mut self, f: impl Fn(&SessionError) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    pub fn with_on_error(mut self, f: impl Fn(&SessionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_message", &self.on_message.is_some())
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl SessionHandler for Callbacks {
    fn on_message(&self, frame: &InboundFrame) {
        if let Some(f) = &self.on_message {
            f(frame);
        }
    }

    fn on_connect(&self) {
        if let Some(f) = &self.on_connect {
            f();
        }
    }

    fn on_disconnect(&self, reason: &SessionError) {
        if let Some(f) = &self.on_disconnect {
            f(reason);
        }
    }

    fn on_error(&self, error: &SessionError) {
        if let Some(f) = &self.on_error {
            f(error);
        }
    }
}

//! Session state, the connection-state listener hook, and the task that
//! delivers state changes to it.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Server-assigned session identifier.
///
/// Displayed in hex (`0x1a2b...`), the way coordination servers print it in
/// their own logs, so the two can be matched up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The connection state of a session, as reported to a [`StateListener`].
///
/// ```text
///   Connected / ConnectedReadOnly ──(close)──────→ Closed
///              │
///              └──(connection lost)──→ Disconnected
/// ```
///
/// `Expired` is reported when the server declares the session gone. This
/// client never re-establishes a session, so `Disconnected`, `Expired`, and
/// `Closed` are all terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Handshake complete; requests are being served.
    Connected,
    /// Connected to a server that only serves reads.
    ConnectedReadOnly,
    /// The connection was lost.
    Disconnected,
    /// The server no longer knows this session.
    Expired,
    /// The session was closed on request.
    Closed,
}

impl SessionState {
    /// Returns `true` while requests can be sent.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::ConnectedReadOnly)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connected => "SyncConnected",
            Self::ConnectedReadOnly => "ConnectedReadOnly",
            Self::Disconnected => "Disconnected",
            Self::Expired => "Expired",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// StateListener
// ---------------------------------------------------------------------------

/// Observes session state transitions.
///
/// Called once per transition, in the order transitions happen, on a task
/// owned by the session rather than the caller's. Implementations must not
/// block: they share a runtime worker with everything else. A panic inside
/// the listener is caught and logged; later transitions are still
/// delivered.
///
/// Closures implement this trait, which keeps tests short:
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use zkhandle_session::{SessionState, StateListener};
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// let listener = move |state: SessionState| sink.lock().unwrap().push(state);
///
/// listener.on_state_change(SessionState::Connected);
/// assert_eq!(*seen.lock().unwrap(), [SessionState::Connected]);
/// ```
pub trait StateListener: Send + Sync + 'static {
    /// Receives the new state.
    fn on_state_change(&self, state: SessionState);
}

impl<F> StateListener for F
where
    F: Fn(SessionState) + Send + Sync + 'static,
{
    fn on_state_change(&self, state: SessionState) {
        self(state)
    }
}

/// The default listener: logs each transition and does nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingListener;

impl StateListener for LoggingListener {
    fn on_state_change(&self, state: SessionState) {
        tracing::info!(%state, "session state changed");
    }
}

// ---------------------------------------------------------------------------
// StateNotifier
// ---------------------------------------------------------------------------

/// Sending side of the listener task.
///
/// Each notification is queued on an unbounded channel and delivered by a
/// dedicated task, so the IO task never waits on a listener. The listener
/// task ends once the notifier is dropped and the queue is drained.
#[derive(Debug, Clone)]
pub(crate) struct StateNotifier {
    tx: mpsc::UnboundedSender<SessionState>,
}

impl StateNotifier {
    /// Spawns the listener task on the current runtime.
    pub(crate) fn spawn(listener: Arc<dyn StateListener>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SessionState>();
        tokio::spawn(async move {
            while let Some(state) = rx.recv().await {
                let delivered = catch_unwind(AssertUnwindSafe(|| {
                    listener.on_state_change(state)
                }));
                if delivered.is_err() {
                    tracing::error!(%state, "state listener panicked");
                }
            }
        });
        Self { tx }
    }

    pub(crate) fn notify(&self, state: SessionState) {
        // Fails only if the listener task is gone, which happens solely
        // at runtime shutdown.
        let _ = self.tx.send(state);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_session_id_display_hex() {
        assert_eq!(SessionId(0x1a2b).to_string(), "0x1a2b");
        assert_eq!(SessionId(0).to_string(), "0x0");
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Connected.to_string(), "SyncConnected");
        assert_eq!(SessionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(SessionState::Closed.to_string(), "Closed");
    }

    #[test]
    fn test_session_state_is_connected() {
        assert!(SessionState::Connected.is_connected());
        assert!(SessionState::ConnectedReadOnly.is_connected());
        assert!(!SessionState::Disconnected.is_connected());
        assert!(!SessionState::Expired.is_connected());
        assert!(!SessionState::Closed.is_connected());
    }

    fn recording_listener() -> (Arc<dyn StateListener>, Arc<Mutex<Vec<SessionState>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = move |state: SessionState| sink.lock().unwrap().push(state);
        (Arc::new(listener), seen)
    }

    async fn wait_for_len(seen: &Mutex<Vec<SessionState>>, len: usize) {
        for _ in 0..100 {
            if seen.lock().unwrap().len() >= len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_notifier_delivers_in_order() {
        let (listener, seen) = recording_listener();
        let notifier = StateNotifier::spawn(listener);

        notifier.notify(SessionState::Connected);
        notifier.notify(SessionState::Disconnected);
        notifier.notify(SessionState::Closed);
        wait_for_len(&seen, 3).await;

        assert_eq!(
            *seen.lock().unwrap(),
            [
                SessionState::Connected,
                SessionState::Disconnected,
                SessionState::Closed
            ]
        );
    }

    #[tokio::test]
    async fn test_notifier_survives_panicking_listener() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = move |state: SessionState| {
            if state == SessionState::Connected {
                panic!("listener bug");
            }
            sink.lock().unwrap().push(state);
        };
        let notifier = StateNotifier::spawn(Arc::new(listener));

        notifier.notify(SessionState::Connected);
        notifier.notify(SessionState::Closed);
        wait_for_len(&seen, 1).await;

        assert_eq!(*seen.lock().unwrap(), [SessionState::Closed]);
    }
}

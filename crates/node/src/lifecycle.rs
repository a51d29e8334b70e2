use std::fmt;
use std::sync::Arc;

use futures::future::select_all;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Phases a node passes through, in order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleState {
    /// Bootstrapping the replica and applying migrations.
    Starting,

    /// Accepting client requests.
    Serving,

    /// No longer accepting connections, finishing in-flight requests.
    Draining,

    /// Teardown finished.
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Serving => write!(f, "serving"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Observable lifecycle state of a node.
#[derive(Clone, Debug)]
pub struct Lifecycle {
    state: Arc<watch::Sender<LifecycleState>>,
}

impl Lifecycle {
    /// A lifecycle in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Starting);

        Self {
            state: Arc::new(state),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Receiver notified on every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub(crate) fn transition(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);

        if previous != next {
            info!(from = %previous, to = %next, "lifecycle transition");
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

fn termination_signals() -> std::io::Result<Vec<(&'static str, Signal)>> {
    let mut signals = vec![
        ("SIGINT", signal(SignalKind::interrupt())?),
        ("SIGQUIT", signal(SignalKind::quit())?),
        ("SIGTERM", signal(SignalKind::terminate())?),
    ];

    #[cfg(target_os = "linux")]
    signals.push((
        "SIGPWR",
        signal(SignalKind::from_raw(nix::sys::signal::Signal::SIGPWR as i32))?,
    ));

    Ok(signals)
}

/// Cancels `shutdown` on the first termination signal.
///
/// Signals arriving after the first are logged and ignored; the drain that is
/// already running is left to finish.
///
/// # Errors
///
/// Returns an error if a signal handler cannot be installed.
pub fn spawn_signal_watcher(shutdown: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    let mut signals = termination_signals()?;

    Ok(tokio::spawn(async move {
        loop {
            let (received, _, _) = select_all(signals.iter_mut().map(|(name, signal)| {
                Box::pin(async move {
                    signal.recv().await;
                    *name
                })
            }))
            .await;

            if shutdown.is_cancelled() {
                warn!(signal = received, "already shutting down, ignoring signal");
            } else {
                info!(signal = received, "termination signal received");
                shutdown.cancel();
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_are_observable() {
        let lifecycle = Lifecycle::new();
        let mut receiver = lifecycle.subscribe();

        assert_eq!(lifecycle.state(), LifecycleState::Starting);

        lifecycle.transition(LifecycleState::Serving);
        receiver.changed().await.unwrap();
        assert_eq!(*receiver.borrow_and_update(), LifecycleState::Serving);

        lifecycle.transition(LifecycleState::Draining);
        lifecycle.transition(LifecycleState::Stopped);
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_signal_cancels_token_once() {
        let shutdown = CancellationToken::new();
        let watcher = spawn_signal_watcher(shutdown.clone()).unwrap();

        nix::sys::signal::raise(nix::sys::signal::Signal::SIGTERM).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), shutdown.cancelled())
            .await
            .unwrap();

        nix::sys::signal::raise(nix::sys::signal::Signal::SIGTERM).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!watcher.is_finished());

        watcher.abort();
    }
}

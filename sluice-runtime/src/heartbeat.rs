//! Activity liveness heartbeats
//!
//! Long-running activities ping a `Heartbeat` handle while they make
//! progress (pulling an image, waiting on a container). The workflow pairs
//! the handle with a `HeartbeatMonitor` whose `expired` future resolves
//! when no ping has arrived within the deadline, at which point the
//! attempt is treated as failed and retried by the retry policy.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

/// Sender half handed to an activity.
#[derive(Clone)]
pub struct Heartbeat {
    tx: watch::Sender<Instant>,
}

impl Heartbeat {
    /// Create a linked heartbeat/monitor pair. The monitor considers the
    /// creation instant as the first ping.
    pub fn channel() -> (Heartbeat, HeartbeatMonitor) {
        let (tx, rx) = watch::channel(Instant::now());
        (Heartbeat { tx }, HeartbeatMonitor { rx })
    }

    /// Record a liveness ping.
    pub fn ping(&self, detail: &str) {
        trace!(detail, "activity heartbeat");
        let _ = self.tx.send(Instant::now());
    }
}

/// Receiver half held by the workflow.
pub struct HeartbeatMonitor {
    rx: watch::Receiver<Instant>,
}

impl HeartbeatMonitor {
    /// Resolves once the deadline elapses without a ping. Never resolves
    /// while pings keep arriving; pends forever if the sender is dropped,
    /// leaving completion to the activity future it is raced against.
    pub async fn expired(mut self, deadline: Duration) {
        loop {
            let last = *self.rx.borrow();
            let wake = last + deadline;
            if Instant::now() >= wake {
                return;
            }

            tokio::select! {
                _ = sleep_until(wake) => {
                    if *self.rx.borrow() == last {
                        return;
                    }
                }
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
            }
        }
    }
}

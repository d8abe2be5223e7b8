//! Process-wide cooperative cancellation.
//!
//! A single [`ShutdownHandle`] flips a `watch` channel; every long-running
//! task holds a cloned [`ShutdownSignal`] and races it against its blocking
//! call with `tokio::select!`.  Dropping the handle counts as a shutdown.

use tokio::sync::watch;

/// Create a linked handle / signal pair.
pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, ShutdownSignal { rx })
}

/// The trigger side.  Safe to call from a signal-handler thread.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Signal every subscribed task to stop.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Another receiver for the same shutdown.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// `true` once shutdown was triggered or the handle is gone.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once shutdown is triggered.  Cancel-safe.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_wakes_every_signal() {
        let (handle, mut a) = shutdown_channel();
        let mut b = handle.subscribe();
        assert!(!a.is_triggered());

        handle.trigger();
        tokio::time::timeout(Duration::from_secs(1), a.wait()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), b.wait()).await.unwrap();
        assert!(b.is_triggered());
    }

    #[tokio::test]
    async fn dropping_the_handle_counts_as_shutdown() {
        let (handle, mut signal) = shutdown_channel();
        drop(handle);
        assert!(signal.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), signal.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn wait_blocks_until_triggered() {
        let (_handle, mut signal) = shutdown_channel();
        let result = tokio::time::timeout(Duration::from_millis(50), signal.wait()).await;
        assert!(result.is_err());
    }
}

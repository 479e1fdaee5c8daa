//! Shutdown signalling
//!
//! trellis runs any number of feeds and at most one interval reporter. All of
//! them stop when the daemon is interrupted or its run duration elapses. The
//! mechanism has two halves: a single [`Broadcaster`] that fires once, and any
//! number of [`Watcher`] instances, one per task that must stop.

use tokio::sync::broadcast::{self, error};

/// Construct a [`Watcher`] and [`Broadcaster`] pair.
#[must_use]
pub fn signal() -> (Watcher, Broadcaster) {
    // Nothing is ever sent on this channel. Dropping the only sender closes it
    // and every receiver, present or future, observes the close.
    let (sender, receiver) = broadcast::channel(1);
    (
        Watcher {
            receiver,
            received: false,
        },
        Broadcaster { sender },
    )
}

#[derive(Debug)]
/// Fires the shutdown signal to every [`Watcher`].
pub struct Broadcaster {
    sender: broadcast::Sender<()>,
}

impl Broadcaster {
    /// Send the signal. Does not wait for watchers to act on it.
    pub fn signal(self) {
        drop(self.sender);
    }
}

#[derive(Debug)]
/// Waits for the shutdown signal.
///
/// Clone to hand a watcher to another task. A clone made after the signal
/// fired observes it immediately.
pub struct Watcher {
    receiver: broadcast::Receiver<()>,
    received: bool,
}

impl Clone for Watcher {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.resubscribe(),
            received: self.received,
        }
    }
}

impl Watcher {
    /// Wait for the signal. Returns immediately if it has already been
    /// received.
    pub async fn recv(mut self) {
        if self.received {
            return;
        }
        loop {
            match self.receiver.recv().await {
                Ok(()) | Err(error::RecvError::Closed) => break,
                // Nothing is sent so nothing can be missed.
                Err(error::RecvError::Lagged(_)) => continue,
            }
        }
        self.received = true;
    }

    /// Check for the signal without waiting.
    pub fn try_recv(&mut self) -> bool {
        if self.received {
            return true;
        }
        match self.receiver.try_recv() {
            Ok(()) | Err(error::TryRecvError::Closed) => {
                self.received = true;
                true
            }
            Err(error::TryRecvError::Empty | error::TryRecvError::Lagged(_)) => false,
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::signal;

    #[test]
    fn try_recv_before_and_after_signal() {
        let (mut watcher, broadcaster) = signal();
        assert!(!watcher.try_recv());
        broadcaster.signal();
        assert!(watcher.try_recv());
        assert!(watcher.try_recv());
    }

    #[test]
    fn clone_after_signal_sees_signal() {
        let (watcher, broadcaster) = signal();
        broadcaster.signal();
        let mut late = watcher.clone();
        assert!(late.try_recv());
    }

    #[tokio::test]
    async fn every_clone_is_released() {
        let (watcher, broadcaster) = signal();
        let handles: Vec<_> = (0..4)
            .map(|_| tokio::spawn(watcher.clone().recv()))
            .collect();
        drop(watcher);

        broadcaster.signal();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("watcher was not released")
                .unwrap();
        }
    }
}

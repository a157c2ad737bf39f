//! Network mode monitor: Online ⇄ Offline, driven only by connectivity
//! signals from the runtime. Failed provider calls never flip the mode.
//! Consumers get a read-only [`NetworkSignal`]; only the monitor writes.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NetworkMode {
    Online,
    Offline,
}

impl std::fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkMode::Online => write!(f, "Online"),
            NetworkMode::Offline => write!(f, "Offline"),
        }
    }
}

/// Signal emitted by the connectivity transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

impl From<ConnectivityEvent> for NetworkMode {
    fn from(event: ConnectivityEvent) -> Self {
        match event {
            ConnectivityEvent::Online => NetworkMode::Online,
            ConnectivityEvent::Offline => NetworkMode::Offline,
        }
    }
}

pub struct NetworkModeMonitor {
    mode_tx: watch::Sender<NetworkMode>,
}

impl NetworkModeMonitor {
    pub fn new(initial: NetworkMode) -> Self {
        let (mode_tx, _) = watch::channel(initial);
        info!(mode = %initial, "network monitor started");
        Self { mode_tx }
    }

    /// Apply a connectivity signal. Returns true if the mode changed;
    /// repeating the current mode is a no-op and wakes no subscriber.
    pub fn apply(&self, event: ConnectivityEvent) -> bool {
        let next = NetworkMode::from(event);
        let changed = self.mode_tx.send_if_modified(|mode| {
            if *mode == next {
                return false;
            }
            *mode = next;
            true
        });
        if changed {
            info!(to = %next, "network_mode_changed");
        }
        changed
    }

    pub fn mode(&self) -> NetworkMode {
        *self.mode_tx.borrow()
    }

    /// Read-only handle for consumers.
    pub fn signal(&self) -> NetworkSignal {
        NetworkSignal {
            rx: self.mode_tx.subscribe(),
        }
    }

    /// Drive the monitor from a transport channel until the sender closes.
    pub fn spawn_listener(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<ConnectivityEvent>,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                monitor.apply(event);
            }
            info!("connectivity transport closed");
        })
    }
}

/// Read-only view of the process-wide network mode.
#[derive(Clone)]
pub struct NetworkSignal {
    rx: watch::Receiver<NetworkMode>,
}

impl NetworkSignal {
    pub fn mode(&self) -> NetworkMode {
        *self.rx.borrow()
    }

    pub fn is_offline(&self) -> bool {
        self.mode() == NetworkMode::Offline
    }

    /// Wait for the next mode change.
    pub async fn changed(&mut self) -> Option<NetworkMode> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_signals_are_no_ops() {
        let monitor = NetworkModeMonitor::new(NetworkMode::Online);
        assert!(!monitor.apply(ConnectivityEvent::Online));
        assert!(monitor.apply(ConnectivityEvent::Offline));
        assert!(!monitor.apply(ConnectivityEvent::Offline));
        assert_eq!(monitor.mode(), NetworkMode::Offline);
    }

    #[tokio::test]
    async fn subscribers_observe_transitions_immediately() {
        let monitor = NetworkModeMonitor::new(NetworkMode::Online);
        let mut signal = monitor.signal();
        let reader = monitor.signal();

        monitor.apply(ConnectivityEvent::Offline);
        assert!(reader.is_offline());
        assert_eq!(signal.changed().await, Some(NetworkMode::Offline));

        monitor.apply(ConnectivityEvent::Online);
        assert_eq!(signal.changed().await, Some(NetworkMode::Online));
        assert!(!reader.is_offline());
    }

    #[tokio::test]
    async fn listener_consumes_transport_events() {
        let monitor = Arc::new(NetworkModeMonitor::new(NetworkMode::Online));
        let (tx, rx) = mpsc::channel(4);
        let handle = monitor.spawn_listener(rx);

        tx.send(ConnectivityEvent::Offline).await.unwrap();
        drop(tx);
        handle.await.unwrap();
        assert_eq!(monitor.mode(), NetworkMode::Offline);
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;

use crate::connectivity::ListenerHandle;
use crate::dispatcher::Dispatcher;
use crate::error::Locale;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusIcon {
    Synchronized,
    Pending,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueStatus {
    pub online: bool,
    pub pending: usize,
}

impl QueueStatus {
    pub fn icon(&self) -> StatusIcon {
        derive_status(self.online, self.pending)
    }

    /// Only offered when there is something to sync and a way to send it.
    pub fn can_sync(&self) -> bool {
        self.icon() == StatusIcon::Pending
    }

    pub fn label(&self, locale: Locale) -> String {
        match (self.icon(), locale) {
            (StatusIcon::Synchronized, Locale::PtBr) => "Sincronizado".to_string(),
            (StatusIcon::Synchronized, Locale::En) => "Synchronized".to_string(),
            (StatusIcon::Pending, Locale::PtBr) => format!("{} pendente(s)", self.pending),
            (StatusIcon::Pending, Locale::En) => format!("{} pending", self.pending),
            (StatusIcon::Offline, _) => "Offline".to_string(),
        }
    }
}

/// Offline wins over any queue length.
pub const fn derive_status(online: bool, pending: usize) -> StatusIcon {
    match (online, pending) {
        (false, _) => StatusIcon::Offline,
        (true, 0) => StatusIcon::Synchronized,
        (true, _) => StatusIcon::Pending,
    }
}

/// Publishes [`QueueStatus`] on connectivity changes, queue notifications
/// and a fixed poll.
#[derive(Debug)]
pub struct StatusReporter {
    rx: watch::Receiver<QueueStatus>,
    _task: ListenerHandle,
}

impl StatusReporter {
    pub async fn spawn(dispatcher: Dispatcher, poll_interval: Duration) -> Self {
        let initial = QueueStatus {
            online: dispatcher.is_online(),
            pending: dispatcher.queue_len().await,
        };
        let (tx, rx) = watch::channel(initial);
        let mut connectivity = dispatcher.monitor().watch();
        let mut notifications = dispatcher.subscribe();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    received = notifications.recv() => {
                        if matches!(received, Err(RecvError::Closed)) {
                            break;
                        }
                    }
                }

                let status = QueueStatus {
                    online: dispatcher.is_online(),
                    pending: dispatcher.queue_len().await,
                };
                tx.send_if_modified(|current| {
                    if *current == status {
                        return false;
                    }
                    *current = status;
                    true
                });
                if tx.is_closed() {
                    break;
                }
            }
        });

        Self {
            rx,
            _task: ListenerHandle::new(task),
        }
    }

    pub fn current(&self) -> QueueStatus {
        *self.rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueStatus> {
        self.rx.clone()
    }
}

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::info;

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectivityEvent {
    BecameOnline,
    BecameOffline,
}

/// Tracks the platform's online/offline signal.
///
/// The shell feeds raw readings through [`ConnectivityMonitor::set_online`];
/// subscribers only see real transitions, never repeated readings.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { state, events }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Records a reading. Returns the transition it caused, if any.
    pub fn set_online(&self, online: bool) -> Option<ConnectivityEvent> {
        let mut transition = None;
        self.state.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            let event = if online {
                ConnectivityEvent::BecameOnline
            } else {
                ConnectivityEvent::BecameOffline
            };
            // Sent under the state lock so event order always matches state order.
            let _ = self.events.send(event);
            transition = Some(event);
            true
        });

        if let Some(event) = transition {
            info!(?event, "connectivity changed");
        }
        transition
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Owns a background listener task. Dropping the handle stops the task.
#[derive(Debug)]
pub struct ListenerHandle {
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the listener and waits for the task to wind down.
    pub async fn detach(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_readings_are_not_transitions() {
        let monitor = ConnectivityMonitor::new(true);
        assert_eq!(monitor.set_online(true), None);
        assert_eq!(
            monitor.set_online(false),
            Some(ConnectivityEvent::BecameOffline)
        );
        assert_eq!(monitor.set_online(false), None);
        assert!(!monitor.is_online());
        assert_eq!(
            monitor.set_online(true),
            Some(ConnectivityEvent::BecameOnline)
        );
    }

    #[tokio::test]
    async fn subscribers_see_each_transition_once() {
        let monitor = ConnectivityMonitor::new(false);
        let mut events = monitor.subscribe();

        monitor.set_online(true);
        monitor.set_online(true);
        monitor.set_online(false);
        monitor.set_online(true);

        assert_eq!(events.recv().await.unwrap(), ConnectivityEvent::BecameOnline);
        assert_eq!(events.recv().await.unwrap(), ConnectivityEvent::BecameOffline);
        assert_eq!(events.recv().await.unwrap(), ConnectivityEvent::BecameOnline);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn watch_tracks_latest_state() {
        let monitor = ConnectivityMonitor::new(true);
        let mut state = monitor.watch();
        monitor.set_online(false);
        state.changed().await.unwrap();
        assert!(!*state.borrow());
    }

    #[tokio::test]
    async fn dropping_handle_aborts_listener() {
        let monitor = ConnectivityMonitor::new(true);
        let mut events = monitor.subscribe();
        let task = tokio::spawn(async move { while events.recv().await.is_ok() {} });

        let handle = ListenerHandle::new(task);
        assert!(handle.is_active());
        assert_eq!(monitor.subscriber_count(), 1);

        handle.detach().await;
        assert_eq!(monitor.subscriber_count(), 0);
    }
}

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{ChangeCallback, ChangeEvent, FilterSpec, Subscription, Table};

/// Fan-out of change events to subscribers, shared by the gateway backends
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: ChangeEvent) {
        // No receivers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn subscribe(&self, table: Table, filter: FilterSpec, on_change: ChangeCallback) -> Subscription {
        let mut receiver = self.sender.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if event.table == table && filter.matches(&event.row) {
                            on_change(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Subscriber on {} lagged, {} change events skipped", table, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Change feed closed, ending subscription on {}", table);
                        break;
                    }
                }
            }
        });
        Subscription::new(task)
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

// file: src/persistence/feed.rs
use async_trait::async_trait;
use log::debug;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

use super::ChangeSource;
use crate::error::PersistenceError;
use crate::models::RowChange;

/// An open change stream. Dropping it (or calling [`unsubscribe`](Self::unsubscribe))
/// tears the stream down.
#[derive(Debug)]
pub struct ChangeSubscription {
    receiver: mpsc::UnboundedReceiver<RowChange>,
}

impl ChangeSubscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<RowChange>) -> Self {
        Self { receiver }
    }

    /// Subscription fed by the returned sender; for adapters that bridge an
    /// external push protocol.
    pub fn channel() -> (mpsc::UnboundedSender<RowChange>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (sender, Self::new(receiver))
    }

    /// Next change, or `None` once the stream has been dropped by the source.
    pub async fn next(&mut self) -> Option<RowChange> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.receiver.close();
    }
}

struct FeedSubscriber {
    owner_id: String,
    table: String,
    sender: mpsc::UnboundedSender<RowChange>,
}

/// Owner- and table-scoped fan-out of row changes for the local backends.
#[derive(Clone, Default)]
pub struct ChangeFeed {
    subscribers: Arc<Mutex<Vec<FeedSubscriber>>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, owner_id: &str, table: &str) -> ChangeSubscription {
        let (sender, subscription) = ChangeSubscription::channel();
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.push(FeedSubscriber {
            owner_id: owner_id.to_string(),
            table: table.to_string(),
            sender,
        });
        debug!("[Feed] Subscribed owner '{}' to {}", owner_id, table);
        subscription
    }

    /// Deliver `change` to every live subscriber of `(owner_id, table)`.
    /// Returns how many subscribers received it.
    pub fn publish(&self, owner_id: &str, table: &str, change: RowChange) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|subscriber| !subscriber.sender.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers
            .iter()
            .filter(|subscriber| subscriber.owner_id == owner_id && subscriber.table == table)
        {
            if subscriber.sender.send(change.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Close every open stream, as a dropped connection would.
    pub fn disconnect_all(&self) {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|subscriber| !subscriber.sender.is_closed());
        subscribers.len()
    }
}

#[async_trait]
impl ChangeSource for ChangeFeed {
    async fn subscribe(&self, owner_id: &str, table: &str) -> Result<ChangeSubscription, PersistenceError> {
        Ok(ChangeFeed::subscribe(self, owner_id, table))
    }
}

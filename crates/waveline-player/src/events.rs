//! Typed publish/subscribe channel.
//!
//! Each component owns an [`EventBus`] over its own event enum. Subscribers get a
//! crossbeam receiver; events are delivered to subscribers in subscription order
//! and dropped receivers are pruned on the next emit.

use crossbeam_channel::{Receiver, Sender, TryIter};

/// Identifies a subscription for [`EventBus::unsubscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving side of a subscription.
pub struct Subscription<E> {
    id: SubscriptionId,
    rx: Receiver<E>,
}

impl<E> Subscription<E> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Events published since the last drain, oldest first.
    pub fn try_iter(&self) -> TryIter<'_, E> {
        self.rx.try_iter()
    }

    /// Collect everything currently queued.
    pub fn drain(&self) -> Vec<E> {
        self.rx.try_iter().collect()
    }
}

/// Fan-out of `E` to any number of subscribers.
pub struct EventBus<E> {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Sender<E>)>,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            subscribers: Vec::new(),
        }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&mut self) -> Subscription<E> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscribers.push((id, tx));
        Subscription { id, rx }
    }

    /// Stop delivering to `id`. Unknown ids are ignored.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sub, _)| *sub != id);
    }

    /// Drop every subscriber.
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver `event` to every live subscriber.
    pub fn emit(&mut self, event: E) {
        self.subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

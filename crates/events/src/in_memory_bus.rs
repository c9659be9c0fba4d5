//! Process-local [`EventBus`]: one channel per subscriber, fan-out on the
//! publishing thread.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InMemoryBusError {
    #[error("event bus subscriber registry is poisoned")]
    Poisoned,
}

/// Subscribers in the order they subscribed.
#[derive(Debug)]
struct Subscribers<M> {
    next_id: u64,
    senders: BTreeMap<u64, Sender<M>>,
    published: u64,
}

/// Lifecycle events for the coordinator, notification workers and tests
/// living in one process. Nothing is buffered for subscribers that join
/// late, and a subscriber whose [`Subscription`] was dropped is forgotten at
/// the next publish.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Subscribers<M>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map_or(0, |s| s.senders.len())
    }

    /// Messages accepted by [`EventBus::publish`] so far.
    pub fn published_count(&self) -> u64 {
        self.subscribers.lock().map_or(0, |s| s.published)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Subscribers {
                next_id: 0,
                senders: BTreeMap::new(),
                published: 0,
            }),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subscribers = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        subscribers.published += 1;

        let gone: Vec<u64> = subscribers
            .senders
            .iter()
            .filter(|(_, tx)| tx.send(message.clone()).is_err())
            .map(|(id, _)| *id)
            .collect();
        for id in gone {
            subscribers.senders.remove(&id);
        }
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        // Registration survives a poisoned lock.
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.senders.insert(id, tx);
        Subscription::new(rx)
    }
}

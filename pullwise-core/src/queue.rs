//! Message source abstraction and the in-process channel broker
//!
//! Delivery is at-least-once: a message stays pending from `recv` until it is
//! committed. A consumer that gives up on a delivery releases it; the broker
//! puts it back on the queue until it has been delivered `max_deliveries`
//! times, after which it stays pending for inspection.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::models::ReviewEvent;
use crate::{Error, Result};

/// Default channel capacity
pub const DEFAULT_CAPACITY: usize = 2000;

/// One delivery of a queued payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Broker-assigned id, stable across redeliveries
    pub id: u64,
    pub payload: Vec<u8>,
    /// 1 for the first delivery, incremented on each redelivery
    pub delivery: u32,
}

/// A source of queued messages shared by competing consumers
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Next message, or `None` once the source is closed and drained
    async fn recv(&self) -> Option<QueueMessage>;

    /// Acknowledge a message so it is never redelivered
    async fn commit(&self, message: &QueueMessage) -> Result<()>;

    /// Give up on a delivery without acknowledging it
    ///
    /// With `redeliver` the source may hand the message out again; without it
    /// the message is parked. Sources without nack support ignore this and
    /// rely on their own redelivery timeout.
    async fn release(&self, message: &QueueMessage, redeliver: bool) -> Result<()> {
        let _ = (message, redeliver);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Ledger {
    closed: bool,
    /// Delivered and not yet committed, by id
    pending: BTreeMap<u64, QueueMessage>,
    /// Pending deliveries that may still come back through `release`
    in_flight: BTreeSet<u64>,
    /// Sends started but not yet on the channel
    sending: usize,
    committed: u64,
}

impl Ledger {
    /// Nothing queued can appear anymore once the channel is empty
    fn drained(&self) -> bool {
        self.closed && self.in_flight.is_empty() && self.sending == 0
    }
}

/// Bounded in-process queue with commit bookkeeping
#[derive(Debug)]
pub struct ChannelQueue {
    sender: mpsc::Sender<QueueMessage>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<QueueMessage>>,
    ledger: Mutex<Ledger>,
    settled: Notify,
    next_id: AtomicU64,
    max_deliveries: u32,
}

impl ChannelQueue {
    /// A queue that never redelivers released messages
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            ledger: Mutex::new(Ledger::default()),
            settled: Notify::new(),
            next_id: AtomicU64::new(1),
            max_deliveries: 1,
        }
    }

    /// Redeliver released messages until each was delivered `max` times
    ///
    /// Consumers of a redelivering queue must commit or release every message
    /// they receive; `recv` only reports the end once nothing is in flight.
    pub fn with_max_deliveries(mut self, max: u32) -> Self {
        self.max_deliveries = max.max(1);
        self
    }

    pub fn max_deliveries(&self) -> u32 {
        self.max_deliveries
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push onto the channel; the caller has already counted it in `sending`
    async fn send(&self, message: QueueMessage) -> Result<()> {
        let result = self
            .sender
            .send(message)
            .await
            .map_err(|_| Error::Queue("Queue receiver dropped".to_string()));
        self.ledger().sending -= 1;
        self.settled.notify_waiters();
        result
    }

    /// Enqueue a raw payload, waiting for capacity; returns the message id
    pub async fn publish(&self, payload: impl Into<Vec<u8>>) -> Result<u64> {
        {
            let mut ledger = self.ledger();
            if ledger.closed {
                return Err(Error::Queue("Queue is closed".to_string()));
            }
            ledger.sending += 1;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.send(QueueMessage {
            id,
            payload: payload.into(),
            delivery: 1,
        })
        .await?;
        Ok(id)
    }

    /// Enqueue a review event as JSON
    pub async fn publish_event(&self, event: &ReviewEvent) -> Result<u64> {
        self.publish(event.to_json()?).await
    }

    /// Stop accepting new messages
    ///
    /// Consumers drain what is queued, including redeliveries of messages
    /// still in flight, and then see `None`.
    pub fn close(&self) {
        let newly_closed = !std::mem::replace(&mut self.ledger().closed, true);
        if newly_closed {
            debug!("Queue closed");
        }
        self.settled.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.ledger().closed
    }

    /// Messages delivered but not yet committed, by id
    pub fn pending(&self) -> Vec<QueueMessage> {
        self.ledger().pending.values().cloned().collect()
    }

    /// Number of committed messages
    pub fn committed(&self) -> u64 {
        self.ledger().committed
    }

    /// Messages waiting on the channel, not yet received
    pub fn backlog(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Put every pending message that is not in flight back on the queue
    ///
    /// Fails on a closed queue and leaves pending messages untouched. A
    /// message whose send fails stays pending. Returns how many were queued.
    pub async fn redeliver_pending(&self) -> Result<usize> {
        let parked: Vec<QueueMessage> = {
            let mut ledger = self.ledger();
            if ledger.closed {
                return Err(Error::Queue("Queue is closed".to_string()));
            }
            let ids: Vec<u64> = ledger
                .pending
                .keys()
                .filter(|id| !ledger.in_flight.contains(*id))
                .copied()
                .collect();
            ledger.sending += ids.len();
            let parked: Vec<QueueMessage> = ids
                .iter()
                .filter_map(|id| ledger.pending.remove(id))
                .collect();
            parked
        };

        let mut queued = 0;
        let mut remaining = parked.into_iter();
        while let Some(message) = remaining.next() {
            if let Err(e) = self.requeue(message).await {
                // Undo the reservation for messages never attempted
                let mut ledger = self.ledger();
                for message in remaining {
                    ledger.sending -= 1;
                    ledger.pending.insert(message.id, message);
                }
                drop(ledger);
                self.settled.notify_waiters();
                return Err(e);
            }
            queued += 1;
        }
        Ok(queued)
    }

    /// Send the next delivery of `message`; on failure it is pending again
    async fn requeue(&self, message: QueueMessage) -> Result<()> {
        let mut next = message.clone();
        next.delivery += 1;
        debug!(id = next.id, delivery = next.delivery, "Redelivering message");

        let result = self.send(next).await;
        if result.is_err() {
            self.ledger().pending.insert(message.id, message);
        }
        result
    }

    fn track(&self, message: QueueMessage) -> QueueMessage {
        let mut ledger = self.ledger();
        if message.delivery < self.max_deliveries {
            ledger.in_flight.insert(message.id);
        }
        ledger.pending.insert(message.id, message.clone());
        message
    }
}

impl Default for ChannelQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl MessageSource for ChannelQueue {
    async fn recv(&self) -> Option<QueueMessage> {
        let mut receiver = self.receiver.lock().await;
        loop {
            // Registered before the checks so a settle in between still wakes us
            let settled = self.settled.notified();

            match receiver.try_recv() {
                Ok(message) => return Some(self.track(message)),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {}
            }
            if self.ledger().drained() {
                return None;
            }

            tokio::select! {
                message = receiver.recv() => return message.map(|m| self.track(m)),
                _ = settled => {}
            }
        }
    }

    async fn commit(&self, message: &QueueMessage) -> Result<()> {
        {
            let mut ledger = self.ledger();
            if ledger.pending.remove(&message.id).is_none() {
                return Err(Error::Queue(format!("Message {} is not pending", message.id)));
            }
            ledger.in_flight.remove(&message.id);
            ledger.committed += 1;
        }
        self.settled.notify_waiters();
        Ok(())
    }

    async fn release(&self, message: &QueueMessage, redeliver: bool) -> Result<()> {
        let requeue = {
            let mut ledger = self.ledger();
            if !ledger.pending.contains_key(&message.id) {
                return Err(Error::Queue(format!("Message {} is not pending", message.id)));
            }
            let was_in_flight = ledger.in_flight.remove(&message.id);
            if redeliver && was_in_flight {
                ledger.sending += 1;
                ledger.pending.remove(&message.id)
            } else {
                None
            }
        };

        match requeue {
            Some(parked) => self.requeue(parked).await,
            None => {
                if redeliver {
                    warn!(
                        id = message.id,
                        deliveries = message.delivery,
                        "Delivery limit reached, leaving message uncommitted"
                    );
                }
                self.settled.notify_waiters();
                Ok(())
            }
        }
    }
}

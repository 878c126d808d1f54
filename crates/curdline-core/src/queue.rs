//! Bounded FIFO stores between stages.
//!
//! A store never completes a `get` on an empty queue and never holds
//! more than its capacity: full stores park the producer together with
//! its batch, empty stores park the consumer. The scheduler performs
//! the actual wakeups; store methods only report who to wake.

use std::collections::VecDeque;

use crate::batch::Batch;
use crate::error::SimError;
use crate::fixed::Ticks;
use crate::id::{ProcessId, QueueId};

/// Outcome of a `put` for the producer.
#[derive(Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// The batch was accepted; resume the producer with `Delivered`.
    Delivered,
    /// Store full; the producer is parked holding nothing (the store
    /// holds its batch) until a `get` frees a slot.
    Parked,
}

/// Outcome of a `get` for the consumer.
#[derive(Debug)]
pub enum GetOutcome {
    /// A batch was available; resume the consumer with `Received`.
    Received(Batch),
    /// Store empty; the consumer is parked until the next `put`.
    Parked,
}

/// A process to resume because a store operation unblocked it.
#[derive(Debug)]
pub enum Wakeup {
    /// A parked producer's batch was admitted.
    ProducerDelivered(ProcessId),
    /// A parked consumer receives this batch.
    ConsumerReceived(ProcessId, Batch),
}

/// Bounded FIFO store. `capacity: None` means unbounded.
#[derive(Debug)]
pub struct Store {
    id: QueueId,
    capacity: Option<usize>,
    items: VecDeque<Batch>,
    pending_producers: VecDeque<(ProcessId, Batch)>,
    pending_consumers: VecDeque<ProcessId>,
}

impl Store {
    pub fn new(id: QueueId, capacity: Option<usize>) -> Self {
        Self {
            id,
            capacity,
            items: VecDeque::new(),
            pending_producers: VecDeque::new(),
            pending_consumers: VecDeque::new(),
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Current occupancy. Never exceeds capacity at any observable
    /// instant.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn has_room(&self) -> bool {
        match self.capacity {
            Some(c) => self.items.len() < c,
            None => true,
        }
    }

    /// Producer offers a batch. If a consumer is parked the batch is
    /// handed straight to it; otherwise it joins the queue if there is
    /// room, or the producer parks.
    pub fn put(&mut self, producer: ProcessId, batch: Batch) -> (PutOutcome, Option<Wakeup>) {
        if let Some(consumer) = self.pending_consumers.pop_front() {
            // Consumers park only on empty, so the direct handoff
            // preserves FIFO and occupancy.
            return (
                PutOutcome::Delivered,
                Some(Wakeup::ConsumerReceived(consumer, batch)),
            );
        }
        if self.has_room() {
            self.items.push_back(batch);
            (PutOutcome::Delivered, None)
        } else {
            self.pending_producers.push_back((producer, batch));
            (PutOutcome::Parked, None)
        }
    }

    /// Consumer requests a batch. Freeing a slot admits exactly the
    /// first parked producer.
    pub fn get(&mut self, consumer: ProcessId) -> (GetOutcome, Option<Wakeup>) {
        match self.items.pop_front() {
            Some(batch) => {
                let wake = self.pending_producers.pop_front().map(|(pid, parked)| {
                    self.items.push_back(parked);
                    Wakeup::ProducerDelivered(pid)
                });
                (GetOutcome::Received(batch), wake)
            }
            None => {
                // Zero-capacity stores rendezvous: hand a parked
                // producer's batch straight across.
                if let Some((pid, parked)) = self.pending_producers.pop_front() {
                    return (
                        GetOutcome::Received(parked),
                        Some(Wakeup::ProducerDelivered(pid)),
                    );
                }
                self.pending_consumers.push_back(consumer);
                (GetOutcome::Parked, None)
            }
        }
    }

    /// Direct removal used for post-run collection of finished goods.
    /// Performs no producer admission; only call once the run has
    /// ended.
    pub fn drain_one(&mut self) -> Option<Batch> {
        self.items.pop_front()
    }

    /// Direct append used for pre-run seeding. Exceeding capacity here
    /// is a wiring defect, not backpressure.
    pub fn seed(&mut self, batch: Batch, at: Ticks) -> Result<(), SimError> {
        if !self.has_room() {
            return Err(SimError::CapacityViolation {
                queue: self.id,
                capacity: self.capacity.unwrap_or(0),
                at,
            });
        }
        self.items.push_back(batch);
        Ok(())
    }
}

//! Signal-driven handoff queue
//!
//! A FIFO shared by exactly one producer and one consumer. Every enqueue
//! appends under the queue lock and then fires one auto-resetting wake
//! (`notify_one`, no latched state). The wake only says "look again": the
//! consumer always re-checks the queue itself, so a burst of enqueues that
//! collapses into fewer wakes loses nothing, and a wake that finds the queue
//! empty is absorbed by blocking again.
//!
//! A bounded queue adds a second "slot available" wake that the producer
//! waits on before producing. With capacity 1 producer and consumer
//! strictly alternate. Closing the queue releases a producer parked on a
//! full queue once the consumer is gone.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Item passed through a [`SignalQueue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<T> {
    /// Payload owned by whoever dequeues it
    Data(T),
    /// Sentinel: no more messages follow
    Done,
}

impl<T> Message<T> {
    /// Whether this is the terminal sentinel
    pub fn is_done(&self) -> bool {
        matches!(self, Message::Done)
    }

    /// Take the payload, if any
    pub fn into_data(self) -> Option<T> {
        match self {
            Message::Data(value) => Some(value),
            Message::Done => None,
        }
    }
}

/// Returned to a producer offering a message after the queue was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queue closed by the consumer")]
pub struct QueueClosed;

/// Counters describing queue traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages appended (sentinels included)
    pub enqueued: u64,
    /// Messages removed
    pub dequeued: u64,
    /// Wakes that found nothing to dequeue and went back to sleep
    pub empty_wakeups: u64,
    /// Largest depth observed right after an enqueue
    pub high_water: usize,
}

struct State<T> {
    items: VecDeque<Message<T>>,
    waiting: usize,
    closed: bool,
    stats: QueueStats,
}

/// Thread-safe FIFO with blocking wait-for-item semantics
pub struct SignalQueue<T> {
    state: Mutex<State<T>>,
    item_available: Condvar,
    slot_available: Condvar,
    capacity: Option<usize>,
}

impl<T> SignalQueue<T> {
    /// Queue with no depth limit
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Queue whose producer waits for a free slot before producing.
    ///
    /// A capacity of 0 is treated as 1.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                waiting: 0,
                closed: false,
                stats: QueueStats::default(),
            }),
            item_available: Condvar::new(),
            slot_available: Condvar::new(),
            capacity,
        }
    }

    /// Depth limit, `None` when unbounded
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Number of pending messages
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether no message is pending
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Number of consumers currently blocked in a dequeue
    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiting
    }

    /// Snapshot of the traffic counters
    pub fn stats(&self) -> QueueStats {
        self.state.lock().stats
    }

    /// Append to the tail and raise the wake signal. Never waits for space.
    pub fn enqueue(&self, message: Message<T>) {
        let mut state = self.state.lock();
        Self::push(&mut state, message);
        drop(state);
        self.item_available.notify_one();
    }

    /// Block until the queue has room for one more message.
    ///
    /// Returns immediately on an unbounded queue. Fails with [`QueueClosed`]
    /// once the queue is closed.
    pub fn wait_for_slot(&self) -> Result<(), QueueClosed> {
        let mut state = self.state.lock();
        self.wait_for_room(&mut state)
    }

    /// Wait for a free slot and enqueue under the same guard hold.
    ///
    /// The message is dropped if the queue is closed before it fits.
    pub fn enqueue_with_backpressure(&self, message: Message<T>) -> Result<(), QueueClosed> {
        let mut state = self.state.lock();
        self.wait_for_room(&mut state)?;
        Self::push(&mut state, message);
        drop(state);
        self.item_available.notify_one();
        Ok(())
    }

    /// Mark the consumer as gone and wake any producer waiting for room.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            tracing::debug!(pending = state.items.len(), "queue closed");
        }
        drop(state);
        self.slot_available.notify_all();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn wait_for_room(&self, state: &mut MutexGuard<'_, State<T>>) -> Result<(), QueueClosed> {
        loop {
            if state.closed {
                return Err(QueueClosed);
            }
            match self.capacity {
                Some(capacity) if state.items.len() >= capacity => {
                    self.slot_available.wait(state);
                }
                _ => return Ok(()),
            }
        }
    }

    /// Block until a message is available, then remove and return the head.
    pub fn dequeue_blocking(&self) -> Message<T> {
        let mut state = self.state.lock();
        let mut woke = false;
        loop {
            if let Some(message) = self.pop(&mut state) {
                return message;
            }
            if woke {
                state.stats.empty_wakeups += 1;
                tracing::trace!(queue.op = "empty-wakeup");
            }
            state.waiting += 1;
            self.item_available.wait(&mut state);
            state.waiting -= 1;
            woke = true;
        }
    }

    /// Like [`dequeue_blocking`](Self::dequeue_blocking) but gives up after
    /// `timeout`.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<Message<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let mut woke = false;
        loop {
            if let Some(message) = self.pop(&mut state) {
                return Some(message);
            }
            if woke {
                state.stats.empty_wakeups += 1;
            }
            state.waiting += 1;
            let result = self.item_available.wait_until(&mut state, deadline);
            state.waiting -= 1;
            if result.timed_out() {
                return self.pop(&mut state);
            }
            woke = true;
        }
    }

    /// Remove the head without blocking
    pub fn try_dequeue(&self) -> Option<Message<T>> {
        let mut state = self.state.lock();
        self.pop(&mut state)
    }

    fn push(state: &mut State<T>, message: Message<T>) {
        tracing::trace!(queue.op = "enqueue", done = message.is_done());
        state.items.push_back(message);
        state.stats.enqueued += 1;
        state.stats.high_water = state.stats.high_water.max(state.items.len());
    }

    fn pop(&self, state: &mut State<T>) -> Option<Message<T>> {
        let message = state.items.pop_front()?;
        state.stats.dequeued += 1;
        tracing::trace!(queue.op = "dequeue", done = message.is_done());
        if self.capacity.is_some() {
            self.slot_available.notify_one();
        }
        Some(message)
    }

    /// Fire a wake without enqueueing anything.
    #[cfg(test)]
    fn spurious_wake(&self) -> bool {
        self.item_available.notify_one()
    }
}

impl<T> Default for SignalQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

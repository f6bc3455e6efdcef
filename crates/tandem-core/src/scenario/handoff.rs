//! Producer/consumer handoff over a [`SignalQueue`]

use super::{join_named, spawn_named, ScenarioError};
use crate::config::HandoffConfig;
use crate::queue::{Message, QueueClosed, QueueStats, SignalQueue};
use std::thread;

/// Input that makes the producer stop early
pub const QUIT: &str = "QUIT";

/// Result of a handoff run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffReport {
    /// Payloads in the order the consumer received them
    pub received: Vec<String>,
    /// Payloads the producer enqueued
    pub sent: usize,
    /// Whether the consumer stopped on the sentinel
    pub sentinel_seen: bool,
    /// Whether the capacity-1 lock-step queue was used
    pub lockstep: bool,
    /// Queue counters at the end of the run
    pub stats: QueueStats,
}

/// Run one producer and one consumer over a fresh queue.
///
/// The producer takes up to `config.max_messages` items from `messages`,
/// stopping early at [`QUIT`], then sends the sentinel. `on_receive` runs on
/// the consumer thread for every payload.
pub fn run<I, F>(
    config: &HandoffConfig,
    messages: I,
    mut on_receive: F,
) -> Result<HandoffReport, ScenarioError>
where
    I: IntoIterator<Item = String>,
    I::IntoIter: Send,
    F: FnMut(&str) + Send,
{
    let queue = if config.lockstep {
        SignalQueue::<String>::bounded(1)
    } else {
        SignalQueue::<String>::unbounded()
    };
    let lockstep = config.lockstep;
    let max_messages = config.max_messages;
    let messages = messages.into_iter();

    let (sent, (received, sentinel_seen)) = thread::scope(|s| {
        let queue = &queue;

        let consumer = spawn_named(s, "handoff-consumer", move || {
            let _closer = CloseOnExit(queue);
            let mut received = Vec::new();
            loop {
                match queue.dequeue_blocking() {
                    Message::Data(text) => {
                        on_receive(text.as_str());
                        received.push(text);
                    }
                    Message::Done => return (received, true),
                }
            }
        })?;

        let producer = spawn_named(s, "handoff-producer", move || {
            let _finisher = FinishOnPanic(queue);
            let mut sent = 0;
            for text in messages.take(max_messages) {
                if text == QUIT {
                    break;
                }
                tracing::debug!(message = %text, "producing");
                if offer(queue, lockstep, Message::Data(text)).is_err() {
                    tracing::warn!(sent, "consumer gone, producer stopping");
                    return sent;
                }
                sent += 1;
            }
            if offer(queue, lockstep, Message::Done).is_err() {
                tracing::warn!(sent, "consumer gone before the sentinel");
            }
            sent
        });
        let producer = match producer {
            Ok(handle) => handle,
            Err(err) => {
                // Let the consumer finish so the scope can close.
                queue.enqueue(Message::Done);
                return Err(err);
            }
        };

        let sent = join_named(producer, "handoff-producer");
        let consumed = join_named(consumer, "handoff-consumer");
        Ok::<_, ScenarioError>((sent?, consumed?))
    })?;

    Ok(HandoffReport {
        received,
        sent,
        sentinel_seen,
        lockstep,
        stats: queue.stats(),
    })
}

fn offer(
    queue: &SignalQueue<String>,
    lockstep: bool,
    message: Message<String>,
) -> Result<(), QueueClosed> {
    if lockstep {
        queue.enqueue_with_backpressure(message)
    } else {
        queue.enqueue(message);
        Ok(())
    }
}

/// Closes the queue when the consumer returns or unwinds.
struct CloseOnExit<'q>(&'q SignalQueue<String>);

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Sends the sentinel if the producer unwinds, so the consumer can finish.
struct FinishOnPanic<'q>(&'q SignalQueue<String>);

impl Drop for FinishOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.enqueue(Message::Done);
        }
    }
}

//! Two-resource locking with ordered and bounded-wait protocols
//!
//! [`OrderedLockPair`] guards two independent resources, A and B.
//!
//! - Strict-order mode ([`OrderedLockPair::with_both`]) always takes A
//!   before B and releases B before A. No caller can hold B while waiting
//!   for A, so no wait cycle can form.
//! - Bounded-wait mode ([`OrderedLockPair::try_with_both`]) lets callers pick
//!   either order. Every acquisition waits at most `timeout`. A caller that
//!   cannot get its second resource releases the first and reports
//!   [`PairError::LockTimeout`], which breaks any cycle. Retrying is up to
//!   the caller ([`OrderedLockPair::retry_with_both`] does it with jittered
//!   backoff). Eventual success under retry is the only liveness promise:
//!   there is no fairness or starvation bound.
//!
//! Every transition (requested, acquired, denied, released) is traced, and
//! recorded in the journal when it is enabled. Journal entries are written
//! while the resource is still held, so the journal order matches the real
//! lock order.

use crate::id::ActorId;
use parking_lot::{Mutex, MutexGuard};
use rand::Rng;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// One of the two guarded resources
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    /// First resource in the global order
    A,
    /// Second resource in the global order
    B,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::A => f.write_str("A"),
            Resource::B => f.write_str("B"),
        }
    }
}

/// Acquisition order for bounded-wait attempts
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AcquireOrder {
    /// A first, then B (the global order)
    AThenB,
    /// B first, then A
    BThenA,
}

impl AcquireOrder {
    /// Resource requested first
    pub fn first(self) -> Resource {
        match self {
            AcquireOrder::AThenB => Resource::A,
            AcquireOrder::BThenA => Resource::B,
        }
    }

    /// Resource requested second
    pub fn second(self) -> Resource {
        match self {
            AcquireOrder::AThenB => Resource::B,
            AcquireOrder::BThenA => Resource::A,
        }
    }
}

/// Lock state change observed for one resource
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Actor asked for the resource
    Requested,
    /// Actor now holds the resource
    Acquired,
    /// Bounded wait expired without the resource
    Denied,
    /// Actor gave the resource back
    Released,
}

/// Journal entry
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LockEvent {
    /// Actor that caused the transition
    pub actor: ActorId,
    /// Resource concerned
    pub resource: Resource,
    /// What happened
    pub transition: Transition,
}

/// Errors reported by the bounded-wait protocol
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PairError {
    /// A resource was not obtained within the bounded wait. Any resource the
    /// attempt held has already been released.
    #[error("{actor} timed out after {timeout:?} waiting for resource {resource}")]
    LockTimeout {
        /// Actor whose attempt failed
        actor: ActorId,
        /// Resource that could not be obtained
        resource: Resource,
        /// Resource that was held and released again, if any
        held: Option<Resource>,
        /// Bound that expired
        timeout: Duration,
    },
}

impl PairError {
    /// Whether repeating the attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, PairError::LockTimeout { .. })
    }
}

/// Aggregate counters for a pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairStats {
    /// Times a closure ran with both resources held
    pub paired_runs: u64,
    /// Bounded waits that expired
    pub timeouts: u64,
}

/// Jittered exponential backoff between bounded-wait attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Total attempts before giving up (at least one is always made)
    pub max_attempts: u32,
    /// Delay ceiling after the first failure
    pub base: Duration,
    /// Upper bound for any single delay
    pub cap: Duration,
}

impl Backoff {
    /// Random delay to sleep after failed attempt number `attempt` (1-based)
    pub fn delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let base_us = u64::try_from(self.base.as_micros()).unwrap_or(u64::MAX);
        let cap_us = u64::try_from(self.cap.as_micros()).unwrap_or(u64::MAX);
        let ceiling = base_us.saturating_mul(1u64 << shift).min(cap_us);
        Duration::from_micros(rng.gen_range(0..=ceiling))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 16,
            base: Duration::from_micros(50),
            cap: Duration::from_millis(5),
        }
    }
}

/// Successful retried attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<R> {
    /// Closure result
    pub value: R,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

struct Journal {
    events: Option<Mutex<Vec<LockEvent>>>,
}

impl Journal {
    fn record(&self, actor: ActorId, resource: Resource, transition: Transition) {
        tracing::trace!(%actor, %resource, ?transition, "lock transition");
        if let Some(events) = &self.events {
            events.lock().push(LockEvent {
                actor,
                resource,
                transition,
            });
        }
    }
}

/// A held resource that journals its release
struct Held<'p, T> {
    guard: MutexGuard<'p, T>,
    journal: &'p Journal,
    actor: ActorId,
    resource: Resource,
}

impl<T> Deref for Held<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for Held<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for Held<'_, T> {
    fn drop(&mut self) {
        // Recorded before the guard field unlocks.
        self.journal
            .record(self.actor, self.resource, Transition::Released);
    }
}

/// Two independently lockable resources with deadlock-free access protocols
pub struct OrderedLockPair<A, B> {
    a: Mutex<A>,
    b: Mutex<B>,
    journal: Journal,
    paired_runs: AtomicU64,
    timeouts: AtomicU64,
}

impl<A, B> OrderedLockPair<A, B> {
    /// Create a pair guarding `a` and `b`, with the journal disabled
    pub fn new(a: A, b: B) -> Self {
        Self {
            a: Mutex::new(a),
            b: Mutex::new(b),
            journal: Journal { events: None },
            paired_runs: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    /// Enable the transition journal
    pub fn journaled(mut self) -> Self {
        self.journal.events = Some(Mutex::new(Vec::new()));
        self
    }

    /// Copy of every recorded transition, oldest first. Empty when the
    /// journal is disabled.
    pub fn journal(&self) -> Vec<LockEvent> {
        self.journal
            .events
            .as_ref()
            .map(|events| events.lock().clone())
            .unwrap_or_default()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> PairStats {
        PairStats {
            paired_runs: self.paired_runs.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Consume the pair and return both resources
    pub fn into_inner(self) -> (A, B) {
        (self.a.into_inner(), self.b.into_inner())
    }

    /// Strict-order access: take A, then B, run `f`, release B, then A.
    pub fn with_both<R>(&self, actor: ActorId, f: impl FnOnce(&mut A, &mut B) -> R) -> R {
        let mut a = self.hold(&self.a, actor, Resource::A);
        let mut b = self.hold(&self.b, actor, Resource::B);
        let out = f(&mut *a, &mut *b);
        self.paired_runs.fetch_add(1, Ordering::Relaxed);
        drop(b);
        drop(a);
        out
    }

    /// Bounded-wait access in the given order.
    ///
    /// If the first resource is not obtained within `timeout` the second is
    /// never requested. If the second is not obtained the first is released
    /// before returning. In both cases `f` does not run.
    #[must_use = "a timed-out attempt must be retried or reported"]
    pub fn try_with_both<R>(
        &self,
        actor: ActorId,
        order: AcquireOrder,
        timeout: Duration,
        f: impl FnOnce(&mut A, &mut B) -> R,
    ) -> Result<R, PairError> {
        let out = match order {
            AcquireOrder::AThenB => {
                let mut a = self.hold_within(&self.a, actor, Resource::A, timeout, None)?;
                let mut b =
                    self.hold_within(&self.b, actor, Resource::B, timeout, Some(Resource::A))?;
                let out = f(&mut *a, &mut *b);
                drop(b);
                drop(a);
                out
            }
            AcquireOrder::BThenA => {
                let mut b = self.hold_within(&self.b, actor, Resource::B, timeout, None)?;
                let mut a =
                    self.hold_within(&self.a, actor, Resource::A, timeout, Some(Resource::B))?;
                let out = f(&mut *a, &mut *b);
                drop(a);
                drop(b);
                out
            }
        };
        self.paired_runs.fetch_add(1, Ordering::Relaxed);
        Ok(out)
    }

    /// Repeat [`try_with_both`](Self::try_with_both) with jittered backoff
    /// until it succeeds or `backoff.max_attempts` is used up. On exhaustion
    /// the last timeout is returned.
    #[must_use = "exhausted retries must be reported"]
    pub fn retry_with_both<R>(
        &self,
        actor: ActorId,
        order: AcquireOrder,
        timeout: Duration,
        backoff: &Backoff,
        mut f: impl FnMut(&mut A, &mut B) -> R,
    ) -> Result<Retried<R>, PairError> {
        let mut rng = rand::thread_rng();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.try_with_both(actor, order, timeout, &mut f) {
                Ok(value) => return Ok(Retried { value, attempts }),
                Err(err) if attempts >= backoff.max_attempts => {
                    tracing::warn!(%actor, attempts, error = %err, "giving up on lock pair");
                    return Err(err);
                }
                Err(_) => {
                    let delay = backoff.delay(attempts, &mut rng);
                    tracing::trace!(%actor, attempts, ?delay, "backing off");
                    thread::sleep(delay);
                }
            }
        }
    }

    fn hold<'p, T>(
        &'p self,
        lock: &'p Mutex<T>,
        actor: ActorId,
        resource: Resource,
    ) -> Held<'p, T> {
        self.journal.record(actor, resource, Transition::Requested);
        let guard = lock.lock();
        self.journal.record(actor, resource, Transition::Acquired);
        Held {
            guard,
            journal: &self.journal,
            actor,
            resource,
        }
    }

    fn hold_within<'p, T>(
        &'p self,
        lock: &'p Mutex<T>,
        actor: ActorId,
        resource: Resource,
        timeout: Duration,
        held: Option<Resource>,
    ) -> Result<Held<'p, T>, PairError> {
        self.journal.record(actor, resource, Transition::Requested);
        match lock.try_lock_for(timeout) {
            Some(guard) => {
                self.journal.record(actor, resource, Transition::Acquired);
                Ok(Held {
                    guard,
                    journal: &self.journal,
                    actor,
                    resource,
                })
            }
            None => {
                self.journal.record(actor, resource, Transition::Denied);
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                Err(PairError::LockTimeout {
                    actor,
                    resource,
                    held,
                    timeout,
                })
            }
        }
    }
}

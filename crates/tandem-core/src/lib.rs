//! Tandem concurrency core
//!
//! This crate provides the coordination primitives behind the `tandem`
//! demonstrations:
//! - Signal-driven handoff queue (one producer, one consumer)
//! - Two-resource lock pair with ordered and bounded-wait protocols
//! - Cross-process turn token with abandonment detection (unix)
//! - Cooperative cancellation
//! - Scenario drivers and configuration

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cancel;
pub mod config;
pub mod id;
pub mod lock_pair;
pub mod queue;
pub mod scenario;
#[cfg(unix)]
pub mod turn;

pub use cancel::CancelFlag;
pub use config::{ConfigError, HandoffConfig, RaceConfig, TandemConfig, TurnConfig};
pub use id::{ActorId, OwnerId};
pub use lock_pair::{AcquireOrder, Backoff, OrderedLockPair, PairError, Resource};
pub use queue::{Message, QueueClosed, QueueStats, SignalQueue};
pub use scenario::ScenarioError;
#[cfg(unix)]
pub use turn::{Acquisition, TurnError, TurnState, TurnToken};

//! Demonstration scenarios wiring the primitives together
//!
//! Each scenario builds its own shared state and hands it to the threads
//! (or processes) that need it. Nothing is global.

pub mod dual_lock;
pub mod handoff;
#[cfg(unix)]
pub mod turn_passing;

use std::io;
use std::thread::{Scope, ScopedJoinHandle};

/// Errors surfaced by scenario drivers
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// A worker thread could not be started
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        /// Thread role
        name: &'static str,
        /// OS error
        #[source]
        source: io::Error,
    },

    /// A worker thread panicked
    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),

    /// Turn token failure
    #[cfg(unix)]
    #[error(transparent)]
    Turn(#[from] crate::turn::TurnError),

    /// Turn ledger failure
    #[cfg(unix)]
    #[error(transparent)]
    Ledger(#[from] turn_passing::LedgerError),
}

/// Spawn a named scoped thread
pub(crate) fn spawn_named<'scope, 'env, T, F>(
    scope: &'scope Scope<'scope, 'env>,
    name: &'static str,
    f: F,
) -> Result<ScopedJoinHandle<'scope, T>, ScenarioError>
where
    F: FnOnce() -> T + Send + 'scope,
    T: Send + 'scope,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn_scoped(scope, f)
        .map_err(|source| ScenarioError::Spawn { name, source })
}

/// Join a scoped thread, mapping a panic to an error
pub(crate) fn join_named<T>(
    handle: ScopedJoinHandle<'_, T>,
    name: &'static str,
) -> Result<T, ScenarioError> {
    handle
        .join()
        .map_err(|_| ScenarioError::WorkerPanicked(name))
}

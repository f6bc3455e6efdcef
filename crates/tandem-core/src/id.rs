//! Identifiers for lock-pair actors and turn-token owners

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for an actor contending on an [`OrderedLockPair`]
///
/// [`OrderedLockPair`]: crate::lock_pair::OrderedLockPair
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(u64);

static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);

impl ActorId {
    /// Allocate the next actor id. Ids are never reused within a process.
    pub fn next() -> Self {
        ActorId(NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}", self.0)
    }
}

/// Identity of one turn-token handle: the owning process plus a
/// per-process handle number.
///
/// Two handles opened by the same process are distinct owners, so threads
/// can stand in for processes in tests.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct OwnerId {
    pid: u32,
    handle: u64,
}

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

impl OwnerId {
    /// Allocate the next owner identity for the current process
    pub fn next() -> Self {
        Self {
            pid: std::process::id(),
            handle: NEXT_HANDLE.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Build an OwnerId from its parts
    pub fn from_parts(pid: u32, handle: u64) -> Self {
        Self { pid, handle }
    }

    /// Process id of the owner
    pub fn pid(self) -> u32 {
        self.pid
    }

    /// Handle number within the owning process
    pub fn handle(self) -> u64 {
        self.handle
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid, self.handle)
    }
}

/// Error returned when an owner record cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed owner id: {0:?}")]
pub struct ParseOwnerIdError(pub String);

impl FromStr for OwnerId {
    type Err = ParseOwnerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseOwnerIdError(s.to_string());
        let (pid, handle) = s.trim().split_once(':').ok_or_else(err)?;
        Ok(Self {
            pid: pid.parse().map_err(|_| err())?,
            handle: handle.parse().map_err(|_| err())?,
        })
    }
}

//! Cross-process turn token with abandonment recovery
//!
//! A [`TurnToken`] is a named exclusive lock that every process on the host
//! can see. Processes rendezvous on `<dir>/<name>.turn`. The file carries an
//! advisory `flock` plus an owner record:
//!
//! - the kernel drops the `flock` when the holding descriptor closes, which
//!   includes the owner process dying, so a dead owner never blocks others
//!   forever;
//! - the owner record is written after locking and cleared before unlocking.
//!   A record still present when the lock is obtained means the previous
//!   owner went away without releasing, and the acquire reports
//!   [`Acquisition::Abandoned`].
//!
//! Locks belong to the open file description, so two handles opened by the
//! same process contend exactly like two processes do.

use crate::id::OwnerId;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// File extension of rendezvous files
pub const TOKEN_EXTENSION: &str = "turn";

const MAX_NAME_LEN: usize = 128;

/// Errors that can occur when using a TurnToken
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    /// Release attempted by a handle that does not own the token
    #[error("release by non-owner {caller} (recorded owner: {owner:?})")]
    OwnershipViolation {
        /// Handle that tried to release
        caller: OwnerId,
        /// Owner found in the record at the time, if readable
        owner: Option<OwnerId>,
    },

    /// Acquire attempted by a handle that already owns the token
    #[error("token already owned by {0}")]
    AlreadyOwned(OwnerId),

    /// Token name cannot be used as a rendezvous name
    #[error("invalid token name {0:?}")]
    InvalidName(String),

    /// Underlying file or lock operation failed
    #[error("turn token I/O on {path}: {source}")]
    Io {
        /// Rendezvous file
        path: PathBuf,
        /// OS error
        #[source]
        source: io::Error,
    },
}

/// Ownership as seen by one handle
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TurnState {
    /// This handle owns the token
    Owned(OwnerId),
    /// This handle does not own the token
    Released,
}

/// Outcome of a successful acquire
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// Previous owner released normally
    Clean,
    /// Previous owner vanished while owning. Whatever the token protects may
    /// be inconsistent and should be re-validated by the caller.
    Abandoned {
        /// Previous owner, when its record was readable
        previous: Option<OwnerId>,
    },
}

impl Acquisition {
    /// Whether the previous owner abandoned the token
    pub fn is_abandoned(&self) -> bool {
        matches!(self, Acquisition::Abandoned { .. })
    }
}

/// Check that `name` is usable as a rendezvous name
pub fn validate_name(name: &str) -> Result<(), TurnError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(TurnError::InvalidName(name.to_string()))
    }
}

/// Path of the rendezvous file for `name` inside `dir`
pub fn token_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.{}", name, TOKEN_EXTENSION))
}

/// Handle on a named, OS-visible exclusive token
pub struct TurnToken {
    name: String,
    path: PathBuf,
    file: File,
    id: OwnerId,
    owned: bool,
}

impl TurnToken {
    /// Create or attach to the token `name` inside `dir`
    pub fn open(dir: &Path, name: &str) -> Result<Self, TurnError> {
        validate_name(name)?;
        let path = token_path(dir, name);
        let io_err = |source: io::Error| TurnError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(dir).map_err(io_err)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;

        let id = OwnerId::next();
        tracing::debug!(
            token = name,
            owner = %id,
            path = %path.display(),
            "turn token opened"
        );
        Ok(Self {
            name: name.to_string(),
            path,
            file,
            id,
            owned: false,
        })
    }

    /// Token name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rendezvous file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identity of this handle
    pub fn owner_id(&self) -> OwnerId {
        self.id
    }

    /// Ownership from this handle's point of view
    pub fn state(&self) -> TurnState {
        if self.owned {
            TurnState::Owned(self.id)
        } else {
            TurnState::Released
        }
    }

    /// Block until the token is free, then take it.
    pub fn acquire(&mut self) -> Result<Acquisition, TurnError> {
        if self.owned {
            return Err(TurnError::AlreadyOwned(self.id));
        }
        tracing::trace!(token = %self.name, owner = %self.id, "waiting for turn");
        self.flock(libc::LOCK_EX)?;
        self.take_ownership()
    }

    /// Take the token only if it is free right now.
    pub fn try_acquire(&mut self) -> Result<Option<Acquisition>, TurnError> {
        if self.owned {
            return Err(TurnError::AlreadyOwned(self.id));
        }
        if !self.flock(libc::LOCK_EX | libc::LOCK_NB)? {
            return Ok(None);
        }
        self.take_ownership().map(Some)
    }

    /// Give the token back. Rejected outright when this handle is not the
    /// owner, without touching the record.
    pub fn release(&mut self) -> Result<(), TurnError> {
        if !self.owned {
            return Err(TurnError::OwnershipViolation {
                caller: self.id,
                owner: self.peek_owner(),
            });
        }
        self.write_record(None)?;
        self.flock(libc::LOCK_UN)?;
        self.owned = false;
        tracing::debug!(token = %self.name, owner = %self.id, "turn released");
        Ok(())
    }

    /// Clean shutdown: release if owned, then close the handle.
    pub fn close(mut self) -> Result<(), TurnError> {
        if self.owned {
            self.release()?;
        }
        Ok(())
    }

    /// Owner currently recorded in the rendezvous file. Read without the
    /// lock, so only informational.
    pub fn peek_owner(&self) -> Option<OwnerId> {
        fs::read_to_string(&self.path).ok()?.trim().parse().ok()
    }

    fn take_ownership(&mut self) -> Result<Acquisition, TurnError> {
        let outcome = match self.read_record() {
            Ok(None) => Acquisition::Clean,
            Ok(Some(record)) => Acquisition::Abandoned {
                previous: record.parse().ok(),
            },
            Err(err) => {
                self.unlock_after_failure(&err);
                return Err(err);
            }
        };
        if let Err(err) = self.write_record(Some(self.id)) {
            self.unlock_after_failure(&err);
            return Err(err);
        }
        self.owned = true;

        match outcome {
            Acquisition::Clean => {
                tracing::debug!(token = %self.name, owner = %self.id, "turn acquired");
            }
            Acquisition::Abandoned { previous } => {
                tracing::warn!(
                    token = %self.name,
                    owner = %self.id,
                    previous = ?previous.map(|p| p.to_string()),
                    "turn acquired from abandoned owner"
                );
            }
        }
        Ok(outcome)
    }

    fn unlock_after_failure(&self, cause: &TurnError) {
        if let Err(err) = self.flock(libc::LOCK_UN) {
            tracing::warn!(
                token = %self.name,
                cause = %cause,
                error = %err,
                "token may stay locked after a failed acquire"
            );
        }
    }

    fn read_record(&mut self) -> Result<Option<String>, TurnError> {
        let mut record = String::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_string(&mut record))
            .map_err(|source| self.io_error(source))?;
        let record = record.trim();
        Ok((!record.is_empty()).then(|| record.to_string()))
    }

    fn write_record(&mut self, owner: Option<OwnerId>) -> Result<(), TurnError> {
        let result = (|| {
            self.file.set_len(0)?;
            self.file.seek(SeekFrom::Start(0))?;
            if let Some(owner) = owner {
                writeln!(self.file, "{}", owner)?;
            }
            self.file.flush()
        })();
        result.map_err(|source| self.io_error(source))
    }

    /// Returns `Ok(false)` when a non-blocking request would have blocked.
    fn flock(&self, op: libc::c_int) -> Result<bool, TurnError> {
        loop {
            // SAFETY: the descriptor belongs to `self.file` and stays open for
            // the duration of the call.
            let rc = unsafe { libc::flock(self.file.as_raw_fd(), op) };
            if rc == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code) if code == libc::EINTR => continue,
                Some(code) if code == libc::EWOULDBLOCK && op & libc::LOCK_NB != 0 => {
                    return Ok(false)
                }
                _ => return Err(self.io_error(err)),
            }
        }
    }

    fn io_error(&self, source: io::Error) -> TurnError {
        TurnError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Drop for TurnToken {
    fn drop(&mut self) {
        if self.owned {
            tracing::warn!(
                token = %self.name,
                owner = %self.id,
                "turn token dropped while owned; next acquirer will recover it as abandoned"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_rendezvous_file() {
        let dir = tempdir().unwrap();
        let token = TurnToken::open(dir.path(), "demo").unwrap();
        assert_eq!(token.name(), "demo");
        assert_eq!(token.path(), dir.path().join("demo.turn"));
        assert!(token.path().exists());
        assert_eq!(token.state(), TurnState::Released);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let dir = tempdir().unwrap();
        let long = "x".repeat(200);
        for name in ["", ".", "..", "a/b", "white space", long.as_str()] {
            assert!(matches!(
                TurnToken::open(dir.path(), name),
                Err(TurnError::InvalidName(_))
            ));
        }
        assert!(validate_name("Mutex.Demo_1-a").is_ok());
    }

    #[test]
    fn test_acquire_release_cycle() {
        let dir = tempdir().unwrap();
        let mut token = TurnToken::open(dir.path(), "cycle").unwrap();

        assert_eq!(token.acquire().unwrap(), Acquisition::Clean);
        assert_eq!(token.state(), TurnState::Owned(token.owner_id()));
        assert_eq!(token.peek_owner(), Some(token.owner_id()));

        token.release().unwrap();
        assert_eq!(token.state(), TurnState::Released);
        assert_eq!(token.peek_owner(), None);

        assert_eq!(token.acquire().unwrap(), Acquisition::Clean);
        token.close().unwrap();
    }

    #[test]
    fn test_reacquire_by_owner_rejected() {
        let dir = tempdir().unwrap();
        let mut token = TurnToken::open(dir.path(), "reentrant").unwrap();
        token.acquire().unwrap();
        let owner = token.owner_id();
        assert!(matches!(token.acquire(), Err(TurnError::AlreadyOwned(id)) if id == owner));
        assert!(matches!(token.try_acquire(), Err(TurnError::AlreadyOwned(_))));
        token.release().unwrap();
    }

    #[test]
    fn test_release_by_non_owner_rejected() {
        let dir = tempdir().unwrap();
        let mut owner = TurnToken::open(dir.path(), "guarded").unwrap();
        let mut intruder = TurnToken::open(dir.path(), "guarded").unwrap();
        let mut bystander = TurnToken::open(dir.path(), "guarded").unwrap();

        owner.acquire().unwrap();
        match intruder.release() {
            Err(TurnError::OwnershipViolation { caller, owner: recorded }) => {
                assert_eq!(caller, intruder.owner_id());
                assert_eq!(recorded, Some(owner.owner_id()));
            }
            other => panic!("expected ownership violation, got {:?}", other),
        }

        // Owner state is untouched by the rejected release.
        assert_eq!(owner.state(), TurnState::Owned(owner.owner_id()));
        assert_eq!(owner.peek_owner(), Some(owner.owner_id()));
        assert_eq!(bystander.try_acquire().unwrap(), None);

        owner.release().unwrap();
        assert_eq!(bystander.try_acquire().unwrap(), Some(Acquisition::Clean));
        bystander.release().unwrap();
    }

    #[test]
    fn test_release_without_acquire_rejected() {
        let dir = tempdir().unwrap();
        let mut token = TurnToken::open(dir.path(), "idle").unwrap();
        assert!(matches!(
            token.release(),
            Err(TurnError::OwnershipViolation { owner: None, .. })
        ));
    }

    #[test]
    fn test_acquire_blocks_until_released() {
        let dir = tempdir().unwrap();
        let mut first = TurnToken::open(dir.path(), "blocking").unwrap();
        first.acquire().unwrap();

        let (tx, rx) = mpsc::channel();
        let path = dir.path().to_path_buf();
        let waiter = thread::spawn(move || {
            let mut second = TurnToken::open(&path, "blocking").unwrap();
            let outcome = second.acquire().unwrap();
            tx.send(()).unwrap();
            second.release().unwrap();
            outcome
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        first.release().unwrap();
        assert_eq!(waiter.join().unwrap(), Acquisition::Clean);
    }

    #[test]
    fn test_dropped_owner_is_recovered_as_abandoned() {
        let dir = tempdir().unwrap();
        let mut first = TurnToken::open(dir.path(), "abandon").unwrap();
        first.acquire().unwrap();
        let previous = first.owner_id();
        drop(first);

        let mut second = TurnToken::open(dir.path(), "abandon").unwrap();
        let outcome = second.acquire().unwrap();
        assert_eq!(
            outcome,
            Acquisition::Abandoned {
                previous: Some(previous)
            }
        );
        assert!(outcome.is_abandoned());

        // A clean release clears the abandonment for the next owner.
        second.release().unwrap();
        assert_eq!(second.acquire().unwrap(), Acquisition::Clean);
        second.close().unwrap();
    }

    #[test]
    fn test_unreadable_record_counts_as_abandoned() {
        let dir = tempdir().unwrap();
        fs::write(token_path(dir.path(), "garbled"), "not an owner\n").unwrap();

        let mut token = TurnToken::open(dir.path(), "garbled").unwrap();
        assert_eq!(
            token.acquire().unwrap(),
            Acquisition::Abandoned { previous: None }
        );
        token.release().unwrap();
    }

    #[test]
    fn test_failed_acquire_leaves_token_unlocked() {
        let dir = tempdir().unwrap();
        let path = token_path(dir.path(), "binary");
        fs::write(&path, [0xff, 0xfe, 0xfd]).unwrap();

        let mut first = TurnToken::open(dir.path(), "binary").unwrap();
        assert!(first.acquire().is_err());
        assert_eq!(first.state(), TurnState::Released);

        fs::write(&path, "").unwrap();
        let mut second = TurnToken::open(dir.path(), "binary").unwrap();
        assert_eq!(second.try_acquire().unwrap(), Some(Acquisition::Clean));
        second.release().unwrap();
    }

    #[test]
    fn test_alternating_threads_never_overlap() {
        let dir = tempdir().unwrap();
        let inside = Arc::new(AtomicBool::new(false));
        let turns = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let path = dir.path().to_path_buf();
                let inside = Arc::clone(&inside);
                let turns = Arc::clone(&turns);
                thread::spawn(move || {
                    let mut token = TurnToken::open(&path, "alternate").unwrap();
                    for _ in 0..50 {
                        assert_eq!(token.acquire().unwrap(), Acquisition::Clean);
                        assert!(!inside.swap(true, Ordering::SeqCst), "two owners at once");
                        turns.fetch_add(1, Ordering::SeqCst);
                        thread::yield_now();
                        inside.store(false, Ordering::SeqCst);
                        token.release().unwrap();
                    }
                    token.close().unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(turns.load(Ordering::SeqCst), 100);
    }
}

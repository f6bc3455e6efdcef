//! Cooperating parties taking turns on a shared [`TurnToken`]
//!
//! Every party appends to a shared ledger while it holds the token:
//!
//! ```text
//! begin 4242:0
//! end 4242:0
//! recovered 4242:0 by 4243:0
//! begin 4243:0
//! end 4243:0
//! ```
//!
//! Because lines are only written by the current owner, the ledger is a
//! serial history of ownership. [`verify_ledger`] replays it and fails on
//! any interval that starts before the previous one ended.

use super::ScenarioError;
use crate::config::TurnConfig;
use crate::id::OwnerId;
use crate::turn::{Acquisition, TurnToken};
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::thread;

/// Errors raised while writing or verifying a ledger
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Ledger file could not be read or written
    #[error("ledger I/O on {path}: {source}")]
    Io {
        /// Ledger file
        path: PathBuf,
        /// OS error
        #[source]
        source: io::Error,
    },

    /// A line does not follow the ledger format
    #[error("line {line}: malformed ledger entry {text:?}")]
    Malformed {
        /// 1-based line number
        line: usize,
        /// Offending text
        text: String,
    },

    /// An owner began a turn while another turn was still open
    #[error("line {line}: {intruder} began a turn while {holder} still held the token")]
    Overlap {
        /// 1-based line number
        line: usize,
        /// Owner of the open interval
        holder: OwnerId,
        /// Owner that began anyway
        intruder: OwnerId,
    },

    /// An interval was closed by someone other than its owner
    #[error("line {line}: {owner} closed a turn it did not hold (open: {open:?})")]
    ForeignEnd {
        /// 1-based line number
        line: usize,
        /// Owner named on the closing line
        owner: OwnerId,
        /// Owner of the open interval, if any
        open: Option<OwnerId>,
    },

    /// The ledger ends inside a turn
    #[error("turn by {owner} never ended")]
    Unterminated {
        /// Owner of the open interval
        owner: OwnerId,
    },
}

/// One ledger line
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LedgerEntry {
    /// Owner started its turn
    Begin(OwnerId),
    /// Owner finished its turn
    End(OwnerId),
    /// `by` took over from an owner that vanished while holding the token
    Recovered {
        /// Vanished owner, when its record was readable
        previous: Option<OwnerId>,
        /// New owner
        by: OwnerId,
    },
}

impl fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerEntry::Begin(owner) => write!(f, "begin {}", owner),
            LedgerEntry::End(owner) => write!(f, "end {}", owner),
            LedgerEntry::Recovered {
                previous: Some(previous),
                by,
            } => write!(f, "recovered {} by {}", previous, by),
            LedgerEntry::Recovered { previous: None, by } => {
                write!(f, "recovered unknown by {}", by)
            }
        }
    }
}

impl LedgerEntry {
    fn parse(text: &str) -> Option<Self> {
        let words: Vec<&str> = text.split_whitespace().collect();
        match words.as_slice() {
            ["begin", owner] => owner.parse().ok().map(LedgerEntry::Begin),
            ["end", owner] => owner.parse().ok().map(LedgerEntry::End),
            ["recovered", previous, "by", by] => {
                let previous = match *previous {
                    "unknown" => None,
                    previous => Some(previous.parse().ok()?),
                };
                Some(LedgerEntry::Recovered {
                    previous,
                    by: by.parse().ok()?,
                })
            }
            _ => None,
        }
    }
}

/// Append-only ownership history shared by the parties of one token
pub struct TurnLedger {
    path: PathBuf,
    file: File,
}

impl TurnLedger {
    /// Open `path` for appending, creating it and its directory if needed
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let io_err = |source: io::Error| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Start a fresh, empty ledger at `path`
    pub fn reset(path: &Path) -> Result<(), LedgerError> {
        let io_err = |source: io::Error| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        File::create(path).map(drop).map_err(io_err)
    }

    /// Ledger file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the start of `owner`'s turn
    pub fn begin(&mut self, owner: OwnerId) -> Result<(), LedgerError> {
        self.append(LedgerEntry::Begin(owner))
    }

    /// Record the end of `owner`'s turn
    pub fn end(&mut self, owner: OwnerId) -> Result<(), LedgerError> {
        self.append(LedgerEntry::End(owner))
    }

    /// Record that `by` took the token over from an abandoned owner
    pub fn recovered(
        &mut self,
        previous: Option<OwnerId>,
        by: OwnerId,
    ) -> Result<(), LedgerError> {
        self.append(LedgerEntry::Recovered { previous, by })
    }

    fn append(&mut self, entry: LedgerEntry) -> Result<(), LedgerError> {
        // One write per line keeps concurrent appenders from interleaving.
        let line = format!("{}\n", entry);
        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(|source| LedgerError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

/// What a verified ledger contains
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    /// Completed turns
    pub intervals: usize,
    /// Takeovers from abandoned owners
    pub recoveries: usize,
    /// Owners that began at least one turn
    pub distinct_owners: usize,
    /// Turns whose owner differs from the previous turn's owner
    pub handoffs: usize,
}

/// Replay the ledger at `path` and check that ownership intervals never
/// overlap.
///
/// A recovery closes whatever interval the vanished owner left open. One
/// that names a different owner than the open interval is rejected.
pub fn verify_ledger(path: &Path) -> Result<LedgerSummary, LedgerError> {
    let io_err = |source: io::Error| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(io_err)?);

    let mut summary = LedgerSummary::default();
    let mut owners = HashSet::new();
    let mut open: Option<OwnerId> = None;
    let mut last_owner: Option<OwnerId> = None;

    for (idx, text) in reader.lines().enumerate() {
        let text = text.map_err(io_err)?;
        let line = idx + 1;
        if text.trim().is_empty() {
            continue;
        }
        let entry = LedgerEntry::parse(&text).ok_or_else(|| LedgerError::Malformed {
            line,
            text: text.clone(),
        })?;

        match entry {
            LedgerEntry::Begin(owner) => {
                if let Some(holder) = open {
                    return Err(LedgerError::Overlap {
                        line,
                        holder,
                        intruder: owner,
                    });
                }
                if last_owner.map_or(false, |last| last != owner) {
                    summary.handoffs += 1;
                }
                owners.insert(owner);
                open = Some(owner);
                last_owner = Some(owner);
            }
            LedgerEntry::End(owner) => match open {
                Some(holder) if holder == owner => {
                    summary.intervals += 1;
                    open = None;
                }
                other => {
                    return Err(LedgerError::ForeignEnd {
                        line,
                        owner,
                        open: other,
                    })
                }
            },
            LedgerEntry::Recovered { previous, .. } => {
                if let (Some(holder), Some(previous)) = (open, previous) {
                    if holder != previous {
                        return Err(LedgerError::ForeignEnd {
                            line,
                            owner: previous,
                            open: Some(holder),
                        });
                    }
                }
                summary.recoveries += 1;
                open = None;
            }
        }
    }

    if let Some(owner) = open {
        return Err(LedgerError::Unterminated { owner });
    }
    summary.distinct_owners = owners.len();
    Ok(summary)
}

/// Outcome of one party's run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartyReport {
    /// Party number assigned by the driver
    pub party: u32,
    /// Token handle identity used in the ledger
    pub owner: OwnerId,
    /// Turns completed
    pub turns: u32,
    /// Acquisitions that found the token abandoned
    pub recoveries: u32,
}

/// Take `config.turns` turns on the shared token.
///
/// Each turn acquires the token, logs `begin`, runs `work(turn)`, logs
/// `end`, and releases. An abandoned acquisition is logged as a recovery
/// before the turn begins.
pub fn run_party<F>(
    config: &TurnConfig,
    party: u32,
    mut work: F,
) -> Result<PartyReport, ScenarioError>
where
    F: FnMut(u32),
{
    let mut token = TurnToken::open(&config.token_dir(), &config.name)?;
    let mut ledger = TurnLedger::open(&config.ledger_path())?;
    let owner = token.owner_id();
    let mut report = PartyReport {
        party,
        owner,
        turns: 0,
        recoveries: 0,
    };
    tracing::info!(party, %owner, token = %config.name, "party started");

    for turn in 1..=config.turns {
        tracing::debug!(party, turn, "waiting for turn");
        if let Acquisition::Abandoned { previous } = token.acquire()? {
            ledger.recovered(previous, owner)?;
            report.recoveries += 1;
        }
        ledger.begin(owner)?;
        work(turn);
        ledger.end(owner)?;
        token.release()?;
        report.turns += 1;
        thread::yield_now();
    }

    token.close()?;
    tracing::info!(
        party,
        turns = report.turns,
        recoveries = report.recoveries,
        "party finished"
    );
    Ok(report)
}

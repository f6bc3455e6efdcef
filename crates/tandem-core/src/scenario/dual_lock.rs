//! Two workers racing for the same pair of logs
//!
//! Resource A is a text log and resource B a number log. Every iteration
//! appends one entry to each, so after a run both logs must be the same
//! length no matter how the workers interleaved.

use super::{join_named, spawn_named, ScenarioError};
use crate::cancel::CancelFlag;
use crate::config::RaceConfig;
use crate::id::ActorId;
use crate::lock_pair::{AcquireOrder, OrderedLockPair, PairStats};
use crossbeam::channel;
use rand::Rng;
use std::thread;
use std::time::{Duration, Instant};

/// Text log (A) and number log (B)
pub type ResourcePair = OrderedLockPair<Vec<String>, Vec<u32>>;

/// Locking protocol used by the workers
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RaceMode {
    /// Both workers take A then B with blocking waits
    Ordered,
    /// Workers take the resources in opposite orders with bounded waits
    /// and retry with backoff
    Backoff,
}

/// Per-worker outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    /// Worker identity
    pub actor: ActorId,
    /// Order in which this worker requested the resources
    pub order: AcquireOrder,
    /// Iterations that appended their entries
    pub completed: u32,
    /// Acquisition attempts, successful or not
    pub attempts: u64,
    /// Iterations abandoned after exhausting retries
    pub gave_up: u32,
}

/// Result of a race
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceReport {
    /// Protocol used
    pub mode: RaceMode,
    /// One entry per worker
    pub workers: Vec<WorkerReport>,
    /// Final length of the text log
    pub text_entries: usize,
    /// Final length of the number log
    pub number_entries: usize,
    /// Pair counters
    pub stats: PairStats,
    /// Whether the watchdog stopped the workers early
    pub cancelled: bool,
    /// Wall-clock duration
    pub elapsed: Duration,
}

impl RaceReport {
    /// Both logs received the same number of entries
    pub fn logs_balanced(&self) -> bool {
        self.text_entries == self.number_entries
    }

    /// Total completed iterations across workers
    pub fn completed(&self) -> u64 {
        self.workers.iter().map(|w| u64::from(w.completed)).sum()
    }
}

/// Race two workers over a fresh [`ResourcePair`].
///
/// In [`RaceMode::Backoff`] the second worker requests B before A. When
/// `config.max_duration` is set a watchdog cancels both workers once it
/// elapses. `cancel` can also be triggered by the caller.
pub fn run(
    config: &RaceConfig,
    mode: RaceMode,
    cancel: &CancelFlag,
) -> Result<RaceReport, ScenarioError> {
    let pair = ResourcePair::new(Vec::new(), Vec::new());
    let started = Instant::now();
    let orders = match mode {
        RaceMode::Ordered => [AcquireOrder::AThenB, AcquireOrder::AThenB],
        RaceMode::Backoff => [AcquireOrder::AThenB, AcquireOrder::BThenA],
    };

    let workers = thread::scope(|s| {
        let (done_tx, done_rx) = channel::bounded::<()>(0);
        let watchdog = match config.max_duration() {
            Some(limit) => {
                let cancel = cancel.clone();
                Some(spawn_named(s, "race-watchdog", move || {
                    channel::select! {
                        recv(done_rx) -> _ => {}
                        recv(channel::after(limit)) -> _ => {
                            tracing::info!(?limit, "race time limit reached");
                            cancel.cancel();
                        }
                    }
                })?)
            }
            None => None,
        };

        let first = spawn_named(s, "race-worker-1", || {
            work(&pair, mode, orders[0], config, cancel)
        })?;
        let second = spawn_named(s, "race-worker-2", || {
            work(&pair, mode, orders[1], config, cancel)
        })?;

        let reports = vec![
            join_named(first, "race-worker-1")?,
            join_named(second, "race-worker-2")?,
        ];
        drop(done_tx);
        if let Some(watchdog) = watchdog {
            join_named(watchdog, "race-watchdog")?;
        }
        Ok::<_, ScenarioError>(reports)
    })?;

    let stats = pair.stats();
    let (text, numbers) = pair.into_inner();
    let report = RaceReport {
        mode,
        workers,
        text_entries: text.len(),
        number_entries: numbers.len(),
        stats,
        cancelled: cancel.is_cancelled(),
        elapsed: started.elapsed(),
    };
    tracing::debug!(
        ?mode,
        text = report.text_entries,
        numbers = report.number_entries,
        timeouts = report.stats.timeouts,
        "race finished"
    );
    Ok(report)
}

fn work(
    pair: &ResourcePair,
    mode: RaceMode,
    order: AcquireOrder,
    config: &RaceConfig,
    cancel: &CancelFlag,
) -> WorkerReport {
    let actor = ActorId::next();
    let timeout = config.timeout();
    let backoff = config.backoff();
    let mut rng = rand::thread_rng();
    let mut report = WorkerReport {
        actor,
        order,
        completed: 0,
        attempts: 0,
        gave_up: 0,
    };

    for _ in 0..config.iterations {
        if cancel.is_cancelled() {
            tracing::debug!(%actor, completed = report.completed, "worker cancelled");
            break;
        }
        let number: u32 = rng.gen_range(1..10_000);
        let text = format!("Next value is: {}", number);

        match mode {
            RaceMode::Ordered => {
                pair.with_both(actor, |texts, numbers| {
                    texts.push(text);
                    numbers.push(number);
                });
                report.attempts += 1;
                report.completed += 1;
            }
            RaceMode::Backoff => {
                let outcome =
                    pair.retry_with_both(actor, order, timeout, &backoff, |texts, numbers| {
                        texts.push(text.clone());
                        numbers.push(number);
                    });
                match outcome {
                    Ok(retried) => {
                        report.attempts += u64::from(retried.attempts);
                        report.completed += 1;
                    }
                    Err(err) => {
                        tracing::warn!(%actor, error = %err, "iteration given up");
                        report.attempts += u64::from(backoff.max_attempts.max(1));
                        report.gave_up += 1;
                    }
                }
            }
        }
    }
    report
}

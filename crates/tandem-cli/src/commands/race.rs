//! `tandem race`: two workers appending to two shared logs

use anyhow::{bail, Context};
use tandem_core::scenario::dual_lock::{self, RaceMode};
use tandem_core::{CancelFlag, RaceConfig};

pub fn execute(config: &RaceConfig, backoff: bool) -> anyhow::Result<()> {
    let mode = if backoff {
        RaceMode::Backoff
    } else {
        RaceMode::Ordered
    };
    println!(
        "Racing 2 workers x {} iterations ({:?} mode)",
        config.iterations, mode
    );

    let report =
        dual_lock::run(config, mode, &CancelFlag::new()).context("race scenario failed")?;

    for worker in &report.workers {
        println!(
            "  {} [{:?}]: {} completed, {} attempts, {} given up",
            worker.actor, worker.order, worker.completed, worker.attempts, worker.gave_up
        );
    }
    println!(
        "Text log: {} entries, number log: {} entries, {} lock timeouts, {:.2?}{}",
        report.text_entries,
        report.number_entries,
        report.stats.timeouts,
        report.elapsed,
        if report.cancelled { " (cancelled)" } else { "" }
    );

    if !report.logs_balanced() {
        bail!(
            "logs diverged: {} text entries vs {} number entries",
            report.text_entries,
            report.number_entries
        );
    }
    Ok(())
}

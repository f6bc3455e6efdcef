//! `tandem turns`, `turn-party` and `abandon`: processes taking turns on a
//! named token

use std::path::PathBuf;
use tandem_core::TurnConfig;

/// Settings the driver forwards to every party it spawns
pub struct DriverOptions {
    pub config_path: Option<PathBuf>,
    pub verbose: u8,
    pub keep_ledger: bool,
}

#[cfg(unix)]
pub use self::unix::{abandon, drive, party};

#[cfg(unix)]
mod unix {
    use super::{DriverOptions, TurnConfig};
    use anyhow::{bail, Context};
    use std::process::{Child, Command};
    use tandem_core::scenario::turn_passing::{run_party, verify_ledger, TurnLedger};
    use tandem_core::{Acquisition, TurnToken};

    /// Spawn one `turn-party` process per party and verify the ledger they
    /// leave behind.
    pub fn drive(config: &TurnConfig, options: DriverOptions) -> anyhow::Result<()> {
        let dir = config.token_dir();
        let ledger = config.ledger_path();
        if !options.keep_ledger {
            TurnLedger::reset(&ledger)
                .with_context(|| format!("resetting ledger {}", ledger.display()))?;
        }
        let exe = std::env::current_exe().context("locating the tandem binary")?;

        println!(
            "Starting {} parties on token {:?} in {}",
            config.parties,
            config.name,
            dir.display()
        );

        let mut children: Vec<(u32, Child)> = Vec::new();
        for party in 1..=config.parties {
            let mut command = Command::new(&exe);
            if let Some(path) = &options.config_path {
                command.arg("--config").arg(path);
            }
            command
                .arg("--token-dir")
                .arg(&dir)
                .arg("--token")
                .arg(&config.name);
            for _ in 0..options.verbose {
                command.arg("-v");
            }
            command
                .arg("turn-party")
                .arg("--party")
                .arg(party.to_string())
                .arg("--turns")
                .arg(config.turns.to_string())
                .arg("--lines-per-turn")
                .arg(config.lines_per_turn.to_string());

            let child = command
                .spawn()
                .with_context(|| format!("spawning party {}", party))?;
            tracing::debug!(party, pid = child.id(), "party spawned");
            children.push((party, child));
        }

        let mut failed = Vec::new();
        for (party, mut child) in children {
            let status = child
                .wait()
                .with_context(|| format!("waiting for party {}", party))?;
            if !status.success() {
                tracing::error!(party, %status, "party failed");
                failed.push(party);
            }
        }
        if !failed.is_empty() {
            bail!("parties {:?} did not finish cleanly", failed);
        }

        let summary = verify_ledger(&ledger)
            .with_context(|| format!("verifying ledger {}", ledger.display()))?;
        println!(
            "Ledger verified: {} turns by {} owners, {} handoffs, {} recoveries, no overlap",
            summary.intervals, summary.distinct_owners, summary.handoffs, summary.recoveries
        );
        Ok(())
    }

    /// Run as one cooperating party.
    pub fn party(config: &TurnConfig, party: u32) -> anyhow::Result<()> {
        let lines = config.lines_per_turn;
        let report = run_party(config, party, |turn| {
            println!("[party {}] turn {}", party, turn);
            for i in 0..lines {
                println!("[party {}] I wanna print {}", party, i);
            }
        })
        .with_context(|| format!("party {} failed", party))?;

        if report.recoveries > 0 {
            println!(
                "[party {}] recovered the token from an abandoned owner {} time(s)",
                party, report.recoveries
            );
        }
        println!("[party {}] done after {} turns", party, report.turns);
        Ok(())
    }

    /// Take the token, open a turn, and exit without releasing it.
    pub fn abandon(config: &TurnConfig) -> anyhow::Result<()> {
        let mut token = TurnToken::open(&config.token_dir(), &config.name)
            .with_context(|| format!("opening token {:?}", config.name))?;
        let mut ledger = TurnLedger::open(&config.ledger_path())?;
        let owner = token.owner_id();

        if let Acquisition::Abandoned { previous } = token.acquire()? {
            ledger.recovered(previous, owner)?;
        }
        ledger.begin(owner)?;
        println!("{} holds {:?} and exits without releasing it", owner, config.name);

        // Exit skips destructors; the kernel drops the lock with the process.
        std::process::exit(0)
    }
}

#[cfg(not(unix))]
pub fn drive(_config: &TurnConfig, _options: DriverOptions) -> anyhow::Result<()> {
    anyhow::bail!("turn passing needs a unix host")
}

#[cfg(not(unix))]
pub fn party(_config: &TurnConfig, _party: u32) -> anyhow::Result<()> {
    anyhow::bail!("turn passing needs a unix host")
}

#[cfg(not(unix))]
pub fn abandon(_config: &TurnConfig) -> anyhow::Result<()> {
    anyhow::bail!("turn passing needs a unix host")
}

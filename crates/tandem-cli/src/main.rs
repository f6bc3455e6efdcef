//! Tandem scenario driver
//!
//! One subcommand per coordination scenario: producer/consumer handoff,
//! the dual-lock race, and cross-process turn passing.

mod commands;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tandem_core::TandemConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "Thread and process coordination scenarios", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./tandem.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding turn-token rendezvous files
    #[arg(long, global = true)]
    token_dir: Option<PathBuf>,

    /// Turn-token name
    #[arg(long, global = true)]
    token: Option<String>,

    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pass messages from a producer thread to a consumer thread
    Handoff {
        /// Messages to send (read from stdin, one per line, when omitted)
        messages: Vec<String>,
        /// Alternate strictly through a single-slot queue
        #[arg(long)]
        lockstep: bool,
        /// Messages sent before the sentinel
        #[arg(short = 'n', long)]
        max_messages: Option<usize>,
    },

    /// Race two workers over two shared logs
    Race {
        /// Take the locks in opposite orders with bounded waits and retry
        #[arg(long)]
        backoff: bool,
        /// Iterations per worker
        #[arg(short, long)]
        iterations: Option<u32>,
        /// Bounded wait per acquisition, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Cancel the workers after this many milliseconds
        #[arg(long)]
        max_duration_ms: Option<u64>,
    },

    /// Spawn cooperating processes that take turns on a named token
    Turns {
        /// Number of processes
        #[arg(short, long)]
        parties: Option<u32>,
        /// Turns per process
        #[arg(short, long)]
        turns: Option<u32>,
        /// Keep earlier ledger entries instead of starting fresh
        #[arg(long)]
        keep_ledger: bool,
    },

    /// Take turns as one party (spawned by `turns`)
    #[command(hide = true)]
    TurnParty {
        /// Party number
        #[arg(long)]
        party: u32,
        /// Turns to take
        #[arg(long)]
        turns: Option<u32>,
        /// Work lines printed per turn
        #[arg(long)]
        lines_per_turn: Option<u32>,
    },

    /// Acquire the token and exit without releasing it
    #[command(hide = true)]
    Abandon,
}

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config =
        TandemConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
            Some(path) => format!("loading {}", path.display()),
            None => "loading configuration".to_string(),
        })?;
    if let Some(dir) = cli.token_dir {
        config.turns.dir = Some(dir);
    }
    if let Some(name) = cli.token {
        config.turns.name = name;
    }

    match cli.command {
        Commands::Handoff {
            messages,
            lockstep,
            max_messages,
        } => {
            config.handoff.lockstep |= lockstep;
            if let Some(n) = max_messages {
                config.handoff.max_messages = n;
            }
            commands::handoff::execute(&config.handoff, messages)
        }

        Commands::Race {
            backoff,
            iterations,
            timeout_ms,
            max_duration_ms,
        } => {
            if let Some(n) = iterations {
                config.race.iterations = n;
            }
            if let Some(ms) = timeout_ms {
                config.race.timeout_ms = ms;
            }
            if max_duration_ms.is_some() {
                config.race.max_duration_ms = max_duration_ms;
            }
            config.validate()?;
            commands::race::execute(&config.race, backoff)
        }

        Commands::Turns {
            parties,
            turns,
            keep_ledger,
        } => {
            if let Some(n) = parties {
                config.turns.parties = n;
            }
            if let Some(n) = turns {
                config.turns.turns = n;
            }
            config.validate()?;
            let options = commands::turns::DriverOptions {
                config_path: cli.config,
                verbose: cli.verbose,
                keep_ledger,
            };
            commands::turns::drive(&config.turns, options)
        }

        Commands::TurnParty {
            party,
            turns,
            lines_per_turn,
        } => {
            if let Some(n) = turns {
                config.turns.turns = n;
            }
            if let Some(n) = lines_per_turn {
                config.turns.lines_per_turn = n;
            }
            config.validate()?;
            commands::turns::party(&config.turns, party)
        }

        Commands::Abandon => commands::turns::abandon(&config.turns),
    }
}

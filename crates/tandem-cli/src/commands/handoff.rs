//! `tandem handoff`: producer thread feeding a consumer thread

use anyhow::Context;
use std::io;
use tandem_core::scenario::handoff;
use tandem_core::HandoffConfig;

pub fn execute(config: &HandoffConfig, messages: Vec<String>) -> anyhow::Result<()> {
    let outcome = if messages.is_empty() {
        println!(
            "Type up to {} messages, one per line ({} or end of input stops early)",
            config.max_messages,
            handoff::QUIT
        );
        handoff::run(config, stdin_lines(), print_received)
    } else {
        handoff::run(config, messages, print_received)
    };
    let report = outcome.context("handoff scenario failed")?;

    println!(
        "Producer sent {}, consumer received {}{}",
        report.sent,
        report.received.len(),
        if report.lockstep { " (lock-step)" } else { "" }
    );
    tracing::debug!(
        enqueued = report.stats.enqueued,
        empty_wakeups = report.stats.empty_wakeups,
        high_water = report.stats.high_water,
        "queue stats"
    );
    Ok(())
}

fn print_received(text: &str) {
    println!("Consumed: {}", text);
}

/// Stdin lines, without their line endings, until end of input.
fn stdin_lines() -> impl Iterator<Item = String> + Send {
    let stdin = io::stdin();
    std::iter::from_fn(move || {
        let mut line = String::new();
        match stdin.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
            Err(err) => {
                tracing::warn!(error = %err, "stopped reading stdin");
                None
            }
        }
    })
}

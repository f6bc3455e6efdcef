//! Subcommand implementations

pub mod handoff;
pub mod race;
pub mod turns;

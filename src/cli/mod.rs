//! Command-line interface for bias-worker.
//!
//! Provides commands for schema setup, running workers, queueing analyses,
//! and inspecting queue and analysis state.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};

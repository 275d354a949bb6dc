//! Command-line interface for devflow.
//!
//! Provides commands for running tasks through the workflow, inspecting
//! scheduling priority and printing the effective configuration.

mod commands;

pub use commands::{
    collect_tasks, parse_cli, run, run_with_cli, Cli, Commands, RunReport, TaskReport, TaskSpec,
};

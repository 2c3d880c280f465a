//! # cadence-cli
//!
//! Command-line interface for the Cadence task orchestrator.
//!
//! ## Commands
//!
//! - `cadence run` starts a run towards an objective
//! - `cadence resume` continues a run from its last checkpoint
//! - `cadence show` prints a run's tasks and log
//! - `cadence threads` lists known runs
//! - `cadence recall` searches long-term memory
//! - `cadence config` prints the effective configuration

pub mod commands;

pub use commands::Cli;

//! Command-line interface for charterops.
//!
//! This module provides the CLI structure for the `charterops` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    AircraftCommand, ConfigCommand, InboxCommand, PlanArgs, PlanCommand, PlanListArgs,
    RequestCommand, RequestListArgs, SubmitArgs,
};

/// charterops - Coordinate charter flight requests and plans
///
/// Requesters submit flights, coordinators approve and schedule them onto
/// aircraft, and crews start and complete the resulting plans.
#[derive(Debug, Parser)]
#[command(name = "charterops")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Who is acting, recorded in the audit trail
    #[arg(long, global = true, default_value = "coordinator")]
    pub actor: String,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submit and move flight requests
    #[command(subcommand)]
    Request(RequestCommand),

    /// Create and fly flight plans
    #[command(subcommand)]
    Plan(PlanCommand),

    /// Show pending requests, booked plans and today's flights
    Dashboard,

    /// Finish or undo completions that stopped part-way
    Recover,

    /// Manage the aircraft registry
    #[command(subcommand)]
    Aircraft(AircraftCommand),

    /// Read notifications
    #[command(subcommand)]
    Inbox(InboxCommand),

    /// View configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}

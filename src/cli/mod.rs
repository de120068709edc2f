//! Command-line interface

pub mod commands;
pub mod output;
pub mod prompt;

use clap::{Parser, Subcommand};
use commands::{CompileCommand, DescribeCommand, HistoryCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Compile symbolic test procedures and run them against bench instruments
#[derive(Debug, Parser, Clone)]
#[command(name = "prober")]
#[command(version = "0.1.0")]
#[command(about = "Compiles symbolic hardware test procedures and runs them against instruments", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a settings YAML file
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Compile an authored procedure into a configuration and a procedure file
    Compile(CompileCommand),

    /// Check that an authored procedure compiles, without saving anything
    Validate(ValidateCommand),

    /// Run a compiled experiment
    Run(RunCommand),

    /// List drivers and the operations they expose
    Describe(DescribeCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

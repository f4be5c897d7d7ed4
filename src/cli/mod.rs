//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::output::OutputFormat;
use crate::timings::TimingsMode;

/// Sharded, concurrent test orchestration
#[derive(Parser, Debug)]
#[command(name = "testshard")]
#[command(version = "0.1.0")]
#[command(about = "Partition, run and retry test suites across concurrent shards")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Stream test output and enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one group of tests
    Run(RunArgs),

    /// Print the tests of one group without running them
    List(SelectArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Which tests, and which group of them
#[derive(Parser, Debug, Clone)]
pub struct SelectArgs {
    /// Explicit test identifiers; skips the manifest and the scan
    pub tests: Vec<String>,

    /// Root directory of the suite
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// 1-indexed group to select
    #[arg(long, default_value = "1")]
    pub group_pos: usize,

    /// Number of groups to split the tests into
    #[arg(long, default_value = "1")]
    pub group_total: usize,

    /// Only tests of this named category
    #[arg(long, conflicts_with = "pattern")]
    pub category: Option<String>,

    /// Only tests whose identifier matches this regex
    #[arg(long)]
    pub pattern: Option<String>,

    /// Allow-list manifest, one identifier per line
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Use timing history for partitioning
    #[arg(long, value_enum, default_value_t = TimingsMode::Off)]
    pub timings: TimingsMode,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Maximum concurrent tests
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Retries per failing test
    #[arg(long)]
    pub retries: Option<u32>,

    /// Manifest of tests that are never retried
    #[arg(long)]
    pub skip_retry_file: Option<PathBuf>,

    /// Keep running after a test exhausts its retries
    #[arg(long)]
    pub continue_on_error: bool,

    /// Print output of passing tests too
    #[arg(long)]
    pub show_output: bool,

    /// Summary format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Write the JSON summary to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "testshard.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Show environment overrides instead
        #[arg(long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(long, default_value = "yaml")]
        format: String,
    },
}

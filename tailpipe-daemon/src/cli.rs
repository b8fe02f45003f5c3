//! CLI argument definitions for the `tailpipe` binary.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.
//! Flags given here take precedence over environment variables and the
//! configuration file (see [`DaemonCli::apply_to`]).

use std::path::PathBuf;

use clap::Parser;

use tailpipe_core::config::{ReadFrom, TailpipeConfig};

/// Tail log files, transform each line, and forward the events.
#[derive(Parser, Debug)]
#[command(name = "tailpipe")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to a tailpipe.toml configuration file.
    ///
    /// Without it, defaults plus `TAILPIPE_*` environment variables are used.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration and exit without starting the forwarder.
    #[arg(long)]
    pub validate: bool,

    /// File or glob pattern to tail ("-" for stdin). May be repeated.
    ///
    /// Replaces `tail.paths` from the configuration file.
    #[arg(short, long = "file", value_name = "PATH")]
    pub files: Vec<String>,

    /// Where to start reading each file (beginning, end, last).
    #[arg(long, value_name = "POSITION")]
    pub read_from: Option<ReadFrom>,

    /// Exit once every file has been read to its end.
    #[arg(long)]
    pub stop: bool,

    /// Shorthand for `--read-from beginning --stop`.
    #[arg(long, conflicts_with = "read_from")]
    pub backfill: bool,

    /// Line parser name.
    #[arg(short, long)]
    pub parser: Option<String>,

    /// Override PID file path.
    #[arg(long)]
    pub pid_file: Option<String>,
}

impl DaemonCli {
    /// Apply command-line overrides on top of a loaded configuration.
    pub fn apply_to(&self, config: &mut TailpipeConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file.clone_from(pid_file);
        }
        if !self.files.is_empty() {
            config.tail.paths.clone_from(&self.files);
        }
        if let Some(read_from) = self.read_from {
            config.tail.read_from = read_from;
        }
        if self.stop {
            config.tail.stop = true;
        }
        if self.backfill {
            config.tail.stop = true;
            config.tail.read_from = ReadFrom::Beginning;
        }
        if let Some(parser) = &self.parser {
            config.parser.name.clone_from(parser);
        }
    }
}

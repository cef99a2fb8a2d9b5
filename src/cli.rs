//! CLI argument parsing for lockreplay

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Self-contained HTML document (default)
    Html,
    /// Human-readable text summary
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "lockreplay")]
#[command(version)]
#[command(about = "Replay pthread lock traces and report locking errors and hold times", long_about = None)]
pub struct Cli {
    /// Trace file written by the lock tracer (JSON meta records)
    #[arg(short, long, value_name = "FILE")]
    pub trace: PathBuf,

    /// Core file of the traced process, used to resolve caller addresses
    #[arg(short, long, value_name = "FILE")]
    pub core: Option<PathBuf>,

    /// Address resolver invoked as `<resolver> --core <core> <address>`
    #[arg(
        short,
        long,
        value_name = "PROGRAM",
        default_value = "/usr/bin/eu-addr2line"
    )]
    pub resolver: PathBuf,

    /// Resolve addresses in-process from this executable's DWARF info instead
    #[arg(short, long, value_name = "FILE", conflicts_with = "core")]
    pub executable: Option<PathBuf>,

    /// Write the report to FILE instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Output format
    #[arg(long = "format", value_enum, default_value = "html")]
    pub format: OutputFormat,

    /// Include the lock stack (nesting order) table
    #[arg(short = 's', long = "lock-stacks")]
    pub lock_stacks: bool,

    /// Replay configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Skip records that cannot be parsed instead of aborting
    #[arg(long = "skip-unknown")]
    pub skip_unknown: bool,

    /// Maximum lock stack depth
    #[arg(long = "max-stack-depth", value_name = "DEPTH")]
    pub max_stack_depth: Option<usize>,

    /// Keep one lock stack per thread instead of a global one
    #[arg(long = "per-thread-stacks")]
    pub per_thread_stacks: bool,

    /// Report rwlock writers overlapping other holders
    #[arg(long = "exclusive-rwlocks")]
    pub exclusive_rwlocks: bool,

    /// Enable debug tracing output to stderr
    #[arg(long)]
    pub debug: bool,
}

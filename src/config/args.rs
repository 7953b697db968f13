//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// softpcm - Software PCM device
///
/// Simulates a sound device whose hardware pointer advances on a timer,
/// optionally looping playback into capture
#[derive(Parser, Debug)]
#[command(name = "softpcm")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Verbose output (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output to file
    #[arg(long, global = true)]
    pub log: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the capability descriptor streams advertise
    Caps,

    /// Run a playback-to-capture loopback session
    Run {
        /// Configuration file (default: search standard locations)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Sample rate in Hz
        #[arg(short, long)]
        rate: Option<u32>,

        /// Period size in frames
        #[arg(short, long)]
        period: Option<usize>,

        /// Buffer size in frames
        #[arg(short, long)]
        buffer: Option<usize>,

        /// How long to run, in seconds
        #[arg(short, long, default_value = "2")]
        seconds: u64,

        /// Capture silence instead of looping playback back
        #[arg(long)]
        no_loopback: bool,
    },

    /// Print a sample configuration file
    Config,
}

impl Args {
    /// Get the log level based on verbose/quiet flags
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::Run {
            config: None,
            rate: None,
            period: None,
            buffer: None,
            seconds: 2,
            no_loopback: false,
        }
    }
}

use clap::Parser;
use std::path::PathBuf;

use crate::config::{SweepConfig, SweepOptions};

/// Deletes files the depot doesn't know about and re-syncs any file whose
/// MD5 differs from the depot.
#[derive(Parser, Debug, Clone)]
#[command(name = "p4sweep")]
#[command(about = "Verify a Perforce workspace against the depot", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Directory relative to the client root to sweep (default: whole workspace)
    pub subpath: Option<String>,

    /// List every opened, have, deleted and synced file
    #[arg(short, long)]
    pub verbose: bool,

    /// Report what would be deleted and synced without touching anything
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Depot client executable
    #[arg(long = "p4", env = "P4SWEEP_P4", value_name = "PROGRAM")]
    pub p4_program: Option<String>,

    /// Digest worker threads (default: one per CPU)
    #[arg(short, long, env = "P4SWEEP_JOBS")]
    pub jobs: Option<usize>,

    /// Hash every file on the sweep thread
    #[arg(long)]
    pub single_threaded: bool,

    /// Config file (default: <config dir>/p4sweep/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Layers flags over `config`.
    pub fn to_options(&self, config: &SweepConfig) -> SweepOptions {
        let mut options = SweepOptions::from_config(config);
        if let Some(program) = &self.p4_program {
            options.p4_program = program.clone();
        }
        if let Some(jobs) = self.jobs {
            options.digest.jobs = jobs;
        }
        if self.single_threaded {
            options.digest.multithreaded = false;
        }
        options.verbose = self.verbose;
        options.dry_run = self.dry_run;
        options.subpath = self.subpath.clone().filter(|s| !s.trim().is_empty());
        options
    }
}

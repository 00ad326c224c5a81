//! Configuration.
//!
//! Defaults can be set in `<config_dir>/p4sweep/config.toml`:
//!
//! ```toml
//! p4_program = "p4"
//! jobs = 8
//! multithreaded = true
//! io_buffer_size = 131072
//! ```
//!
//! Command-line flags and environment variables override the file.

use crate::digest::DigestOptions;
use crate::error::{Result, SweepError};
use crate::transcode::IO_BUFFER_SIZE;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// On-disk defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    pub p4_program: String,
    /// `None` uses one worker per CPU.
    pub jobs: Option<usize>,
    pub multithreaded: bool,
    pub io_buffer_size: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            p4_program: "p4".to_string(),
            jobs: None,
            multithreaded: true,
            io_buffer_size: IO_BUFFER_SIZE,
        }
    }
}

impl SweepConfig {
    /// `<config_dir>/p4sweep/config.toml`, if the platform has a config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("p4sweep").join(CONFIG_FILE_NAME))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| SweepError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `explicit` if given (it must exist), otherwise the default path
    /// if present, otherwise built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.is_file() => path,
                _ => {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        debug!(?path, "Loading config");
        let content = fs::read_to_string(&path).map_err(|e| {
            SweepError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.p4_program.trim().is_empty() {
            return Err(SweepError::Config("p4_program must not be empty".to_string()));
        }
        if self.io_buffer_size == 0 {
            return Err(SweepError::Config("io_buffer_size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn digest_options(&self) -> DigestOptions {
        DigestOptions {
            jobs: self.jobs.unwrap_or(0),
            multithreaded: self.multithreaded,
            buffer_size: self.io_buffer_size,
        }
    }
}

/// Everything one sweep needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepOptions {
    pub p4_program: String,
    /// Log per-file listings at info level instead of debug.
    pub verbose: bool,
    /// Report deletions and syncs without performing them.
    pub dry_run: bool,
    /// Directory relative to the client root to restrict the sweep to.
    pub subpath: Option<String>,
    pub digest: DigestOptions,
}

impl SweepOptions {
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            p4_program: config.p4_program.clone(),
            verbose: false,
            dry_run: false,
            subpath: None,
            digest: config.digest_options(),
        }
    }
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self::from_config(&SweepConfig::default())
    }
}

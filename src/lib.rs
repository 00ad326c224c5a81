pub mod cli;
pub mod codec;
pub mod config;
pub mod depot;
pub mod digest;
pub mod error;
pub mod progress;
pub mod scan;
pub mod sweep;
pub mod transcode;

pub use config::{SweepConfig, SweepOptions};
pub use error::{Result, SweepError};
pub use progress::{DeletionRecord, DeletionStatus, SweepProgress, SyncRecord, SyncStatus};
pub use sweep::{Sweep, SweepHandle, SweepSummary, Sweeper};

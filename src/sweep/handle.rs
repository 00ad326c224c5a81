//! Background worker that owns a sweep.
//!
//! The sweep runs on its own thread with its own multi-threaded runtime and
//! outlives any observer. Every error or panic is turned into a message on the
//! progress error queue; nothing escapes to the host process. There is no
//! cancellation: dropping the handle detaches the worker.

use crate::config::SweepOptions;
use crate::error::Result;
use crate::progress::SweepProgress;
use crate::sweep::{Sweep, SweepSummary};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::error;

pub struct Sweeper;

impl Sweeper {
    pub fn spawn(options: SweepOptions) -> io::Result<SweepHandle> {
        let progress = Arc::new(SweepProgress::new());
        let worker_progress = progress.clone();

        let thread = thread::Builder::new()
            .name("p4sweep-worker".to_string())
            .spawn(move || run_worker(options, worker_progress))?;

        Ok(SweepHandle { progress, thread })
    }
}

fn run_worker(options: SweepOptions, progress: Arc<SweepProgress>) -> Option<SweepSummary> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<SweepSummary> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("p4sweep-runtime")
            .build()?;
        let sweep = Sweep::new(options, progress.clone());
        runtime.block_on(sweep.run())
    }));

    match outcome {
        Ok(Ok(summary)) => Some(summary),
        Ok(Err(e)) => {
            error!("{}", e);
            progress.set_status("Error");
            progress.push_error(e.to_string());
            None
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Sweep worker panicked: {}", message);
            progress.set_status("Error");
            progress.push_error(format!("Sweep worker panicked: {}", message));
            None
        }
    }
}

pub struct SweepHandle {
    progress: Arc<SweepProgress>,
    thread: JoinHandle<Option<SweepSummary>>,
}

impl SweepHandle {
    pub fn progress(&self) -> &Arc<SweepProgress> {
        &self.progress
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the worker. `None` means the sweep stopped on an error,
    /// which is waiting on the progress error queue.
    pub fn join(self) -> Option<SweepSummary> {
        match self.thread.join() {
            Ok(summary) => summary,
            Err(_) => {
                self.progress.push_error("Sweep worker terminated abnormally");
                None
            }
        }
    }
}

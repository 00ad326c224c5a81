//! Local file enumeration.

use crate::error::{Result, SweepError};
use ignore::{WalkBuilder, WalkState};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lists every non-directory entry under `root`, recursively.
///
/// Hidden files are included and no ignore files are consulted; the walk
/// mirrors what is on disk. Symbolic links are listed but not followed.
/// Entries that cannot be read are logged and skipped. Order is unspecified.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    list_files_with_threads(root, num_cpus::get())
}

pub fn list_files_with_threads(root: &Path, threads: usize) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(SweepError::Scan {
            root: root.to_path_buf(),
            message: "not a directory".to_string(),
        });
    }

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .follow_links(false)
        .threads(threads.max(1))
        .build_parallel();

    let (tx, rx) = crossbeam_channel::unbounded::<PathBuf>();
    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |entry| {
            match entry {
                Ok(entry) => {
                    let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
                    if !is_dir && tx.send(entry.into_path()).is_err() {
                        return WalkState::Quit;
                    }
                }
                Err(e) => warn!("Skipping unreadable entry: {}", e),
            }
            WalkState::Continue
        })
    });
    drop(tx);

    let files: Vec<PathBuf> = rx.into_iter().collect();
    debug!("Found {} local files under {}", files.len(), root.display());
    Ok(files)
}

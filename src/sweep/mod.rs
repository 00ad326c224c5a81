//! Reconciliation engine.
//!
//! A sweep walks these phases in order, stopping at the first fatal error:
//!
//! 1. resolve the client workspace and the sweep root,
//! 2. start the local scan and the opened-file query concurrently,
//! 3. wait for the opened list,
//! 4. stream the have list into the digest pool,
//! 5. delete local files the depot does not know about while digests finish,
//! 6. collect the digests and force-sync every file whose digest differs.
//!
//! Destructive steps are reported as skipped in dry-run mode and whenever the
//! sweep root is a filesystem root.

pub mod handle;
pub mod reconcile;

pub use handle::{SweepHandle, Sweeper};
pub use reconcile::{
    files_to_delete, is_filesystem_root, mismatches, path_key, resolve_subpath, KnownFiles,
    MismatchReason,
};

use crate::config::SweepOptions;
use crate::depot::{client_filter, ClientWorkspace, DepotClient};
use crate::digest::{DigestPool, DigestedFile};
use crate::error::Result;
use crate::progress::{DeletionRecord, DeletionStatus, SweepProgress, SyncRecord, SyncStatus};
use crate::scan;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const GIB: f64 = (1u64 << 30) as f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ResolveWorkspace,
    FetchLists,
    Digest,
    Delete,
    AwaitDigests,
    Sync,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Phase::ResolveWorkspace => "Resolving client workspace...",
            Phase::FetchLists => "Listing local and opened files...",
            Phase::Digest => "Hashing files...",
            Phase::Delete => "Deleting extraneous files...",
            Phase::AwaitDigests => "Waiting for outstanding digests...",
            Phase::Sync => "Syncing mismatched files...",
            Phase::Done => "Completed!",
        };
        f.write_str(status)
    }
}

/// Totals for one finished sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepSummary {
    pub workspace: ClientWorkspace,
    pub sweep_root: PathBuf,
    pub updates_enabled: bool,
    pub opened_files: usize,
    pub have_files: usize,
    pub local_files: usize,
    pub deleted: usize,
    pub delete_skipped: usize,
    pub delete_failed: usize,
    pub mismatches: usize,
    pub synced: usize,
    pub sync_skipped: usize,
    pub sync_failed: usize,
    pub bytes_hashed: u64,
    pub elapsed: Duration,
    /// Time spent waiting for outstanding digests after deletions.
    pub digest_wait: Duration,
    /// Time spent blocked on depot client output.
    pub depot_wait: Duration,
    pub hashing: Duration,
}

impl SweepSummary {
    pub fn gib_hashed(&self) -> f64 {
        self.bytes_hashed as f64 / GIB
    }

    pub fn gib_per_second(&self) -> f64 {
        let secs = self.hashing.as_secs_f64();
        if secs > 0.0 {
            self.gib_hashed() / secs
        } else {
            0.0
        }
    }

    pub fn completion_status(&self) -> String {
        format!(
            "Completed! (MD5-hashed {:.2} GB at {:.2} GB/s)",
            self.gib_hashed(),
            self.gib_per_second()
        )
    }
}

pub struct Sweep {
    options: SweepOptions,
    progress: Arc<SweepProgress>,
    client: DepotClient,
}

impl Sweep {
    pub fn new(options: SweepOptions, progress: Arc<SweepProgress>) -> Self {
        let client = DepotClient::new(options.p4_program.clone());
        Self {
            options,
            progress,
            client,
        }
    }

    pub fn progress(&self) -> &Arc<SweepProgress> {
        &self.progress
    }

    fn enter(&self, phase: Phase) {
        debug!("Phase: {:?}", phase);
        self.progress.set_status(phase.to_string());
    }

    fn detail(&self, args: fmt::Arguments<'_>) {
        detail(self.options.verbose, args);
    }

    /// Runs the whole sweep. Must be called on a multi-threaded runtime:
    /// feeding the digest pool blocks in place.
    pub async fn run(&self) -> Result<SweepSummary> {
        let start = Instant::now();

        self.enter(Phase::ResolveWorkspace);
        let workspace = self.client.workspace().await?;
        info!("Client: {}", workspace.client_name);
        info!("Root: {}", workspace.local_root.display());

        let (user_path, sweep_root) =
            resolve_subpath(&workspace.local_root, self.options.subpath.as_deref())?;
        let mut updates_enabled = !self.options.dry_run;
        if updates_enabled && is_filesystem_root(&sweep_root) {
            warn!(
                "{} is a filesystem root; deletions and syncs are disabled",
                sweep_root.display()
            );
            updates_enabled = false;
        }
        if !updates_enabled {
            info!("Dry run: nothing will be deleted or synced");
        }
        let filter = client_filter(&workspace.client_name, &user_path);

        self.enter(Phase::FetchLists);
        let scan_root = sweep_root.clone();
        let local_task = tokio::task::spawn_blocking(move || scan::list_files(&scan_root));
        let opened_task = tokio::spawn(fetch_opened(
            self.client.clone(),
            filter.clone(),
            self.progress.clone(),
            self.options.verbose,
        ));

        let mut known = KnownFiles::new();
        let opened = opened_task.await??;
        let opened_keys: HashSet<String> = opened.iter().map(|p| path_key(p)).collect();
        for path in &opened {
            known.insert_opened(path);
        }
        info!("{} opened files", opened.len());

        self.enter(Phase::Digest);
        let hashing_start = Instant::now();
        let (pool, have_count) = self
            .digest_have_files(&filter, &opened_keys, &mut known)
            .await?;

        let local_files = local_task.await??;
        info!("{} local files", local_files.len());

        // Digests keep running on the pool while deletions happen.
        self.enter(Phase::Delete);
        let deletions = self.apply_deletions(files_to_delete(&local_files, &known), updates_enabled);

        self.enter(Phase::AwaitDigests);
        let wait_start = Instant::now();
        let digested = tokio::task::spawn_blocking(move || pool.finish()).await??;
        let digest_wait = wait_start.elapsed();
        let hashing = hashing_start.elapsed();
        debug!("Waited {:.2?} for outstanding digests", digest_wait);

        self.enter(Phase::Sync);
        let mismatched = mismatches(digested);
        let syncs = self.apply_sync(&mismatched, updates_enabled).await?;

        let deleted = deletions
            .iter()
            .filter(|d| d.status == DeletionStatus::Deleted)
            .count();
        let delete_failed = deletions
            .iter()
            .filter(|d| matches!(d.status, DeletionStatus::Failed(_)))
            .count();
        let synced = syncs
            .iter()
            .filter(|r| r.status == SyncStatus::Synced)
            .count();
        let sync_failed = syncs
            .iter()
            .filter(|r| matches!(r.status, SyncStatus::Failed(_)))
            .count();

        let summary = SweepSummary {
            workspace,
            sweep_root,
            updates_enabled,
            opened_files: opened.len(),
            have_files: have_count,
            local_files: local_files.len(),
            deleted,
            delete_skipped: deletions.len() - deleted - delete_failed,
            delete_failed,
            mismatches: mismatched.len(),
            synced,
            sync_skipped: syncs.len() - synced - sync_failed,
            sync_failed,
            bytes_hashed: self.progress.digests().bytes_hashed(),
            elapsed: start.elapsed(),
            digest_wait,
            depot_wait: self.client.wait_timer().total(),
            hashing,
        };

        info!(
            "Deleted {} files ({} skipped, {} failed)",
            summary.deleted, summary.delete_skipped, summary.delete_failed
        );
        info!(
            "Synced {} of {} mismatched files ({} skipped, {} failed)",
            summary.synced, summary.mismatches, summary.sync_skipped, summary.sync_failed
        );
        info!(
            "Finished in {:.2?}: waited {:.2?} for digests, {:.2?} for the depot",
            summary.elapsed, summary.digest_wait, summary.depot_wait
        );

        self.enter(Phase::Done);
        self.progress.set_status(summary.completion_status());
        Ok(summary)
    }

    /// Streams the have list into the digest pool and hands the pool back
    /// once the list ends, with digests possibly still in flight. Opened
    /// files are listed but never hashed.
    async fn digest_have_files(
        &self,
        filter: &str,
        opened_keys: &HashSet<String>,
        known: &mut KnownFiles,
    ) -> Result<(DigestPool, usize)> {
        let mut pool = DigestPool::new(self.options.digest, self.progress.digests().clone())?;
        let mut have = self.client.have_files(filter).await?;
        let mut have_count = 0usize;

        while let Some(record) = have.next().await? {
            have_count += 1;
            self.detail(format_args!("have {}#{}", record.path, record.have_rev));
            known.insert_have(&record);
            self.progress.push_have(record.clone());
            if opened_keys.contains(&path_key(&record.path)) {
                continue;
            }
            tokio::task::block_in_place(|| pool.submit(record));
        }
        info!("{} have files", have_count);

        Ok((pool, have_count))
    }

    fn apply_deletions(&self, paths: Vec<PathBuf>, updates_enabled: bool) -> Vec<DeletionRecord> {
        info!("{} files to delete", paths.len());
        let mut records = Vec::with_capacity(paths.len());

        for path in paths {
            let status = if !updates_enabled {
                DeletionStatus::Skipped
            } else {
                match delete_file(&path) {
                    Ok(()) => DeletionStatus::Deleted,
                    Err(e) => {
                        warn!("Failed to delete {}: {}", path.display(), e);
                        DeletionStatus::Failed(e.to_string())
                    }
                }
            };
            self.detail(format_args!("delete {} ({:?})", path.display(), status));

            let record = DeletionRecord {
                path: path.to_string_lossy().into_owned(),
                status,
            };
            self.progress.push_deleted(record.clone());
            records.push(record);
        }
        records
    }

    async fn apply_sync(
        &self,
        mismatched: &[DigestedFile],
        updates_enabled: bool,
    ) -> Result<Vec<SyncRecord>> {
        info!("{} files to sync", mismatched.len());
        for file in mismatched {
            info!(
                "{}#{}: {}",
                file.record.path,
                file.record.have_rev,
                MismatchReason::of(file)
            );
        }

        let record = |file: &DigestedFile, status: SyncStatus| SyncRecord {
            path: file.record.path.clone(),
            depot_digest: file.record.digest.clone(),
            local_digest: file.result.local_digest.clone(),
            status,
        };

        let mut records = Vec::with_capacity(mismatched.len());
        if !updates_enabled || mismatched.is_empty() {
            for file in mismatched {
                let sync = record(file, SyncStatus::Skipped);
                self.progress.push_synced(sync.clone());
                records.push(sync);
            }
            return Ok(records);
        }

        let mut pending: HashMap<String, &DigestedFile> = mismatched
            .iter()
            .map(|file| (path_key(&file.record.path), file))
            .collect();

        let mut synced = self
            .client
            .force_sync(
                mismatched
                    .iter()
                    .map(|f| (f.record.path.as_str(), f.record.have_rev.as_str())),
            )
            .await?;
        while let Some(path) = synced.next().await? {
            match pending.remove(&path_key(&path)) {
                Some(file) => {
                    self.detail(format_args!("synced {}", path));
                    let sync = record(file, SyncStatus::Synced);
                    self.progress.push_synced(sync.clone());
                    records.push(sync);
                }
                None => debug!("Depot client reported an unrequested file: {}", path),
            }
        }

        for file in mismatched {
            if pending.remove(&path_key(&file.record.path)).is_some() {
                warn!("{} was not synced", file.record.path);
                let sync = record(
                    file,
                    SyncStatus::Failed("not reported by depot client".to_string()),
                );
                self.progress.push_synced(sync.clone());
                records.push(sync);
            }
        }
        Ok(records)
    }
}

async fn fetch_opened(
    client: DepotClient,
    filter: String,
    progress: Arc<SweepProgress>,
    verbose: bool,
) -> Result<Vec<String>> {
    let mut files = client.opened_files(&filter).await?;
    let mut opened = Vec::new();
    while let Some(path) = files.next().await? {
        detail(verbose, format_args!("opened {}", path));
        progress.push_opened(path.clone());
        opened.push(path);
    }
    Ok(opened)
}

/// Per-file listings go to info with `verbose`, otherwise to debug.
fn detail(verbose: bool, args: fmt::Arguments<'_>) {
    if verbose {
        info!("{}", args);
    } else {
        debug!("{}", args);
    }
}

/// Depot files are read-only on disk until opened.
fn delete_file(path: &Path) -> std::io::Result<()> {
    #[cfg(windows)]
    {
        let mut permissions = fs::metadata(path)?.permissions();
        if permissions.readonly() {
            permissions.set_readonly(false);
            fs::set_permissions(path, permissions)?;
        }
    }
    fs::remove_file(path)
}

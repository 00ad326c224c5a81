//! Digest worker pool.
//!
//! A bounded job channel feeds a fixed number of worker threads; results come
//! back on an unbounded channel and are joined to their records by path, never
//! by completion order. With multithreading disabled every job runs inline on
//! the submitting thread and produces the same results.

use crate::depot::DepotFileRecord;
use crate::digest::{digest_file, DigestedFile};
use crate::error::{Result, SweepError};
use crate::progress::DigestCounters;
use crate::transcode::IO_BUFFER_SIZE;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Jobs buffered per worker before `submit` blocks.
const JOBS_PER_WORKER: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestOptions {
    /// Worker threads; `0` means one per available CPU.
    pub jobs: usize,
    pub multithreaded: bool,
    pub buffer_size: usize,
}

impl Default for DigestOptions {
    fn default() -> Self {
        Self {
            jobs: num_cpus::get(),
            multithreaded: true,
            buffer_size: IO_BUFFER_SIZE,
        }
    }
}

impl DigestOptions {
    pub fn worker_count(&self) -> usize {
        if !self.multithreaded {
            1
        } else if self.jobs == 0 {
            num_cpus::get().max(1)
        } else {
            self.jobs
        }
    }
}

enum Mode {
    Threaded {
        jobs: Sender<DepotFileRecord>,
        results: Receiver<Result<DigestedFile>>,
        workers: Vec<JoinHandle<()>>,
    },
    Inline {
        buffer_size: usize,
        done: Vec<DigestedFile>,
        error: Option<SweepError>,
    },
}

pub struct DigestPool {
    mode: Mode,
    counters: Arc<DigestCounters>,
}

impl DigestPool {
    pub fn new(options: DigestOptions, counters: Arc<DigestCounters>) -> Result<Self> {
        if !options.multithreaded {
            return Ok(Self {
                mode: Mode::Inline {
                    buffer_size: options.buffer_size,
                    done: Vec::new(),
                    error: None,
                },
                counters,
            });
        }

        let worker_count = options.worker_count();
        let (job_tx, job_rx) = crossbeam_channel::bounded::<DepotFileRecord>(
            worker_count * JOBS_PER_WORKER,
        );
        let (result_tx, result_rx) = crossbeam_channel::unbounded();

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let counters = counters.clone();
            let buffer_size = options.buffer_size;
            let handle = thread::Builder::new()
                .name(format!("p4sweep-digest-{id}"))
                .spawn(move || {
                    for record in job_rx {
                        let result = digest_file(&record, buffer_size, &counters)
                            .map(|result| DigestedFile { record, result });
                        counters.complete_one();
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                })?;
            workers.push(handle);
        }
        debug!("Started {} digest workers", worker_count);

        Ok(Self {
            mode: Mode::Threaded {
                jobs: job_tx,
                results: result_rx,
                workers,
            },
            counters,
        })
    }

    /// Queues one file. Blocks while the job channel is full.
    pub fn submit(&mut self, record: DepotFileRecord) {
        self.counters.add_total(1);
        match &mut self.mode {
            Mode::Threaded { jobs, .. } => {
                // Workers only exit once this sender is dropped in `finish`.
                let _ = jobs.send(record);
            }
            Mode::Inline {
                buffer_size,
                done,
                error,
            } => {
                let result = digest_file(&record, *buffer_size, &self.counters);
                self.counters.complete_one();
                match result {
                    Ok(result) => done.push(DigestedFile { record, result }),
                    Err(e) => {
                        if error.is_none() {
                            *error = Some(e);
                        }
                    }
                }
            }
        }
    }

    /// Waits for every submitted file. The first fatal error wins.
    pub fn finish(self) -> Result<Vec<DigestedFile>> {
        match self.mode {
            Mode::Threaded {
                jobs,
                results,
                workers,
            } => {
                drop(jobs);
                let mut done = Vec::new();
                let mut first_error = None;
                for result in results.iter() {
                    match result {
                        Ok(file) => done.push(file),
                        Err(e) => {
                            if first_error.is_none() {
                                first_error = Some(e);
                            }
                        }
                    }
                }
                for worker in workers {
                    if worker.join().is_err() {
                        return Err(SweepError::Task("digest worker panicked".to_string()));
                    }
                }
                match first_error {
                    Some(e) => Err(e),
                    None => Ok(done),
                }
            }
            Mode::Inline { done, error, .. } => match error {
                Some(e) => Err(e),
                None => Ok(done),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    fn fixture(count: usize) -> (TempDir, Vec<DepotFileRecord>) {
        let temp = TempDir::new().unwrap();
        let mut records = Vec::new();
        for i in 0..count {
            let path = temp.path().join(format!("f{i}.txt"));
            let (head_type, body) = match i % 3 {
                0 => ("text", format!("line {i}\r\n").into_bytes()),
                1 => ("binary", vec![i as u8; i]),
                _ => ("utf8", format!("\u{FEFF}utf8 {i}\r\n").into_bytes()),
            };
            if i % 10 != 9 {
                fs::write(&path, &body).unwrap();
            }
            records.push(DepotFileRecord {
                path: path.to_string_lossy().into_owned(),
                have_rev: "1".to_string(),
                head_rev: Some("1".to_string()),
                file_size: Some(body.len() as u64),
                digest: String::new(),
                head_type: head_type.to_string(),
            });
        }
        (temp, records)
    }

    fn run(options: DigestOptions, records: &[DepotFileRecord]) -> (BTreeMap<String, DigestedFile>, Arc<DigestCounters>) {
        let counters = Arc::new(DigestCounters::new());
        let mut pool = DigestPool::new(options, counters.clone()).unwrap();
        for record in records {
            pool.submit(record.clone());
        }
        let done = pool
            .finish()
            .unwrap()
            .into_iter()
            .map(|f| (f.record.path.clone(), f))
            .collect();
        (done, counters)
    }

    #[test]
    fn test_threaded_matches_inline() {
        let (_temp, records) = fixture(60);
        let threaded = DigestOptions {
            jobs: 4,
            multithreaded: true,
            buffer_size: 16,
        };
        let inline = DigestOptions {
            multithreaded: false,
            ..threaded
        };

        let (threaded_done, threaded_counters) = run(threaded, &records);
        let (inline_done, inline_counters) = run(inline, &records);

        assert_eq!(threaded_done.len(), 60);
        assert_eq!(threaded_done, inline_done);
        assert_eq!(threaded_counters.completed(), 60);
        assert_eq!(threaded_counters.total(), 60);
        assert_eq!(threaded_counters.bytes_hashed(), inline_counters.bytes_hashed());
    }

    #[test]
    fn test_missing_files_still_complete() {
        let (_temp, records) = fixture(10);
        let (done, counters) = run(DigestOptions::default(), &records);
        let missing = done.values().filter(|f| f.result.is_missing()).count();
        assert_eq!(missing, 1);
        assert_eq!(counters.completed(), 10);
    }

    #[test]
    fn test_worker_count() {
        let options = DigestOptions {
            jobs: 3,
            multithreaded: true,
            buffer_size: 1,
        };
        assert_eq!(options.worker_count(), 3);
        assert_eq!(
            DigestOptions {
                multithreaded: false,
                ..options
            }
            .worker_count(),
            1
        );
        assert!(DigestOptions { jobs: 0, ..options }.worker_count() >= 1);
    }

    #[test]
    fn test_empty_pool() {
        let (done, counters) = run(DigestOptions::default(), &[]);
        assert!(done.is_empty());
        assert_eq!(counters.total(), 0);
    }
}

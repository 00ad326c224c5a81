//! Local digest computation.
//!
//! [`digest_file`] reproduces the depot's MD5 for one file according to its
//! type; [`DigestPool`] runs it across a fixed set of worker threads.

pub mod file;
pub mod pool;

pub use file::{digest_file, ZERO_DIGEST};
pub use pool::{DigestOptions, DigestPool};

use crate::depot::DepotFileRecord;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DigestResult {
    /// `None` when the file could not be opened.
    pub local_size: Option<u64>,
    /// Upper-case hex MD5. Empty when the file is missing or hashing was skipped.
    pub local_digest: String,
}

impl DigestResult {
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn is_missing(&self) -> bool {
        self.local_size.is_none()
    }

    /// Local digest agrees with `depot_digest`, ignoring hex case.
    pub fn matches(&self, depot_digest: &str) -> bool {
        !self.local_digest.is_empty() && self.local_digest.eq_ignore_ascii_case(depot_digest)
    }
}

/// A have record joined with its local digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestedFile {
    pub record: DepotFileRecord,
    pub result: DigestResult,
}

impl DigestedFile {
    pub fn is_mismatch(&self) -> bool {
        !self.result.matches(&self.record.digest)
    }
}

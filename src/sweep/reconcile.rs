//! Set algebra for deciding what to delete and what to re-sync.
//!
//! Depot paths and local paths are compared case-insensitively: one depot
//! tree may be realized on disk with different directory casing.

use crate::codec::resource_fork_path;
use crate::depot::{DepotFileRecord, FileType};
use crate::digest::DigestedFile;
use crate::error::{Result, SweepError};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Comparison key for a path: lower-cased, with `\` folded to `/`.
pub fn path_key(path: &str) -> String {
    path.to_lowercase().replace('\\', "/")
}

/// Keys of files the depot knows about, and of resource forks that belong to them.
#[derive(Debug, Default)]
pub struct KnownFiles {
    files: HashSet<String>,
    resource_forks: HashSet<String>,
}

impl KnownFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_opened(&mut self, path: &str) {
        self.files.insert(path_key(path));
    }

    pub fn insert_have(&mut self, record: &DepotFileRecord) {
        self.files.insert(path_key(&record.path));
        if record.file_type() == FileType::Apple {
            let fork = resource_fork_path(Path::new(&record.path));
            self.resource_forks.insert(path_key(&fork.to_string_lossy()));
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        let key = path_key(path);
        self.files.contains(&key) || self.resource_forks.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// `local − (have ∪ opened) − resource forks`.
pub fn files_to_delete(local_files: &[PathBuf], known: &KnownFiles) -> Vec<PathBuf> {
    local_files
        .iter()
        .filter(|path| !known.contains(&path.to_string_lossy()))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchReason {
    MissingLocally,
    /// Binary file whose size differs, so it was never hashed.
    SizeDiffers,
    DigestDiffers,
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchReason::MissingLocally => write!(f, "missing locally"),
            MismatchReason::SizeDiffers => write!(f, "size differs"),
            MismatchReason::DigestDiffers => write!(f, "digest differs"),
        }
    }
}

impl MismatchReason {
    pub fn of(file: &DigestedFile) -> Self {
        if file.result.is_missing() {
            MismatchReason::MissingLocally
        } else if file.result.local_digest.is_empty() {
            MismatchReason::SizeDiffers
        } else {
            MismatchReason::DigestDiffers
        }
    }
}

/// Digested files whose local digest does not match the depot.
pub fn mismatches(digested: Vec<DigestedFile>) -> Vec<DigestedFile> {
    digested.into_iter().filter(DigestedFile::is_mismatch).collect()
}

/// Normalizes a user-supplied subpath to `"Dir/Sub/"` (or `""` for the whole
/// workspace) and checks that it exists under `local_root`.
///
/// Returns the normalized form and the local directory it names.
pub fn resolve_subpath(local_root: &Path, subpath: Option<&str>) -> Result<(String, PathBuf)> {
    let Some(raw) = subpath else {
        return Ok((String::new(), local_root.to_path_buf()));
    };

    let parts: Vec<&str> = raw
        .split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    if parts.is_empty() {
        return Ok((String::new(), local_root.to_path_buf()));
    }

    let mut normalized = parts.join("/");
    normalized.push('/');

    let local = parts.iter().fold(local_root.to_path_buf(), |dir, part| dir.join(part));
    if parts.contains(&"..") || !local.is_dir() {
        return Err(SweepError::SubpathNotFound {
            path: raw.to_string(),
            local,
        });
    }

    Ok((normalized, local))
}

/// A drive or filesystem root such as `/` or `C:\`.
pub fn is_filesystem_root(path: &Path) -> bool {
    path.parent().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestResult;
    use std::fs;
    use tempfile::TempDir;

    fn have(path: &str, head_type: &str) -> DepotFileRecord {
        DepotFileRecord {
            path: path.to_string(),
            have_rev: "1".to_string(),
            head_rev: Some("1".to_string()),
            file_size: Some(1),
            digest: "AA".to_string(),
            head_type: head_type.to_string(),
        }
    }

    fn local(paths: &[&str]) -> Vec<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_extra_local_file_is_deleted() {
        let mut known = KnownFiles::new();
        known.insert_have(&have("/ws/A", "text"));
        known.insert_have(&have("/ws/B", "text"));

        let deleted = files_to_delete(&local(&["/ws/A", "/ws/B", "/ws/C"]), &known);
        assert_eq!(deleted, local(&["/ws/C"]));
    }

    #[test]
    fn test_case_insensitive_membership() {
        let mut known = KnownFiles::new();
        known.insert_have(&have("/ws/dir/a.txt", "text"));

        assert!(files_to_delete(&local(&["/WS/Dir/A.TXT"]), &known).is_empty());
    }

    #[test]
    fn test_separator_insensitive_membership() {
        assert_eq!(path_key("C:\\WS\\Dir\\a.txt"), "c:/ws/dir/a.txt");
        let mut known = KnownFiles::new();
        known.insert_have(&have("C:\\ws\\a.txt", "text"));
        assert!(known.contains("c:/WS/A.txt"));
    }

    #[test]
    fn test_opened_files_are_kept() {
        let mut known = KnownFiles::new();
        known.insert_opened("/ws/new.txt");

        assert!(files_to_delete(&local(&["/ws/new.txt"]), &known).is_empty());
    }

    #[test]
    fn test_apple_resource_fork_is_kept() {
        let mut known = KnownFiles::new();
        known.insert_have(&have("/ws/res/Icon", "apple"));
        known.insert_have(&have("/ws/res/plain", "binary"));

        let deleted = files_to_delete(
            &local(&["/ws/res/Icon", "/ws/res/%Icon", "/ws/res/%plain"]),
            &known,
        );
        assert_eq!(deleted, local(&["/ws/res/%plain"]));
        assert_eq!(known.len(), 2);
    }

    #[test]
    fn test_mismatch_reasons() {
        let file = |size: Option<u64>, digest: &str| DigestedFile {
            record: have("/ws/a", "binary"),
            result: DigestResult {
                local_size: size,
                local_digest: digest.to_string(),
            },
        };

        let found = mismatches(vec![
            file(Some(1), "aa"),
            file(None, ""),
            file(Some(9), ""),
            file(Some(1), "BB"),
        ]);
        let reasons: Vec<_> = found.iter().map(MismatchReason::of).collect();
        assert_eq!(
            reasons,
            vec![
                MismatchReason::MissingLocally,
                MismatchReason::SizeDiffers,
                MismatchReason::DigestDiffers
            ]
        );
    }

    #[test]
    fn test_resolve_subpath() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("Engine/Binaries")).unwrap();

        let (normalized, dir) = resolve_subpath(root, None).unwrap();
        assert_eq!(normalized, "");
        assert_eq!(dir, root);

        for raw in ["Engine/Binaries", "Engine\\Binaries\\", "/Engine/./Binaries/"] {
            let (normalized, dir) = resolve_subpath(root, Some(raw)).unwrap();
            assert_eq!(normalized, "Engine/Binaries/");
            assert_eq!(dir, root.join("Engine").join("Binaries"));
        }

        assert_eq!(resolve_subpath(root, Some("/")).unwrap().0, "");
    }

    #[test]
    fn test_resolve_missing_subpath() {
        let temp = TempDir::new().unwrap();
        let err = resolve_subpath(temp.path(), Some("Nope")).unwrap_err();
        assert!(matches!(err, SweepError::SubpathNotFound { .. }));
        assert!(err.to_string().contains("Nope"));

        let err = resolve_subpath(temp.path(), Some("..")).unwrap_err();
        assert!(matches!(err, SweepError::SubpathNotFound { .. }));
    }

    #[test]
    fn test_filesystem_root_detection() {
        assert!(is_filesystem_root(Path::new("/")));
        assert!(!is_filesystem_root(Path::new("/ws")));
        #[cfg(windows)]
        {
            assert!(is_filesystem_root(Path::new("C:\\")));
            assert!(!is_filesystem_root(Path::new("C:\\ws")));
        }
    }
}

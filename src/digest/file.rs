//! Per-file digest policy.

use crate::codec::{apple_double_to_apple_single, resource_fork_path};
use crate::depot::{DepotFileRecord, FileType};
use crate::digest::DigestResult;
use crate::error::{Result, SweepError};
use crate::progress::DigestCounters;
use crate::transcode::{P4TextReader, Utf16ToUtf8Reader};
use md5::{Digest, Md5};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;
use tracing::{debug, warn};

/// Digest substituted for an apple file whose resource fork is corrupt.
pub const ZERO_DIGEST: &str = "00000000000000000000000000000000";

/// Computes the local counterpart of `record.digest`.
///
/// Files that cannot be read come back as [`DigestResult::missing`]. The only
/// error is a failed integrity check while merging an apple file's forks.
pub fn digest_file(
    record: &DepotFileRecord,
    buffer_size: usize,
    counters: &DigestCounters,
) -> Result<DigestResult> {
    let path = Path::new(&record.path);
    let file_type = record.file_type();

    if file_type == FileType::Apple {
        return digest_apple(path, counters);
    }

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            debug!("{}: cannot open ({})", record.path, e);
            return Ok(DigestResult::missing());
        }
    };
    let local_size = match file.metadata() {
        Ok(meta) => meta.len(),
        Err(e) => {
            warn!("{}: cannot stat ({})", record.path, e);
            return Ok(DigestResult::missing());
        }
    };

    if file_type == FileType::Binary && record.file_size != Some(local_size) {
        return Ok(DigestResult {
            local_size: Some(local_size),
            local_digest: String::new(),
        });
    }

    let hashed = match file_type {
        FileType::Binary | FileType::Apple => hash_reader(file, buffer_size),
        FileType::Text => hash_reader(
            P4TextReader::new(BufReader::with_capacity(buffer_size, file), false),
            buffer_size,
        ),
        FileType::Utf8 => hash_reader(
            P4TextReader::new(BufReader::with_capacity(buffer_size, file), true),
            buffer_size,
        ),
        FileType::Utf16 => hash_reader(
            P4TextReader::new(
                BufReader::with_capacity(
                    buffer_size,
                    Utf16ToUtf8Reader::with_capacity(buffer_size, file),
                ),
                false,
            ),
            buffer_size,
        ),
    };

    match hashed {
        Ok(local_digest) => {
            counters.add_bytes(local_size);
            Ok(DigestResult {
                local_size: Some(local_size),
                local_digest,
            })
        }
        Err(e) => {
            warn!("{}: read failed while hashing ({})", record.path, e);
            Ok(DigestResult::missing())
        }
    }
}

fn digest_apple(path: &Path, counters: &DigestCounters) -> Result<DigestResult> {
    let resource_path = resource_fork_path(path);
    let (data, resource) = match (fs::read(path), fs::read(&resource_path)) {
        (Ok(data), Ok(resource)) => (data, resource),
        (Err(e), _) => {
            debug!("{}: cannot read data fork ({})", path.display(), e);
            return Ok(DigestResult::missing());
        }
        (_, Err(e)) => {
            debug!("{}: cannot read resource fork ({})", resource_path.display(), e);
            return Ok(DigestResult::missing());
        }
    };
    let local_size = Some(data.len() as u64);

    match apple_double_to_apple_single(&resource, &data) {
        Ok(merged) => {
            counters.add_bytes((data.len() + resource.len()) as u64);
            Ok(DigestResult {
                local_size,
                local_digest: hex::encode_upper(Md5::digest(&merged)),
            })
        }
        Err(e) if e.is_corruption() => {
            warn!("{}: corrupt resource fork ({})", resource_path.display(), e);
            Ok(DigestResult {
                local_size,
                local_digest: ZERO_DIGEST.to_string(),
            })
        }
        Err(e) => Err(SweepError::Codec(e)),
    }
}

fn hash_reader<R: Read>(mut reader: R, buffer_size: usize) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; buffer_size.max(1)];
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode_upper(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{APPLE_DOUBLE_MAGIC, ENTRY_SIZE, HEADER_SIZE};
    use tempfile::TempDir;

    fn md5_hex(bytes: &[u8]) -> String {
        hex::encode_upper(Md5::digest(bytes))
    }

    fn record(path: &Path, head_type: &str, size: Option<u64>) -> DepotFileRecord {
        DepotFileRecord {
            path: path.to_string_lossy().into_owned(),
            have_rev: "1".to_string(),
            head_rev: Some("1".to_string()),
            file_size: size,
            digest: String::new(),
            head_type: head_type.to_string(),
        }
    }

    fn digest(record: &DepotFileRecord) -> (DigestResult, u64) {
        let counters = DigestCounters::new();
        let result = digest_file(record, 64, &counters).unwrap();
        (result, counters.bytes_hashed())
    }

    /// Resource fork with one finder-info entry holding `payload`.
    fn resource_fork(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&APPLE_DOUBLE_MAGIC.to_be_bytes());
        out.extend_from_slice(&0x0002_0000u32.to_be_bytes());
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&9u32.to_be_bytes());
        out.extend_from_slice(&((HEADER_SIZE + ENTRY_SIZE) as u32).to_be_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_binary_hashes_raw_bytes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.bin");
        fs::write(&path, b"\x00\r\n\xff").unwrap();

        let (result, bytes) = digest(&record(&path, "binary+l", Some(4)));
        assert_eq!(result.local_size, Some(4));
        assert_eq!(result.local_digest, md5_hex(b"\x00\r\n\xff"));
        assert_eq!(bytes, 4);
    }

    #[test]
    fn test_binary_size_mismatch_skips_hashing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.bin");
        fs::write(&path, b"12345").unwrap();

        let (result, bytes) = digest(&record(&path, "binary", Some(9)));
        assert_eq!(result.local_size, Some(5));
        assert!(result.local_digest.is_empty());
        assert!(!result.is_missing());
        assert_eq!(bytes, 0);
    }

    #[test]
    fn test_text_ignores_size_and_normalizes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        fs::write(&path, b"one\r\ntwo\r\n").unwrap();

        let (result, _) = digest(&record(&path, "text", Some(8)));
        assert_eq!(result.local_size, Some(10));
        assert_eq!(result.local_digest, md5_hex(b"one\ntwo\n"));
    }

    #[test]
    fn test_unknown_type_is_text() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.sym");
        fs::write(&path, b"x\r\n").unwrap();

        let (result, _) = digest(&record(&path, "symlink", None));
        assert_eq!(result.local_digest, md5_hex(b"x\n"));
    }

    #[test]
    fn test_utf8_skips_byte_order_mark() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        fs::write(&path, b"\xEF\xBB\xBFhello\r\n").unwrap();

        let (result, _) = digest(&record(&path, "utf8", None));
        assert_eq!(result.local_digest, md5_hex(b"hello\n"));
    }

    #[test]
    fn test_utf16_transcodes_then_normalizes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "hé\r\nyo".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        fs::write(&path, &bytes).unwrap();

        let (result, _) = digest(&record(&path, "utf16", None));
        assert_eq!(result.local_digest, md5_hex("hé\nyo".as_bytes()));
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        let (result, bytes) = digest(&record(&temp.path().join("gone"), "text", Some(1)));
        assert_eq!(result, DigestResult::missing());
        assert!(result.is_missing());
        assert_eq!(bytes, 0);
    }

    #[test]
    fn test_apple_merges_forks() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Icon");
        let resource = resource_fork(b"finder");
        fs::write(&path, b"data fork").unwrap();
        fs::write(resource_fork_path(&path), &resource).unwrap();

        let (result, bytes) = digest(&record(&path, "apple", Some(1)));
        let merged = apple_double_to_apple_single(&resource, b"data fork").unwrap();
        assert_eq!(result.local_size, Some(9));
        assert_eq!(result.local_digest, md5_hex(&merged));
        assert_eq!(bytes, (resource.len() + 9) as u64);
    }

    #[test]
    fn test_apple_without_resource_fork_is_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Icon");
        fs::write(&path, b"data").unwrap();

        let (result, _) = digest(&record(&path, "apple", None));
        assert!(result.is_missing());
    }

    #[test]
    fn test_apple_corrupt_resource_fork_yields_zero_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Icon");
        fs::write(&path, b"data").unwrap();
        fs::write(resource_fork_path(&path), b"not a resource fork at all....").unwrap();

        let (result, _) = digest(&record(&path, "apple", None));
        assert_eq!(result.local_digest, ZERO_DIGEST);
        assert_eq!(result.local_size, Some(4));
    }

    #[test]
    fn test_matches_ignores_hex_case() {
        let result = DigestResult {
            local_size: Some(1),
            local_digest: "ABCDEF".to_string(),
        };
        assert!(result.matches("abcdef"));
        assert!(!result.matches("ABCDEE"));
        assert!(!DigestResult::missing().matches(""));
    }
}

//! AppleDouble -> AppleSingle conversion.
//!
//! The workspace holds a dual-fork file as two files: the data fork under its
//! own name and the resource fork as an AppleDouble container named `%<name>`
//! in the same directory. The depot stores (and digests) the merged
//! AppleSingle form, so the merge has to be reproduced byte for byte.
//!
//! Layout (RFC 1740), all integers big-endian:
//!
//! ```text
//! +-------+---------+-----------+-----------+---------------------+---------+
//! | magic | version | filler 16 | n_entries | n * (id|offset|len) | payload |
//! |  u32  |   u32   |   zero    |    u16    |      12 bytes       |   ...   |
//! +-------+---------+-----------+-----------+---------------------+---------+
//! ```

use std::path::{Path, PathBuf};
use thiserror::Error;

/// AppleSingle (merged) magic number.
pub const APPLE_SINGLE_MAGIC: u32 = 0x0005_1600;

/// AppleDouble (split) magic number.
pub const APPLE_DOUBLE_MAGIC: u32 = 0x0005_1607;

/// Entry id of the data fork.
pub const DATA_FORK_ID: u32 = 1;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 26;

/// Size of one entry descriptor in bytes.
pub const ENTRY_SIZE: usize = 12;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unable to parse AppleDouble header! Expected 0x{expected:08X} but got 0x{found:08X}.")]
    BadMagic { expected: u32, found: u32 },

    #[error("Unable to parse AppleDouble entry {index}! Invalid entry ID: 0")]
    InvalidEntry { index: usize },

    #[error("Truncated AppleDouble resource fork: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Unable to perform 32/16-bit byte swap on {0} bytes!")]
    OddLength(usize),

    #[error("Unable to create AppleSingle file! Expected {expected} bytes but got {actual} bytes.")]
    Integrity { expected: usize, actual: usize },
}

impl CodecError {
    /// True for damage in the input fork, false for defects in the merge itself.
    pub fn is_corruption(&self) -> bool {
        !matches!(self, CodecError::Integrity { .. })
    }
}

/// Header of an AppleSingle / AppleDouble container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub version: u32,
    pub filler: [u32; 4],
    pub num_entries: u16,
}

/// One entry descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub id: u32,
    pub offset: u32,
    pub length: u32,
}

/// Converts between wire (big-endian) and host order in place by reversing
/// every 4-byte group, then any trailing 2-byte group. Applying it twice is a
/// no-op.
pub fn swap_word_groups(bytes: &mut [u8]) -> Result<(), CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }

    if cfg!(target_endian = "big") {
        return Ok(());
    }

    let mut dwords = bytes.chunks_exact_mut(4);
    for dword in &mut dwords {
        dword.reverse();
    }
    for word in dwords.into_remainder().chunks_exact_mut(2) {
        word.reverse();
    }

    Ok(())
}

fn ne_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

impl Header {
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let raw = bytes.get(..HEADER_SIZE).ok_or(CodecError::Truncated {
            needed: HEADER_SIZE,
            available: bytes.len(),
        })?;

        let mut host = [0u8; HEADER_SIZE];
        host.copy_from_slice(raw);
        swap_word_groups(&mut host)?;

        Ok(Self {
            magic: ne_u32(&host, 0),
            version: ne_u32(&host, 4),
            filler: [
                ne_u32(&host, 8),
                ne_u32(&host, 12),
                ne_u32(&host, 16),
                ne_u32(&host, 20),
            ],
            num_entries: u16::from_ne_bytes([host[24], host[25]]),
        })
    }

    pub fn encode(&self) -> Result<[u8; HEADER_SIZE], CodecError> {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_ne_bytes());
        out[4..8].copy_from_slice(&self.version.to_ne_bytes());
        for (i, filler) in self.filler.iter().enumerate() {
            let at = 8 + i * 4;
            out[at..at + 4].copy_from_slice(&filler.to_ne_bytes());
        }
        out[24..26].copy_from_slice(&self.num_entries.to_ne_bytes());
        swap_word_groups(&mut out)?;
        Ok(out)
    }
}

impl Entry {
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let raw = bytes.get(..ENTRY_SIZE).ok_or(CodecError::Truncated {
            needed: ENTRY_SIZE,
            available: bytes.len(),
        })?;

        let mut host = [0u8; ENTRY_SIZE];
        host.copy_from_slice(raw);
        swap_word_groups(&mut host)?;

        Ok(Self {
            id: ne_u32(&host, 0),
            offset: ne_u32(&host, 4),
            length: ne_u32(&host, 8),
        })
    }

    pub fn encode(&self) -> Result<[u8; ENTRY_SIZE], CodecError> {
        let mut out = [0u8; ENTRY_SIZE];
        out[0..4].copy_from_slice(&self.id.to_ne_bytes());
        out[4..8].copy_from_slice(&self.offset.to_ne_bytes());
        out[8..12].copy_from_slice(&self.length.to_ne_bytes());
        swap_word_groups(&mut out)?;
        Ok(out)
    }
}

fn read_entries(resource_fork: &[u8], count: usize) -> Result<Vec<Entry>, CodecError> {
    let table_end = HEADER_SIZE + count * ENTRY_SIZE;
    let table = resource_fork
        .get(HEADER_SIZE..table_end)
        .ok_or(CodecError::Truncated {
            needed: table_end,
            available: resource_fork.len(),
        })?;

    table
        .chunks_exact(ENTRY_SIZE)
        .enumerate()
        .map(|(index, raw)| {
            let entry = Entry::decode(raw)?;
            if entry.id == 0 {
                return Err(CodecError::InvalidEntry { index });
            }
            Ok(entry)
        })
        .collect()
}

fn to_u32(value: usize, available: usize) -> Result<u32, CodecError> {
    u32::try_from(value).map_err(|_| CodecError::Truncated {
        needed: value,
        available,
    })
}

/// Merges an AppleDouble resource fork and its data fork into the AppleSingle
/// byte stream the depot stores.
///
/// Every existing entry moves back by one descriptor because a data fork
/// descriptor is appended to the table; the data fork itself goes after the
/// resource payload.
pub fn apple_double_to_apple_single(
    resource_fork: &[u8],
    data_fork: &[u8],
) -> Result<Vec<u8>, CodecError> {
    let mut header = Header::decode(resource_fork)?;
    if header.magic != APPLE_DOUBLE_MAGIC {
        return Err(CodecError::BadMagic {
            expected: APPLE_DOUBLE_MAGIC,
            found: header.magic,
        });
    }

    let old_count = usize::from(header.num_entries);
    let mut entries = read_entries(resource_fork, old_count)?;
    let table_end = HEADER_SIZE + old_count * ENTRY_SIZE;

    header.magic = APPLE_SINGLE_MAGIC;
    header.num_entries = header
        .num_entries
        .checked_add(1)
        .ok_or(CodecError::InvalidEntry { index: old_count })?;

    for entry in &mut entries {
        entry.offset = entry
            .offset
            .checked_add(ENTRY_SIZE as u32)
            .ok_or(CodecError::Truncated {
                needed: entry.offset as usize + ENTRY_SIZE,
                available: resource_fork.len(),
            })?;
    }

    entries.push(Entry {
        id: DATA_FORK_ID,
        offset: to_u32(resource_fork.len() + ENTRY_SIZE, resource_fork.len())?,
        length: to_u32(data_fork.len(), data_fork.len())?,
    });

    let expected = resource_fork.len() + data_fork.len() + ENTRY_SIZE;
    let mut merged = Vec::with_capacity(expected);
    merged.extend_from_slice(&header.encode()?);
    for entry in &entries {
        merged.extend_from_slice(&entry.encode()?);
    }
    merged.extend_from_slice(&resource_fork[table_end..]);
    merged.extend_from_slice(data_fork);

    if merged.len() != expected {
        return Err(CodecError::Integrity {
            expected,
            actual: merged.len(),
        });
    }

    Ok(merged)
}

/// Path of the resource fork paired with an AppleDouble data file.
pub fn resource_fork_path(data_path: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from("%");
    if let Some(file_name) = data_path.file_name() {
        name.push(file_name);
    }
    match data_path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

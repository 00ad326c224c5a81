//! Depot queries used by the sweep: workspace, have list, opened list, and
//! forced re-sync.

use crate::depot::client::{DepotClient, TaggedOutput};
use crate::error::{Result, SweepError};
use std::path::PathBuf;
use tracing::{debug, info, warn};

const CLIENT_KEY: &str = "Client";
const ROOT_KEY: &str = "Root";
const CLIENT_FILE_KEY: &str = "clientFile";
const FILE_SIZE_KEY: &str = "fileSize";
const DIGEST_KEY: &str = "digest";
const HAVE_REV_KEY: &str = "haveRev";
const HEAD_REV_KEY: &str = "headRev";
const HEAD_TYPE_KEY: &str = "headType";

const WORKSPACE_SCHEMA: &[&str] = &[CLIENT_KEY, ROOT_KEY];
const HEAD_SCHEMA: &[&str] = &[
    CLIENT_FILE_KEY,
    HAVE_REV_KEY,
    FILE_SIZE_KEY,
    HEAD_REV_KEY,
    DIGEST_KEY,
    HEAD_TYPE_KEY,
];
const PINNED_SCHEMA: &[&str] = &[
    CLIENT_FILE_KEY,
    HAVE_REV_KEY,
    FILE_SIZE_KEY,
    DIGEST_KEY,
    HEAD_TYPE_KEY,
];
const CLIENT_FILE_SCHEMA: &[&str] = &[CLIENT_FILE_KEY];

/// The client workspace a sweep runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWorkspace {
    pub client_name: String,
    pub local_root: PathBuf,
}

impl std::fmt::Display for ClientWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.client_name, self.local_root.display())
    }
}

/// How a depot file type is reproduced locally for hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Binary,
    Text,
    Utf8,
    Utf16,
    Apple,
}

impl FileType {
    /// Classifies a `headType` value such as `binary+l` or `utf16`. Anything
    /// that is neither binary nor apple is a text variant.
    pub fn from_head_type(head_type: &str) -> Self {
        if head_type.starts_with("binary") {
            FileType::Binary
        } else if head_type.starts_with("apple") {
            FileType::Apple
        } else if head_type.starts_with("utf8") {
            FileType::Utf8
        } else if head_type.starts_with("utf16") {
            FileType::Utf16
        } else {
            FileType::Text
        }
    }
}

/// A file the workspace has, with the depot's size and digest for the revision it has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepotFileRecord {
    /// Local path (`clientFile`).
    pub path: String,
    pub have_rev: String,
    /// Only known for records from the head query.
    pub head_rev: Option<String>,
    pub file_size: Option<u64>,
    /// Upper-case hex MD5; empty if the depot reported none.
    pub digest: String,
    pub head_type: String,
}

impl DepotFileRecord {
    pub fn file_type(&self) -> FileType {
        FileType::from_head_type(&self.head_type)
    }

    /// Head digests are only valid for files synced to head.
    pub fn is_at_head(&self) -> bool {
        self.head_rev.as_deref() == Some(self.have_rev.as_str())
    }

    fn from_head(mut record: crate::depot::TaggedRecord) -> Option<Self> {
        Some(Self {
            path: record.take(0)?,
            have_rev: record.take(1)?,
            file_size: record.get(2).and_then(|s| s.parse().ok()),
            head_rev: record.take(3),
            digest: record.take(4).unwrap_or_default(),
            head_type: record.take(5).unwrap_or_default(),
        })
    }

    fn from_pinned(mut record: crate::depot::TaggedRecord) -> Option<Self> {
        Some(Self {
            path: record.take(0)?,
            have_rev: record.take(1)?,
            file_size: record.get(2).and_then(|s| s.parse().ok()),
            head_rev: None,
            digest: record.take(3).unwrap_or_default(),
            head_type: record.take(4).unwrap_or_default(),
        })
    }
}

/// Escapes the characters the depot treats as wildcards or revision specifiers.
pub fn escape_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '*' => escaped.push_str("%2A"),
            '#' => escaped.push_str("%23"),
            '@' => escaped.push_str("%40"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Client-syntax filter for the whole workspace or a normalized subpath (`"Dir/Sub/"`).
pub fn client_filter(client_name: &str, user_path: &str) -> String {
    format!("//{}/{}...", client_name, user_path)
}

fn revision_spec(path: &str, revision: &str) -> String {
    format!("{}#{}", escape_path(path), revision)
}

impl DepotClient {
    /// Resolves the current client name and root (`client -o`).
    pub async fn workspace(&self) -> Result<ClientWorkspace> {
        let mut output = self.tagged(&["client", "-o"], WORKSPACE_SCHEMA, true).await?;
        let record = output.next_record().await?;

        match record {
            Some(mut record) => {
                let client_name = record.take(0).unwrap_or_default();
                let local_root = record.take(1).unwrap_or_default();
                if client_name.is_empty() || local_root.is_empty() {
                    return Err(SweepError::Workspace);
                }
                Ok(ClientWorkspace {
                    client_name,
                    local_root: PathBuf::from(local_root),
                })
            }
            None => Err(SweepError::Workspace),
        }
    }

    /// Files the workspace has under `filter`, with digests for the revision each one has.
    ///
    /// Files synced to head come straight from one `fstat -Rh` pass; the rest
    /// are re-queried pinned to their have revision once that pass ends.
    pub async fn have_files(&self, filter: &str) -> Result<HaveFiles> {
        let fields = HEAD_SCHEMA.join(",");
        let output = self
            .tagged(
                &["fstat", "-Ol", "-Rh", "-T", fields.as_str(), filter],
                HEAD_SCHEMA,
                false,
            )
            .await?;

        Ok(HaveFiles {
            client: self.clone(),
            phase: HavePhase::Head(output),
            not_at_head: Vec::new(),
        })
    }

    /// Local paths of files opened in any pending change under `filter`.
    pub async fn opened_files(&self, filter: &str) -> Result<ClientFiles> {
        let output = self
            .tagged(
                &["fstat", "-Ol", "-Ro", "-T", CLIENT_FILE_KEY, filter],
                CLIENT_FILE_SCHEMA,
                true,
            )
            .await?;
        Ok(ClientFiles { output })
    }

    /// Forces a re-fetch of each `(path, revision)` in one invocation. Paths are
    /// yielded in whatever order the client finishes them.
    pub async fn force_sync<'a, I>(&self, files: I) -> Result<ClientFiles>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let lines = files
            .into_iter()
            .map(|(path, revision)| revision_spec(path, revision));
        let output = self
            .tagged_with_arg_file(&["sync", "-f"], lines, CLIENT_FILE_SCHEMA, true)
            .await?;
        Ok(ClientFiles { output })
    }
}

enum HavePhase {
    Head(TaggedOutput),
    Pinned(TaggedOutput),
    Done,
}

/// Single-pass stream of [`DepotFileRecord`]s.
pub struct HaveFiles {
    client: DepotClient,
    phase: HavePhase,
    not_at_head: Vec<(String, String)>,
}

impl HaveFiles {
    pub async fn next(&mut self) -> Result<Option<DepotFileRecord>> {
        loop {
            match &mut self.phase {
                HavePhase::Head(output) => match output.next_record().await? {
                    Some(record) => match DepotFileRecord::from_head(record) {
                        Some(file) if file.is_at_head() => return Ok(Some(file)),
                        Some(file) => self.not_at_head.push((file.path, file.have_rev)),
                        None => warn!("ignoring have record without clientFile/haveRev"),
                    },
                    None => self.start_pinned().await?,
                },
                HavePhase::Pinned(output) => match output.next_record().await? {
                    Some(record) => match DepotFileRecord::from_pinned(record) {
                        Some(file) => return Ok(Some(file)),
                        None => warn!("ignoring pinned record without clientFile/haveRev"),
                    },
                    None => self.phase = HavePhase::Done,
                },
                HavePhase::Done => return Ok(None),
            }
        }
    }

    async fn start_pinned(&mut self) -> Result<()> {
        if self.not_at_head.is_empty() {
            self.phase = HavePhase::Done;
            return Ok(());
        }

        info!(
            "{} files are not at the head revision; querying their digests",
            self.not_at_head.len()
        );
        let specs: Vec<String> = std::mem::take(&mut self.not_at_head)
            .into_iter()
            .map(|(path, revision)| revision_spec(&path, &revision))
            .collect();
        let fields = PINNED_SCHEMA.join(",");
        let output = self
            .client
            .tagged_with_arg_file(&["fstat", "-Ol", "-T", fields.as_str()], specs, PINNED_SCHEMA, true)
            .await?;
        self.phase = HavePhase::Pinned(output);
        Ok(())
    }
}

/// Single-pass stream of `clientFile` values.
pub struct ClientFiles {
    output: TaggedOutput,
}

impl ClientFiles {
    pub async fn next(&mut self) -> Result<Option<String>> {
        loop {
            match self.output.next_record().await? {
                Some(mut record) => match record.take(0) {
                    Some(path) => return Ok(Some(path)),
                    None => debug!("skipping record without clientFile"),
                },
                None => return Ok(None),
            }
        }
    }
}

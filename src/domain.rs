use std::cmp::Ordering;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

pub const FASTQ_SUBFOLDER: &str = "fastq";
pub const SUMMARY_SUBFOLDER: &str = "sequencing_summary";
pub const RAW_ARCHIVE_SUFFIX: &str = ".raw.tar.gz";
pub const TMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    RawFolder,
    SequenceFile,
    SummaryFile,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::RawFolder => write!(f, "raw"),
            EntryKind::SequenceFile => write!(f, "fastq"),
            EntryKind::SummaryFile => write!(f, "summary"),
        }
    }
}

/// One raw-signal folder, positioned among its siblings by natural name order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFolderEntry {
    pub path: Utf8PathBuf,
    pub ordinal: usize,
}

impl RawFolderEntry {
    pub fn name(&self) -> Option<&str> {
        self.path.file_name()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceFileEntry {
    pub path: Utf8PathBuf,
    pub subfolder: String,
}

impl SequenceFileEntry {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            subfolder: FASTQ_SUBFOLDER.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryFileEntry {
    pub path: Utf8PathBuf,
    pub subfolder: String,
}

impl SummaryFileEntry {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            subfolder: SUMMARY_SUBFOLDER.to_string(),
        }
    }
}

/// A manifest entry tagged by category; the category selects the transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntry {
    RawFolder(RawFolderEntry),
    SequenceFile(SequenceFileEntry),
    SummaryFile(SummaryFileEntry),
}

impl ManifestEntry {
    pub fn kind(&self) -> EntryKind {
        match self {
            ManifestEntry::RawFolder(_) => EntryKind::RawFolder,
            ManifestEntry::SequenceFile(_) => EntryKind::SequenceFile,
            ManifestEntry::SummaryFile(_) => EntryKind::SummaryFile,
        }
    }

    pub fn source(&self) -> &Utf8Path {
        match self {
            ManifestEntry::RawFolder(entry) => &entry.path,
            ManifestEntry::SequenceFile(entry) => &entry.path,
            ManifestEntry::SummaryFile(entry) => &entry.path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TidyPolicy {
    pub keep: bool,
    pub dry_run: bool,
    pub overwrite: bool,
    pub concurrency: usize,
    pub checksums: bool,
}

impl Default for TidyPolicy {
    fn default() -> Self {
        Self {
            keep: false,
            dry_run: false,
            overwrite: false,
            concurrency: 1,
            checksums: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransformResult {
    Completed {
        destination: Utf8PathBuf,
        sha256: Option<String>,
        /// Set when the artifact was committed but the source could not be released.
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
    },
    /// Dry run: the plan was computed but nothing was applied.
    Planned,
}

impl TransformResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransformResult::Completed { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            TransformResult::Skipped { reason } => Some(reason),
            TransformResult::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransformResult::Completed { .. } => "completed",
            TransformResult::Skipped { .. } => "skipped",
            TransformResult::Failed { .. } => "failed",
            TransformResult::Planned => "planned",
        }
    }
}

/// Sort key for instrument-numbered names: `fast5_pass_10` sorts after `fast5_pass_9`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalKey {
    prefix: String,
    number: Option<u64>,
    name: String,
}

impl NaturalKey {
    pub fn new(name: &str) -> Self {
        let digits = name
            .chars()
            .rev()
            .take_while(|ch| ch.is_ascii_digit())
            .count();
        let split = name.len() - digits;
        let (prefix, suffix) = name.split_at(split);
        Self {
            prefix: prefix.to_string(),
            number: suffix.parse().ok(),
            name: name.to_string(),
        }
    }
}

impl Ord for NaturalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.prefix
            .cmp(&other.prefix)
            .then_with(|| self.number.cmp(&other.number))
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for NaturalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

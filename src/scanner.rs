use std::fs;
use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::TMP_SUFFIX;
use crate::error::TidyError;

const RAW_SIGNAL_EXTENSIONS: &[&str] = &["fast5", "pod5"];
const SEQUENCE_EXTENSIONS: &[&str] = &["fastq", "fq"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRoots {
    pub raw_root: Utf8PathBuf,
    pub sequence_root: Utf8PathBuf,
    pub summary_root: Utf8PathBuf,
}

impl ScanRoots {
    /// Instrument default layout: `<run>/fast5`, `<run>/fastq`, summaries at `<run>`.
    pub fn from_run_dir(run_dir: &Utf8Path) -> Self {
        Self {
            raw_root: run_dir.join("fast5"),
            sequence_root: run_dir.join("fastq"),
            summary_root: run_dir.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub raw_folders: Vec<Utf8PathBuf>,
    pub sequence_files: Vec<Utf8PathBuf>,
    pub summary_files: Vec<Utf8PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Scanner {
    roots: ScanRoots,
}

impl Scanner {
    /// Resolves every root to an absolute directory, failing before any listing happens.
    pub fn new(roots: &ScanRoots) -> Result<Self, TidyError> {
        Ok(Self {
            roots: ScanRoots {
                raw_root: resolve_root(&roots.raw_root)?,
                sequence_root: resolve_root(&roots.sequence_root)?,
                summary_root: resolve_root(&roots.summary_root)?,
            },
        })
    }

    pub fn roots(&self) -> &ScanRoots {
        &self.roots
    }

    pub fn scan(&self) -> Result<ScanResult, TidyError> {
        let mut result = ScanResult::default();

        for path in list_dir(&self.roots.raw_root)? {
            if path.is_dir() && contains_raw_signal(&path)? {
                result.raw_folders.push(path);
            }
        }

        for path in list_dir(&self.roots.sequence_root)? {
            if path.is_file() && has_extension(&path, SEQUENCE_EXTENSIONS) {
                result.sequence_files.push(path);
            }
        }

        for path in list_dir(&self.roots.summary_root)? {
            let is_summary = path
                .file_name()
                .map(|name| summary_pattern().is_match(name))
                .unwrap_or(false);
            if path.is_file() && is_summary {
                result.summary_files.push(path);
            }
        }

        tracing::info!(
            raw_folders = result.raw_folders.len(),
            sequence_files = result.sequence_files.len(),
            summary_files = result.summary_files.len(),
            "scanned run directory"
        );
        Ok(result)
    }
}

fn resolve_root(root: &Utf8Path) -> Result<Utf8PathBuf, TidyError> {
    let resolved = root.canonicalize_utf8().map_err(|err| TidyError::Scan {
        root: root.as_std_path().to_path_buf(),
        reason: err.to_string(),
    })?;
    if !resolved.is_dir() {
        return Err(TidyError::Scan {
            root: root.as_std_path().to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    Ok(resolved)
}

fn list_dir(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, TidyError> {
    let entries = fs::read_dir(root.as_std_path()).map_err(|err| TidyError::Scan {
        root: root.as_std_path().to_path_buf(),
        reason: err.to_string(),
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| TidyError::Scan {
            root: root.as_std_path().to_path_buf(),
            reason: err.to_string(),
        })?;
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            tracing::warn!(path = %entry.path().display(), "skipping non-utf8 path");
            continue;
        };
        if path.as_str().ends_with(TMP_SUFFIX) {
            continue;
        }
        paths.push(path);
    }
    Ok(paths)
}

fn contains_raw_signal(folder: &Utf8Path) -> Result<bool, TidyError> {
    Ok(list_dir(folder)?
        .iter()
        .any(|path| path.is_file() && has_extension(path, RAW_SIGNAL_EXTENSIONS)))
}

fn has_extension(path: &Utf8Path, extensions: &[&str]) -> bool {
    path.extension()
        .map(|ext| extensions.contains(&ext))
        .unwrap_or(false)
}

fn summary_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^sequencing_summary(_[A-Za-z0-9_.-]+)?\.txt$").expect("static regex")
    })
}

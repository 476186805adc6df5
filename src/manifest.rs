use std::collections::HashSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ManifestEntry, NaturalKey, RawFolderEntry, SequenceFileEntry, SummaryFileEntry,
};
use crate::error::TidyError;
use crate::fs_util;
use crate::sanitiser::{FastqSanitiser, SanitiseOutcome, Sanitiser};
use crate::scanner::{ScanResult, ScanRoots};

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Inventory of one run directory, built once and consumed by a tidy invocation.
///
/// Fields are private: after [`ManifestBuilder::build`] or [`ManifestLoader::load`]
/// the manifest is read-only, and the executor never re-scans the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    #[serde(default = "default_schema_version")]
    schema_version: u32,
    created_at: String,
    active: bool,
    roots: ScanRoots,
    destination: Utf8PathBuf,
    raw_folders: Vec<RawFolderEntry>,
    sequence_files: Vec<SequenceFileEntry>,
    summary_files: Vec<SummaryFileEntry>,
    #[serde(default)]
    warnings: Vec<String>,
}

fn default_schema_version() -> u32 {
    MANIFEST_SCHEMA_VERSION
}

impl RunManifest {
    pub fn active(&self) -> bool {
        self.active
    }

    pub fn created_at(&self) -> &str {
        &self.created_at
    }

    pub fn roots(&self) -> &ScanRoots {
        &self.roots
    }

    pub fn destination(&self) -> &Utf8Path {
        &self.destination
    }

    pub fn raw_folders(&self) -> &[RawFolderEntry] {
        &self.raw_folders
    }

    pub fn sequence_files(&self) -> &[SequenceFileEntry] {
        &self.sequence_files
    }

    pub fn summary_files(&self) -> &[SummaryFileEntry] {
        &self.summary_files
    }

    /// Build-time warnings, e.g. sequence files excluded by the sanitiser.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.raw_folders.len() + self.sequence_files.len() + self.summary_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw folders first in ordinal order, then sequence files, then summaries.
    pub fn entries(&self) -> Vec<ManifestEntry> {
        self.raw_folders
            .iter()
            .cloned()
            .map(ManifestEntry::RawFolder)
            .chain(
                self.sequence_files
                    .iter()
                    .cloned()
                    .map(ManifestEntry::SequenceFile),
            )
            .chain(
                self.summary_files
                    .iter()
                    .cloned()
                    .map(ManifestEntry::SummaryFile),
            )
            .collect()
    }

    pub fn validate(&self) -> Result<(), TidyError> {
        if self.schema_version != MANIFEST_SCHEMA_VERSION {
            return Err(TidyError::Manifest(format!(
                "unsupported schema_version {}",
                self.schema_version
            )));
        }
        if !self.destination.is_absolute() {
            return Err(TidyError::Manifest(format!(
                "destination {} is not absolute",
                self.destination
            )));
        }

        let mut previous: Option<usize> = None;
        for folder in &self.raw_folders {
            if folder.path.parent() != Some(self.roots.raw_root.as_path()) {
                return Err(TidyError::Manifest(format!(
                    "raw folder {} is not directly under {}",
                    folder.path, self.roots.raw_root
                )));
            }
            if previous.is_some_and(|prev| folder.ordinal <= prev) {
                return Err(TidyError::Manifest(format!(
                    "raw folder {} is out of ordinal order",
                    folder.path
                )));
            }
            if self.destination.starts_with(&folder.path) {
                return Err(TidyError::Manifest(format!(
                    "destination {} lies inside raw folder {}",
                    self.destination, folder.path
                )));
            }
            previous = Some(folder.ordinal);
        }

        let mut outputs = HashSet::new();
        let files = self
            .sequence_files
            .iter()
            .map(|entry| (&entry.path, &entry.subfolder))
            .chain(
                self.summary_files
                    .iter()
                    .map(|entry| (&entry.path, &entry.subfolder)),
            );
        for (path, subfolder) in files {
            let name = path
                .file_name()
                .ok_or_else(|| TidyError::Manifest(format!("{path} has no file name")))?;
            if !outputs.insert((subfolder.as_str(), name)) {
                return Err(TidyError::Manifest(format!(
                    "two entries would be written to {subfolder}/{name}"
                )));
            }
        }
        Ok(())
    }
}

/// Decides whether a raw folder may still be receiving writes.
pub trait LivenessProbe: Send + Sync {
    fn is_live(&self, folder: &RawFolderEntry, newest: bool) -> bool;
}

/// The newest folder of an active run is presumed live until a newer one appears.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewestFolderHeuristic;

impl LivenessProbe for NewestFolderHeuristic {
    fn is_live(&self, _folder: &RawFolderEntry, newest: bool) -> bool {
        newest
    }
}

/// Like [`NewestFolderHeuristic`], but a newest folder holding `marker` counts as finished.
#[derive(Debug, Clone)]
pub struct MarkerFileProbe {
    marker: String,
}

impl MarkerFileProbe {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl LivenessProbe for MarkerFileProbe {
    fn is_live(&self, folder: &RawFolderEntry, newest: bool) -> bool {
        newest && !folder.path.join(&self.marker).as_std_path().exists()
    }
}

pub struct ManifestBuilder {
    roots: ScanRoots,
    destination: Utf8PathBuf,
    sanitiser: Box<dyn Sanitiser>,
    liveness: Box<dyn LivenessProbe>,
}

impl ManifestBuilder {
    pub fn new(roots: ScanRoots, destination: Utf8PathBuf) -> Self {
        Self {
            roots,
            destination,
            sanitiser: Box::new(FastqSanitiser),
            liveness: Box::new(NewestFolderHeuristic),
        }
    }

    pub fn with_sanitiser(mut self, sanitiser: Box<dyn Sanitiser>) -> Self {
        self.sanitiser = sanitiser;
        self
    }

    pub fn with_liveness(mut self, liveness: Box<dyn LivenessProbe>) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn build(
        &self,
        scan: ScanResult,
        active: bool,
        run_sanitiser: bool,
    ) -> Result<RunManifest, TidyError> {
        let mut warnings = Vec::new();

        let mut raw = scan.raw_folders;
        raw.sort_by_cached_key(|path| NaturalKey::new(path.file_name().unwrap_or_default()));
        let newest = raw.len().checked_sub(1);
        let raw_folders = raw
            .into_iter()
            .enumerate()
            .map(|(ordinal, path)| RawFolderEntry { path, ordinal })
            .filter(|folder| {
                let live = active && self.liveness.is_live(folder, Some(folder.ordinal) == newest);
                if live {
                    tracing::info!(folder = %folder.path, "excluding folder of active run");
                }
                !live
            })
            .collect::<Vec<_>>();

        let mut sequence_files = Vec::new();
        for path in scan.sequence_files {
            if run_sanitiser {
                match self.sanitiser.sanitise(&path, active) {
                    Ok(SanitiseOutcome::Ok) | Ok(SanitiseOutcome::Repaired { .. }) => {}
                    Ok(SanitiseOutcome::Rejected { reason }) => {
                        let rejected = TidyError::SanitiseRejected {
                            path: path.clone().into_std_path_buf(),
                            reason,
                        };
                        warnings.push(rejected.to_string());
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(path = %path, error = %err, "sanitiser failed");
                        warnings.push(format!("sanitiser failed on {path}: {err}"));
                        continue;
                    }
                }
            }
            sequence_files.push(SequenceFileEntry::new(path));
        }

        let summary_files = scan
            .summary_files
            .into_iter()
            .map(SummaryFileEntry::new)
            .collect::<Vec<_>>();

        let manifest = RunManifest {
            schema_version: MANIFEST_SCHEMA_VERSION,
            created_at: chrono::Utc::now().to_rfc3339(),
            active,
            roots: self.roots.clone(),
            destination: self.destination.clone(),
            raw_folders,
            sequence_files,
            summary_files,
            warnings,
        };
        manifest.validate()?;

        tracing::info!(
            raw_folders = manifest.raw_folders.len(),
            sequence_files = manifest.sequence_files.len(),
            summary_files = manifest.summary_files.len(),
            warnings = manifest.warnings.len(),
            active,
            "manifest built"
        );
        Ok(manifest)
    }
}

pub struct ManifestLoader;

impl ManifestLoader {
    pub fn load(path: &Utf8Path) -> Result<RunManifest, TidyError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| TidyError::ConfigRead(path.as_std_path().to_path_buf()))?;
        let manifest: RunManifest = serde_json::from_str(&content)
            .map_err(|err| TidyError::ConfigParse(err.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn save(manifest: &RunManifest, path: &Utf8Path) -> Result<(), TidyError> {
        fs_util::ensure_parent(path)?;
        let tmp = fs_util::tmp_path(path);
        let content = serde_json::to_vec_pretty(manifest)
            .map_err(|err| TidyError::Filesystem(err.to_string()))?;
        fs::write(tmp.as_std_path(), &content)
            .map_err(|err| TidyError::Filesystem(err.to_string()))?;
        fs_util::commit(&tmp, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_of(root: &str, folders: &[&str]) -> (ScanRoots, ScanResult) {
        let run = Utf8PathBuf::from(root);
        let roots = ScanRoots::from_run_dir(&run);
        let scan = ScanResult {
            raw_folders: folders.iter().map(|name| roots.raw_root.join(name)).collect(),
            ..ScanResult::default()
        };
        (roots, scan)
    }

    fn names(manifest: &RunManifest) -> Vec<&str> {
        manifest
            .raw_folders()
            .iter()
            .filter_map(|folder| folder.name())
            .collect()
    }

    #[test]
    fn active_run_drops_highest_ordinal() {
        let (roots, scan) = scan_of("/run", &["2", "10", "0", "1"]);
        let builder = ManifestBuilder::new(roots, "/run".into());
        let manifest = builder.build(scan, true, false).unwrap();
        assert_eq!(names(&manifest), vec!["0", "1", "2"]);
        assert_eq!(
            manifest
                .raw_folders()
                .iter()
                .map(|folder| folder.ordinal)
                .collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn active_run_with_single_folder_is_empty() {
        let (roots, scan) = scan_of("/run", &["0"]);
        let manifest = ManifestBuilder::new(roots, "/run".into())
            .build(scan, true, false)
            .unwrap();
        assert!(manifest.raw_folders().is_empty());
    }

    #[test]
    fn finished_run_keeps_every_folder() {
        let (roots, scan) = scan_of("/run", &["1", "0"]);
        let manifest = ManifestBuilder::new(roots, "/run".into())
            .build(scan, false, false)
            .unwrap();
        assert_eq!(names(&manifest), vec!["0", "1"]);
    }

    #[test]
    fn relative_destination_is_rejected() {
        let (roots, scan) = scan_of("/run", &["0"]);
        let err = ManifestBuilder::new(roots, "out".into())
            .build(scan, false, false)
            .unwrap_err();
        assert!(matches!(err, TidyError::Manifest(_)));
    }

    #[test]
    fn destination_inside_raw_folder_is_rejected() {
        let (roots, scan) = scan_of("/run", &["0"]);
        let err = ManifestBuilder::new(roots, "/run/fast5/0/out".into())
            .build(scan, false, false)
            .unwrap_err();
        assert!(matches!(err, TidyError::Manifest(_)));
    }
}

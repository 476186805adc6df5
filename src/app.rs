use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::TidyPolicy;
use crate::error::TidyError;
use crate::executor::{TidyExecutor, TidyReport};
use crate::fs_util;
use crate::manifest::{
    LivenessProbe, ManifestBuilder, ManifestLoader, MarkerFileProbe, NewestFolderHeuristic,
};
use crate::scanner::{ScanRoots, Scanner};

#[derive(Debug, Clone)]
pub struct ConfigOptions {
    pub destination: Utf8PathBuf,
    pub output: Utf8PathBuf,
    pub sanitiser: bool,
    pub active: bool,
    /// A newest folder containing this file is treated as finished.
    pub complete_marker: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigResult {
    pub manifest_path: String,
    pub active: bool,
    pub raw_folders: usize,
    pub sequence_files: usize,
    pub summary_files: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

/// Emits progress as `debug` tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::debug!(
                elapsed_ms = elapsed.as_millis() as u64,
                "{}",
                event.message
            ),
            None => tracing::debug!("{}", event.message),
        }
    }
}

pub struct App;

impl App {
    /// Scans a run directory and persists the manifest for a later `tidy`.
    pub fn config(
        roots: &ScanRoots,
        options: &ConfigOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ConfigResult, TidyError> {
        sink.event(ProgressEvent {
            message: "phase=Scan; listing run directory".to_string(),
            elapsed: None,
        });
        let scanner = Scanner::new(roots)?;
        let scan = scanner.scan()?;

        let destination = fs_util::resolve_destination(&options.destination)?;
        let liveness: Box<dyn LivenessProbe> = match &options.complete_marker {
            Some(marker) => Box::new(MarkerFileProbe::new(marker.clone())),
            None => Box::new(NewestFolderHeuristic),
        };
        sink.event(ProgressEvent {
            message: "phase=Manifest; building manifest".to_string(),
            elapsed: None,
        });
        let manifest = ManifestBuilder::new(scanner.roots().clone(), destination)
            .with_liveness(liveness)
            .build(scan, options.active, options.sanitiser)?;

        ManifestLoader::save(&manifest, &options.output)?;
        tracing::info!(path = %options.output, "manifest written");

        Ok(ConfigResult {
            manifest_path: options.output.to_string(),
            active: manifest.active(),
            raw_folders: manifest.raw_folders().len(),
            sequence_files: manifest.sequence_files().len(),
            summary_files: manifest.summary_files().len(),
            warnings: manifest.warnings().to_vec(),
        })
    }

    /// Loads a persisted manifest and tidies every entry in it.
    pub fn tidy(
        manifest_path: &Utf8Path,
        policy: TidyPolicy,
        sink: &dyn ProgressSink,
    ) -> Result<TidyReport, TidyError> {
        let manifest = ManifestLoader::load(manifest_path)?;
        for warning in manifest.warnings() {
            tracing::warn!(%warning, "manifest build warning");
        }
        TidyExecutor::new(policy, sink).run(&manifest)
    }
}

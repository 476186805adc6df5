use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{
    EntryKind, FASTQ_SUBFOLDER, ManifestEntry, SUMMARY_SUBFOLDER, TidyPolicy, TransformResult,
};
use crate::error::TidyError;
use crate::manifest::RunManifest;
use crate::transform::{PlannedAction, Strategy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReport {
    pub kind: EntryKind,
    pub source: Utf8PathBuf,
    pub plan: Option<PlannedAction>,
    pub result: TransformResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TidyReport {
    pub policy: TidyPolicy,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub planned: usize,
    pub entries: Vec<EntryReport>,
    pub warnings: Vec<String>,
}

impl TidyReport {
    fn new(policy: TidyPolicy, entries: Vec<EntryReport>) -> Self {
        let count = |label: &str| {
            entries
                .iter()
                .filter(|entry| entry.result.label() == label)
                .count()
        };
        Self {
            policy,
            completed: count("completed"),
            skipped: count("skipped"),
            failed: count("failed"),
            planned: count("planned"),
            warnings: entries
                .iter()
                .filter_map(|entry| match &entry.result {
                    TransformResult::Completed {
                        warning: Some(warning),
                        ..
                    } => Some(format!("{}: {warning}", entry.source)),
                    _ => None,
                })
                .collect(),
            entries,
        }
    }

    /// Entries that reached the apply step (completed or failed).
    pub fn attempted(&self) -> usize {
        self.completed + self.failed
    }

    pub fn nothing_completed(&self) -> bool {
        self.attempted() > 0 && self.completed == 0
    }
}

/// Applies each manifest entry's transform on a bounded pool of worker threads.
pub struct TidyExecutor<'a> {
    policy: TidyPolicy,
    sink: &'a dyn ProgressSink,
}

impl<'a> TidyExecutor<'a> {
    pub fn new(policy: TidyPolicy, sink: &'a dyn ProgressSink) -> Self {
        Self { policy, sink }
    }

    pub fn run(&self, manifest: &RunManifest) -> Result<TidyReport, TidyError> {
        self.check_preconditions(manifest.destination())?;

        let items = manifest.entries();
        let total = items.len();
        let workers = self.policy.concurrency.min(total).max(1);
        tracing::info!(
            entries = total,
            workers,
            dry_run = self.policy.dry_run,
            "tidy started"
        );

        let (tx, rx) = crossbeam_channel::unbounded::<(usize, ManifestEntry)>();
        for item in items.into_iter().enumerate() {
            tx.send(item)
                .map_err(|err| TidyError::Precondition(err.to_string()))?;
        }
        drop(tx);

        let results: Mutex<Vec<(usize, EntryReport)>> = Mutex::new(Vec::with_capacity(total));
        let destination = manifest.destination();
        let spawned = thread::scope(|scope| {
            let mut spawned = 0usize;
            for worker in 0..workers {
                let rx = rx.clone();
                let results = &results;
                let handle = thread::Builder::new()
                    .name(format!("tidy-worker-{worker}"))
                    .spawn_scoped(scope, move || {
                        for (index, entry) in rx.iter() {
                            let report = self.process(&entry, destination);
                            results
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push((index, report));
                        }
                    });
                match handle {
                    Ok(_) => spawned += 1,
                    Err(err) => tracing::warn!(worker, error = %err, "failed to spawn worker"),
                }
            }
            spawned
        });
        if spawned == 0 && total > 0 {
            return Err(TidyError::Precondition(
                "no worker thread could be started".to_string(),
            ));
        }

        let mut results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        results.sort_by_key(|(index, _)| *index);
        let entries = results.into_iter().map(|(_, report)| report).collect();

        let mut report = TidyReport::new(self.policy, entries);
        if !self.policy.dry_run && self.policy.checksums {
            let ledger_warnings = write_checksums(destination, &report.entries);
            report.warnings.extend(ledger_warnings);
        }
        tracing::info!(
            completed = report.completed,
            skipped = report.skipped,
            failed = report.failed,
            planned = report.planned,
            "tidy finished"
        );
        Ok(report)
    }

    fn check_preconditions(&self, destination: &Utf8Path) -> Result<(), TidyError> {
        if self.policy.concurrency == 0 {
            return Err(TidyError::Precondition(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.policy.dry_run {
            if destination.as_std_path().exists() && !destination.is_dir() {
                return Err(TidyError::Precondition(format!(
                    "destination {destination} is not a directory"
                )));
            }
            return Ok(());
        }
        fs::create_dir_all(destination.as_std_path()).map_err(|err| {
            TidyError::Precondition(format!("cannot create destination {destination}: {err}"))
        })?;
        tempfile::Builder::new()
            .prefix(".kira-tidy-probe")
            .tempfile_in(destination.as_std_path())
            .map_err(|err| {
                TidyError::Precondition(format!("destination {destination} is not writable: {err}"))
            })?;
        Ok(())
    }

    fn process(&self, entry: &ManifestEntry, destination: &Utf8Path) -> EntryReport {
        let start = Instant::now();
        let kind = entry.kind();
        let strategy = Strategy::for_kind(kind);

        let (plan, result) = match strategy.plan(entry, destination, &self.policy) {
            Ok(plan) => {
                let result = match (&plan.skip, self.policy.dry_run) {
                    (Some(reason), _) => TransformResult::Skipped {
                        reason: reason.clone(),
                    },
                    (None, true) => TransformResult::Planned,
                    (None, false) => strategy.apply(&plan),
                };
                (Some(plan), result)
            }
            Err(err) => (
                None,
                TransformResult::Failed {
                    error: err.to_string(),
                },
            ),
        };

        match &result {
            TransformResult::Failed { error } => {
                tracing::warn!(%kind, source = %entry.source(), %error, "entry failed")
            }
            TransformResult::Planned => {
                if let Some(plan) = &plan {
                    tracing::info!(
                        %kind,
                        source = %plan.source,
                        destination = %plan.destination,
                        remove_source = plan.remove_source,
                        "dry run"
                    );
                }
            }
            other => tracing::info!(
                %kind,
                source = %entry.source(),
                status = other.label(),
                "entry processed"
            ),
        }
        self.sink.event(ProgressEvent {
            message: format!("{kind} {}: {}", entry.source(), result.label()),
            elapsed: Some(start.elapsed()),
        });

        EntryReport {
            kind,
            source: entry.source().to_path_buf(),
            plan,
            result,
        }
    }
}

pub fn checksum_ledger(destination: &Utf8Path, kind: EntryKind) -> Utf8PathBuf {
    match kind {
        EntryKind::RawFolder => destination.join("checksum.raw.sha256"),
        EntryKind::SequenceFile => destination
            .join(FASTQ_SUBFOLDER)
            .join("checksum.fastq.sha256"),
        EntryKind::SummaryFile => destination
            .join(SUMMARY_SUBFOLDER)
            .join("checksum.summary.sha256"),
    }
}

/// Appends `<sha256>  <name>` lines for every completed artifact. Returns warnings, never fails.
fn write_checksums(destination: &Utf8Path, entries: &[EntryReport]) -> Vec<String> {
    let mut ledgers: BTreeMap<Utf8PathBuf, String> = BTreeMap::new();
    for entry in entries {
        let TransformResult::Completed {
            destination: artifact,
            sha256: Some(sha256),
            ..
        } = &entry.result
        else {
            continue;
        };
        let Some(name) = artifact.file_name() else {
            continue;
        };
        ledgers
            .entry(checksum_ledger(destination, entry.kind))
            .or_default()
            .push_str(&format!("{sha256}  {name}\n"));
    }

    let mut warnings = Vec::new();
    for (ledger, lines) in ledgers {
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(ledger.as_std_path())
            .and_then(|mut file| file.write_all(lines.as_bytes()));
        if let Err(err) = written {
            tracing::warn!(ledger = %ledger, error = %err, "failed to write checksums");
            warnings.push(format!("failed to write checksums to {ledger}: {err}"));
        }
    }
    warnings
}

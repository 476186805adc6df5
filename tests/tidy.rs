use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;

use kira_run_tidy::app::{App, ConfigOptions, ProgressEvent, ProgressSink};
use kira_run_tidy::domain::{TidyPolicy, TransformResult};
use kira_run_tidy::error::TidyError;
use kira_run_tidy::executor::{TidyExecutor, TidyReport};
use kira_run_tidy::manifest::{ManifestBuilder, ManifestLoader, RunManifest};
use kira_run_tidy::scanner::{ScanRoots, Scanner};
use kira_run_tidy::transform::count_archive_members;

const READS: &str = "@r1\nACGT\n+\nIIII\n@r2\nGGCC\n+\nIIII\n";

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event.message);
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    run: Utf8PathBuf,
    dest: Utf8PathBuf,
}

fn fixture(raw_folders: usize, files_per_folder: usize) -> Fixture {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().canonicalize().unwrap()).unwrap();
    let run = root.join("run");
    fs::create_dir_all(run.join("fast5").as_std_path()).unwrap();
    for folder in 0..raw_folders {
        let dir = run.join("fast5").join(folder.to_string());
        fs::create_dir_all(dir.as_std_path()).unwrap();
        for file in 0..files_per_folder {
            fs::write(
                dir.join(format!("FAK_{folder}_{file}.fast5")).as_std_path(),
                format!("signal {folder} {file}"),
            )
            .unwrap();
        }
    }
    fs::create_dir_all(run.join("fastq").as_std_path()).unwrap();
    fs::write(run.join("fastq/reads.fastq").as_std_path(), READS).unwrap();
    fs::write(
        run.join("sequencing_summary_0.txt").as_std_path(),
        "read_id\tchannel\nr1\t12\n",
    )
    .unwrap();
    Fixture {
        _temp: temp,
        dest: root.join("out"),
        run,
    }
}

fn manifest(fixture: &Fixture, active: bool) -> RunManifest {
    let scanner = Scanner::new(&ScanRoots::from_run_dir(&fixture.run)).unwrap();
    ManifestBuilder::new(scanner.roots().clone(), fixture.dest.clone())
        .build(scanner.scan().unwrap(), active, false)
        .unwrap()
}

fn tidy(manifest: &RunManifest, policy: TidyPolicy) -> TidyReport {
    TidyExecutor::new(policy, &RecordingSink::default())
        .run(manifest)
        .unwrap()
}

fn snapshot(root: &Utf8Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    if !root.as_std_path().exists() {
        return files;
    }
    let mut stack = vec![root.as_std_path().to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                files.insert(format!("{}/", path.display()), Vec::new());
                stack.push(path);
            } else {
                files.insert(path.display().to_string(), fs::read(&path).unwrap());
            }
        }
    }
    files
}

#[test]
fn active_run_archives_all_but_newest_folder() {
    let fixture = fixture(3, 2);
    let manifest = manifest(&fixture, true);

    let report = tidy(&manifest, TidyPolicy::default());

    assert_eq!(report.failed, 0, "{report:?}");
    assert_eq!(report.completed, 4);
    for name in ["0", "1"] {
        let archive = fixture.dest.join(format!("{name}.raw.tar.gz"));
        assert_eq!(count_archive_members(&archive).unwrap(), 2);
        assert!(!fixture.run.join("fast5").join(name).as_std_path().exists());
    }
    assert!(!fixture.dest.join("2.raw.tar.gz").as_std_path().exists());
    assert!(fixture.run.join("fast5/2").as_std_path().is_dir());
}

#[test]
fn keep_leaves_sources_in_place() {
    let fixture = fixture(2, 1);
    let manifest = manifest(&fixture, false);
    let policy = TidyPolicy {
        keep: true,
        ..TidyPolicy::default()
    };

    let report = tidy(&manifest, policy);

    assert_eq!(report.completed, 4);
    assert!(fixture.run.join("fast5/0").as_std_path().is_dir());
    assert!(fixture.run.join("fastq/reads.fastq").as_std_path().is_file());
    assert!(fixture.run.join("sequencing_summary_0.txt").as_std_path().is_file());
}

#[test]
fn sequence_file_is_compressed_then_skipped_on_rerun() {
    let fixture = fixture(0, 0);
    let manifest = manifest(&fixture, false);

    let first = tidy(&manifest, TidyPolicy::default());
    assert_eq!(first.completed, 2);

    let compressed = fixture.dest.join("fastq/reads.fastq.gz");
    let mut decoded = String::new();
    GzDecoder::new(fs::File::open(compressed.as_std_path()).unwrap())
        .read_to_string(&mut decoded)
        .unwrap();
    assert_eq!(decoded, READS);
    assert!(!fixture.run.join("fastq/reads.fastq").as_std_path().exists());
    assert!(
        fixture
            .dest
            .join("sequencing_summary/sequencing_summary_0.txt")
            .as_std_path()
            .is_file()
    );

    let second = tidy(&manifest, TidyPolicy::default());
    assert_eq!(second.skipped, 2);
    for entry in &second.entries {
        assert_matches!(
            &entry.result,
            TransformResult::Skipped { reason } if reason == "already exists"
        );
    }
}

#[test]
fn second_run_without_overwrite_is_idempotent() {
    let fixture = fixture(3, 2);
    let manifest = manifest(&fixture, false);
    let policy = TidyPolicy {
        keep: true,
        ..TidyPolicy::default()
    };

    tidy(&manifest, policy);
    let after_first = snapshot(&fixture.dest);
    let second = tidy(&manifest, policy);

    assert_eq!(second.skipped, manifest.len());
    assert_eq!(second.attempted(), 0);
    assert!(!second.nothing_completed());
    assert_eq!(snapshot(&fixture.dest), after_first);
}

#[test]
fn overwrite_replaces_existing_artifacts() {
    let fixture = fixture(1, 1);
    let manifest = manifest(&fixture, false);
    let policy = TidyPolicy {
        keep: true,
        overwrite: true,
        ..TidyPolicy::default()
    };

    tidy(&manifest, policy);
    let report = tidy(&manifest, policy);

    assert_eq!(report.completed, manifest.len());
}

#[test]
fn dry_run_plans_without_touching_disk() {
    let fixture = fixture(3, 2);
    let manifest = manifest(&fixture, true);
    let before = snapshot(&fixture.run);

    let dry = tidy(
        &manifest,
        TidyPolicy {
            dry_run: true,
            ..TidyPolicy::default()
        },
    );

    assert_eq!(dry.planned, manifest.len());
    assert_eq!(snapshot(&fixture.run), before);
    assert!(!fixture.dest.as_std_path().exists());

    let real = tidy(&manifest, TidyPolicy::default());
    let dry_plans: Vec<_> = dry.entries.iter().map(|entry| entry.plan.clone()).collect();
    let real_plans: Vec<_> = real.entries.iter().map(|entry| entry.plan.clone()).collect();
    assert_eq!(dry_plans, real_plans);
}

#[test]
fn orphaned_temp_archive_is_redone() {
    let fixture = fixture(1, 3);
    let manifest = manifest(&fixture, false);
    fs::create_dir_all(fixture.dest.as_std_path()).unwrap();
    fs::write(fixture.dest.join("0.raw.tar.gz.tmp").as_std_path(), b"partial").unwrap();

    let report = tidy(&manifest, TidyPolicy::default());

    assert_eq!(report.failed, 0, "{report:?}");
    assert_eq!(
        count_archive_members(&fixture.dest.join("0.raw.tar.gz")).unwrap(),
        3
    );
    assert!(!fixture.dest.join("0.raw.tar.gz.tmp").as_std_path().exists());
}

#[test]
fn concurrent_workers_report_every_entry_once() {
    let fixture = fixture(10, 3);
    let manifest = manifest(&fixture, false);
    let raw_only: Vec<_> = manifest.raw_folders().to_vec();
    assert_eq!(raw_only.len(), 10);

    let sink = RecordingSink::default();
    let report = TidyExecutor::new(
        TidyPolicy {
            concurrency: 4,
            ..TidyPolicy::default()
        },
        &sink,
    )
    .run(&manifest)
    .unwrap();

    assert_eq!(report.entries.len(), manifest.len());
    assert_eq!(report.completed, manifest.len());
    let raw_sources: Vec<_> = report
        .entries
        .iter()
        .take(10)
        .map(|entry| entry.source.clone())
        .collect();
    let expected: Vec<_> = raw_only.iter().map(|folder| folder.path.clone()).collect();
    assert_eq!(raw_sources, expected);
    assert_eq!(sink.events.lock().unwrap().len(), manifest.len());
}

#[test]
fn one_failure_does_not_stop_siblings() {
    let fixture = fixture(2, 1);
    let manifest = manifest(&fixture, false);
    fs::remove_file(fixture.run.join("fastq/reads.fastq").as_std_path()).unwrap();

    let report = tidy(&manifest, TidyPolicy::default());

    assert_eq!(report.failed, 1);
    assert_eq!(report.completed, 3);
    assert!(!report.nothing_completed());
}

#[test]
fn every_attempt_failing_is_reported() {
    let fixture = fixture(0, 0);
    let manifest = manifest(&fixture, false);
    fs::remove_file(fixture.run.join("fastq/reads.fastq").as_std_path()).unwrap();
    fs::remove_file(fixture.run.join("sequencing_summary_0.txt").as_std_path()).unwrap();

    let report = tidy(&manifest, TidyPolicy::default());

    assert_eq!(report.failed, 2);
    assert!(report.nothing_completed());
}

#[test]
fn zero_concurrency_is_a_precondition_failure() {
    let fixture = fixture(1, 1);
    let manifest = manifest(&fixture, false);
    let policy = TidyPolicy {
        concurrency: 0,
        ..TidyPolicy::default()
    };

    let result = TidyExecutor::new(policy, &RecordingSink::default()).run(&manifest);

    assert_matches!(result, Err(TidyError::Precondition(_)));
    assert!(fixture.run.join("fast5/0").as_std_path().is_dir());
}

#[test]
fn destination_that_is_a_file_is_a_precondition_failure() {
    let fixture = fixture(1, 1);
    fs::write(fixture.dest.as_std_path(), b"not a dir").unwrap();
    let manifest = manifest(&fixture, false);

    let sink = RecordingSink::default();
    let result = TidyExecutor::new(TidyPolicy::default(), &sink).run(&manifest);

    assert_matches!(result, Err(TidyError::Precondition(_)));
}

#[test]
fn checksum_ledgers_list_completed_artifacts() {
    let fixture = fixture(2, 1);
    let manifest = manifest(&fixture, false);

    tidy(&manifest, TidyPolicy::default());

    let raw = fs::read_to_string(fixture.dest.join("checksum.raw.sha256").as_std_path()).unwrap();
    let lines: Vec<_> = raw.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("  0.raw.tar.gz"));
    assert_eq!(lines[0].split_whitespace().next().unwrap().len(), 64);

    let fastq = fs::read_to_string(
        fixture
            .dest
            .join("fastq/checksum.fastq.sha256")
            .as_std_path(),
    )
    .unwrap();
    assert!(fastq.trim_end().ends_with("  reads.fastq.gz"));
}

#[test]
fn persisted_manifest_tidies_like_fresh_one() {
    let fixture = fixture(3, 2);
    let built = manifest(&fixture, true);
    let path = fixture.run.join("tidy.json");
    ManifestLoader::save(&built, &path).unwrap();
    let reloaded = ManifestLoader::load(&path).unwrap();
    let dry = TidyPolicy {
        dry_run: true,
        ..TidyPolicy::default()
    };

    assert_eq!(tidy(&reloaded, dry), tidy(&built, dry));
}

#[test]
fn app_config_then_tidy_uses_default_layout() {
    let fixture = fixture(3, 1);
    let options = ConfigOptions {
        destination: fixture.run.clone(),
        output: fixture.run.join("tidy.json"),
        sanitiser: true,
        active: true,
        complete_marker: None,
    };
    let sink = RecordingSink::default();

    let config = App::config(&ScanRoots::from_run_dir(&fixture.run), &options, &sink).unwrap();
    assert_eq!(config.raw_folders, 2);
    assert_eq!(config.sequence_files, 1);
    assert_eq!(config.summary_files, 1);

    let report = App::tidy(&options.output, TidyPolicy::default(), &sink).unwrap();
    assert_eq!(report.completed, 4, "{report:?}");
    assert!(fixture.run.join("0.raw.tar.gz").as_std_path().is_file());
    assert!(fixture.run.join("fastq/reads.fastq.gz").as_std_path().is_file());
    assert!(
        fixture
            .run
            .join("sequencing_summary/sequencing_summary_0.txt")
            .as_std_path()
            .is_file()
    );
    assert!(fixture.run.join("fast5/2").as_std_path().is_dir());
}

#[cfg(unix)]
#[test]
fn destination_inside_raw_folder_via_symlink_is_rejected() {
    let fixture = fixture(2, 1);
    let alias = fixture.run.with_file_name("alias");
    std::os::unix::fs::symlink(fixture.run.as_std_path(), alias.as_std_path()).unwrap();
    let options = ConfigOptions {
        destination: alias.join("fast5/0/out"),
        output: fixture.run.join("tidy.json"),
        sanitiser: false,
        active: false,
        complete_marker: None,
    };

    let result = App::config(
        &ScanRoots::from_run_dir(&fixture.run),
        &options,
        &RecordingSink::default(),
    );

    assert_matches!(result, Err(TidyError::Manifest(_)));
    assert!(!fixture.run.join("tidy.json").as_std_path().exists());
}

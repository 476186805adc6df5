use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

use camino::Utf8Path;
use serde::Serialize;

use crate::error::TidyError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SanitiseOutcome {
    Ok,
    Repaired { kept_records: usize, dropped_lines: usize },
    Rejected { reason: String },
}

/// Validates (and where safe, repairs) a sequence file before it enters a manifest.
///
/// Implementations must be idempotent and must never leave a partially rewritten file:
/// repairs go through a temp file that replaces the original in one rename.
///
/// `active` is set while the instrument may still be appending to `path`. A file of an
/// active run must not be rewritten, since the writer keeps appending to the replaced inode.
pub trait Sanitiser: Send + Sync {
    fn sanitise(&self, path: &Utf8Path, active: bool) -> Result<SanitiseOutcome, TidyError>;
}

/// Accepts every file untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSanitiser;

impl Sanitiser for NoopSanitiser {
    fn sanitise(&self, _path: &Utf8Path, _active: bool) -> Result<SanitiseOutcome, TidyError> {
        Ok(SanitiseOutcome::Ok)
    }
}

/// Four-line FASTQ validator. Blank lines between records and a truncated final record are
/// repaired; anything malformed before the final record rejects the file.
///
/// Lines are placed by their position within a record, so a zero-length read (empty
/// sequence and quality lines) is valid. On an active run the truncated tail is an
/// in-flight write: the file is reported `Ok` and left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct FastqSanitiser;

#[derive(Debug, Default)]
struct Validation {
    complete_records: usize,
    dropped_lines: usize,
}

enum RecordCheck {
    Valid,
    ShortQuality,
    Malformed(String),
}

impl Sanitiser for FastqSanitiser {
    fn sanitise(&self, path: &Utf8Path, active: bool) -> Result<SanitiseOutcome, TidyError> {
        let validation = match validate(path)? {
            Ok(validation) => validation,
            Err(reason) => {
                tracing::warn!(path = %path, %reason, "fastq rejected");
                return Ok(SanitiseOutcome::Rejected { reason });
            }
        };
        if validation.dropped_lines == 0 {
            return Ok(SanitiseOutcome::Ok);
        }
        if active {
            tracing::debug!(
                path = %path,
                pending_lines = validation.dropped_lines,
                "fastq of active run left untouched"
            );
            return Ok(SanitiseOutcome::Ok);
        }

        rewrite_complete_records(path, validation.complete_records)?;
        tracing::info!(
            path = %path,
            kept_records = validation.complete_records,
            dropped_lines = validation.dropped_lines,
            "fastq repaired"
        );
        Ok(SanitiseOutcome::Repaired {
            kept_records: validation.complete_records,
            dropped_lines: validation.dropped_lines,
        })
    }
}

fn open_lines(path: &Utf8Path) -> Result<std::io::Lines<BufReader<File>>, TidyError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| TidyError::Filesystem(format!("open {path}: {err}")))?;
    Ok(BufReader::new(file).lines())
}

fn validate(path: &Utf8Path) -> Result<Result<Validation, String>, TidyError> {
    let mut validation = Validation::default();
    let mut record: Vec<String> = Vec::with_capacity(4);
    let mut suspect_tail: Option<(Vec<String>, String)> = None;

    for (index, line) in open_lines(path)?.enumerate() {
        let Ok(line) = line else {
            return Ok(Err(format!("unreadable line {}", index + 1)));
        };
        if record.is_empty() && line.trim().is_empty() {
            validation.dropped_lines += 1;
            continue;
        }
        if let Some((_, reason)) = suspect_tail.take() {
            return Ok(Err(reason));
        }
        record.push(line);
        if record.len() < 4 {
            continue;
        }
        match check_record(&record) {
            RecordCheck::Valid => validation.complete_records += 1,
            RecordCheck::ShortQuality => {
                let reason = format!(
                    "record {} has a quality string shorter than its sequence",
                    validation.complete_records + 1
                );
                suspect_tail = Some((record.clone(), reason));
            }
            RecordCheck::Malformed(reason) => {
                return Ok(Err(format!(
                    "record {}: {reason}",
                    validation.complete_records + 1
                )));
            }
        }
        record.clear();
    }

    if let Some((lines, _)) = suspect_tail {
        validation.dropped_lines += lines.len();
    }
    if !record.is_empty() {
        if !record[0].starts_with('@') {
            return Ok(Err(format!(
                "record {}: header does not start with '@'",
                validation.complete_records + 1
            )));
        }
        validation.dropped_lines += record.len();
    }
    Ok(Ok(validation))
}

fn check_record(record: &[String]) -> RecordCheck {
    if !record[0].starts_with('@') {
        return RecordCheck::Malformed("header does not start with '@'".to_string());
    }
    if !record[2].starts_with('+') {
        return RecordCheck::Malformed("separator line does not start with '+'".to_string());
    }
    let sequence = record[1].trim_end();
    let quality = record[3].trim_end();
    match quality.len().cmp(&sequence.len()) {
        std::cmp::Ordering::Equal => RecordCheck::Valid,
        std::cmp::Ordering::Less => RecordCheck::ShortQuality,
        std::cmp::Ordering::Greater => {
            RecordCheck::Malformed("quality string longer than sequence".to_string())
        }
    }
}

fn rewrite_complete_records(path: &Utf8Path, records: usize) -> Result<(), TidyError> {
    let parent = path
        .parent()
        .ok_or_else(|| TidyError::Filesystem(format!("{path} has no parent directory")))?;
    let temp = tempfile::Builder::new()
        .prefix(".kira-tidy-sanitise")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| TidyError::Filesystem(err.to_string()))?;

    {
        let mut writer = BufWriter::new(temp.as_file());
        let mut written = 0usize;
        for line in open_lines(path)? {
            if written >= records * 4 {
                break;
            }
            let line = line.map_err(|err| TidyError::Filesystem(err.to_string()))?;
            if written % 4 == 0 && line.trim().is_empty() {
                continue;
            }
            writeln!(writer, "{line}").map_err(|err| TidyError::Filesystem(err.to_string()))?;
            written += 1;
        }
        writer
            .flush()
            .map_err(|err| TidyError::Filesystem(err.to_string()))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|err| TidyError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| TidyError::Filesystem(err.to_string()))?;
    Ok(())
}

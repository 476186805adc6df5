use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;

use crate::domain::{
    EntryKind, FASTQ_SUBFOLDER, ManifestEntry, RAW_ARCHIVE_SUFFIX, SUMMARY_SUBFOLDER, TidyPolicy,
    TransformResult,
};
use crate::error::TidyError;
use crate::fs_util;

/// How one manifest entry is turned into its tidied artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Raw folder -> `<dest>/<name>.raw.tar.gz`.
    ArchiveCompress,
    /// Sequence file -> `<dest>/fastq/<name>.gz`.
    CompressMove,
    /// Summary file -> `<dest>/sequencing_summary/<name>`.
    PlainMove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedAction {
    pub strategy: Strategy,
    pub source: Utf8PathBuf,
    pub destination: Utf8PathBuf,
    pub temp: Utf8PathBuf,
    pub remove_source: bool,
    pub skip: Option<String>,
}

impl Strategy {
    pub fn for_kind(kind: EntryKind) -> Self {
        match kind {
            EntryKind::RawFolder => Strategy::ArchiveCompress,
            EntryKind::SequenceFile => Strategy::CompressMove,
            EntryKind::SummaryFile => Strategy::PlainMove,
        }
    }

    /// Final artifact path for a source named `name`, derived only from the name.
    pub fn destination_for(&self, name: &str, destination_root: &Utf8Path) -> Utf8PathBuf {
        match self {
            Strategy::ArchiveCompress => {
                destination_root.join(format!("{name}{RAW_ARCHIVE_SUFFIX}"))
            }
            Strategy::CompressMove => destination_root
                .join(FASTQ_SUBFOLDER)
                .join(format!("{name}.gz")),
            Strategy::PlainMove => destination_root.join(SUMMARY_SUBFOLDER).join(name),
        }
    }

    /// Reads metadata only; the same plan is produced whether or not the run is a dry run.
    pub fn plan(
        &self,
        entry: &ManifestEntry,
        destination_root: &Utf8Path,
        policy: &TidyPolicy,
    ) -> Result<PlannedAction, TidyError> {
        let source = entry.source();
        let name = source
            .file_name()
            .ok_or_else(|| TidyError::Transform(format!("{source} has no file name")))?;
        let destination = self.destination_for(name, destination_root);
        let temp = fs_util::tmp_path(&destination);

        let skip = if !policy.overwrite && destination.as_std_path().exists() {
            Some("already exists".to_string())
        } else if !source.as_std_path().exists() {
            return Err(TidyError::Transform(format!("source {source} does not exist")));
        } else {
            None
        };

        Ok(PlannedAction {
            strategy: *self,
            source: source.to_path_buf(),
            destination,
            temp,
            remove_source: !policy.keep,
            skip,
        })
    }

    pub fn apply(&self, action: &PlannedAction) -> TransformResult {
        if let Some(reason) = &action.skip {
            return TransformResult::Skipped {
                reason: reason.clone(),
            };
        }

        let outcome = fs_util::discard_tmp(&action.temp)
            .and_then(|()| fs_util::ensure_parent(&action.destination))
            .and_then(|()| match self {
                Strategy::ArchiveCompress => archive_compress(action),
                Strategy::CompressMove => compress_move(action),
                Strategy::PlainMove => plain_move(action),
            });
        settle(action, outcome)
    }
}

/// A verified artifact under its final name.
#[derive(Debug)]
struct Committed {
    sha256: String,
    /// Source could not be released after the commit.
    warning: Option<String>,
}

fn settle(action: &PlannedAction, outcome: Result<Committed, TidyError>) -> TransformResult {
    match outcome {
        Ok(committed) => TransformResult::Completed {
            destination: action.destination.clone(),
            sha256: Some(committed.sha256),
            warning: committed.warning,
        },
        Err(err) => {
            if let Err(cleanup) = fs_util::discard_tmp(&action.temp) {
                tracing::warn!(temp = %action.temp, error = %cleanup, "temp cleanup failed");
            }
            TransformResult::Failed {
                error: err.to_string(),
            }
        }
    }
}

fn io_err(context: &Utf8Path) -> impl Fn(io::Error) -> TidyError + '_ {
    move |err| TidyError::Filesystem(format!("{context}: {err}"))
}

fn archive_compress(action: &PlannedAction) -> Result<Committed, TidyError> {
    let source = action.source.as_std_path();
    let folder_name = action
        .source
        .file_name()
        .ok_or_else(|| TidyError::Transform(format!("{} has no file name", action.source)))?;
    let files = fs_util::walk_files(source)?;

    let file = File::create(action.temp.as_std_path()).map_err(io_err(&action.temp))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.mode(tar::HeaderMode::Complete);
    for path in &files {
        let relative = path
            .strip_prefix(source)
            .map_err(|err| TidyError::Transform(err.to_string()))?;
        builder
            .append_path_with_name(path, Path::new(folder_name).join(relative))
            .map_err(io_err(&action.temp))?;
    }
    let encoder = builder.into_inner().map_err(io_err(&action.temp))?;
    let writer = encoder.finish().map_err(io_err(&action.temp))?;
    writer
        .into_inner()
        .map_err(|err| TidyError::Filesystem(format!("{}: {}", action.temp, err.error())))?
        .sync_all()
        .map_err(io_err(&action.temp))?;

    let members = verify_members(&action.temp, files.len())?;
    let sha256 = fs_util::sha256_file(&action.temp)?;
    fs_util::commit(&action.temp, &action.destination)?;
    tracing::debug!(archive = %action.destination, members, "archive committed");

    let warning = if action.remove_source {
        release_source(&action.source, members)
    } else {
        None
    };
    Ok(Committed { sha256, warning })
}

/// Number of regular-file members in a `.tar.gz`; reading every member also checks the gzip CRC.
pub fn count_archive_members(path: &Utf8Path) -> Result<usize, TidyError> {
    let file = File::open(path.as_std_path()).map_err(io_err(path))?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut members = 0usize;
    for entry in archive.entries().map_err(io_err(path))? {
        let mut entry = entry.map_err(io_err(path))?;
        if entry.header().entry_type().is_file() {
            members += 1;
        }
        io::copy(&mut entry, &mut io::sink()).map_err(io_err(path))?;
    }
    Ok(members)
}

fn verify_members(archive: &Utf8Path, expected: usize) -> Result<usize, TidyError> {
    let members = count_archive_members(archive)?;
    if members != expected {
        return Err(TidyError::Integrity {
            expected: format!("{expected} files"),
            actual: format!("{members} archive members"),
        });
    }
    Ok(members)
}

/// Deletes an archived folder, but only while it still holds exactly `members` files.
/// Returns a warning when the folder is kept.
fn release_source(source: &Utf8Path, members: usize) -> Option<String> {
    let current = match fs_util::walk_files(source.as_std_path()) {
        Ok(files) => files.len(),
        Err(err) => {
            tracing::warn!(folder = %source, error = %err, "cannot recount archived folder");
            return Some(format!("source kept, cannot recount: {err}"));
        }
    };
    if current != members {
        tracing::warn!(
            folder = %source,
            archived = members,
            current,
            "folder changed while archiving, keeping source"
        );
        return Some(format!(
            "source kept, folder changed while archiving ({members} archived, {current} now)"
        ));
    }
    match fs::remove_dir_all(source.as_std_path()) {
        Ok(()) => None,
        Err(err) => {
            tracing::warn!(folder = %source, error = %err, "cannot remove archived folder");
            Some(format!("source not removed: {err}"))
        }
    }
}

/// Deletes a source file whose artifact is already committed. Returns a warning on failure.
fn release_file(source: &Utf8Path) -> Option<String> {
    match fs::remove_file(source.as_std_path()) {
        Ok(()) => None,
        Err(err) => {
            tracing::warn!(source = %source, error = %err, "cannot remove source file");
            Some(format!("source not removed: {err}"))
        }
    }
}

fn compress_move(action: &PlannedAction) -> Result<Committed, TidyError> {
    let expected = fs::metadata(action.source.as_std_path())
        .map_err(io_err(&action.source))?
        .len();
    compress_to_temp(action)?;
    commit_compressed(action, expected)
}

fn compress_to_temp(action: &PlannedAction) -> Result<(), TidyError> {
    let mut input = BufReader::new(
        File::open(action.source.as_std_path()).map_err(io_err(&action.source))?,
    );
    let output = File::create(action.temp.as_std_path()).map_err(io_err(&action.temp))?;
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    io::copy(&mut input, &mut encoder).map_err(io_err(&action.source))?;
    encoder
        .finish()
        .map_err(io_err(&action.temp))?
        .into_inner()
        .map_err(|err| TidyError::Filesystem(format!("{}: {}", action.temp, err.error())))?
        .sync_all()
        .map_err(io_err(&action.temp))
}

/// Checks the temp decodes to `expected` bytes, then commits it and releases the source.
fn commit_compressed(action: &PlannedAction, expected: u64) -> Result<Committed, TidyError> {
    let decoded = {
        let file = File::open(action.temp.as_std_path()).map_err(io_err(&action.temp))?;
        io::copy(&mut GzDecoder::new(BufReader::new(file)), &mut io::sink())
            .map_err(io_err(&action.temp))?
    };
    if decoded != expected {
        return Err(TidyError::Integrity {
            expected: format!("{expected} bytes"),
            actual: format!("{decoded} bytes"),
        });
    }

    let sha256 = fs_util::sha256_file(&action.temp)?;
    fs_util::commit(&action.temp, &action.destination)?;
    let warning = if action.remove_source {
        release_file(&action.source)
    } else {
        None
    };
    Ok(Committed { sha256, warning })
}

fn plain_move(action: &PlannedAction) -> Result<Committed, TidyError> {
    let warning = if action.remove_source {
        match fs_util::relocate_file(&action.source, &action.destination)? {
            fs_util::Relocation::Renamed => None,
            fs_util::Relocation::Copied => release_file(&action.source),
        }
    } else {
        fs_util::copy_verify_commit(&action.source, &action.destination)?;
        None
    };
    let sha256 = fs_util::sha256_file(&action.destination)?;
    Ok(Committed { sha256, warning })
}

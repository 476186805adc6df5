use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};

use crate::domain::TMP_SUFFIX;
use crate::error::TidyError;

/// Absolute form of a destination that may not exist yet. The deepest existing ancestor is
/// canonicalized, so symlinks and `..` resolve the same way they do for the scan roots.
pub fn resolve_destination(path: &Utf8Path) -> Result<Utf8PathBuf, TidyError> {
    let absolute = std::path::absolute(path.as_std_path())
        .map_err(|err| TidyError::Filesystem(format!("resolve {path}: {err}")))?;
    let mut existing = Utf8PathBuf::from_path_buf(absolute)
        .map_err(|_| TidyError::Filesystem(format!("non-utf8 destination {path}")))?;

    let mut pending = Vec::new();
    let mut resolved = loop {
        match existing.canonicalize_utf8() {
            Ok(resolved) => break resolved,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let Some(last) = existing.components().next_back() else {
                    return Err(TidyError::Filesystem(format!("resolve {path}: {err}")));
                };
                pending.push(last.as_str().to_string());
                if !existing.pop() {
                    return Err(TidyError::Filesystem(format!("resolve {path}: {err}")));
                }
            }
            Err(err) => return Err(TidyError::Filesystem(format!("resolve {path}: {err}"))),
        }
    };
    for part in pending.iter().rev() {
        match part.as_str() {
            ".." => {
                resolved.pop();
            }
            "." => {}
            name => resolved.push(name),
        }
    }
    Ok(resolved)
}

/// In-progress name for an artifact; never trusted as a finished output.
pub fn tmp_path(final_path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{final_path}{TMP_SUFFIX}"))
}

pub fn ensure_parent(path: &Utf8Path) -> Result<(), TidyError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| TidyError::Filesystem(format!("create {parent}: {err}")))?;
    }
    Ok(())
}

/// Removes a leftover temp file from an interrupted run.
pub fn discard_tmp(path: &Utf8Path) -> Result<(), TidyError> {
    match fs::remove_file(path.as_std_path()) {
        Ok(()) => {
            tracing::debug!(path = %path, "removed stale temp file");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(TidyError::Filesystem(format!("remove {path}: {err}"))),
    }
}

/// The single commit point: the temp file becomes visible under its final name.
pub fn commit(tmp: &Utf8Path, final_path: &Utf8Path) -> Result<(), TidyError> {
    fs::rename(tmp.as_std_path(), final_path.as_std_path())
        .map_err(|err| TidyError::Filesystem(format!("rename {tmp} -> {final_path}: {err}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
    /// One rename; the source name is gone.
    Renamed,
    /// Copied across devices and committed; the source is still in place.
    Copied,
}

/// Moves a file into place. Same filesystem: one rename. Across devices:
/// copy to a temp name, verify and commit, leaving the source for the caller to release.
pub fn relocate_file(source: &Utf8Path, final_path: &Utf8Path) -> Result<Relocation, TidyError> {
    match fs::rename(source.as_std_path(), final_path.as_std_path()) {
        Ok(()) => Ok(Relocation::Renamed),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(source = %source, "rename crosses devices, copying");
            copy_verify_commit(source, final_path)?;
            Ok(Relocation::Copied)
        }
        Err(err) => Err(TidyError::Filesystem(format!(
            "rename {source} -> {final_path}: {err}"
        ))),
    }
}

/// Copies `source` to `<final>.tmp`, checks the copy's digest, then commits it.
pub fn copy_verify_commit(source: &Utf8Path, final_path: &Utf8Path) -> Result<(), TidyError> {
    let tmp = tmp_path(final_path);
    fs::copy(source.as_std_path(), tmp.as_std_path())
        .map_err(|err| TidyError::Filesystem(format!("copy {source} -> {tmp}: {err}")))?;
    sync_file(&tmp)?;

    let expected = sha256_file(source)?;
    let actual = sha256_file(&tmp)?;
    if expected != actual {
        discard_tmp(&tmp)?;
        return Err(TidyError::Integrity { expected, actual });
    }
    commit(&tmp, final_path)
}

pub fn sync_file(path: &Utf8Path) -> Result<(), TidyError> {
    fs::File::open(path.as_std_path())
        .and_then(|file| file.sync_all())
        .map_err(|err| TidyError::Filesystem(format!("sync {path}: {err}")))
}

pub fn sha256_file(path: &Utf8Path) -> Result<String, TidyError> {
    let mut file = fs::File::open(path.as_std_path())
        .map_err(|err| TidyError::Filesystem(format!("open {path}: {err}")))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buf)
            .map_err(|err| TidyError::Filesystem(format!("read {path}: {err}")))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// All regular files under `root`, recursively, sorted for stable archive order.
pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>, TidyError> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries =
            fs::read_dir(&path).map_err(|err| TidyError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| TidyError::Filesystem(err.to_string()))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|err| TidyError::Filesystem(err.to_string()))?;
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

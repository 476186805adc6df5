use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TidyError {
    #[error("cannot scan {root}: {reason}")]
    #[diagnostic(help("check that the run directory layout matches the roots passed to `config`"))]
    Scan { root: PathBuf, reason: String },

    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error("sanitiser rejected {path}: {reason}")]
    SanitiseRejected { path: PathBuf, reason: String },

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("integrity check failed: expected {expected}, found {actual}")]
    Integrity { expected: String, actual: String },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("failed to read manifest file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse manifest: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("no entry completed ({failed} failed)")]
    NothingCompleted { failed: usize },
}

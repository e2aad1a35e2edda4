//! Error types shared by the packaging, pull and rewrite paths.
//!
//! Every filesystem failure carries the offending path. Usage errors are kept in
//! their own enum so callers (and tests) can tell a caller mistake apart from an
//! I/O or structural failure.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::registry::RegistryError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("Expected bundle flag when pulling a bundle, please use -b instead of --image")]
    ExpectedBundleFlag,

    #[error("Expected image flag when pulling an image or index, please use --image instead of -b")]
    ExpectedImageFlag,

    #[error("Expected only one of image, bundle, or lock")]
    MultipleReferenceSources,

    #[error("Expected either image, bundle, or lock")]
    MissingReferenceSource,

    #[error("Disallowed output directory (trying to avoid accidental deletion)")]
    DisallowedOutputPath,

    #[error("Lock output is only supported when pushing a bundle")]
    LockOutputRequiresBundle,

    #[error("Expected at least one file to push")]
    NoFiles,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Expected file '{0}' to be a regular file")]
    NotRegularFile(PathBuf),

    /// A relocated reference failed strict parsing. Candidates are built from
    /// already-valid parts, so this is an internal invariant violation.
    #[error("Invalid digest reference '{reference}': {reason}")]
    InvalidDigestRef { reference: String, reason: String },

    #[error("Invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Invalid image reference in lock file '{reference}': {reason}")]
    InvalidLockReference { reference: String, reason: String },

    #[error("Lock file {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl Error {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(Path::to_path_buf).unwrap_or_default();
        let source = err
            .into_io_error()
            .unwrap_or_else(|| io::Error::other("filesystem loop detected"));
        Error::Io { path, source }
    }
}

use std::path::PathBuf;

use thiserror::Error;

/// Failure classes surfaced by the index and restore operations. Anything
/// user-facing that is not an error (a path missing from every archive, an
/// age filter matching nothing) is reported as a warning or an empty result
/// instead.
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Invalid time specification '{0}'")]
    InvalidTimespec(String),
    #[error("'{command}' exited with status {status:?}")]
    ArchiveSourceFailure {
        command: String,
        status: subprocess::ExitStatus,
    },
    #[error("Database operation failed")]
    StoreFailure(#[from] rusqlite::Error),
    #[error("Filesystem operation failed at '{path}'")]
    FilesystemFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

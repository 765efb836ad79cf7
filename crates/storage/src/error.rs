use std::io;
use std::path::PathBuf;
use thiserror::Error;

use tabula_core::BalanceError;

/// Errors from loading, merging, editing and saving transaction files.
///
/// Nothing here is recoverable by silently skipping data: a malformed
/// line or a balance mismatch aborts the whole load of that file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{}:{line}: malformed record: {reason}", .path.display())]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("{}: {source}", .path.display())]
    BalanceMismatch {
        path: PathBuf,
        #[source]
        source: BalanceError,
    },

    #[error("overlapping periods: '{a}' and '{b}' both cover part of the same date range")]
    OverlappingPeriods { a: String, b: String },

    #[error("unknown category '{0}'")]
    UnknownCategory(String),

    #[error("no transaction at the given reference")]
    NoSuchTransaction,

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io { path: path.into(), source }
    }

    pub(crate) fn malformed(
        path: impl Into<PathBuf>,
        line: usize,
        reason: impl Into<String>,
    ) -> Self {
        StoreError::MalformedRecord {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}

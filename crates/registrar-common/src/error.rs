use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("prerequisite missing: {0}")]
    PrerequisiteMissing(String),

    #[error("backup failed: {0}")]
    BackupFailure(String),

    #[error("apply failed partway: {0}")]
    PartialApply(PartialCommit),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("transformation error: {0}")]
    Transformation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Table-rename state left behind when a multi-table commit stops partway.
///
/// The store has no multi-table atomicity, so an operator reads this to
/// finish or reverse the promotion by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialCommit {
    /// `(working, production)` pairs that were fully promoted.
    pub promoted: Vec<(String, String)>,
    /// The pair whose promotion failed.
    pub failed: (String, String),
    /// Whether the production table of the failed pair was already deleted.
    pub production_deleted: bool,
    /// Pairs never attempted.
    pub pending: Vec<(String, String)>,
    pub reason: String,
}

impl fmt::Display for PartialCommit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (working, production) = &self.failed;
        write!(
            f,
            "promoting '{working}' -> '{production}' failed ({}); ",
            self.reason
        )?;
        if self.production_deleted {
            write!(
                f,
                "'{production}' was already deleted, data now lives only in '{working}'; "
            )?;
        }
        write!(
            f,
            "{} pair(s) promoted, {} pair(s) not attempted",
            self.promoted.len(),
            self.pending.len()
        )
    }
}

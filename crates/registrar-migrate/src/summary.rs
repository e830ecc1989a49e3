use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Typed confirmation for anything that can destroy production data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    /// Report what would happen; write nothing.
    #[default]
    DryRun,
    Apply,
}

impl MigrationMode {
    pub const fn is_apply(self) -> bool {
        matches!(self, MigrationMode::Apply)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Preview,
    Run,
    Apply,
    Rollback,
    DiscardBackup,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preview => "preview",
            Self::Run => "run",
            Self::Apply => "apply",
            Self::Rollback => "rollback",
            Self::DiscardBackup => "discard-backup",
        };
        f.write_str(name)
    }
}

/// Where a migration's staged output stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitState {
    /// Output sits in working copies; production untouched.
    Draft,
    /// Working copies promoted, or production edited in place.
    Committed,
}

/// The structured result every operator-facing call returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSummary {
    pub migration: String,
    pub operation: Operation,
    pub mode: MigrationMode,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub warnings: Vec<String>,
    /// Human-readable list of performed (or, in dry runs, intended) steps.
    pub actions: Vec<String>,
    pub tables: Vec<String>,
    pub commit_state: Option<CommitState>,
}

impl MigrationSummary {
    pub fn new(migration: &str, operation: Operation, mode: MigrationMode) -> Self {
        Self {
            migration: migration.to_string(),
            operation,
            mode,
            created: 0,
            updated: 0,
            deleted: 0,
            skipped: 0,
            warnings: Vec::new(),
            actions: Vec::new(),
            tables: Vec::new(),
            commit_state: None,
        }
    }

    /// Record a warning and log it.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(migration = %self.migration, "{message}");
        self.warnings.push(message);
    }

    /// Count a skipped row along with the reason it was skipped.
    pub fn skip(&mut self, message: impl Into<String>) {
        self.skipped += 1;
        self.warn(message);
    }

    pub fn action(&mut self, message: impl Into<String>) {
        self.actions.push(message.into());
    }

    pub fn touch(&mut self, table: &str) {
        if !self.tables.iter().any(|t| t == table) {
            self.tables.push(table.to_string());
        }
    }

    /// Relabel a computed summary, e.g. when `run` reuses `preview`'s work.
    pub fn relabel(mut self, operation: Operation, mode: MigrationMode) -> Self {
        self.operation = operation;
        self.mode = mode;
        self
    }
}

impl fmt::Display for MigrationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            MigrationMode::DryRun => " (dry run)",
            MigrationMode::Apply => "",
        };
        writeln!(f, "{} {}{mode}", self.migration, self.operation)?;
        writeln!(
            f,
            "  created {}, updated {}, deleted {}, skipped {}",
            self.created, self.updated, self.deleted, self.skipped
        )?;
        if let Some(state) = self.commit_state {
            writeln!(f, "  state: {state:?}")?;
        }
        if !self.tables.is_empty() {
            writeln!(f, "  tables: {}", self.tables.join(", "))?;
        }
        for action in &self.actions {
            writeln!(f, "  - {action}")?;
        }
        for warning in &self.warnings {
            writeln!(f, "  ! {warning}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_is_the_default_mode() {
        assert_eq!(MigrationMode::default(), MigrationMode::DryRun);
        assert!(!MigrationMode::DryRun.is_apply());
        assert!(MigrationMode::Apply.is_apply());
    }

    #[test]
    fn skip_counts_and_records_reason() {
        let mut summary = MigrationSummary::new("m", Operation::Run, MigrationMode::Apply);
        summary.skip("row 4: blank id");
        summary.touch("a");
        summary.touch("a");
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.warnings, vec!["row 4: blank id".to_string()]);
        assert_eq!(summary.tables, vec!["a".to_string()]);
    }

    #[test]
    fn display_marks_dry_runs_and_lists_warnings() {
        let mut summary = MigrationSummary::new("rollover", Operation::Apply, MigrationMode::DryRun);
        summary.action("rename '_wc_x' to 'x'");
        summary.warn("careful");
        let text = summary.to_string();
        assert!(text.starts_with("rollover apply (dry run)\n"));
        assert!(text.contains("  - rename '_wc_x' to 'x'\n"));
        assert!(text.contains("  ! careful\n"));
    }

    #[test]
    fn summary_serializes_snake_case() {
        let summary = MigrationSummary::new("m", Operation::DiscardBackup, MigrationMode::DryRun);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["operation"], "discard_backup");
        assert_eq!(json["mode"], "dry_run");
    }
}

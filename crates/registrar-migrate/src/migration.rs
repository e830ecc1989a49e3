use std::fmt;

use registrar_common::Result;
use serde::{Deserialize, Serialize};

use crate::backup::{BackupEntry, BackupService};
use crate::context::MigrationContext;
use crate::migrations::{
    AddIntentColumns, NormalizePhones, RenameHeaders, ReplaceStudents, SplitParentContacts,
};
use crate::rollover::Rollover;
use crate::summary::{CommitState, MigrationMode, MigrationSummary, Operation};
use crate::verify::VerificationReport;
use crate::working_copy::WorkingCopyManager;

/// One schema or data migration, driven by an operator through
/// preview, run, apply, then verify.
///
/// Implementations hold no store handle; everything arrives through the
/// [`MigrationContext`].
pub trait Migration {
    fn id(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Whether `run` edits production directly (guarded by a snapshot)
    /// instead of staging a working copy.
    fn edits_in_place(&self) -> bool {
        false
    }

    /// Read-only analysis of what `run` would do.
    fn preview(&self, ctx: &MigrationContext<'_>) -> Result<MigrationSummary>;

    /// Build or refresh the working copy. Idempotent: a previous working
    /// copy is replaced. For in-place migrations, `DryRun` reports only.
    fn run(&self, ctx: &MigrationContext<'_>, mode: MigrationMode) -> Result<MigrationSummary>;

    /// Promote the working copy to production. Destructive under `Apply`.
    fn apply(&self, ctx: &MigrationContext<'_>, mode: MigrationMode) -> Result<MigrationSummary>;

    fn verify(&self, ctx: &MigrationContext<'_>) -> Result<VerificationReport>;

    /// Put the latest backup back over production.
    fn rollback(&self, ctx: &MigrationContext<'_>, mode: MigrationMode) -> Result<MigrationSummary> {
        let entries = BackupService::new(ctx.store).restore(self.id(), mode)?;
        let mut summary = MigrationSummary::new(self.id(), Operation::Rollback, mode);
        let verb = if mode.is_apply() { "restored" } else { "would restore" };
        for entry in &entries {
            summary.action(format!("{verb} '{}' from '{}'", entry.source, entry.backup));
            summary.touch(&entry.source);
            summary.updated += 1;
        }
        Ok(summary)
    }

    fn discard_backup(
        &self,
        ctx: &MigrationContext<'_>,
        mode: MigrationMode,
    ) -> Result<MigrationSummary> {
        let entries = BackupService::new(ctx.store).discard(self.id(), mode)?;
        let mut summary = MigrationSummary::new(self.id(), Operation::DiscardBackup, mode);
        let verb = if mode.is_apply() { "deleted" } else { "would delete" };
        for entry in &entries {
            summary.action(format!("{verb} backup '{}'", entry.backup));
            summary.deleted += 1;
        }
        if entries.is_empty() {
            summary.warn("no backups to discard");
        }
        Ok(summary)
    }

    /// Working copies and backups this migration currently holds.
    fn status(&self, ctx: &MigrationContext<'_>) -> Result<MigrationStatus> {
        let working_copies = WorkingCopyManager::new(ctx.store).list(self.id())?;
        let backups = BackupService::new(ctx.store).list(self.id())?;
        let state = (!working_copies.is_empty()).then_some(CommitState::Draft);
        Ok(MigrationStatus {
            migration: self.id().to_string(),
            state,
            working_copies,
            backups,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub migration: String,
    /// `Draft` while working copies await `apply`.
    pub state: Option<CommitState>,
    pub working_copies: Vec<String>,
    pub backups: Vec<BackupEntry>,
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.migration)?;
        if self.working_copies.is_empty() {
            writeln!(f, "  no working copies")?;
        }
        for working in &self.working_copies {
            writeln!(f, "  working copy: {working}")?;
        }
        for backup in &self.backups {
            writeln!(f, "  backup of {} at {}: {}", backup.source, backup.stamp, backup.backup)?;
        }
        Ok(())
    }
}

/// Every migration, in the order they are normally run.
pub fn registry() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(RenameHeaders),
        Box::new(AddIntentColumns),
        Box::new(SplitParentContacts),
        Box::new(ReplaceStudents),
        Box::new(NormalizePhones),
        Box::new(Rollover),
    ]
}

pub fn find(id: &str) -> Option<Box<dyn Migration>> {
    registry().into_iter().find(|m| m.id() == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn migration_ids_are_unique_and_resolvable() {
        let ids: Vec<&str> = registry().iter().map(|m| m.id()).collect();
        let distinct: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(ids.len(), distinct.len());
        for id in ids {
            assert_eq!(find(id).map(|m| m.id()), Some(id));
        }
        assert!(find("nope").is_none());
    }

    #[test]
    fn only_phone_normalization_edits_in_place() {
        let in_place: Vec<&str> = registry()
            .iter()
            .filter(|m| m.edits_in_place())
            .map(|m| m.id())
            .collect();
        assert_eq!(in_place, vec!["normalize-phones"]);
    }
}

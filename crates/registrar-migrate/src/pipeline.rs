//! Shared plumbing for transforms that stage their output in working copies.

use registrar_common::{Error, Result};
use registrar_store::{CellValue, Table};
use tracing::info;

use crate::commit::{ApplyCommitter, CommitPlan};
use crate::context::MigrationContext;
use crate::header::HeaderIndex;
use crate::summary::{CommitState, MigrationMode, MigrationSummary, Operation};
use crate::working_copy::{WorkingCopyManager, working_name};

/// Load a production table and check its required columns up front, so a
/// transform fails before writing anything.
pub fn load_source(
    ctx: &MigrationContext<'_>,
    table: &str,
    required: &[&str],
) -> Result<(Table, HeaderIndex)> {
    if !ctx.store.table_exists(table)? {
        return Err(Error::PrerequisiteMissing(format!("table '{table}' not found")));
    }
    let table = ctx.store.get_table(table)?;
    let index = HeaderIndex::of(&table);
    index.require(&table.name, required)?;
    Ok((table, index))
}

/// A transform's output for one production table.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedTable {
    pub production: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl StagedTable {
    pub fn new(production: &str, headers: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            production: production.to_string(),
            headers,
            rows,
        }
    }

    pub fn index(&self) -> HeaderIndex {
        HeaderIndex::new(&self.headers)
    }
}

/// Everything a working-copy transform computed, before any write.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub staged: Vec<StagedTable>,
    pub summary: MigrationSummary,
}

/// Write each staged table to its working copy, replacing any earlier one.
/// Production tables are never touched.
pub fn stage(
    ctx: &MigrationContext<'_>,
    migration: &str,
    output: TransformOutput,
) -> Result<MigrationSummary> {
    let manager = WorkingCopyManager::new(ctx.store);
    let mut summary = output.summary.relabel(Operation::Run, MigrationMode::Apply);
    for staged in &output.staged {
        let working = working_name(migration, &staged.production);
        manager.write_working_table(&working, &staged.headers, &staged.rows)?;
        summary.touch(&working);
        summary.action(format!(
            "staged {} rows in '{working}' for '{}'",
            staged.rows.len(),
            staged.production
        ));
    }
    summary.commit_state = Some(CommitState::Draft);
    info!("{migration}: staged {} working table(s)", output.staged.len());
    Ok(summary)
}

/// Promote the working copies named by `plan` and report what happened.
pub fn promote(
    ctx: &MigrationContext<'_>,
    migration: &str,
    plan: &CommitPlan,
    mode: MigrationMode,
) -> Result<MigrationSummary> {
    let report = ApplyCommitter::new(ctx.store).commit(plan, mode)?;
    let mut summary = MigrationSummary::new(migration, Operation::Apply, mode);
    let verb = if mode.is_apply() { "" } else { "would " };
    for pair in &report.pairs {
        if report.replaced.contains(&pair.production) {
            summary.action(format!("{verb}delete production table '{}'", pair.production));
            summary.deleted += 1;
        }
        summary.action(format!(
            "{verb}rename '{}' to '{}'",
            pair.working, pair.production
        ));
        summary.touch(&pair.production);
    }
    summary.commit_state = Some(report.state);
    Ok(summary)
}

/// Plan promoting `migration`'s working copy of each table in `tables`,
/// each with its required headers.
pub fn plan_for(migration: &str, tables: &[(&str, &[&str])]) -> CommitPlan {
    tables
        .iter()
        .fold(CommitPlan::new(), |plan, (production, required)| {
            plan.pair(working_name(migration, production), *production)
                .requiring(required)
        })
}

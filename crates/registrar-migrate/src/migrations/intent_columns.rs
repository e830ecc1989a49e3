use registrar_common::{Result, fields};
use registrar_store::{CellRange, CellValue, WriteOp};

use crate::context::MigrationContext;
use crate::migration::Migration;
use crate::pipeline::{load_source, plan_for, promote};
use crate::summary::{CommitState, MigrationMode, MigrationSummary, Operation};
use crate::verify::{VerificationReport, Verifier};
use crate::working_copy::{WorkingCopyManager, working_name};

const ID: &str = "add-intent-columns";

const COLUMNS: [&str; 4] = [
    fields::REENROLLMENT_INTENT,
    fields::INTENT_SUBMITTED_AT,
    fields::INTENT_SUBMITTED_BY,
    fields::LINKED_PREVIOUS_REGISTRATION_ID,
];

/// Appends the re-enrollment tracking columns to the registrations table.
/// Existing rows read the new columns as blank.
pub struct AddIntentColumns;

/// Columns still to add and the position of the first one.
fn plan(ctx: &MigrationContext<'_>) -> Result<(usize, Vec<&'static str>, MigrationSummary)> {
    let table = &ctx.config.intent_columns.table;
    let (source, index) = load_source(ctx, table, &[fields::ID])?;
    let mut summary = MigrationSummary::new(ID, Operation::Preview, MigrationMode::DryRun);
    summary.touch(table);

    let missing = index.missing(&COLUMNS);
    for present in COLUMNS.iter().filter(|c| !missing.contains(c)) {
        summary.warn(format!("'{table}' already has '{present}'"));
    }
    for column in &missing {
        summary.action(format!(
            "add column '{column}' to '{table}', blank for {} existing rows",
            source.row_count()
        ));
    }
    summary.updated = if missing.is_empty() { 0 } else { source.row_count() };
    Ok((index.width(), missing, summary))
}

impl Migration for AddIntentColumns {
    fn id(&self) -> &'static str {
        ID
    }

    fn description(&self) -> &'static str {
        "Add re-enrollment intent and lineage columns to registrations"
    }

    fn preview(&self, ctx: &MigrationContext<'_>) -> Result<MigrationSummary> {
        plan(ctx).map(|(_, _, summary)| summary)
    }

    fn run(&self, ctx: &MigrationContext<'_>, _mode: MigrationMode) -> Result<MigrationSummary> {
        let (width, missing, summary) = plan(ctx)?;
        let mut summary = summary.relabel(Operation::Run, MigrationMode::Apply);
        let table = &ctx.config.intent_columns.table;
        let working = working_name(ID, table);
        let manager = WorkingCopyManager::new(ctx.store);
        if missing.is_empty() {
            if manager.discard(&working)? {
                summary.action(format!("discarded stale working copy '{working}'"));
            }
            return Ok(summary);
        }

        manager.create_working_copy(table, &working)?;
        let header_cells = missing.iter().map(|c| CellValue::text(*c)).collect();
        ctx.store.batch_write(&[WriteOp::SetRange {
            table: working.clone(),
            range: CellRange::new(0, width, 1, missing.len()),
            values: vec![header_cells],
        }])?;

        summary.touch(&working);
        summary.commit_state = Some(CommitState::Draft);
        Ok(summary)
    }

    fn apply(&self, ctx: &MigrationContext<'_>, mode: MigrationMode) -> Result<MigrationSummary> {
        let table = ctx.config.intent_columns.table.as_str();
        promote(ctx, ID, &plan_for(ID, &[(table, &COLUMNS)]), mode)
    }

    fn verify(&self, ctx: &MigrationContext<'_>) -> Result<VerificationReport> {
        let mut verifier = Verifier::new(ctx.store, ID);
        if let Some(table) = verifier.table(&ctx.config.intent_columns.table)? {
            verifier.headers_present(&table, &COLUMNS);
        }
        Ok(verifier.finish())
    }
}

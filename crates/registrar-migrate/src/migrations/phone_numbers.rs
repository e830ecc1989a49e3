use registrar_common::Result;
use registrar_config::PhoneTarget;
use registrar_store::{CellRange, CellValue, WriteOp};
use tracing::error;

use crate::backup::BackupService;
use crate::context::MigrationContext;
use crate::migration::Migration;
use crate::normalize::{PhoneOutcome, is_normalized_phone, normalize_phone};
use crate::pipeline::load_source;
use crate::summary::{CommitState, MigrationMode, MigrationSummary, Operation};
use crate::verify::{VerificationReport, Verifier};

const ID: &str = "normalize-phones";

/// Rewrites phone cells to bare ten-digit strings, editing production
/// directly behind a snapshot.
pub struct NormalizePhones;

/// Cells to rewrite: `(table, sheet row, column, new value)`.
type CellEdit = (String, usize, usize, String);

fn placeholder(ctx: &MigrationContext<'_>) -> Option<char> {
    let phones = &ctx.config.phones;
    phones.allow_placeholders.then_some(phones.placeholder_char)
}

fn plan(ctx: &MigrationContext<'_>) -> Result<(Vec<CellEdit>, Vec<String>, MigrationSummary)> {
    let mut summary = MigrationSummary::new(ID, Operation::Preview, MigrationMode::DryRun);
    let placeholder = placeholder(ctx);
    let mut edits = Vec::new();
    let mut tables: Vec<String> = Vec::new();

    // Every target is checked before any is planned.
    let mut sources = Vec::with_capacity(ctx.config.phones.targets.len());
    for target in &ctx.config.phones.targets {
        sources.push((target, load_source(ctx, &target.table, &[target.column.as_str()])?));
    }

    for (PhoneTarget { table, column }, (source, index)) in sources {
        let Some(col) = index.position(column) else {
            continue;
        };
        let before = edits.len();
        for (n, record) in index.records(&source).enumerate() {
            match normalize_phone(&record.get(column).as_text(), placeholder) {
                PhoneOutcome::Blank | PhoneOutcome::Unchanged => {}
                PhoneOutcome::Normalized(value) => {
                    edits.push((table.clone(), n + 1, col, value));
                }
                PhoneOutcome::Invalid { reason } => {
                    summary.skip(format!("'{table}' sheet row {}: {reason}", n + 2));
                }
            }
        }
        let changed = edits.len() - before;
        summary.updated += changed;
        summary.action(format!("normalize {changed} value(s) in '{table}'.{column}"));
        summary.touch(table);
        if changed > 0 && !tables.contains(table) {
            tables.push(table.clone());
        }
    }
    if ctx.config.phones.targets.is_empty() {
        summary.warn("no phone columns configured");
    }
    Ok((edits, tables, summary))
}

impl Migration for NormalizePhones {
    fn id(&self) -> &'static str {
        ID
    }

    fn description(&self) -> &'static str {
        "Strip phone numbers to ten digits in place, after a backup"
    }

    fn edits_in_place(&self) -> bool {
        true
    }

    fn preview(&self, ctx: &MigrationContext<'_>) -> Result<MigrationSummary> {
        plan(ctx).map(|(_, _, summary)| summary)
    }

    fn run(&self, ctx: &MigrationContext<'_>, mode: MigrationMode) -> Result<MigrationSummary> {
        let (edits, tables, summary) = plan(ctx)?;
        let mut summary = summary.relabel(Operation::Run, mode);
        if edits.is_empty() {
            return Ok(summary);
        }
        if !mode.is_apply() {
            summary.action(format!("would back up {} before writing", tables.join(", ")));
            return Ok(summary);
        }

        let names: Vec<&str> = tables.iter().map(String::as_str).collect();
        let snapshot = BackupService::new(ctx.store).snapshot(ID, &names, ctx.now)?;
        for entry in &snapshot.entries {
            summary.action(format!("backed up '{}' as '{}'", entry.source, entry.backup));
            summary.touch(&entry.backup);
        }

        let ops: Vec<WriteOp> = edits
            .into_iter()
            .map(|(table, row, col, value)| WriteOp::SetRange {
                table,
                range: CellRange::cell(row, col),
                values: vec![vec![CellValue::text(value)]],
            })
            .collect();
        if let Err(e) = ctx.store.batch_write(&ops) {
            error!("phone rewrite failed, restore with `rollback {ID}`: {e}");
            return Err(e);
        }
        summary.action(format!("rewrote {} cell(s) in one batch", ops.len()));
        summary.commit_state = Some(CommitState::Committed);
        Ok(summary)
    }

    fn apply(&self, ctx: &MigrationContext<'_>, mode: MigrationMode) -> Result<MigrationSummary> {
        let mut summary = MigrationSummary::new(ID, Operation::Apply, mode);
        if BackupService::new(ctx.store).list(ID)?.is_empty() {
            summary.warn("no backup found; run with --execute to edit the phone columns");
        } else {
            summary.warn("edits were written by run; nothing to promote");
            summary.commit_state = Some(CommitState::Committed);
        }
        Ok(summary)
    }

    fn verify(&self, ctx: &MigrationContext<'_>) -> Result<VerificationReport> {
        let placeholder = placeholder(ctx);
        let backups = BackupService::new(ctx.store).latest(ID)?;
        let mut verifier = Verifier::new(ctx.store, ID);
        for target in &ctx.config.phones.targets {
            let Some(table) = verifier.table(&target.table)? else {
                continue;
            };
            verifier.headers_present(&table, &[target.column.as_str()]);
            verifier.column_format(&table, &target.column, "10 digits", |cell| {
                is_normalized_phone(cell, placeholder)
            });
            if let Some(entry) = backups.iter().find(|e| e.source == target.table) {
                if ctx.store.table_exists(&entry.backup)? {
                    let before = ctx.store.get_table(&entry.backup)?;
                    verifier.row_count(&table, before.row_count(), &entry.backup);
                }
            }
        }
        Ok(verifier.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registrar_common::Error;
    use registrar_config::AppConfig;
    use registrar_store::{MemoryStore, TabularStore, Table};

    fn parents() -> Table {
        Table::new("parents", vec!["id".into(), "phone".into()]).with_rows(vec![
            vec!["p1".into(), "(415) 945-5121".into()],
            vec!["p2".into(), "4159455121".into()],
            vec!["p3".into(), "945-5121".into()],
            vec!["p4".into(), CellValue::Empty],
        ])
    }

    #[test]
    fn dry_run_writes_nothing() {
        let store = MemoryStore::with_tables([parents()]);
        let config = AppConfig::default();
        let ctx = MigrationContext::new(&store, &config);

        let summary = NormalizePhones.run(&ctx, MigrationMode::DryRun).unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(store.list_tables().unwrap(), vec!["parents".to_string()]);
        assert_eq!(store.get_table("parents").unwrap(), parents());
    }

    #[test]
    fn run_backs_up_then_rewrites_valid_numbers_only() {
        let store = MemoryStore::with_tables([parents()]);
        let config = AppConfig::default();
        let ctx = MigrationContext::new(&store, &config);

        let summary = NormalizePhones.run(&ctx, MigrationMode::Apply).unwrap();
        assert_eq!(summary.commit_state, Some(CommitState::Committed));
        assert_eq!(summary.warnings, vec!["'parents' sheet row 4: '945-5121' has 7 digits, expected 10"]);

        let phones: Vec<CellValue> = store
            .get_table("parents")
            .unwrap()
            .rows
            .into_iter()
            .map(|row| row[1].clone())
            .collect();
        assert_eq!(phones[0], CellValue::text("4159455121"));
        assert_eq!(phones[2], CellValue::text("945-5121"));
        assert_eq!(BackupService::new(&store).list(ID).unwrap().len(), 1);

        let report = NormalizePhones.verify(&ctx).unwrap();
        assert_eq!(report.failed(), 1, "{report}");
    }

    #[test]
    fn rollback_restores_original_values() {
        let store = MemoryStore::with_tables([parents()]);
        let config = AppConfig::default();
        let ctx = MigrationContext::new(&store, &config);
        NormalizePhones.run(&ctx, MigrationMode::Apply).unwrap();

        NormalizePhones.rollback(&ctx, MigrationMode::Apply).unwrap();
        assert_eq!(store.get_table("parents").unwrap(), parents());
        assert_eq!(store.list_tables().unwrap(), vec!["parents".to_string()]);
    }

    #[test]
    fn missing_column_aborts_before_backup() {
        let store = MemoryStore::with_tables([Table::new("parents", vec!["id".into()])]);
        let config = AppConfig::default();
        let ctx = MigrationContext::new(&store, &config);
        assert!(matches!(
            NormalizePhones.run(&ctx, MigrationMode::Apply),
            Err(Error::PrerequisiteMissing(_))
        ));
        assert_eq!(store.list_tables().unwrap().len(), 1);
    }

    #[test]
    fn placeholders_pass_when_allowed() {
        let store = MemoryStore::with_tables([Table::new("parents", vec!["phone".into()])
            .with_rows(vec![vec!["415-xxx-xxxx".into()]])]);
        let mut config = AppConfig::default();
        config.phones.allow_placeholders = true;
        let ctx = MigrationContext::new(&store, &config);
        NormalizePhones.run(&ctx, MigrationMode::Apply).unwrap();
        assert_eq!(
            store.get_table("parents").unwrap().rows[0][0],
            CellValue::text("415XXXXXXX")
        );
        assert!(NormalizePhones.verify(&ctx).unwrap().is_success());
    }
}

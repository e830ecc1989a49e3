use registrar_common::{Error, Result};
use registrar_config::HeaderRename;
use registrar_store::{CellRange, CellValue, WriteOp};

use crate::context::MigrationContext;
use crate::migration::Migration;
use crate::pipeline::{load_source, plan_for, promote};
use crate::summary::{CommitState, MigrationMode, MigrationSummary, Operation};
use crate::verify::{VerificationReport, Verifier};
use crate::working_copy::{WorkingCopyManager, working_name};

const ID: &str = "rename-headers";

/// Rewrites header cells per `header_renames`; cell data is untouched.
pub struct RenameHeaders;

/// Header cells to rewrite in one table.
struct TableRenames {
    table: String,
    columns: Vec<(usize, String)>,
    required: Vec<String>,
}

fn grouped(renames: &[HeaderRename]) -> Vec<(&str, Vec<&HeaderRename>)> {
    let mut groups: Vec<(&str, Vec<&HeaderRename>)> = Vec::new();
    for rename in renames {
        match groups.iter_mut().find(|(table, _)| *table == rename.table) {
            Some((_, list)) => list.push(rename),
            None => groups.push((rename.table.as_str(), vec![rename])),
        }
    }
    groups
}

fn plan(ctx: &MigrationContext<'_>) -> Result<(Vec<TableRenames>, MigrationSummary)> {
    let mut summary = MigrationSummary::new(ID, Operation::Preview, MigrationMode::DryRun);
    if ctx.config.header_renames.is_empty() {
        summary.warn("no header renames configured");
        return Ok((Vec::new(), summary));
    }

    let mut tables = Vec::new();
    for (table, renames) in grouped(&ctx.config.header_renames) {
        let (_, index) = load_source(ctx, table, &[])?;
        let mut columns = Vec::new();
        for rename in &renames {
            match (index.position(&rename.from), index.position(&rename.to)) {
                (Some(col), target) if target.is_none() || target == Some(col) => {
                    summary.action(format!(
                        "rename column {} of '{table}' from '{}' to '{}'",
                        col + 1,
                        rename.from,
                        rename.to
                    ));
                    summary.updated += 1;
                    columns.push((col, rename.to.clone()));
                }
                (Some(_), _) => {
                    return Err(Error::Transformation(format!(
                        "renaming '{}' to '{}' in '{table}' would duplicate an existing header",
                        rename.from, rename.to
                    )));
                }
                (None, Some(_)) => {
                    summary.warn(format!("'{table}' already has '{}'", rename.to));
                }
                (None, None) => {
                    return Err(Error::PrerequisiteMissing(format!(
                        "table '{table}' has neither '{}' nor '{}'",
                        rename.from, rename.to
                    )));
                }
            }
        }
        summary.touch(table);
        if !columns.is_empty() {
            tables.push(TableRenames {
                table: table.to_string(),
                columns,
                required: renames.iter().map(|r| r.to.clone()).collect(),
            });
        }
    }
    Ok((tables, summary))
}

impl Migration for RenameHeaders {
    fn id(&self) -> &'static str {
        ID
    }

    fn description(&self) -> &'static str {
        "Rename header cells in place, keeping every column's data"
    }

    fn preview(&self, ctx: &MigrationContext<'_>) -> Result<MigrationSummary> {
        plan(ctx).map(|(_, summary)| summary)
    }

    fn run(&self, ctx: &MigrationContext<'_>, _mode: MigrationMode) -> Result<MigrationSummary> {
        let (tables, summary) = plan(ctx)?;
        let mut summary = summary.relabel(Operation::Run, MigrationMode::Apply);
        let manager = WorkingCopyManager::new(ctx.store);
        for stale in manager.list(ID)? {
            if !tables.iter().any(|t| working_name(ID, &t.table) == stale) {
                manager.discard(&stale)?;
            }
        }

        let mut ops = Vec::new();
        for renames in &tables {
            let working = working_name(ID, &renames.table);
            manager.create_working_copy(&renames.table, &working)?;
            for (col, to) in &renames.columns {
                ops.push(WriteOp::SetRange {
                    table: working.clone(),
                    range: CellRange::cell(0, *col),
                    values: vec![vec![CellValue::text(to.as_str())]],
                });
            }
            summary.touch(&working);
        }
        if !ops.is_empty() {
            ctx.store.batch_write(&ops)?;
        }
        summary.commit_state = Some(CommitState::Draft);
        Ok(summary)
    }

    fn apply(&self, ctx: &MigrationContext<'_>, mode: MigrationMode) -> Result<MigrationSummary> {
        let (tables, _) = plan(ctx)?;
        if tables.is_empty() {
            let mut summary = MigrationSummary::new(ID, Operation::Apply, mode);
            summary.warn("every configured header is already renamed; nothing to promote");
            return Ok(summary);
        }
        let required: Vec<Vec<&str>> = tables
            .iter()
            .map(|t| t.required.iter().map(String::as_str).collect())
            .collect();
        let pairs: Vec<(&str, &[&str])> = tables
            .iter()
            .zip(&required)
            .map(|(t, r)| (t.table.as_str(), r.as_slice()))
            .collect();
        promote(ctx, ID, &plan_for(ID, &pairs), mode)
    }

    fn verify(&self, ctx: &MigrationContext<'_>) -> Result<VerificationReport> {
        let mut verifier = Verifier::new(ctx.store, ID);
        for (table, renames) in grouped(&ctx.config.header_renames) {
            let Some(current) = verifier.table(table)? else {
                continue;
            };
            let wanted: Vec<&str> = renames.iter().map(|r| r.to.as_str()).collect();
            let retired: Vec<&str> = renames
                .iter()
                .filter(|r| !r.from.eq_ignore_ascii_case(&r.to))
                .map(|r| r.from.as_str())
                .collect();
            verifier.headers_present(&current, &wanted);
            verifier.headers_absent(&current, &retired);
        }
        Ok(verifier.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registrar_config::AppConfig;
    use registrar_store::{MemoryStore, TabularStore, Table};

    fn config() -> AppConfig {
        AppConfig {
            header_renames: vec![
                HeaderRename {
                    table: "registrations".into(),
                    from: "Teacher".into(),
                    to: "instructorId".into(),
                },
                HeaderRename {
                    table: "registrations".into(),
                    from: "Start".into(),
                    to: "startTime".into(),
                },
            ],
            ..AppConfig::default()
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::with_tables([Table::new(
            "registrations",
            vec!["id".into(), "Teacher".into(), "Start".into()],
        )
        .with_rows(vec![vec!["r1".into(), "t1".into(), CellValue::Number(0.5)]])])
    }

    #[test]
    fn run_renames_headers_in_working_copy_only() {
        let store = store();
        let config = config();
        let ctx = MigrationContext::new(&store, &config);

        let summary = RenameHeaders.run(&ctx, MigrationMode::Apply).unwrap();
        assert_eq!(summary.updated, 2);

        let working = store.get_table("_wc_rename-headers_registrations").unwrap();
        assert_eq!(working.headers, vec!["id", "instructorId", "startTime"]);
        assert_eq!(working.rows, store.get_table("registrations").unwrap().rows);
        assert_eq!(
            store.get_table("registrations").unwrap().headers,
            vec!["id", "Teacher", "Start"]
        );
    }

    #[test]
    fn apply_then_verify_passes() {
        let store = store();
        let config = config();
        let ctx = MigrationContext::new(&store, &config);
        RenameHeaders.run(&ctx, MigrationMode::Apply).unwrap();
        RenameHeaders.apply(&ctx, MigrationMode::Apply).unwrap();

        let report = RenameHeaders.verify(&ctx).unwrap();
        assert!(report.is_success(), "{report}");
        assert_eq!(store.list_tables().unwrap(), vec!["registrations".to_string()]);
    }

    #[test]
    fn rerun_with_nothing_to_rename_drops_the_old_copy() {
        let store = store();
        let config = config();
        let ctx = MigrationContext::new(&store, &config);
        RenameHeaders.run(&ctx, MigrationMode::Apply).unwrap();

        store
            .set_cell_range(
                "registrations",
                CellRange::new(0, 1, 1, 2),
                &[vec!["instructorId".into(), "startTime".into()]],
            )
            .unwrap();
        let summary = RenameHeaders.run(&ctx, MigrationMode::Apply).unwrap();
        assert_eq!(summary.updated, 0);
        assert_eq!(store.list_tables().unwrap(), vec!["registrations".to_string()]);
    }

    #[test]
    fn rename_onto_existing_header_is_refused() {
        let store = MemoryStore::with_tables([Table::new(
            "registrations",
            vec!["Teacher".into(), "instructorId".into(), "Start".into()],
        )]);
        let config = config();
        let ctx = MigrationContext::new(&store, &config);
        let err = RenameHeaders.preview(&ctx).unwrap_err();
        assert!(matches!(err, Error::Transformation(_)));
    }

    #[test]
    fn unknown_source_header_is_a_prerequisite_error() {
        let store = MemoryStore::with_tables([Table::new("registrations", vec!["id".into()])]);
        let config = config();
        let ctx = MigrationContext::new(&store, &config);
        assert!(matches!(
            RenameHeaders.run(&ctx, MigrationMode::Apply),
            Err(Error::PrerequisiteMissing(_))
        ));
        assert_eq!(store.list_tables().unwrap().len(), 1);
    }
}

//! Carries registrations from one trimester's table into the next.
//!
//! Each source row is read through its intent flag. `drop` rows stay behind;
//! every other row is copied forward under a fresh id, linked back to the
//! row it came from, and mirrored into the next trimester's audit table.

use registrar_common::{Error, ReenrollmentIntent, Result, fields};
use registrar_config::RolloverConfig;
use registrar_store::{CellValue, Table};
use tracing::{debug, info};
use uuid::Uuid;

use crate::context::MigrationContext;
use crate::header::HeaderIndex;
use crate::migration::Migration;
use crate::normalize::normalize_time;
use crate::pipeline::{StagedTable, TransformOutput, load_source, plan_for, promote, stage};
use crate::summary::{MigrationMode, MigrationSummary, Operation};
use crate::verify::{VerificationReport, Verifier, column_values};

const ID: &str = "rollover";

/// Columns every rolled-over registration carries, appended when the source
/// lacks them.
const LINEAGE_FIELDS: [&str; 6] = [
    fields::CREATED_AT,
    fields::CREATED_BY,
    fields::LINKED_PREVIOUS_REGISTRATION_ID,
    fields::REENROLLMENT_INTENT,
    fields::INTENT_SUBMITTED_AT,
    fields::INTENT_SUBMITTED_BY,
];

/// Fields the audit mirror never copies from the registration.
const AUDIT_OWN_FIELDS: [&str; 4] = [
    fields::ID,
    fields::REGISTRATION_ID,
    fields::UPDATED_AT,
    fields::UPDATED_BY,
];

#[derive(Debug, Clone)]
pub struct RolloverOutput {
    pub registrations: StagedTable,
    pub audit: StagedTable,
    pub carried: usize,
    pub dropped: usize,
    /// One message per source row left out for a reason other than `drop`.
    pub skipped: Vec<String>,
}

/// Pure rollover transform: no store access, so the same source rows always
/// produce the same output apart from minted ids.
pub struct RolloverEngine<'a> {
    config: &'a RolloverConfig,
    created_at: String,
}

impl<'a> RolloverEngine<'a> {
    pub fn new(config: &'a RolloverConfig, created_at: impl Into<String>) -> Self {
        Self {
            config,
            created_at: created_at.into(),
        }
    }

    pub fn audit_headers(registration_headers: &[String]) -> Vec<String> {
        let mut headers = vec![fields::ID.to_string(), fields::REGISTRATION_ID.to_string()];
        headers.extend(
            registration_headers
                .iter()
                .filter(|h| !AUDIT_OWN_FIELDS.iter().any(|own| own.eq_ignore_ascii_case(h.trim())))
                .cloned(),
        );
        headers.push(fields::UPDATED_AT.to_string());
        headers.push(fields::UPDATED_BY.to_string());
        headers
    }

    pub fn roll(&self, source: &Table) -> Result<RolloverOutput> {
        let index = HeaderIndex::of(source);
        index.require(&source.name, &[fields::ID, fields::REENROLLMENT_INTENT])?;

        let headers = index.extended(&LINEAGE_FIELDS);
        let out = HeaderIndex::new(&headers);
        let audit_headers = Self::audit_headers(&headers);
        let audit = HeaderIndex::new(&audit_headers);

        let mut registrations = Vec::new();
        let mut audit_rows = Vec::new();
        let mut dropped = 0;
        let mut skipped = Vec::new();

        for (n, record) in index.records(source).enumerate() {
            let raw_intent = record.text(fields::REENROLLMENT_INTENT);
            let Some(intent) = ReenrollmentIntent::parse(&raw_intent) else {
                skipped.push(format!(
                    "'{}' sheet row {}: unrecognized intent '{raw_intent}'",
                    source.name,
                    n + 2
                ));
                continue;
            };
            if !intent.carries_forward() {
                dropped += 1;
                continue;
            }
            let previous_id = record.text(fields::ID);
            if previous_id.is_empty() {
                skipped.push(format!("'{}' sheet row {}: blank id", source.name, n + 2));
                continue;
            }

            let id = Uuid::new_v4().to_string();
            let mut row = out.project(&index, record.cells());
            out.set(&mut row, fields::ID, CellValue::text(id.as_str()));
            out.set(&mut row, fields::CREATED_AT, CellValue::text(self.created_at.as_str()));
            out.set(&mut row, fields::CREATED_BY, CellValue::text(self.config.system_actor.as_str()));
            out.set(&mut row, fields::LINKED_PREVIOUS_REGISTRATION_ID, CellValue::text(previous_id));
            out.set(&mut row, fields::UPDATED_AT, CellValue::Empty);
            out.set(&mut row, fields::UPDATED_BY, CellValue::Empty);
            for field in &self.config.time_fields {
                let normalized = normalize_time(record.get(field));
                out.set(&mut row, field, normalized);
            }
            for field in fields::INTENT_FIELDS {
                out.set(&mut row, field, CellValue::Empty);
            }

            let mut mirror = audit.project(&out, &row);
            audit.set(&mut mirror, fields::ID, CellValue::text(Uuid::new_v4().to_string()));
            audit.set(&mut mirror, fields::REGISTRATION_ID, CellValue::text(id));
            audit.set(&mut mirror, fields::UPDATED_AT, CellValue::Empty);
            audit.set(&mut mirror, fields::UPDATED_BY, CellValue::Empty);

            debug!("rolled '{}' forward", record.text(fields::ID));
            registrations.push(row);
            audit_rows.push(mirror);
        }

        let carried = registrations.len();
        Ok(RolloverOutput {
            registrations: StagedTable::new(&self.config.target_table, headers, registrations),
            audit: StagedTable::new(&self.config.target_audit_table, audit_headers, audit_rows),
            carried,
            dropped,
            skipped,
        })
    }
}

/// The rollover as an operator-driven migration over the configured
/// trimester tables.
pub struct Rollover;

fn transform(ctx: &MigrationContext<'_>) -> Result<TransformOutput> {
    let config = &ctx.config.rollover;
    if config.source_table == config.target_table {
        return Err(Error::Config(format!(
            "rollover source and target are both '{}'",
            config.source_table
        )));
    }
    let (source, _) = load_source(
        ctx,
        &config.source_table,
        &[fields::ID, fields::REENROLLMENT_INTENT],
    )?;
    let output = RolloverEngine::new(config, ctx.timestamp()).roll(&source)?;

    let mut summary = MigrationSummary::new(ID, Operation::Preview, MigrationMode::DryRun);
    for message in output.skipped {
        summary.skip(message);
    }
    for existing in [&config.target_table, &config.target_audit_table] {
        if ctx.store.table_exists(existing)? {
            let rows = ctx.store.get_table(existing)?.row_count();
            summary.warn(format!("'{existing}' already has {rows} rows and is replaced on apply"));
        }
    }
    summary.created = output.carried;
    summary.touch(&config.source_table);
    summary.touch(&config.target_table);
    summary.touch(&config.target_audit_table);
    summary.action(format!(
        "carry {} registration(s) from '{}' into '{}'",
        output.carried, config.source_table, config.target_table
    ));
    summary.action(format!(
        "mirror {} creation record(s) into '{}'",
        output.carried, config.target_audit_table
    ));
    summary.action(format!("leave {} dropped registration(s) behind", output.dropped));
    info!(
        "rollover: {} carried, {} dropped, {} skipped",
        output.carried, output.dropped, summary.skipped
    );

    Ok(TransformOutput {
        staged: vec![output.registrations, output.audit],
        summary,
    })
}

impl Migration for Rollover {
    fn id(&self) -> &'static str {
        ID
    }

    fn description(&self) -> &'static str {
        "Roll registrations into the next trimester with an audit mirror"
    }

    fn preview(&self, ctx: &MigrationContext<'_>) -> Result<MigrationSummary> {
        transform(ctx).map(|output| output.summary)
    }

    fn run(&self, ctx: &MigrationContext<'_>, _mode: MigrationMode) -> Result<MigrationSummary> {
        stage(ctx, ID, transform(ctx)?)
    }

    fn apply(&self, ctx: &MigrationContext<'_>, mode: MigrationMode) -> Result<MigrationSummary> {
        let config = &ctx.config.rollover;
        let plan = plan_for(
            ID,
            &[
                (
                    config.target_table.as_str(),
                    &[
                        fields::ID,
                        fields::CREATED_AT,
                        fields::CREATED_BY,
                        fields::LINKED_PREVIOUS_REGISTRATION_ID,
                    ],
                ),
                (
                    config.target_audit_table.as_str(),
                    &[fields::ID, fields::REGISTRATION_ID],
                ),
            ],
        );
        promote(ctx, ID, &plan, mode)
    }

    fn verify(&self, ctx: &MigrationContext<'_>) -> Result<VerificationReport> {
        let config = &ctx.config.rollover;
        let mut verifier = Verifier::new(ctx.store, ID);
        let target = verifier.table(&config.target_table)?;
        let audit = verifier.table(&config.target_audit_table)?;

        if let Some(target) = &target {
            verifier.headers_present(target, &LINEAGE_FIELDS);
            verifier.unique(target, fields::ID);
            if ctx.store.table_exists(&config.source_table)? {
                let source = ctx.store.get_table(&config.source_table)?;
                let index = HeaderIndex::of(&source);
                let expected = index
                    .records(&source)
                    .filter(|r| {
                        ReenrollmentIntent::parse(&r.text(fields::REENROLLMENT_INTENT))
                            .is_some_and(ReenrollmentIntent::carries_forward)
                            && !r.text(fields::ID).is_empty()
                    })
                    .count();
                verifier.row_count(
                    target,
                    expected,
                    &format!("rows of '{}' not marked drop", config.source_table),
                );
                let previous = column_values(&source, fields::ID);
                verifier.references(
                    target,
                    fields::LINKED_PREVIOUS_REGISTRATION_ID,
                    &previous,
                    &config.source_table,
                );
            }
        }
        if let Some(audit) = &audit {
            verifier.headers_present(audit, &[fields::ID, fields::REGISTRATION_ID]);
            verifier.column_format(audit, fields::UPDATED_AT, "blank", |_| false);
            verifier.column_format(audit, fields::UPDATED_BY, "blank", |_| false);
        }
        if let (Some(target), Some(audit)) = (&target, &audit) {
            verifier.row_count(audit, target.row_count(), &config.target_table);
            let ids = column_values(target, fields::ID);
            verifier.references(audit, fields::REGISTRATION_ID, &ids, &config.target_table);
        }
        Ok(verifier.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn source() -> Table {
        let headers = ["id", "studentId", "startTime", "reenrollmentIntent", "intentSubmittedBy"];
        Table::new("registrations_fall", headers.iter().map(|h| h.to_string()).collect())
            .with_rows(vec![
                vec!["r1".into(), "s1".into(), CellValue::Number(0.5), "keep".into(), "mom".into()],
                vec!["r2".into(), "s2".into(), "9:30".into(), "drop".into()],
                vec!["r3".into(), "s3".into(), CellValue::Number(0.65625), "Change".into()],
                vec!["r4".into(), "s4".into(), "16:00".into(), CellValue::Empty],
            ])
    }

    fn roll() -> RolloverOutput {
        let config = RolloverConfig::default();
        RolloverEngine::new(&config, "2025-01-06T08:00:00Z")
            .roll(&source())
            .unwrap()
    }

    #[test]
    fn drop_rows_stay_behind_in_order() {
        let output = roll();
        assert_eq!(output.carried, 3);
        assert_eq!(output.dropped, 1);

        let staged = &output.registrations;
        let index = staged.index();
        let links: Vec<String> = staged
            .rows
            .iter()
            .map(|row| index.record(row).text("linkedPreviousRegistrationId"))
            .collect();
        assert_eq!(links, vec!["r1", "r3", "r4"]);

        let ids: HashSet<String> = staged.rows.iter().map(|row| index.record(row).text("id")).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|id| !["r1", "r3", "r4"].contains(&id.as_str())));
    }

    #[test]
    fn carried_rows_are_stamped_and_cleaned() {
        let output = roll();
        let staged = &output.registrations;
        let index = staged.index();
        let first = index.record(&staged.rows[0]);
        assert_eq!(first.text("createdAt"), "2025-01-06T08:00:00Z");
        assert_eq!(first.text("createdBy"), "SYSTEM_ROLLOVER");
        assert_eq!(first.text("startTime"), "12:00");
        assert_eq!(first.text("reenrollmentIntent"), "");
        assert_eq!(first.text("intentSubmittedBy"), "");
        assert_eq!(first.text("intentSubmittedAt"), "");
        assert_eq!(index.record(&staged.rows[1]).text("startTime"), "15:45");
        assert_eq!(index.record(&staged.rows[2]).text("startTime"), "16:00");
    }

    #[test]
    fn every_carried_row_has_one_audit_mirror() {
        let output = roll();
        let reg_index = output.registrations.index();
        let audit_index = output.audit.index();
        assert_eq!(output.audit.rows.len(), output.registrations.rows.len());

        for (registration, mirror) in output.registrations.rows.iter().zip(&output.audit.rows) {
            let registration = reg_index.record(registration);
            let mirror = audit_index.record(mirror);
            assert_eq!(mirror.text("registrationId"), registration.text("id"));
            assert_ne!(mirror.text("id"), registration.text("id"));
            assert_eq!(mirror.text("startTime"), registration.text("startTime"));
            assert_eq!(mirror.text("createdBy"), "SYSTEM_ROLLOVER");
            assert!(mirror.get("updatedAt").is_blank());
            assert!(mirror.get("updatedBy").is_blank());
        }
        assert_eq!(&output.audit.headers[..2], &["id".to_string(), "registrationId".to_string()]);
        assert_eq!(output.audit.headers.iter().filter(|h| *h == "id").count(), 1);
    }

    #[test]
    fn unknown_intent_is_skipped_with_reason() {
        let mut table = source();
        table.rows.push(vec!["r5".into(), "s5".into(), CellValue::Empty, "maybe".into()]);
        let config = RolloverConfig::default();
        let output = RolloverEngine::new(&config, "t").roll(&table).unwrap();
        assert_eq!(output.carried, 3);
        assert_eq!(
            output.skipped,
            vec!["'registrations_fall' sheet row 6: unrecognized intent 'maybe'"]
        );
    }

    #[test]
    fn source_without_intent_column_is_rejected() {
        let table = Table::new("registrations_fall", vec!["id".into()]);
        let config = RolloverConfig::default();
        let err = RolloverEngine::new(&config, "t").roll(&table).unwrap_err();
        assert!(matches!(err, Error::PrerequisiteMissing(_)));
    }
}

use std::collections::{HashMap, HashSet};

use registrar_common::{Error, Result, fields};
use registrar_store::{CellValue, Table};
use uuid::Uuid;

use crate::context::MigrationContext;
use crate::header::{HeaderIndex, Record};
use crate::migration::Migration;
use crate::normalize::{PersonName, normalize_grade, parse_full_name};
use crate::pipeline::{StagedTable, TransformOutput, load_source, plan_for, promote, stage};
use crate::summary::{MigrationMode, MigrationSummary, Operation};
use crate::verify::{VerificationReport, Verifier, column_values};

const ID: &str = "replace-students";

/// Rebuilds `students` from the front office's authoritative feed and drops
/// registrations that belonged to students no longer on it.
pub struct ReplaceStudents;

type NameKey = (String, String);

fn name_key(name: &PersonName) -> NameKey {
    (name.last.trim().to_uppercase(), name.first.trim().to_uppercase())
}

fn student_key(record: &Record<'_>) -> NameKey {
    name_key(&PersonName {
        first: record.text(fields::FIRST_NAME),
        last: record.text(fields::LAST_NAME),
    })
}

/// How the feed spells a student's name.
enum FeedNames {
    Split,
    Combined,
}

impl FeedNames {
    fn detect(feed: &Table, index: &HeaderIndex) -> Result<Self> {
        if index.contains(fields::FIRST_NAME) && index.contains(fields::LAST_NAME) {
            Ok(Self::Split)
        } else if index.contains(fields::STUDENT_NAME) {
            Ok(Self::Combined)
        } else {
            Err(Error::PrerequisiteMissing(format!(
                "table '{}' needs '{}' and '{}', or '{}'",
                feed.name,
                fields::FIRST_NAME,
                fields::LAST_NAME,
                fields::STUDENT_NAME
            )))
        }
    }

    fn read(&self, record: &Record<'_>) -> PersonName {
        match self {
            Self::Split => PersonName {
                first: record.text(fields::FIRST_NAME),
                last: record.text(fields::LAST_NAME),
            },
            Self::Combined => parse_full_name(&record.text(fields::STUDENT_NAME)),
        }
    }
}

/// The feed reduced to one entry per distinct name, in feed order. Blank
/// and repeated names are reported through `summary`.
fn read_feed(
    ctx: &MigrationContext<'_>,
    summary: &mut MigrationSummary,
) -> Result<(Table, HeaderIndex, Vec<(usize, PersonName)>)> {
    let (feed, index) = load_source(ctx, &ctx.config.tables.students_import, &[])?;
    let names = FeedNames::detect(&feed, &index)?;

    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for (n, record) in index.records(&feed).enumerate() {
        let name = names.read(&record);
        if name.first.is_empty() && name.last.is_empty() {
            summary.skip(format!("'{}' sheet row {}: blank name", feed.name, n + 2));
            continue;
        }
        if !seen.insert(name_key(&name)) {
            summary.skip(format!(
                "'{}' sheet row {}: {} {} listed twice",
                feed.name,
                n + 2,
                name.first,
                name.last
            ));
            continue;
        }
        entries.push((n, name));
    }
    Ok((feed, index, entries))
}

fn transform(ctx: &MigrationContext<'_>) -> Result<TransformOutput> {
    let tables = &ctx.config.tables;
    let (students, index) = load_source(
        ctx,
        &tables.students,
        &[fields::ID, fields::FIRST_NAME, fields::LAST_NAME],
    )?;
    let (registrations, reg_index) = load_source(ctx, &tables.registrations, &[fields::STUDENT_ID])?;

    let mut summary = MigrationSummary::new(ID, Operation::Preview, MigrationMode::DryRun);
    let (feed, feed_index, entries) = read_feed(ctx, &mut summary)?;
    summary.touch(&tables.students);
    summary.touch(&tables.registrations);

    // Several rows can share a name; every one of them matches the feed.
    let mut existing: HashMap<NameKey, Vec<usize>> = HashMap::new();
    for (i, record) in index.records(&students).enumerate() {
        existing.entry(student_key(&record)).or_default().push(i);
    }

    let out_headers = index.extended(&[fields::GRADE]);
    let out_index = HeaderIndex::new(&out_headers);
    let feed_has_grade = feed_index.contains(fields::GRADE);
    let mut kept = HashSet::new();
    let mut rows = Vec::with_capacity(entries.len());

    for (n, name) in &entries {
        let feed_record = feed_index.record(&feed.rows[*n]);
        let mut matched = Vec::new();
        match existing.get(&name_key(name)) {
            Some(positions) => {
                if positions.len() > 1 {
                    let ids: Vec<String> = positions
                        .iter()
                        .map(|&i| index.record(&students.rows[i]).text(fields::ID))
                        .collect();
                    summary.warn(format!(
                        "{} students named {} {} ({}); keeping all of them",
                        positions.len(),
                        name.first,
                        name.last,
                        ids.join(", ")
                    ));
                }
                for &i in positions {
                    kept.insert(i);
                    summary.updated += 1;
                    matched.push(out_index.project(&index, &students.rows[i]));
                }
            }
            None => {
                let mut row = out_index.blank_row();
                for header in out_index.headers() {
                    let cell = feed_record.get(header);
                    if !cell.is_blank() {
                        out_index.set(&mut row, header, cell.clone());
                    }
                }
                out_index.set(&mut row, fields::ID, CellValue::text(Uuid::new_v4().to_string()));
                out_index.set(&mut row, fields::FIRST_NAME, name.first.as_str().into());
                out_index.set(&mut row, fields::LAST_NAME, name.last.as_str().into());
                summary.created += 1;
                summary.action(format!("add {} {}", name.first, name.last));
                matched.push(row);
            }
        }
        for mut row in matched {
            if feed_has_grade {
                let grade = normalize_grade(&feed_record.text(fields::GRADE));
                out_index.set(&mut row, fields::GRADE, CellValue::Number(grade as f64));
            }
            rows.push(row);
        }
    }

    let mut removed = HashSet::new();
    for (i, record) in index.records(&students).enumerate() {
        if kept.contains(&i) {
            continue;
        }
        let id = record.text(fields::ID);
        summary.action(format!(
            "remove {} {} ({id})",
            record.text(fields::FIRST_NAME),
            record.text(fields::LAST_NAME)
        ));
        summary.deleted += 1;
        if !id.is_empty() {
            removed.insert(id);
        }
    }

    let remaining: Vec<Vec<CellValue>> = reg_index
        .records(&registrations)
        .filter(|record| !removed.contains(&record.text(fields::STUDENT_ID)))
        .map(|record| record.cells().to_vec())
        .collect();
    let dropped = registrations.row_count() - remaining.len();
    if dropped > 0 {
        summary.action(format!(
            "drop {dropped} registration(s) of removed students from '{}'",
            tables.registrations
        ));
    }
    summary.deleted += dropped;

    Ok(TransformOutput {
        staged: vec![
            StagedTable::new(&tables.students, out_headers, rows),
            StagedTable::new(&tables.registrations, registrations.headers.clone(), remaining),
        ],
        summary,
    })
}

impl Migration for ReplaceStudents {
    fn id(&self) -> &'static str {
        ID
    }

    fn description(&self) -> &'static str {
        "Replace students from the import feed, cascading removals to registrations"
    }

    fn preview(&self, ctx: &MigrationContext<'_>) -> Result<MigrationSummary> {
        transform(ctx).map(|output| output.summary)
    }

    fn run(&self, ctx: &MigrationContext<'_>, _mode: MigrationMode) -> Result<MigrationSummary> {
        stage(ctx, ID, transform(ctx)?)
    }

    fn apply(&self, ctx: &MigrationContext<'_>, mode: MigrationMode) -> Result<MigrationSummary> {
        let tables = &ctx.config.tables;
        let plan = plan_for(
            ID,
            &[
                (
                    tables.students.as_str(),
                    &[fields::ID, fields::FIRST_NAME, fields::LAST_NAME],
                ),
                (tables.registrations.as_str(), &[fields::STUDENT_ID]),
            ],
        );
        promote(ctx, ID, &plan, mode)
    }

    fn verify(&self, ctx: &MigrationContext<'_>) -> Result<VerificationReport> {
        let tables = &ctx.config.tables;
        let mut verifier = Verifier::new(ctx.store, ID);
        let students = verifier.table(&tables.students)?;
        let registrations = verifier.table(&tables.registrations)?;

        if let Some(students) = &students {
            verifier.unique(students, fields::ID);
            if ctx.store.table_exists(&tables.students_import)? {
                let mut scratch = MigrationSummary::new(ID, Operation::Preview, MigrationMode::DryRun);
                let (_, _, entries) = read_feed(ctx, &mut scratch)?;
                let index = HeaderIndex::of(students);
                let distinct: HashSet<NameKey> =
                    index.records(students).map(|r| student_key(&r)).collect();
                verifier.record(
                    format!("'{}' names match '{}'", tables.students, tables.students_import),
                    distinct.len() == entries.len(),
                    format!(
                        "{} distinct names, {} in the feed",
                        distinct.len(),
                        entries.len()
                    ),
                );
            }
        }
        if let (Some(students), Some(registrations)) = (&students, &registrations) {
            let known = column_values(students, fields::ID);
            verifier.references(registrations, fields::STUDENT_ID, &known, &tables.students);
        }
        Ok(verifier.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registrar_config::AppConfig;
    use registrar_store::{MemoryStore, TabularStore};

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn store(feed: Table) -> MemoryStore {
        MemoryStore::with_tables([
            Table::new("students", headers(&["id", "firstName", "lastName", "nickname", "grade"]))
                .with_rows(vec![
                    vec!["s1".into(), "Ana".into(), "Diaz".into(), "Annie".into(), CellValue::Number(2.0)],
                    vec!["s2".into(), "Ben".into(), "Ng".into(), CellValue::Empty, CellValue::Number(4.0)],
                ]),
            Table::new("registrations", headers(&["id", "studentId"])).with_rows(vec![
                vec!["r1".into(), "s1".into()],
                vec!["r2".into(), "s2".into()],
            ]),
            feed,
        ])
    }

    #[test]
    fn combined_name_feed_is_parsed() {
        let feed = Table::new("students_import", headers(&["studentName", "grade"])).with_rows(vec![
            vec!["Diaz, Ana".into(), "3rd".into()],
            vec!["Cy Park".into(), "Kindergarten".into()],
            vec!["DIAZ, ana".into(), "3".into()],
            vec![CellValue::Empty, "5".into()],
        ]);
        let store = store(feed);
        let config = AppConfig::default();
        let ctx = MigrationContext::new(&store, &config);

        let summary = ReplaceStudents.preview(&ctx).unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.skipped, 2);
        // Ben plus his one registration
        assert_eq!(summary.deleted, 2);
        assert!(store.list_tables().unwrap().iter().all(|t| !t.starts_with("_wc_")));
    }

    #[test]
    fn matched_students_keep_id_and_nickname() {
        let feed = Table::new("students_import", headers(&["lastName", "firstName", "grade"]))
            .with_rows(vec![
                vec!["Park".into(), "Cy".into(), "K".into()],
                vec!["diaz".into(), "ANA".into(), "Grade 3".into()],
            ]);
        let store = store(feed);
        let config = AppConfig::default();
        let ctx = MigrationContext::new(&store, &config);
        ReplaceStudents.run(&ctx, MigrationMode::Apply).unwrap();

        let staged = store.get_table("_wc_replace-students_students").unwrap();
        let index = HeaderIndex::of(&staged);
        let rows: Vec<Record<'_>> = index.records(&staged).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text("firstName"), "Cy");
        assert_eq!(rows[0].get("grade"), &CellValue::Number(0.0));
        assert_eq!(rows[0].text("id").len(), 36);
        assert_eq!(rows[1].text("id"), "s1");
        assert_eq!(rows[1].text("nickname"), "Annie");
        assert_eq!(rows[1].get("grade"), &CellValue::Number(3.0));

        let regs = store.get_table("_wc_replace-students_registrations").unwrap();
        assert_eq!(regs.rows, vec![vec![CellValue::text("r1"), CellValue::text("s1")]]);
    }

    #[test]
    fn students_sharing_a_listed_name_are_all_kept() {
        let feed = Table::new("students_import", headers(&["lastName", "firstName"]))
            .with_rows(vec![vec!["Diaz".into(), "Ana".into()]]);
        let store = store(feed);
        store
            .append_rows(
                "students",
                &[vec!["s1dup".into(), "Ana".into(), "Diaz".into(), CellValue::Empty, CellValue::Empty]],
            )
            .unwrap();
        store
            .append_rows("registrations", &[vec!["r3".into(), "s1dup".into()]])
            .unwrap();
        let config = AppConfig::default();
        let ctx = MigrationContext::new(&store, &config);

        let summary = ReplaceStudents.run(&ctx, MigrationMode::Apply).unwrap();
        assert_eq!(summary.updated, 2);
        // Ben plus his one registration
        assert_eq!(summary.deleted, 2);
        assert!(summary.warnings.iter().any(|w| w.contains("s1dup")));

        let regs = store.get_table("_wc_replace-students_registrations").unwrap();
        assert_eq!(
            regs.rows,
            vec![
                vec![CellValue::text("r1"), CellValue::text("s1")],
                vec![CellValue::text("r3"), CellValue::text("s1dup")],
            ]
        );

        ReplaceStudents.apply(&ctx, MigrationMode::Apply).unwrap();
        assert!(ReplaceStudents.verify(&ctx).unwrap().is_success());
    }

    #[test]
    fn feed_without_name_columns_is_rejected() {
        let feed = Table::new("students_import", headers(&["grade"]));
        let store = store(feed);
        let config = AppConfig::default();
        let ctx = MigrationContext::new(&store, &config);
        assert!(matches!(
            ReplaceStudents.run(&ctx, MigrationMode::Apply),
            Err(Error::PrerequisiteMissing(_))
        ));
    }
}

use std::collections::HashMap;

use registrar_common::{Result, fields};
use registrar_store::CellValue;
use uuid::Uuid;

use crate::context::MigrationContext;
use crate::header::{HeaderIndex, Record};
use crate::migration::Migration;
use crate::normalize::{normalize_email, parse_full_name, person_key};
use crate::pipeline::{StagedTable, TransformOutput, load_source, plan_for, promote, stage};
use crate::summary::{MigrationMode, MigrationSummary, Operation};
use crate::verify::{VerificationReport, Verifier, column_values};

const ID: &str = "split-parent-contacts";

const PARENT_HEADERS: [&str; 5] = [
    fields::ID,
    fields::FIRST_NAME,
    fields::LAST_NAME,
    fields::EMAIL,
    fields::PHONE,
];

const LINK_COLUMNS: [&str; 2] = [fields::PARENT1_ID, fields::PARENT2_ID];

/// The denormalized parent columns of one slot on a student row.
struct ParentSlot {
    name: &'static str,
    email: &'static str,
    phone: &'static str,
    link: &'static str,
}

const SLOTS: [ParentSlot; 2] = [
    ParentSlot {
        name: fields::PARENT1_NAME,
        email: fields::PARENT1_EMAIL,
        phone: fields::PARENT1_PHONE,
        link: fields::PARENT1_ID,
    },
    ParentSlot {
        name: fields::PARENT2_NAME,
        email: fields::PARENT2_EMAIL,
        phone: fields::PARENT2_PHONE,
        link: fields::PARENT2_ID,
    },
];

/// Derives a `parents` table from the parent columns embedded in
/// `students`, and links each student to their parents by id.
pub struct SplitParentContacts;

/// Parents collected so far, deduplicated by [`person_key`].
struct ParentBook {
    index: HeaderIndex,
    by_key: HashMap<(String, String, String), usize>,
    rows: Vec<Vec<CellValue>>,
    merged: usize,
}

impl ParentBook {
    fn new() -> Self {
        let headers: Vec<String> = PARENT_HEADERS.iter().map(|h| h.to_string()).collect();
        Self {
            index: HeaderIndex::new(&headers),
            by_key: HashMap::new(),
            rows: Vec::new(),
            merged: 0,
        }
    }

    /// Id of the parent in `slot`, adding them if unseen. `None` when the
    /// slot is empty.
    fn resolve(&mut self, record: &Record<'_>, slot: &ParentSlot) -> Option<String> {
        let full_name = record.text(slot.name);
        let email = record.text(slot.email);
        if full_name.is_empty() && email.is_empty() {
            return None;
        }
        let name = parse_full_name(&full_name);
        let phone = record.text(slot.phone);
        let key = person_key(&email, &name.last, &name.first);

        if let Some(&position) = self.by_key.get(&key) {
            let row = &mut self.rows[position];
            let known = self.index.record(row);
            let id = known.text(fields::ID);
            if known.get(fields::PHONE).is_blank() && !phone.is_empty() {
                self.index.set(row, fields::PHONE, CellValue::text(phone));
            }
            self.merged += 1;
            return Some(id);
        }

        let id = Uuid::new_v4().to_string();
        let mut row = self.index.blank_row();
        self.index.set(&mut row, fields::ID, CellValue::text(id.as_str()));
        self.index.set(&mut row, fields::FIRST_NAME, name.first.into());
        self.index.set(&mut row, fields::LAST_NAME, name.last.into());
        self.index.set(&mut row, fields::EMAIL, normalize_email(&email).into());
        self.index.set(&mut row, fields::PHONE, phone.into());
        self.by_key.insert(key, self.rows.len());
        self.rows.push(row);
        Some(id)
    }

    fn headers(&self) -> Vec<String> {
        self.index.headers().to_vec()
    }
}

fn transform(ctx: &MigrationContext<'_>) -> Result<TransformOutput> {
    let tables = &ctx.config.tables;
    let (students, index) = load_source(
        ctx,
        &tables.students,
        &[fields::ID, fields::PARENT1_NAME, fields::PARENT1_EMAIL],
    )?;
    let mut summary = MigrationSummary::new(ID, Operation::Preview, MigrationMode::DryRun);
    summary.touch(&tables.students);
    summary.touch(&tables.parents);
    if ctx.store.table_exists(&tables.parents)? {
        summary.warn(format!(
            "'{}' already exists and will be replaced on apply",
            tables.parents
        ));
    }

    let out_headers = index.extended(&LINK_COLUMNS);
    let out_index = HeaderIndex::new(&out_headers);
    let mut book = ParentBook::new();
    let mut rows = Vec::with_capacity(students.row_count());

    for (n, record) in index.records(&students).enumerate() {
        let mut row = out_index.project(&index, record.cells());
        if record.text(fields::ID).is_empty() {
            summary.skip(format!(
                "'{}' sheet row {}: blank id, parents not linked",
                tables.students,
                n + 2
            ));
            rows.push(row);
            continue;
        }
        for slot in &SLOTS {
            let link = book
                .resolve(&record, slot)
                .map(CellValue::from)
                .unwrap_or_default();
            out_index.set(&mut row, slot.link, link);
        }
        summary.updated += 1;
        rows.push(row);
    }

    summary.created = book.rows.len();
    summary.action(format!(
        "derive {} parent(s) from {} student row(s), {} repeat mention(s) merged",
        book.rows.len(),
        students.row_count(),
        book.merged
    ));

    let parent_headers = book.headers();
    Ok(TransformOutput {
        staged: vec![
            StagedTable::new(&tables.parents, parent_headers, book.rows),
            StagedTable::new(&tables.students, out_headers, rows),
        ],
        summary,
    })
}

impl Migration for SplitParentContacts {
    fn id(&self) -> &'static str {
        ID
    }

    fn description(&self) -> &'static str {
        "Split embedded parent contacts into a deduplicated parents table"
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
                (tables.parents.as_str(), &PARENT_HEADERS),
                (tables.students.as_str(), &LINK_COLUMNS),
            ],
        );
        promote(ctx, ID, &plan, mode)
    }

    fn verify(&self, ctx: &MigrationContext<'_>) -> Result<VerificationReport> {
        let tables = &ctx.config.tables;
        let mut verifier = Verifier::new(ctx.store, ID);
        let parents = verifier.table(&tables.parents)?;
        let students = verifier.table(&tables.students)?;
        if let Some(parents) = &parents {
            verifier.headers_present(parents, &PARENT_HEADERS);
            verifier.unique(parents, fields::ID);
        }
        if let Some(students) = &students {
            verifier.headers_present(students, &LINK_COLUMNS);
        }
        if let (Some(parents), Some(students)) = (&parents, &students) {
            let known = column_values(parents, fields::ID);
            for link in LINK_COLUMNS {
                verifier.references(students, link, &known, &tables.parents);
            }
        }
        Ok(verifier.finish())
    }
}

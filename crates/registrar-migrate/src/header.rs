use std::collections::HashMap;

use registrar_common::{Error, Result};
use registrar_store::{CellValue, Table};

static EMPTY: CellValue = CellValue::Empty;

/// Field-name to column-position map built from a table's current header
/// row. Lookups ignore case and surrounding whitespace; when a header
/// repeats, the leftmost column wins.
#[derive(Debug, Clone)]
pub struct HeaderIndex {
    headers: Vec<String>,
    positions: HashMap<String, usize>,
}

fn key(field: &str) -> String {
    field.trim().to_lowercase()
}

impl HeaderIndex {
    pub fn new(headers: &[String]) -> Self {
        let mut positions = HashMap::with_capacity(headers.len());
        for (i, header) in headers.iter().enumerate() {
            let k = key(header);
            if !k.is_empty() {
                positions.entry(k).or_insert(i);
            }
        }
        Self {
            headers: headers.to_vec(),
            positions,
        }
    }

    pub fn of(table: &Table) -> Self {
        Self::new(&table.headers)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn position(&self, field: &str) -> Option<usize> {
        self.positions.get(&key(field)).copied()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.position(field).is_some()
    }

    pub fn missing<'f>(&self, fields: &[&'f str]) -> Vec<&'f str> {
        fields.iter().copied().filter(|f| !self.contains(f)).collect()
    }

    /// Fail with `PrerequisiteMissing` naming every absent field.
    pub fn require(&self, table: &str, fields: &[&str]) -> Result<()> {
        let missing = self.missing(fields);
        if missing.is_empty() {
            return Ok(());
        }
        Err(Error::PrerequisiteMissing(format!(
            "table '{table}' is missing column(s): {}",
            missing.join(", ")
        )))
    }

    /// Append any of `fields` not already present, returning the new header
    /// row. Existing positions are unchanged.
    pub fn extended(&self, fields: &[&str]) -> Vec<String> {
        let mut headers = self.headers.clone();
        headers.extend(self.missing(fields).into_iter().map(str::to_string));
        headers
    }

    pub fn record<'a>(&'a self, cells: &'a [CellValue]) -> Record<'a> {
        Record { index: self, cells }
    }

    pub fn records<'a>(&'a self, table: &'a Table) -> impl Iterator<Item = Record<'a>> + 'a {
        table.rows.iter().map(move |cells| self.record(cells))
    }

    /// A row of `width()` empty cells.
    pub fn blank_row(&self) -> Vec<CellValue> {
        vec![CellValue::Empty; self.width()]
    }

    /// Write `value` into `row` under `field`, padding the row if it is
    /// shorter than the header. Returns `false` when the field is unknown.
    pub fn set(&self, row: &mut Vec<CellValue>, field: &str, value: CellValue) -> bool {
        let Some(position) = self.position(field) else {
            return false;
        };
        if row.len() <= position {
            row.resize(position + 1, CellValue::Empty);
        }
        row[position] = value;
        true
    }

    /// Re-lay `cells` (read through `source`) into this index's column order.
    /// Columns unknown to `source` come out empty.
    pub fn project(&self, source: &HeaderIndex, cells: &[CellValue]) -> Vec<CellValue> {
        let from = source.record(cells);
        self.headers.iter().map(|h| from.get(h).clone()).collect()
    }
}

/// One row viewed through a [`HeaderIndex`].
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    index: &'a HeaderIndex,
    cells: &'a [CellValue],
}

impl<'a> Record<'a> {
    /// The cell under `field`; missing columns and short rows read as empty.
    pub fn get(&self, field: &str) -> &'a CellValue {
        self.index
            .position(field)
            .and_then(|i| self.cells.get(i))
            .unwrap_or(&EMPTY)
    }

    /// Trimmed display text of the cell under `field`.
    pub fn text(&self, field: &str) -> String {
        self.get(field).as_text().trim().to_string()
    }

    pub fn cells(&self) -> &'a [CellValue] {
        self.cells
    }
}

use chrono::NaiveDateTime;
use registrar_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// A single cell as the spreadsheet reports it.
///
/// The store has no column types; the same column can hold text in one row
/// and a number or date in the next, depending on how a cell was formatted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Empty cells and whitespace-only text both count as blank.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Display form of the cell, as the spreadsheet UI would render it.
    pub fn as_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Self::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            Self::Empty
        } else {
            Self::Text(value.to_string())
        }
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        if value.is_empty() {
            Self::Empty
        } else {
            Self::Text(value)
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// A named sheet: a header row followed by records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl Table {
    pub fn new(name: impl Into<String>, headers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            headers,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(mut self, rows: Vec<Vec<CellValue>>) -> Self {
        self.rows = rows;
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Write `values` into the rectangle starting at `range`. Row 0 is the
    /// header row; rows and columns past the current extent grow the sheet.
    pub fn apply_range(&mut self, range: &CellRange, values: &[Vec<CellValue>]) -> Result<()> {
        range.check(values)?;
        for (dr, line) in values.iter().enumerate() {
            let row = range.row + dr;
            for (dc, value) in line.iter().enumerate() {
                let col = range.col + dc;
                if row == 0 {
                    if self.headers.len() <= col {
                        self.headers.resize(col + 1, String::new());
                    }
                    self.headers[col] = value.as_text();
                } else {
                    let index = row - 1;
                    if self.rows.len() <= index {
                        self.rows.resize(index + 1, Vec::new());
                    }
                    let cells = &mut self.rows[index];
                    if cells.len() <= col {
                        cells.resize(col + 1, CellValue::Empty);
                    }
                    cells[col] = value.clone();
                }
            }
        }
        Ok(())
    }
}

/// A rectangle of cells addressed from the top-left, zero-based, where row 0
/// is the header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRange {
    pub row: usize,
    pub col: usize,
    pub rows: usize,
    pub cols: usize,
}

impl CellRange {
    pub fn new(row: usize, col: usize, rows: usize, cols: usize) -> Self {
        Self {
            row,
            col,
            rows,
            cols,
        }
    }

    pub fn cell(row: usize, col: usize) -> Self {
        Self::new(row, col, 1, 1)
    }

    fn check(&self, values: &[Vec<CellValue>]) -> Result<()> {
        if values.len() != self.rows || values.iter().any(|line| line.len() != self.cols) {
            return Err(Error::Store(format!(
                "value grid does not match range {}x{} at ({}, {})",
                self.rows, self.cols, self.row, self.col
            )));
        }
        Ok(())
    }
}

/// One step of a batched write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteOp {
    SetRange {
        table: String,
        range: CellRange,
        values: Vec<Vec<CellValue>>,
    },
    AppendRows {
        table: String,
        rows: Vec<Vec<CellValue>>,
    },
}

impl WriteOp {
    pub fn table(&self) -> &str {
        match self {
            Self::SetRange { table, .. } | Self::AppendRows { table, .. } => table,
        }
    }

    pub(crate) fn apply_to(&self, target: &mut Table) -> Result<()> {
        match self {
            Self::SetRange { range, values, .. } => target.apply_range(range, values),
            Self::AppendRows { rows, .. } => {
                target.rows.extend(rows.iter().cloned());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new("t", vec!["a".into(), "b".into()]).with_rows(vec![
            vec!["1".into(), "2".into()],
            vec!["3".into(), "4".into()],
        ])
    }

    #[test]
    fn range_at_row_zero_rewrites_headers() {
        let mut table = sample();
        table
            .apply_range(&CellRange::cell(0, 1), &[vec![CellValue::text("beta")]])
            .unwrap();
        assert_eq!(table.headers, vec!["a".to_string(), "beta".to_string()]);
        assert_eq!(table.rows[0][1], CellValue::text("2"));
    }

    #[test]
    fn range_past_extent_grows_sheet() {
        let mut table = sample();
        table
            .apply_range(&CellRange::cell(4, 3), &[vec![CellValue::Number(9.0)]])
            .unwrap();
        assert_eq!(table.rows.len(), 4);
        assert_eq!(table.rows[3][3], CellValue::Number(9.0));
        assert!(table.rows[2].is_empty());
    }

    #[test]
    fn mismatched_grid_is_rejected() {
        let mut table = sample();
        let err = table
            .apply_range(&CellRange::new(1, 0, 2, 1), &[vec![CellValue::Empty]])
            .unwrap_err();
        assert!(err.to_string().contains("does not match range 2x1"));
    }

    #[test]
    fn display_text_matches_spreadsheet_rendering() {
        assert_eq!(CellValue::Number(4159455121.0).as_text(), "4159455121");
        assert_eq!(CellValue::Number(0.5).as_text(), "0.5");
        assert_eq!(CellValue::Bool(true).as_text(), "TRUE");
        assert!(CellValue::text("  ").is_blank());
        assert!(!CellValue::Number(0.0).is_blank());
    }

    #[test]
    fn cells_serialize_with_type_tags() {
        let json = serde_json::to_string(&vec![CellValue::Empty, CellValue::Number(1.5)]).unwrap();
        assert_eq!(json, r#"[{"type":"empty"},{"type":"number","value":1.5}]"#);
        let back: Vec<CellValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![CellValue::Empty, CellValue::Number(1.5)]);
    }
}

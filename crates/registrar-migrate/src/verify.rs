use std::collections::HashSet;
use std::fmt;

use registrar_common::Result;
use registrar_store::{CellValue, TabularStore, Table};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::header::HeaderIndex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub check: String,
    pub passed: bool,
    pub detail: String,
}

/// Itemized post-condition results. Failing checks never roll anything
/// back; restoring from backup is an operator decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub migration: String,
    pub findings: Vec<Finding>,
}

impl VerificationReport {
    pub fn passed(&self) -> usize {
        self.findings.iter().filter(|f| f.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.findings.len() - self.passed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} verify: {} passed, {} failed",
            self.migration,
            self.passed(),
            self.failed()
        )?;
        for finding in &self.findings {
            let mark = if finding.passed { "ok  " } else { "FAIL" };
            writeln!(f, "  [{mark}] {}: {}", finding.check, finding.detail)?;
        }
        Ok(())
    }
}

/// Read-only checks accumulated into a [`VerificationReport`].
pub struct Verifier<'a> {
    store: &'a dyn TabularStore,
    report: VerificationReport,
}

impl<'a> Verifier<'a> {
    pub fn new(store: &'a dyn TabularStore, migration: &str) -> Self {
        Self {
            store,
            report: VerificationReport {
                migration: migration.to_string(),
                findings: Vec::new(),
            },
        }
    }

    pub fn record(&mut self, check: impl Into<String>, passed: bool, detail: impl Into<String>) {
        let finding = Finding {
            check: check.into(),
            passed,
            detail: detail.into(),
        };
        if !finding.passed {
            warn!(
                migration = %self.report.migration,
                "verification failed: {}: {}", finding.check, finding.detail
            );
        }
        self.report.findings.push(finding);
    }

    /// Check `name` exists and load it for further checks.
    pub fn table(&mut self, name: &str) -> Result<Option<Table>> {
        if !self.store.table_exists(name)? {
            self.record(format!("{name}: exists"), false, "table not found");
            return Ok(None);
        }
        let table = self.store.get_table(name)?;
        self.record(
            format!("{name}: exists"),
            true,
            format!("{} rows", table.row_count()),
        );
        Ok(Some(table))
    }

    pub fn headers_present(&mut self, table: &Table, required: &[&str]) {
        let missing = HeaderIndex::of(table).missing(required);
        let detail = if missing.is_empty() {
            format!("found {}", required.join(", "))
        } else {
            format!("missing {}", missing.join(", "))
        };
        self.record(format!("{}: headers", table.name), missing.is_empty(), detail);
    }

    pub fn headers_absent(&mut self, table: &Table, retired: &[&str]) {
        let index = HeaderIndex::of(table);
        let lingering: Vec<&str> = retired.iter().copied().filter(|h| index.contains(h)).collect();
        let detail = if lingering.is_empty() {
            format!("no {}", retired.join(", "))
        } else {
            format!("still has {}", lingering.join(", "))
        };
        self.record(format!("{}: retired headers", table.name), lingering.is_empty(), detail);
    }

    pub fn row_count(&mut self, table: &Table, expected: usize, basis: &str) {
        let actual = table.row_count();
        self.record(
            format!("{}: row count", table.name),
            actual == expected,
            format!("{actual} rows, expected {expected} ({basis})"),
        );
    }

    /// Every non-blank cell under `column` satisfies `valid`.
    pub fn column_format(
        &mut self,
        table: &Table,
        column: &str,
        rule: &str,
        valid: impl Fn(&CellValue) -> bool,
    ) {
        let index = HeaderIndex::of(table);
        let bad: Vec<usize> = index
            .records(table)
            .enumerate()
            .filter(|(_, record)| {
                let cell = record.get(column);
                !cell.is_blank() && !valid(cell)
            })
            .map(|(i, _)| i + 2)
            .collect();
        let detail = if bad.is_empty() {
            format!("all values {rule}")
        } else {
            format!("{} value(s) not {rule}, sheet rows {}", bad.len(), join_rows(&bad))
        };
        self.record(format!("{}.{column}: format", table.name), bad.is_empty(), detail);
    }

    /// Non-blank values under `column` are pairwise distinct.
    pub fn unique(&mut self, table: &Table, column: &str) {
        let index = HeaderIndex::of(table);
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for record in index.records(table) {
            let value = record.text(column);
            if !value.is_empty() && !seen.insert(value.clone()) {
                duplicates.push(value);
            }
        }
        let detail = if duplicates.is_empty() {
            format!("{} distinct values", seen.len())
        } else {
            format!("duplicated: {}", duplicates.join(", "))
        };
        self.record(format!("{}.{column}: unique", table.name), duplicates.is_empty(), detail);
    }

    /// Every non-blank value of `table.column` appears in `known`.
    pub fn references(&mut self, table: &Table, column: &str, known: &HashSet<String>, target: &str) {
        let index = HeaderIndex::of(table);
        let dangling: Vec<String> = index
            .records(table)
            .map(|record| record.text(column))
            .filter(|value| !value.is_empty() && !known.contains(value))
            .collect();
        let detail = if dangling.is_empty() {
            format!("all resolve to {target}")
        } else {
            format!("{} dangling: {}", dangling.len(), dangling.join(", "))
        };
        self.record(format!("{}.{column}: references", table.name), dangling.is_empty(), detail);
    }

    pub fn finish(self) -> VerificationReport {
        info!(
            "{} verification: {} passed, {} failed",
            self.report.migration,
            self.report.passed(),
            self.report.failed()
        );
        self.report
    }
}

fn join_rows(rows: &[usize]) -> String {
    rows.iter().map(usize::to_string).collect::<Vec<_>>().join(", ")
}

/// Non-blank values of `column`, as trimmed text.
pub fn column_values(table: &Table, column: &str) -> HashSet<String> {
    let index = HeaderIndex::of(table);
    index
        .records(table)
        .map(|record| record.text(column))
        .filter(|value| !value.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use registrar_store::MemoryStore;

    fn parents() -> Table {
        Table::new("parents", vec!["id".into(), "phone".into()]).with_rows(vec![
            vec!["p1".into(), "4159455121".into()],
            vec!["p2".into(), "415-945".into()],
            vec!["p2".into(), CellValue::Empty],
        ])
    }

    #[test]
    fn accumulates_pass_and_fail_counts() {
        let store = MemoryStore::with_tables([parents()]);
        let mut verifier = Verifier::new(&store, "normalize-phones");
        let table = verifier.table("parents").unwrap().unwrap();
        verifier.headers_present(&table, &["id", "phone"]);
        verifier.column_format(&table, "phone", "10 digits", |c| c.as_text().len() == 10);
        verifier.unique(&table, "id");
        assert!(verifier.table("ghost").unwrap().is_none());

        let report = verifier.finish();
        assert_eq!(report.passed(), 2);
        assert_eq!(report.failed(), 3);
        assert!(!report.is_success());
        let format = &report.findings[2];
        assert_eq!(format.detail, "1 value(s) not 10 digits, sheet rows 3");
    }

    #[test]
    fn references_flags_dangling_ids() {
        let store = MemoryStore::new();
        let mut verifier = Verifier::new(&store, "m");
        let known: HashSet<String> = ["p1".to_string()].into_iter().collect();
        verifier.references(&parents(), "id", &known, "parents");
        let report = verifier.finish();
        assert_eq!(report.findings[0].detail, "2 dangling: p2, p2");
    }

    #[test]
    fn display_marks_failures() {
        let store = MemoryStore::new();
        let mut verifier = Verifier::new(&store, "m");
        verifier.record("x", true, "fine");
        verifier.record("y", false, "broken");
        let text = verifier.finish().to_string();
        assert!(text.contains("m verify: 1 passed, 1 failed"));
        assert!(text.contains("[FAIL] y: broken"));
    }
}

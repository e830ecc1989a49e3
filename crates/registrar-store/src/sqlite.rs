use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use registrar_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::store::TabularStore;
use crate::table::{CellRange, CellValue, Table, WriteOp};

/// Local, persistent stand-in for the remote spreadsheet.
///
/// Each sheet is one row in `sheets` (header row as a JSON array) plus one
/// row per record in `sheet_rows`. Every call runs in its own transaction,
/// but nothing spans calls, mirroring the remote service.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening table store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Store(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Store(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Store(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Store(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("table store lock poisoned".into()))
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sheets (
                name TEXT PRIMARY KEY,
                headers TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS sheet_rows (
                sheet TEXT NOT NULL REFERENCES sheets(name)
                    ON DELETE CASCADE ON UPDATE CASCADE,
                row_index INTEGER NOT NULL,
                cells TEXT NOT NULL,
                PRIMARY KEY (sheet, row_index)
            );",
        )
        .map_err(|e| Error::Store(format!("migration failed: {e}")))?;

        Ok(())
    }
}

fn sheet_exists(conn: &Connection, name: &str) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sheets WHERE name = ?1",
        params![name],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(|e| Error::Store(format!("failed to look up table '{name}': {e}")))
}

fn require_sheet(conn: &Connection, name: &str) -> Result<()> {
    if sheet_exists(conn, name)? {
        Ok(())
    } else {
        Err(Error::NotFound(format!("table '{name}'")))
    }
}

fn require_free(conn: &Connection, name: &str) -> Result<()> {
    if sheet_exists(conn, name)? {
        Err(Error::Store(format!("table '{name}' already exists")))
    } else {
        Ok(())
    }
}

fn load_table(conn: &Connection, name: &str) -> Result<Table> {
    let headers: Option<String> = conn
        .query_row(
            "SELECT headers FROM sheets WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::Store(format!("failed to read headers of '{name}': {e}")))?;
    let headers = headers.ok_or_else(|| Error::NotFound(format!("table '{name}'")))?;
    let headers: Vec<String> = serde_json::from_str(&headers)?;

    let mut stmt = conn
        .prepare("SELECT cells FROM sheet_rows WHERE sheet = ?1 ORDER BY row_index ASC")
        .map_err(|e| Error::Store(format!("failed to prepare query: {e}")))?;
    let encoded = stmt
        .query_map(params![name], |row| row.get::<_, String>(0))
        .map_err(|e| Error::Store(format!("failed to query rows of '{name}': {e}")))?;

    let mut rows = Vec::new();
    for cells in encoded {
        let cells = cells.map_err(|e| Error::Store(format!("failed to read row: {e}")))?;
        rows.push(serde_json::from_str::<Vec<CellValue>>(&cells)?);
    }
    Ok(Table::new(name, headers).with_rows(rows))
}

fn insert_rows(conn: &Connection, name: &str, start: usize, rows: &[Vec<CellValue>]) -> Result<()> {
    let mut stmt = conn
        .prepare("INSERT INTO sheet_rows (sheet, row_index, cells) VALUES (?1, ?2, ?3)")
        .map_err(|e| Error::Store(format!("failed to prepare insert: {e}")))?;
    for (offset, cells) in rows.iter().enumerate() {
        let encoded = serde_json::to_string(cells)?;
        stmt.execute(params![name, (start + offset) as i64, encoded])
            .map_err(|e| Error::Store(format!("failed to append row to '{name}': {e}")))?;
    }
    Ok(())
}

fn row_count(conn: &Connection, name: &str) -> Result<usize> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sheet_rows WHERE sheet = ?1",
            params![name],
            |row| row.get(0),
        )
        .map_err(|e| Error::Store(format!("failed to count rows of '{name}': {e}")))?;
    Ok(count as usize)
}

/// Overwrite the stored sheet with `table`.
fn save_table(conn: &Connection, table: &Table) -> Result<()> {
    let headers = serde_json::to_string(&table.headers)?;
    conn.execute(
        "UPDATE sheets SET headers = ?2, updated_at = datetime('now') WHERE name = ?1",
        params![table.name, headers],
    )
    .map_err(|e| Error::Store(format!("failed to write headers of '{}': {e}", table.name)))?;
    conn.execute("DELETE FROM sheet_rows WHERE sheet = ?1", params![table.name])
        .map_err(|e| Error::Store(format!("failed to clear rows of '{}': {e}", table.name)))?;
    insert_rows(conn, &table.name, 0, &table.rows)
}

impl TabularStore for SqliteStore {
    fn list_tables(&self) -> Result<Vec<String>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT name FROM sheets ORDER BY name ASC")
            .map_err(|e| Error::Store(format!("failed to prepare query: {e}")))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Store(format!("failed to list tables: {e}")))?;

        let mut tables = Vec::new();
        for name in names {
            tables.push(name.map_err(|e| Error::Store(format!("failed to read table name: {e}")))?);
        }
        Ok(tables)
    }

    fn get_table(&self, name: &str) -> Result<Table> {
        let conn = self.connection()?;
        load_table(&conn, name)
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        let conn = self.connection()?;
        sheet_exists(&conn, name)
    }

    fn create_table(&self, name: &str, headers: &[String]) -> Result<()> {
        let conn = self.connection()?;
        require_free(&conn, name)?;
        let encoded = serde_json::to_string(headers)?;
        conn.execute(
            "INSERT INTO sheets (name, headers) VALUES (?1, ?2)",
            params![name, encoded],
        )
        .map_err(|e| Error::Store(format!("failed to create table '{name}': {e}")))?;
        debug!("created table '{name}' with {} columns", headers.len());
        Ok(())
    }

    fn duplicate_table(&self, name: &str, new_name: &str) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Store(format!("failed to begin transaction: {e}")))?;
        require_sheet(&tx, name)?;
        require_free(&tx, new_name)?;
        tx.execute(
            "INSERT INTO sheets (name, headers) SELECT ?2, headers FROM sheets WHERE name = ?1",
            params![name, new_name],
        )
        .map_err(|e| Error::Store(format!("failed to duplicate '{name}': {e}")))?;
        tx.execute(
            "INSERT INTO sheet_rows (sheet, row_index, cells)
             SELECT ?2, row_index, cells FROM sheet_rows WHERE sheet = ?1",
            params![name, new_name],
        )
        .map_err(|e| Error::Store(format!("failed to copy rows of '{name}': {e}")))?;
        tx.commit()
            .map_err(|e| Error::Store(format!("failed to commit duplicate: {e}")))?;
        Ok(())
    }

    fn rename_table(&self, name: &str, new_name: &str) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Store(format!("failed to begin transaction: {e}")))?;
        require_sheet(&tx, name)?;
        require_free(&tx, new_name)?;
        tx.execute(
            "UPDATE sheets SET name = ?2, updated_at = datetime('now') WHERE name = ?1",
            params![name, new_name],
        )
        .map_err(|e| Error::Store(format!("failed to rename '{name}': {e}")))?;
        tx.commit()
            .map_err(|e| Error::Store(format!("failed to commit rename: {e}")))?;
        Ok(())
    }

    fn delete_table(&self, name: &str) -> Result<()> {
        let conn = self.connection()?;
        let removed = conn
            .execute("DELETE FROM sheets WHERE name = ?1", params![name])
            .map_err(|e| Error::Store(format!("failed to delete '{name}': {e}")))?;
        if removed == 0 {
            return Err(Error::NotFound(format!("table '{name}'")));
        }
        Ok(())
    }

    fn append_rows(&self, name: &str, rows: &[Vec<CellValue>]) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Store(format!("failed to begin transaction: {e}")))?;
        require_sheet(&tx, name)?;
        let start = row_count(&tx, name)?;
        insert_rows(&tx, name, start, rows)?;
        tx.commit()
            .map_err(|e| Error::Store(format!("failed to commit append: {e}")))?;
        Ok(())
    }

    fn set_cell_range(
        &self,
        name: &str,
        range: CellRange,
        values: &[Vec<CellValue>],
    ) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Store(format!("failed to begin transaction: {e}")))?;
        let mut table = load_table(&tx, name)?;
        table.apply_range(&range, values)?;
        save_table(&tx, &table)?;
        tx.commit()
            .map_err(|e| Error::Store(format!("failed to commit range write: {e}")))?;
        Ok(())
    }

    fn batch_write(&self, ops: &[WriteOp]) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Store(format!("failed to begin transaction: {e}")))?;
        for op in ops {
            require_sheet(&tx, op.table())?;
        }

        let mut touched: Vec<Table> = Vec::new();
        for op in ops {
            let position = match touched.iter().position(|t| t.name == op.table()) {
                Some(position) => position,
                None => {
                    touched.push(load_table(&tx, op.table())?);
                    touched.len() - 1
                }
            };
            op.apply_to(&mut touched[position])?;
        }
        for table in &touched {
            save_table(&tx, table)?;
        }

        // Dropping `tx` without commit rolls back on any error above.
        tx.commit()
            .map_err(|e| Error::Store(format!("failed to commit batch: {e}")))?;
        debug!("batch write of {} ops across {} tables", ops.len(), touched.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn create_append_and_read_back() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_table("students", &headers(&["id", "grade"])).unwrap();
        store
            .append_rows(
                "students",
                &[
                    vec!["s1".into(), CellValue::Number(3.0)],
                    vec!["s2".into(), CellValue::Empty],
                ],
            )
            .unwrap();
        store
            .append_rows("students", &[vec!["s3".into(), "K".into()]])
            .unwrap();

        let table = store.get_table("students").unwrap();
        assert_eq!(table.headers, headers(&["id", "grade"]));
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.rows[0][1], CellValue::Number(3.0));
        assert_eq!(table.rows[1][1], CellValue::Empty);
        assert_eq!(table.rows[2][0], CellValue::text("s3"));
    }

    #[test]
    fn rename_carries_rows_along() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_table("a", &headers(&["x"])).unwrap();
        store.append_rows("a", &[vec!["1".into()]]).unwrap();

        store.rename_table("a", "b").unwrap();

        assert!(!store.table_exists("a").unwrap());
        assert_eq!(store.get_table("b").unwrap().rows, vec![vec![CellValue::text("1")]]);
    }

    #[test]
    fn duplicate_then_delete_source_keeps_copy() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_table("a", &headers(&["x"])).unwrap();
        store.append_rows("a", &[vec!["1".into()], vec!["2".into()]]).unwrap();

        store.duplicate_table("a", "b").unwrap();
        store.delete_table("a").unwrap();

        assert_eq!(store.list_tables().unwrap(), vec!["b".to_string()]);
        assert_eq!(store.get_table("b").unwrap().row_count(), 2);
    }

    #[test]
    fn duplicate_onto_existing_name_fails() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_table("a", &headers(&["x"])).unwrap();
        store.create_table("b", &headers(&["x"])).unwrap();
        assert!(store.duplicate_table("a", "b").is_err());
    }

    #[test]
    fn delete_missing_table_is_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(matches!(store.delete_table("ghost"), Err(Error::NotFound(_))));
    }

    #[test]
    fn header_range_write_renames_column() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_table("a", &headers(&["Teacher", "day"])).unwrap();
        store
            .set_cell_range("a", CellRange::cell(0, 0), &[vec!["instructorId".into()]])
            .unwrap();
        assert_eq!(store.get_table("a").unwrap().headers, headers(&["instructorId", "day"]));
    }

    #[test]
    fn failed_batch_rolls_back() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_table("a", &headers(&["x"])).unwrap();
        let ops = vec![
            WriteOp::AppendRows {
                table: "a".into(),
                rows: vec![vec!["1".into()]],
            },
            WriteOp::SetRange {
                table: "a".into(),
                range: CellRange::new(1, 0, 1, 2),
                values: vec![vec!["too".into()]],
            },
        ];
        assert!(store.batch_write(&ops).is_err());
        assert_eq!(store.get_table("a").unwrap().row_count(), 0);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.create_table("a", &headers(&["when"])).unwrap();
            let when = chrono::NaiveDate::from_ymd_opt(2024, 9, 3)
                .unwrap()
                .and_hms_opt(15, 45, 0)
                .unwrap();
            store.append_rows("a", &[vec![CellValue::DateTime(when)]]).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let table = store.get_table("a").unwrap();
        assert!(matches!(table.rows[0][0], CellValue::DateTime(_)));
    }
}

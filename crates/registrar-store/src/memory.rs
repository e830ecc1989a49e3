use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use registrar_common::{Error, Result};
use tracing::debug;

use crate::store::TabularStore;
use crate::table::{CellRange, CellValue, Table, WriteOp};

/// Process-local store, used by tests and dry runs against fixtures.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<String, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from fully built tables.
    pub fn with_tables(tables: impl IntoIterator<Item = Table>) -> Self {
        let map = tables
            .into_iter()
            .map(|table| (table.name.clone(), table))
            .collect();
        Self {
            tables: Mutex::new(map),
        }
    }

    fn tables(&self) -> Result<MutexGuard<'_, BTreeMap<String, Table>>> {
        self.tables
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".into()))
    }
}

fn missing(name: &str) -> Error {
    Error::NotFound(format!("table '{name}'"))
}

fn taken(name: &str) -> Error {
    Error::Store(format!("table '{name}' already exists"))
}

impl TabularStore for MemoryStore {
    fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.tables()?.keys().cloned().collect())
    }

    fn get_table(&self, name: &str) -> Result<Table> {
        self.tables()?.get(name).cloned().ok_or_else(|| missing(name))
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self.tables()?.contains_key(name))
    }

    fn create_table(&self, name: &str, headers: &[String]) -> Result<()> {
        let mut tables = self.tables()?;
        if tables.contains_key(name) {
            return Err(taken(name));
        }
        tables.insert(name.to_string(), Table::new(name, headers.to_vec()));
        debug!("created table '{name}' with {} columns", headers.len());
        Ok(())
    }

    fn duplicate_table(&self, name: &str, new_name: &str) -> Result<()> {
        let mut tables = self.tables()?;
        if tables.contains_key(new_name) {
            return Err(taken(new_name));
        }
        let mut copy = tables.get(name).cloned().ok_or_else(|| missing(name))?;
        copy.name = new_name.to_string();
        tables.insert(new_name.to_string(), copy);
        Ok(())
    }

    fn rename_table(&self, name: &str, new_name: &str) -> Result<()> {
        let mut tables = self.tables()?;
        if tables.contains_key(new_name) {
            return Err(taken(new_name));
        }
        let mut table = tables.remove(name).ok_or_else(|| missing(name))?;
        table.name = new_name.to_string();
        tables.insert(new_name.to_string(), table);
        Ok(())
    }

    fn delete_table(&self, name: &str) -> Result<()> {
        self.tables()?
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| missing(name))
    }

    fn append_rows(&self, name: &str, rows: &[Vec<CellValue>]) -> Result<()> {
        let mut tables = self.tables()?;
        let table = tables.get_mut(name).ok_or_else(|| missing(name))?;
        table.rows.extend(rows.iter().cloned());
        Ok(())
    }

    fn set_cell_range(
        &self,
        name: &str,
        range: CellRange,
        values: &[Vec<CellValue>],
    ) -> Result<()> {
        let mut tables = self.tables()?;
        let table = tables.get_mut(name).ok_or_else(|| missing(name))?;
        table.apply_range(&range, values)
    }

    fn batch_write(&self, ops: &[WriteOp]) -> Result<()> {
        let mut tables = self.tables()?;
        if let Some(op) = ops.iter().find(|op| !tables.contains_key(op.table())) {
            return Err(missing(op.table()));
        }
        // Stage on copies so a bad range leaves every table untouched.
        let mut staged: BTreeMap<String, Table> = BTreeMap::new();
        for op in ops {
            if !staged.contains_key(op.table()) {
                let original = tables
                    .get(op.table())
                    .cloned()
                    .ok_or_else(|| missing(op.table()))?;
                staged.insert(op.table().to_string(), original);
            }
            let target = staged
                .get_mut(op.table())
                .ok_or_else(|| missing(op.table()))?;
            op.apply_to(target)?;
        }
        tables.extend(staged);
        Ok(())
    }
}

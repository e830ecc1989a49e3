use registrar_common::{Error, Result};
use registrar_store::{CellValue, TabularStore};
use tracing::{debug, info};

pub const WORKING_PREFIX: &str = "_wc_";

/// Reserved name of `migration`'s working copy of `table`.
pub fn working_name(migration: &str, table: &str) -> String {
    format!("{WORKING_PREFIX}{migration}_{table}")
}

/// Creates and removes working-copy tables. Only ever touches the names it
/// is handed.
pub struct WorkingCopyManager<'a> {
    store: &'a dyn TabularStore,
}

impl<'a> WorkingCopyManager<'a> {
    pub fn new(store: &'a dyn TabularStore) -> Self {
        Self { store }
    }

    /// Replace `working` with a full duplicate of `table`. Re-running drops
    /// the previous copy first.
    pub fn create_working_copy(&self, table: &str, working: &str) -> Result<()> {
        if !self.store.table_exists(table)? {
            return Err(Error::PrerequisiteMissing(format!("table '{table}' not found")));
        }
        self.discard(working)?;
        self.store.duplicate_table(table, working)?;
        info!("working copy '{working}' created from '{table}'");
        Ok(())
    }

    /// Replace `working` with a header-only table.
    pub fn create_empty_working_table(&self, working: &str, headers: &[String]) -> Result<()> {
        self.discard(working)?;
        self.store.create_table(working, headers)?;
        info!("empty working table '{working}' created");
        Ok(())
    }

    /// Replace `working` with `headers` plus `rows`.
    pub fn write_working_table(
        &self,
        working: &str,
        headers: &[String],
        rows: &[Vec<CellValue>],
    ) -> Result<()> {
        self.create_empty_working_table(working, headers)?;
        if !rows.is_empty() {
            self.store.append_rows(working, rows)?;
        }
        debug!("wrote {} rows to '{working}'", rows.len());
        Ok(())
    }

    /// Delete `working` if present. Returns whether anything was deleted.
    pub fn discard(&self, working: &str) -> Result<bool> {
        if !self.store.table_exists(working)? {
            return Ok(false);
        }
        self.store.delete_table(working)?;
        debug!("discarded stale working copy '{working}'");
        Ok(true)
    }

    /// Working copies currently held by `migration`.
    pub fn list(&self, migration: &str) -> Result<Vec<String>> {
        let prefix = format!("{WORKING_PREFIX}{migration}_");
        Ok(self
            .store
            .list_tables()?
            .into_iter()
            .filter(|name| name.starts_with(&prefix))
            .collect())
    }
}

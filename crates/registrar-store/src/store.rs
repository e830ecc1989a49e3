use registrar_common::Result;

use crate::table::{CellRange, CellValue, Table, WriteOp};

/// Operations the remote spreadsheet offers.
///
/// Table names are unique at any instant. Nothing here is transactional
/// across calls: a sequence of calls can stop halfway and leave every
/// earlier call applied.
pub trait TabularStore: Send + Sync {
    fn list_tables(&self) -> Result<Vec<String>>;

    /// Header row plus every record. Fails with `NotFound` if absent.
    fn get_table(&self, name: &str) -> Result<Table>;

    fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self.list_tables()?.iter().any(|t| t == name))
    }

    /// Create a table holding only a header row.
    fn create_table(&self, name: &str, headers: &[String]) -> Result<()>;

    /// Full, independent copy of `name` (headers and rows) under `new_name`.
    fn duplicate_table(&self, name: &str, new_name: &str) -> Result<()>;

    fn rename_table(&self, name: &str, new_name: &str) -> Result<()>;

    fn delete_table(&self, name: &str) -> Result<()>;

    fn append_rows(&self, name: &str, rows: &[Vec<CellValue>]) -> Result<()>;

    fn set_cell_range(&self, name: &str, range: CellRange, values: &[Vec<CellValue>])
    -> Result<()>;

    /// Apply several writes in one round trip. Every target is checked
    /// before anything is written.
    fn batch_write(&self, ops: &[WriteOp]) -> Result<()>;
}

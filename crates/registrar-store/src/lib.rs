pub mod memory;
pub mod sqlite;
pub mod store;
pub mod table;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::TabularStore;
pub use table::{CellRange, CellValue, Table, WriteOp};

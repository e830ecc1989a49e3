//! The shipped migrations. Each reads its table names from the config in
//! the [`MigrationContext`](crate::context::MigrationContext).

mod intent_columns;
mod parent_contacts;
mod phone_numbers;
mod rename_headers;
mod student_roster;

pub use intent_columns::AddIntentColumns;
pub use parent_contacts::SplitParentContacts;
pub use phone_numbers::NormalizePhones;
pub use rename_headers::RenameHeaders;
pub use student_roster::ReplaceStudents;

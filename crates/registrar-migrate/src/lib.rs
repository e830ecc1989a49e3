//! Migration and rollover engine for a spreadsheet-backed scheduler.
//!
//! The store enforces no schema, keys, or transactions, so everything here
//! stages output in working-copy tables and touches production only through
//! [`commit::ApplyCommitter`], or snapshots first via
//! [`backup::BackupService`] when a migration edits production in place.

pub mod backup;
pub mod commit;
pub mod context;
pub mod header;
pub mod migration;
pub mod migrations;
pub mod normalize;
pub mod pipeline;
pub mod rollover;
pub mod summary;
pub mod verify;
pub mod working_copy;

pub use backup::{BackupEntry, BackupService, Snapshot};
pub use commit::{ApplyCommitter, CommitPlan, CommitReport, TablePair};
pub use context::MigrationContext;
pub use header::{HeaderIndex, Record};
pub use migration::{Migration, MigrationStatus, find, registry};
pub use migrations::{
    AddIntentColumns, NormalizePhones, RenameHeaders, ReplaceStudents, SplitParentContacts,
};
pub use rollover::{Rollover, RolloverEngine, RolloverOutput};
pub use summary::{CommitState, MigrationMode, MigrationSummary, Operation};
pub use verify::{Finding, VerificationReport, Verifier};
pub use working_copy::WorkingCopyManager;

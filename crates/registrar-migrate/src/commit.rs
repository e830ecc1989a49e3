use registrar_common::{Error, PartialCommit, Result};
use registrar_store::TabularStore;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::header::HeaderIndex;
use crate::summary::{CommitState, MigrationMode};

/// A staged table and the production name it replaces on commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePair {
    pub working: String,
    pub production: String,
    /// Headers the working copy must carry before it may be promoted.
    pub required_headers: Vec<String>,
}

impl TablePair {
    fn names(&self) -> (String, String) {
        (self.working.clone(), self.production.clone())
    }
}

/// Ordered set of promotions making up one migration's commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitPlan {
    pub pairs: Vec<TablePair>,
}

impl CommitPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pair(mut self, working: impl Into<String>, production: impl Into<String>) -> Self {
        self.pairs.push(TablePair {
            working: working.into(),
            production: production.into(),
            required_headers: Vec::new(),
        });
        self
    }

    /// Require `headers` on the most recently added pair.
    pub fn requiring(mut self, headers: &[&str]) -> Self {
        if let Some(last) = self.pairs.last_mut() {
            last.required_headers
                .extend(headers.iter().map(|h| h.to_string()));
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReport {
    pub state: CommitState,
    /// Pairs promoted, or in a dry run, pairs that would be.
    pub pairs: Vec<TablePair>,
    /// Production tables deleted (or that would be) before each rename.
    pub replaced: Vec<String>,
}

/// Promotes working copies into production: delete, then rename.
///
/// Each pair is two store calls and nothing spans pairs, so a failure after
/// the first call leaves a mixed state that is reported as
/// [`Error::PartialApply`].
pub struct ApplyCommitter<'a> {
    store: &'a dyn TabularStore,
}

impl<'a> ApplyCommitter<'a> {
    pub fn new(store: &'a dyn TabularStore) -> Self {
        Self { store }
    }

    /// Check every working copy exists and carries its required headers.
    /// Read-only.
    pub fn preflight(&self, plan: &CommitPlan) -> Result<()> {
        if plan.pairs.is_empty() {
            return Err(Error::PrerequisiteMissing("nothing staged to commit".into()));
        }
        for pair in &plan.pairs {
            if !self.store.table_exists(&pair.working)? {
                return Err(Error::PrerequisiteMissing(format!(
                    "working copy '{}' not found; run the migration first",
                    pair.working
                )));
            }
            if !pair.required_headers.is_empty() {
                let table = self.store.get_table(&pair.working)?;
                let required: Vec<&str> =
                    pair.required_headers.iter().map(String::as_str).collect();
                HeaderIndex::of(&table).require(&pair.working, &required)?;
            }
        }
        Ok(())
    }

    pub fn commit(&self, plan: &CommitPlan, mode: MigrationMode) -> Result<CommitReport> {
        self.preflight(plan)?;

        let mut replaced = Vec::new();
        for pair in &plan.pairs {
            if self.store.table_exists(&pair.production)? {
                replaced.push(pair.production.clone());
            }
        }
        if !mode.is_apply() {
            return Ok(CommitReport {
                state: CommitState::Draft,
                pairs: plan.pairs.clone(),
                replaced,
            });
        }

        for (i, pair) in plan.pairs.iter().enumerate() {
            let mut production_deleted = false;
            if let Err(e) = self.promote(pair, &mut production_deleted) {
                let partial = PartialCommit {
                    promoted: plan.pairs[..i].iter().map(TablePair::names).collect(),
                    failed: pair.names(),
                    production_deleted,
                    pending: plan.pairs[i + 1..].iter().map(TablePair::names).collect(),
                    reason: e.to_string(),
                };
                error!("commit stopped partway: {partial}");
                return Err(Error::PartialApply(partial));
            }
            info!("promoted '{}' to '{}'", pair.working, pair.production);
        }

        Ok(CommitReport {
            state: CommitState::Committed,
            pairs: plan.pairs.clone(),
            replaced,
        })
    }

    fn promote(&self, pair: &TablePair, production_deleted: &mut bool) -> Result<()> {
        if self.store.table_exists(&pair.production)? {
            self.store.delete_table(&pair.production)?;
            *production_deleted = true;
        }
        self.store.rename_table(&pair.working, &pair.production)
    }
}

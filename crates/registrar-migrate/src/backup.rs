use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, TimeDelta, Utc};
use registrar_common::{Error, Result};
use registrar_store::TabularStore;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::summary::MigrationMode;

pub const BACKUP_PREFIX: &str = "_bak_";

/// `YYYYMMDDTHHMMSS`, fixed width so names sort chronologically.
const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S";
const STAMP_LEN: usize = 15;

pub fn backup_name(migration: &str, stamp: &str, table: &str) -> String {
    format!("{BACKUP_PREFIX}{migration}_{stamp}_{table}")
}

/// One backed-up table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackupEntry {
    pub source: String,
    pub stamp: String,
    pub backup: String,
}

/// Tables captured by one successful [`BackupService::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub migration: String,
    pub entries: Vec<BackupEntry>,
}

/// Snapshots tables before a migration edits production in place.
pub struct BackupService<'a> {
    store: &'a dyn TabularStore,
}

impl<'a> BackupService<'a> {
    pub fn new(store: &'a dyn TabularStore) -> Self {
        Self { store }
    }

    /// Copy every table in `tables` to a backup named from `migration` and
    /// `at`. All-or-nothing: if any copy fails, copies already made are
    /// removed and the error lists the outcome per table.
    ///
    /// A stamp already taken by an earlier backup of one of `tables` moves
    /// forward a second at a time, so later snapshots always sort last.
    pub fn snapshot(&self, migration: &str, tables: &[&str], at: DateTime<Utc>) -> Result<Snapshot> {
        let existing: HashSet<String> = self.store.list_tables()?.into_iter().collect();
        let mut at = at;
        let stamp = loop {
            let stamp = at.format(STAMP_FORMAT).to_string();
            let taken = tables
                .iter()
                .any(|table| existing.contains(&backup_name(migration, &stamp, table)));
            if !taken {
                break stamp;
            }
            at += TimeDelta::seconds(1);
        };
        let mut entries = Vec::new();
        let mut outcomes = Vec::new();
        let mut failed = false;

        for &table in tables {
            let backup = backup_name(migration, &stamp, table);
            match self.store.duplicate_table(table, &backup) {
                Ok(()) => {
                    outcomes.push(format!("{table}: ok"));
                    entries.push(BackupEntry {
                        source: table.to_string(),
                        stamp: stamp.clone(),
                        backup,
                    });
                }
                Err(e) => {
                    failed = true;
                    outcomes.push(format!("{table}: {e}"));
                }
            }
        }

        if failed {
            for entry in &entries {
                if let Err(e) = self.store.delete_table(&entry.backup) {
                    warn!("could not remove partial backup '{}': {e}", entry.backup);
                }
            }
            error!("snapshot for {migration} failed: {}", outcomes.join("; "));
            return Err(Error::BackupFailure(outcomes.join("; ")));
        }

        info!("snapshot for {migration} captured {} table(s) at {stamp}", entries.len());
        Ok(Snapshot {
            migration: migration.to_string(),
            entries,
        })
    }

    /// Every backup held for `migration`, oldest first.
    pub fn list(&self, migration: &str) -> Result<Vec<BackupEntry>> {
        let prefix = format!("{BACKUP_PREFIX}{migration}_");
        let mut entries: Vec<BackupEntry> = self
            .store
            .list_tables()?
            .into_iter()
            .filter_map(|name| {
                let rest = name.strip_prefix(&prefix)?;
                let stamp = rest.get(..STAMP_LEN)?;
                let source = rest.get(STAMP_LEN..)?.strip_prefix('_')?;
                Some(BackupEntry {
                    source: source.to_string(),
                    stamp: stamp.to_string(),
                    backup: name.clone(),
                })
            })
            .collect();
        entries.sort_by(|a, b| (&a.stamp, &a.source).cmp(&(&b.stamp, &b.source)));
        Ok(entries)
    }

    /// The most recent backup of each source table.
    pub fn latest(&self, migration: &str) -> Result<Vec<BackupEntry>> {
        let mut latest: BTreeMap<String, BackupEntry> = BTreeMap::new();
        for entry in self.list(migration)? {
            latest.insert(entry.source.clone(), entry);
        }
        Ok(latest.into_values().collect())
    }

    /// Copy the latest backups over their production tables, then delete
    /// those backups. Safe to re-run after a failure midway: a production
    /// table already deleted is simply recreated.
    pub fn restore(&self, migration: &str, mode: MigrationMode) -> Result<Vec<BackupEntry>> {
        let entries = self.latest(migration)?;
        if entries.is_empty() {
            return Err(Error::NotFound(format!("no backup for migration '{migration}'")));
        }
        if !mode.is_apply() {
            return Ok(entries);
        }

        for entry in &entries {
            if self.store.table_exists(&entry.source)? {
                self.store.delete_table(&entry.source)?;
            }
            self.store.duplicate_table(&entry.backup, &entry.source)?;
            info!("restored '{}' from '{}'", entry.source, entry.backup);
        }
        for entry in &entries {
            self.store.delete_table(&entry.backup)?;
        }
        Ok(entries)
    }

    /// Delete every backup of `migration` without restoring.
    pub fn discard(&self, migration: &str, mode: MigrationMode) -> Result<Vec<BackupEntry>> {
        let entries = self.list(migration)?;
        if mode.is_apply() {
            for entry in &entries {
                self.store.delete_table(&entry.backup)?;
                info!("discarded backup '{}'", entry.backup);
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use registrar_store::{CellRange, MemoryStore, Table};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 20, hour, 30, 5).unwrap()
    }

    fn store() -> MemoryStore {
        MemoryStore::with_tables([
            Table::new("parents", vec!["phone".into()])
                .with_rows(vec![vec!["(415) 945-5121".into()]]),
            Table::new("students", vec!["id".into()]).with_rows(vec![vec!["s1".into()]]),
        ])
    }

    #[test]
    fn backup_names_are_deterministic() {
        assert_eq!(
            backup_name("normalize-phones", "20241220T093005", "parents"),
            "_bak_normalize-phones_20241220T093005_parents"
        );
    }

    #[test]
    fn restore_returns_tables_to_snapshot_state() {
        let store = store();
        let service = BackupService::new(&store);
        let before = store.get_table("parents").unwrap();

        service.snapshot("m", &["parents", "students"], at(9)).unwrap();
        store
            .set_cell_range("parents", CellRange::cell(1, 0), &[vec!["4159455121".into()]])
            .unwrap();
        store.delete_table("students").unwrap();

        let restored = service.restore("m", MigrationMode::Apply).unwrap();

        assert_eq!(restored.len(), 2);
        assert_eq!(store.get_table("parents").unwrap(), before);
        assert!(store.table_exists("students").unwrap());
        assert!(service.list("m").unwrap().is_empty());
    }

    #[test]
    fn failed_snapshot_leaves_no_partial_backups() {
        let store = store();
        let service = BackupService::new(&store);
        let err = service.snapshot("m", &["parents", "ghost"], at(9)).unwrap_err();

        assert!(matches!(err, Error::BackupFailure(_)));
        assert!(err.to_string().contains("parents: ok"));
        assert!(err.to_string().contains("ghost: not found"));
        assert!(service.list("m").unwrap().is_empty());
    }

    #[test]
    fn latest_prefers_newest_stamp() {
        let store = store();
        let service = BackupService::new(&store);
        service.snapshot("m", &["parents"], at(9)).unwrap();
        service.snapshot("m", &["parents"], at(11)).unwrap();

        let latest = service.latest("m").unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].stamp, "20241220T113005");
        assert_eq!(service.list("m").unwrap().len(), 2);
    }

    #[test]
    fn snapshots_within_one_second_get_distinct_stamps() {
        let store = store();
        let service = BackupService::new(&store);
        service.snapshot("m", &["parents"], at(9)).unwrap();
        store
            .set_cell_range("parents", CellRange::cell(1, 0), &[vec!["4159455121".into()]])
            .unwrap();
        let second = service.snapshot("m", &["parents"], at(9)).unwrap();

        assert_eq!(second.entries[0].stamp, "20241220T093006");
        let latest = service.latest("m").unwrap();
        assert_eq!(latest, second.entries);
        assert_eq!(service.list("m").unwrap().len(), 2);
    }

    #[test]
    fn dry_run_restore_and_discard_change_nothing() {
        let store = store();
        let service = BackupService::new(&store);
        service.snapshot("m", &["parents"], at(9)).unwrap();
        let tables = store.list_tables().unwrap();

        assert_eq!(service.restore("m", MigrationMode::DryRun).unwrap().len(), 1);
        assert_eq!(service.discard("m", MigrationMode::DryRun).unwrap().len(), 1);
        assert_eq!(store.list_tables().unwrap(), tables);

        service.discard("m", MigrationMode::Apply).unwrap();
        assert!(service.list("m").unwrap().is_empty());
    }

    #[test]
    fn restore_without_backup_is_not_found() {
        let store = store();
        let err = BackupService::new(&store)
            .restore("m", MigrationMode::Apply)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}

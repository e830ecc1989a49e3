use chrono::{DateTime, SecondsFormat, Utc};
use registrar_config::AppConfig;
use registrar_store::TabularStore;

/// Everything a migration operation may touch, passed explicitly.
#[derive(Clone, Copy)]
pub struct MigrationContext<'a> {
    pub store: &'a dyn TabularStore,
    pub config: &'a AppConfig,
    /// The instant stamped on created rows and backup names.
    pub now: DateTime<Utc>,
}

impl<'a> MigrationContext<'a> {
    pub fn new(store: &'a dyn TabularStore, config: &'a AppConfig) -> Self {
        Self {
            store,
            config,
            now: Utc::now(),
        }
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// `now` as stored in `createdAt` cells.
    pub fn timestamp(&self) -> String {
        self.now.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

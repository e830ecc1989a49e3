use std::path::PathBuf;

use registrar_common::fields;
use serde::{Deserialize, Serialize};

/// Top-level configuration for the migration tooling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub tables: TableNames,
    pub rollover: RolloverConfig,
    pub phones: PhoneConfig,
    pub header_renames: Vec<HeaderRename>,
    pub intent_columns: IntentColumnsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file backing the store. `None` means the platform data dir.
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("registrar")
                .join("store.db")
        })
    }
}

/// Production table names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub students: String,
    /// Authoritative student feed, loaded by the front office each term.
    pub students_import: String,
    pub parents: String,
    pub registrations: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            students: "students".to_string(),
            students_import: "students_import".to_string(),
            parents: "parents".to_string(),
            registrations: "registrations".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloverConfig {
    pub source_table: String,
    pub target_table: String,
    pub target_audit_table: String,
    /// Written to `createdBy` on every carried-forward registration.
    pub system_actor: String,
    /// Columns normalized to `HH:mm` text.
    pub time_fields: Vec<String>,
}

impl Default for RolloverConfig {
    fn default() -> Self {
        Self {
            source_table: "registrations_fall".to_string(),
            target_table: "registrations_winter".to_string(),
            target_audit_table: "registrations_audit_winter".to_string(),
            system_actor: "SYSTEM_ROLLOVER".to_string(),
            time_fields: vec![fields::START_TIME.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneConfig {
    pub targets: Vec<PhoneTarget>,
    /// Staging data masks digits with a placeholder; accept it as a digit.
    pub allow_placeholders: bool,
    pub placeholder_char: char,
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            targets: vec![PhoneTarget {
                table: "parents".to_string(),
                column: "phone".to_string(),
            }],
            allow_placeholders: false,
            placeholder_char: 'X',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneTarget {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderRename {
    pub table: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentColumnsConfig {
    pub table: String,
}

impl Default for IntentColumnsConfig {
    fn default() -> Self {
        Self {
            table: "registrations".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

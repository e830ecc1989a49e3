mod init;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use registrar_common::Error;
use registrar_config::{AppConfig, ConfigLoader};
use registrar_migrate::{Migration, MigrationContext, MigrationMode, find, registry};
use registrar_store::{SqliteStore, TabularStore};
use serde::Serialize;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "registrar", version, about = "Scheduler schema migrations and trimester rollover")]
struct Cli {
    /// Config file (YAML or TOML)
    #[arg(long, global = true, env = "REGISTRAR_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// SQLite store, overriding `store.path` from the config
    #[arg(long, global = true, env = "REGISTRAR_STORE", value_name = "PATH")]
    store: Option<PathBuf>,

    /// Print results as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every migration in run order
    List,
    /// List store tables with row counts
    Tables,
    /// Read-only summary of what `run` would do
    Preview(Target),
    /// Stage a migration's working copies (or edit in place behind a backup)
    Run(Destructive),
    /// Promote staged working copies over production
    Apply(Destructive),
    /// Check a migration's post-conditions
    Verify(Target),
    /// Restore production tables from the latest backup
    #[command(alias = "restore")]
    Rollback(Destructive),
    /// Delete a migration's backups without restoring
    DiscardBackup(Destructive),
    /// Working copies and backups held by one or every migration
    Status {
        migration: Option<String>,
    },
    /// Write a starter config file
    Init {
        /// Overwrite an existing file without asking
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct Target {
    /// Migration id, see `registrar list`
    migration: String,
}

#[derive(Args)]
struct Destructive {
    /// Migration id, see `registrar list`
    migration: String,

    /// Perform the change; without it the command only reports
    #[arg(long)]
    execute: bool,
}

impl Destructive {
    fn mode(&self) -> MigrationMode {
        if self.execute {
            MigrationMode::Apply
        } else {
            MigrationMode::DryRun
        }
    }
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            match e.downcast_ref::<Error>() {
                Some(Error::PartialApply(_)) => {
                    eprintln!("store is in a mixed state; finish or reverse the renames by hand");
                    ExitCode::from(2)
                }
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.clone().unwrap_or_else(ConfigLoader::default_path);

    if let Commands::Init { force } = cli.command {
        logging::init(&AppConfig::default().log, cli.log_json);
        init::write_starter_config(&config_path, force)?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = ConfigLoader::load_or_default(&config_path)?;
    logging::init(&config.log, cli.log_json);

    let store_path = cli
        .store
        .clone()
        .unwrap_or_else(|| config.store.resolved_path());
    if let Some(dir) = store_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let store = SqliteStore::open(&store_path)?;
    info!("store: {}", store_path.display());
    let ctx = MigrationContext::new(&store, &config);

    match &cli.command {
        Commands::List => {
            let migrations: Vec<_> = registry()
                .iter()
                .map(|m| MigrationInfo {
                    id: m.id(),
                    description: m.description(),
                    edits_in_place: m.edits_in_place(),
                })
                .collect();
            if cli.json {
                print_json(&migrations)?;
            } else {
                for m in &migrations {
                    let marker = if m.edits_in_place { " (in place)" } else { "" };
                    println!("{:<24}{}{marker}", m.id, m.description);
                }
            }
        }
        Commands::Tables => {
            let mut tables = Vec::new();
            for name in store.list_tables()? {
                let table = store.get_table(&name)?;
                tables.push(TableInfo {
                    rows: table.row_count(),
                    columns: table.headers.len(),
                    name,
                });
            }
            if cli.json {
                print_json(&tables)?;
            } else {
                for t in &tables {
                    println!("{:<48}{:>6} rows {:>4} cols", t.name, t.rows, t.columns);
                }
            }
        }
        Commands::Preview(target) => {
            let summary = resolve(&target.migration)?.preview(&ctx)?;
            emit(&summary, cli.json)?;
        }
        Commands::Run(target) => {
            let summary = resolve(&target.migration)?.run(&ctx, target.mode())?;
            emit(&summary, cli.json)?;
        }
        Commands::Apply(target) => {
            let summary = resolve(&target.migration)?.apply(&ctx, target.mode())?;
            emit(&summary, cli.json)?;
            if !target.execute {
                println!("dry run: pass --execute to promote");
            }
        }
        Commands::Verify(target) => {
            let report = resolve(&target.migration)?.verify(&ctx)?;
            emit(&report, cli.json)?;
            if !report.is_success() {
                eprintln!(
                    "`registrar rollback {} --execute` restores the latest backup if one exists",
                    target.migration
                );
                return Err(Error::Verification(format!(
                    "{} of {} checks failed",
                    report.failed(),
                    report.findings.len()
                ))
                .into());
            }
        }
        Commands::Rollback(target) => {
            let summary = resolve(&target.migration)?.rollback(&ctx, target.mode())?;
            emit(&summary, cli.json)?;
        }
        Commands::DiscardBackup(target) => {
            let summary = resolve(&target.migration)?.discard_backup(&ctx, target.mode())?;
            emit(&summary, cli.json)?;
        }
        Commands::Status { migration } => {
            let migrations = match migration {
                Some(id) => vec![resolve(id)?],
                None => registry(),
            };
            let mut statuses = Vec::with_capacity(migrations.len());
            for m in &migrations {
                statuses.push(m.status(&ctx)?);
            }
            if cli.json {
                print_json(&statuses)?;
            } else {
                for status in &statuses {
                    print!("{status}");
                }
            }
        }
        // written before the store is opened
        Commands::Init { .. } => {}
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
struct MigrationInfo {
    id: &'static str,
    description: &'static str,
    edits_in_place: bool,
}

#[derive(Serialize)]
struct TableInfo {
    name: String,
    rows: usize,
    columns: usize,
}

fn resolve(id: &str) -> Result<Box<dyn Migration>> {
    find(id).ok_or_else(|| anyhow!("unknown migration '{id}'; see `registrar list`"))
}

fn emit<T: Serialize + std::fmt::Display>(value: &T, json: bool) -> Result<()> {
    if json {
        print_json(value)
    } else {
        print!("{value}");
        Ok(())
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn destructive_commands_default_to_dry_run() {
        let cli = Cli::try_parse_from(["registrar", "apply", "rollover"]).unwrap();
        let Commands::Apply(target) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(target.mode(), MigrationMode::DryRun);

        let cli = Cli::try_parse_from(["registrar", "restore", "normalize-phones", "--execute"])
            .unwrap();
        let Commands::Rollback(target) = cli.command else {
            panic!("expected rollback");
        };
        assert_eq!(target.mode(), MigrationMode::Apply);
    }

    #[test]
    fn global_flags_parse_after_the_subcommand() {
        let cli = Cli::try_parse_from(["registrar", "status", "--json", "--store", "/tmp/s.db"])
            .unwrap();
        assert!(cli.json);
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/s.db")));
    }
}

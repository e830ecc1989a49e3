use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use dialoguer::{Confirm, Input};
use registrar_config::{AppConfig, StoreConfig};
use tracing::info;

/// Write a starter config.yml. Prompts for the store location when run
/// from a terminal; otherwise writes the defaults.
pub fn write_starter_config(config_path: &Path, force: bool) -> Result<()> {
    let interactive = std::io::stdin().is_terminal();

    if config_path.exists() && !force {
        if !interactive {
            bail!(
                "{} already exists; pass --force to overwrite",
                config_path.display()
            );
        }
        let overwrite = Confirm::new()
            .with_prompt(format!("{} exists. Overwrite?", config_path.display()))
            .default(false)
            .interact()
            .context("overwrite prompt cancelled")?;
        if !overwrite {
            println!("  Left {} unchanged.", config_path.display());
            return Ok(());
        }
    }

    let default_store = StoreConfig::default().resolved_path();
    let store_path = if interactive {
        let answer: String = Input::new()
            .with_prompt("SQLite store path")
            .default(default_store.display().to_string())
            .interact_text()
            .context("store path input cancelled")?;
        PathBuf::from(answer.trim())
    } else {
        default_store
    };

    let config = AppConfig {
        store: StoreConfig {
            path: Some(store_path),
        },
        ..Default::default()
    };

    if let Some(dir) = config_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let yaml = serde_yaml::to_string(&config).context("failed to serialize config")?;
    std::fs::write(config_path, &yaml)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    info!("config written to {}", config_path.display());
    println!();
    println!("  Config written to {}", config_path.display());
    println!("  Edit header_renames and the rollover tables, then run `registrar list`.");
    println!();
    Ok(())
}

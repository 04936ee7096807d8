//! CLI module for the portfwd daemon and rule commands

use std::path::{Path, PathBuf};

use eyre::OptionExt;

pub mod daemon;
pub mod rules;
pub mod status;

/// Get the PORTFWD_HOME directory from clap args, environment variable, or default
pub fn get_portfwd_home(custom_home: Option<PathBuf>) -> eyre::Result<PathBuf> {
    if let Some(home) = custom_home {
        return Ok(home);
    }

    // Fallback to ~/.portfwd if no PORTFWD_HOME env var or --home flag
    let home_dir = directories::UserDirs::new()
        .ok_or_eyre("could not determine user home directory")?
        .home_dir()
        .to_path_buf();

    Ok(home_dir.join(".portfwd"))
}

pub fn rules_path(home: &Path) -> PathBuf {
    home.join("rules.json")
}

pub fn config_path(home: &Path) -> PathBuf {
    home.join("config.json")
}

pub fn lock_path(home: &Path) -> PathBuf {
    home.join("lock.file")
}

pub fn rule_store(home: &Path) -> portfwd_engine::JsonRuleStore {
    portfwd_engine::JsonRuleStore::new(rules_path(home))
}

//! Canonical paths for feedwatch state.
//!
//! ## Layout
//!
//! | Location | Purpose |
//! |----------|---------|
//! | `<project>/.feedwatch/config.yaml` | Source definitions |
//! | `$FEEDWATCH_HOME` (default `~/.feedwatch`) | Engine state |
//! | `<home>/seen/<source_id>.jsonl` | Dedup log, one per source |

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Directory searched for in the current directory and its parents
pub const CONFIG_DIR: &str = ".feedwatch";

/// Config file name inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "config.yaml";

/// Environment override for the state directory
pub const HOME_ENV: &str = "FEEDWATCH_HOME";

/// Default state directory (~/.feedwatch)
pub fn default_home() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR))
}

/// Dedup log directory under a home directory
pub fn seen_dir(home: &Path) -> PathBuf {
    home.join("seen")
}

/// Find `.feedwatch/config.yaml` in `start` or any parent
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Resolve a path that may be relative to `base`
pub fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

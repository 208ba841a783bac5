//! Configuration for feedwatch.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variable FEEDWATCH_HOME for the state directory
//! 2. Config file (`--config`, or `.feedwatch/config.yaml` found by walking up)
//! 3. Defaults (~/.feedwatch)
//!
//! Paths in the config file are relative to the `.feedwatch/` directory
//! holding it.

pub mod paths;
pub mod source;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapters::Generator;
use crate::core::{DedupStore, Scheduler};

pub use paths::{default_home, find_config_file, resolve_path, seen_dir, HOME_ENV};
pub use source::{
    resolve_secret, GeneratorConfig, SinkConfig, SourceConfig, SourceDefaults, SourceKind,
    TransformConfig,
};

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub defaults: SourceDefaults,
    #[serde(default)]
    pub generators: HashMap<String, GeneratorConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory
    pub home: Option<String>,
    /// Dedup log directory (defaults to `<home>/seen`)
    pub seen: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub home: PathBuf,
    pub seen_dir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub defaults: SourceDefaults,
    pub generators: HashMap<String, GeneratorConfig>,
    pub sources: Vec<SourceConfig>,
}

impl ResolvedConfig {
    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Validate every source against the shared sections
    pub fn validate(&self) -> Result<()> {
        source::check_unique_ids(&self.sources)?;
        for source in &self.sources {
            source.validate(&self.generators)?;
        }
        Ok(())
    }

    /// Open the dedup store at the configured location
    pub async fn open_store(&self) -> Result<Arc<DedupStore>> {
        let store = DedupStore::open(&self.seen_dir)
            .await
            .with_context(|| format!("Failed to open dedup store at {}", self.seen_dir.display()))?;
        Ok(Arc::new(store))
    }

    /// Build a scheduler holding one runner per configured source
    pub async fn build_scheduler(&self, store: Arc<DedupStore>) -> Result<Scheduler> {
        self.validate()?;

        let mut generators: HashMap<String, Arc<dyn Generator>> = HashMap::new();
        for (name, generator) in &self.generators {
            let built = generator
                .build()
                .with_context(|| format!("Failed to build generator '{}'", name))?;
            generators.insert(name.clone(), built);
        }

        let mut scheduler = Scheduler::new(Arc::clone(&store));
        for source in &self.sources {
            let runner = source
                .build_runner(&self.defaults, &generators, Arc::clone(&store))
                .await
                .with_context(|| format!("Failed to set up source '{}'", source.id))?;
            scheduler.add(runner)?;
            debug!(source = %source.id, "Registered source");
        }
        Ok(scheduler)
    }
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load configuration
///
/// `explicit` must exist when given. Otherwise the current directory and
/// its parents are searched; with no file found there are no sources.
pub fn load(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let config_file = match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            Some(path.to_path_buf())
        }
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            find_config_file(&cwd)
        }
    };

    let file = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    resolve(file, config_file, std::env::var(HOME_ENV).ok())
}

/// Turn a parsed file into absolute paths
pub fn resolve(
    file: ConfigFile,
    config_file: Option<PathBuf>,
    env_home: Option<String>,
) -> Result<ResolvedConfig> {
    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf);

    let home = if let Some(env_home) = env_home.filter(|h| !h.is_empty()) {
        PathBuf::from(env_home)
    } else if let (Some(home), Some(dir)) = (&file.paths.home, &config_dir) {
        resolve_path(dir, home)
    } else {
        default_home()?
    };

    let seen = match (&file.paths.seen, &config_dir) {
        (Some(seen), Some(dir)) => resolve_path(dir, seen),
        (Some(seen), None) => PathBuf::from(seen),
        _ => seen_dir(&home),
    };

    Ok(ResolvedConfig {
        home,
        seen_dir: seen,
        config_file,
        defaults: file.defaults,
        generators: file.generators,
        sources: file.sources,
    })
}

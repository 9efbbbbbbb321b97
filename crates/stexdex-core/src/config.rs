//! Configuration loading
//!
//! Precedence, lowest first: built-in defaults, `config.toml`, environment, CLI flags
//! (the binary applies the latter on top of what [`Config::load`] returns).

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::store::{CorpusStore, cache_dir_for_root};

pub const CONFIG_FILE: &str = "config.toml";
pub const ENV_CORPUS_ROOT: &str = "MATHHUB";
pub const ENV_CACHE_DIR: &str = "STEXDEX_CACHE_DIR";
pub const ENV_KEEP_CACHE: &str = "STEXDEX_KEEP_CACHE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing the archives (the MathHub directory).
    pub corpus_root: Option<PathBuf>,
    /// Base directory for caches; a per-root subdirectory is appended.
    pub cache_dir: Option<PathBuf>,
    /// Load caches written by other versions as long as the schema matches.
    pub keep_cache: bool,
    /// Default query language.
    pub language: String,
    /// Globs over `<archive>/<path>`; when non-empty only matching files are indexed.
    pub include: Vec<String>,
    pub ignore: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            corpus_root: None,
            cache_dir: None,
            keep_cache: false,
            language: "en".to_string(),
            include: Vec::new(),
            ignore: Vec::new(),
        }
    }
}

impl Config {
    /// Read `path`, or the default config file if it exists, then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = match path {
            Some(path) => Config::from_file(path)?,
            None => match default_config_path(env_var) {
                Some(path) if path.is_file() => Config::from_file(&path)?,
                _ => Config::default(),
            },
        };
        config.apply_env(env_var);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Override fields from environment variables looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<OsString>) {
        if let Some(root) = lookup(ENV_CORPUS_ROOT).filter(|v| !v.is_empty()) {
            self.corpus_root = Some(PathBuf::from(root));
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(flag) = lookup(ENV_KEEP_CACHE) {
            self.keep_cache = matches!(
                flag.to_string_lossy().trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
    }

    pub fn corpus_root(&self) -> Result<&Path, ConfigError> {
        self.corpus_root.as_deref().ok_or(ConfigError::MissingCorpusRoot)
    }

    /// Cache directory for the configured corpus root.
    pub fn cache_location(&self) -> Result<PathBuf, ConfigError> {
        let base = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => default_cache_root(env_var)?,
        };
        Ok(cache_dir_for_root(&base, self.corpus_root()?))
    }

    pub fn store(&self, version: &str) -> Result<CorpusStore, ConfigError> {
        Ok(CorpusStore::new(self.cache_location()?, version).keep_cache(self.keep_cache))
    }
}

fn env_var(key: &str) -> Option<OsString> {
    std::env::var_os(key)
}

/// `$XDG_CONFIG_HOME/stexdex/config.toml`, falling back to `~/.config`.
pub fn default_config_path(lookup: impl Fn(&str) -> Option<OsString>) -> Option<PathBuf> {
    let base = lookup("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| lookup("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("stexdex").join(CONFIG_FILE))
}

/// Base cache directory when none is configured.
pub fn default_cache_root(lookup: impl Fn(&str) -> Option<OsString>) -> Result<PathBuf, ConfigError> {
    if let Some(xdg) = lookup("XDG_CACHE_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(xdg).join("stexdex"));
    }
    let home = lookup("HOME").ok_or(ConfigError::MissingHomeDir)?;
    Ok(PathBuf::from(home).join(".cache").join("stexdex"))
}

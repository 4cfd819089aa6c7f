use std::{fs::File, path::{Path, PathBuf}};

use color_eyre::{
    eyre::{eyre, Context, Result},
    Help,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::store::DEFAULT_CACHE_SIZE_KB;

/// How an archive listing is fed into the store.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStrategy {
    /// Aggregate the whole archive in memory, then write it out in one pass.
    #[default]
    Sqlite,
    /// Write every row straight to the database, caching the current
    /// ancestor chain. Needs less memory but expects depth-first ordered
    /// listings.
    DirectSql,
}

/// A single path rewrite rule. The first rule whose pattern matches the
/// absolute lookup path is applied and the rest are skipped.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RewriteRule {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Borg repository URL. When unset, borg's own `BORG_REPO` environment
    /// handling applies.
    pub repository: Option<String>,
    /// Base directory for the index database. Defaults to
    /// `$XDG_CACHE_HOME/borg-restore.pl`, which existing caches already use.
    pub cache_base: Option<PathBuf>,
    /// SQLite page cache size in KiB.
    pub cache_size_kb: Option<i64>,
    pub ingest: IngestStrategy,
    pub rewrites: Vec<RewriteRule>,
}

impl Config {
    pub fn new(config_path: impl AsRef<Path>) -> Result<Config> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            debug!(
                "No configuration file at '{}', using defaults",
                config_path.display()
            );
            return Ok(Config::default());
        }
        trace!("Reading configuration file '{}'", config_path.display());
        let config_file = File::open(config_path).with_context(|| {
            eyre!(
                "Failed to open configuration file at '{}'",
                config_path.display()
            )
        })?;
        let config = serde_json::from_reader(config_file)
            .with_context(|| {
                eyre!(
                    "Failed to read configuration file '{}'",
                    config_path.display()
                )
            })
            .with_suggestion(|| {
                format!(
                    "Make sure '{}' is a valid borg-restore json configuration",
                    config_path.display()
                )
            })?;
        debug!("Configuration file '{}' loaded", config_path.display());
        Ok(config)
    }

    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| eyre!("Failed to determine the user configuration directory"))?;
        Ok(base.join("borg-restore").join("config.json"))
    }

    pub fn cache_base(&self) -> Result<PathBuf> {
        if let Some(base) = &self.cache_base {
            return Ok(base.clone());
        }
        let base = dirs::cache_dir()
            .ok_or_else(|| eyre!("Failed to determine the user cache directory"))?;
        Ok(base.join("borg-restore.pl"))
    }

    /// Location of the index database. The `v2` path segment doubles as the
    /// schema version.
    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(self.cache_base()?.join("v2").join("archives.db"))
    }

    pub fn cache_size_kb(&self) -> i64 {
        self.cache_size_kb.unwrap_or(DEFAULT_CACHE_SIZE_KB)
    }

    /// Compiles the configured rewrite rules, failing on the first invalid
    /// pattern.
    pub fn rewrite_rules(&self) -> Result<Vec<(Regex, String)>> {
        self.rewrites
            .iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern).with_context(|| {
                    eyre!("Invalid rewrite pattern '{}' in configuration", rule.pattern)
                })?;
                Ok((regex, rule.replacement.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.repository, None);
        assert_eq!(config.ingest, IngestStrategy::Sqlite);
        assert!(config.rewrites.is_empty());
        assert_eq!(config.cache_size_kb(), DEFAULT_CACHE_SIZE_KB);
    }

    #[test]
    fn config_parsing() {
        let config: Config = serde_json::from_str(
            r#"{
                "repository": "backup:borg",
                "ingest": "directsql",
                "cache_size_kb": 4096,
                "rewrites": [{"pattern": "^/mnt/data", "replacement": "/data"}]
            }"#,
        )
        .unwrap();
        assert_eq!(config.repository.as_deref(), Some("backup:borg"));
        assert_eq!(config.ingest, IngestStrategy::DirectSql);
        assert_eq!(config.cache_size_kb(), 4096);
        let rules = config.rewrite_rules().unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules[0].0.is_match("/mnt/data/etc"));
    }

    #[test]
    fn config_rejects_bad_rewrite_pattern() {
        let config: Config = serde_json::from_str(
            r#"{"rewrites": [{"pattern": "([", "replacement": ""}]}"#,
        )
        .unwrap();
        assert!(config.rewrite_rules().is_err());
    }
}

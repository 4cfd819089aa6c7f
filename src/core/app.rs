use std::{env, fs, path::Path};

use chrono::Utc;
use color_eyre::eyre::{eyre, Context, Result};
use lazy_static::lazy_static;
use path_absolutize::Absolutize;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::store::Store;

use super::{
    query, ArchiveName, ArchiveVersion, Borg, Config, Extractor, RestoreError, Synchronizer,
};

lazy_static! {
    // deliberately permissive, only outright hostile input is rejected
    static ref SAFE_PATH_REGEX: Regex = Regex::new(r"\A[^\x00]+\z").unwrap();
}

pub fn untaint_path(value: &str) -> Result<&str, RestoreError> {
    if SAFE_PATH_REGEX.is_match(value) {
        Ok(value)
    } else {
        Err(RestoreError::InvalidInput(format!("path '{}'", value)))
    }
}

/// Applies the configured rewrite rules to an absolute path. The first
/// matching rule wins; the rest are ignored.
pub fn apply_rewrites(path: &str, rules: &[(Regex, String)]) -> String {
    for (regex, replacement) in rules {
        if regex.is_match(path) {
            return regex.replace(path, replacement.as_str()).into_owned();
        }
    }
    path.to_string()
}

/// Facade wiring config, store and the borg adapter together. Owns the
/// index for its lifetime; all public operations go through here.
pub struct RestoreContext {
    config: Config,
    rewrites: Vec<(Regex, String)>,
    store: Store,
    borg: Borg,
}

impl RestoreContext {
    pub fn new(config: Config) -> Result<RestoreContext> {
        let rewrites = config.rewrite_rules()?;
        let database_path = config.database_path()?;
        let store = Store::new(&database_path, config.cache_size_kb()).with_context(|| {
            eyre!(
                "Failed to open the archive index at '{}'",
                database_path.display()
            )
        })?;
        let borg = Borg::new(config.repository.clone())?;
        Ok(RestoreContext {
            config,
            rewrites,
            store,
            borg,
        })
    }

    /// Reconciles the index with the archives currently in the repository.
    pub fn update_cache(&mut self) -> Result<()> {
        Synchronizer::new(&self.borg, self.config.ingest).update(&mut self.store)
    }

    /// Maps a user-supplied path to the archive-relative path used by the
    /// index: absolutize against the current directory, apply the rewrite
    /// rules, drop the leading slash.
    pub fn resolve_lookup_path(&self, path: &str) -> Result<String> {
        let path = untaint_path(path)?;
        let absolute = Path::new(path)
            .absolutize()
            .with_context(|| eyre!("Failed to resolve '{}' to an absolute path", path))?;
        let absolute = absolute
            .to_str()
            .ok_or_else(|| eyre!("Path '{}' is not valid UTF-8", absolute.display()))?;
        let rewritten = apply_rewrites(absolute, &self.rewrites);
        if rewritten != absolute {
            debug!("Rewrote lookup path '{}' to '{}'", absolute, rewritten);
        }
        let lookup = rewritten.trim_start_matches('/');
        if lookup.is_empty() {
            return Ok(".".to_string());
        }
        Ok(lookup.to_string())
    }

    /// All distinct versions of `path` across the indexed archives, oldest
    /// first. An empty result is a warning, not an error.
    pub fn find_archives(&self, path: &str) -> Result<Vec<ArchiveVersion>> {
        let rows = self.store.get_archives_for_path(path)?;
        let versions = query::distinct_versions(rows);
        if versions.is_empty() {
            warn!("Path '{}' not found in any archive", path);
        }
        Ok(versions)
    }

    /// Picks the newest version older than the age given by `timespec`,
    /// e.g. `5d`. Returns Ok(None) when no version is old enough.
    pub fn select_archive_by_age<'a>(
        &self,
        versions: &'a [ArchiveVersion],
        timespec: &str,
    ) -> Result<Option<&'a ArchiveVersion>> {
        let seconds = super::parse_timespec(timespec)?;
        Ok(query::select_version_by_age(
            versions,
            seconds,
            Utc::now().timestamp(),
        ))
    }

    /// Restores `path` from `archive` into `destination`, replacing any
    /// stale entry with the restored one. The extraction itself runs with
    /// the destination as working directory.
    pub fn restore(
        &self,
        path: &str,
        archive: &ArchiveName,
        destination: impl AsRef<Path>,
    ) -> Result<()> {
        let destination = destination.as_ref();
        untaint_path(
            destination
                .to_str()
                .ok_or_else(|| eyre!("Destination '{}' is not valid UTF-8", destination.display()))?,
        )?;
        fs::create_dir_all(destination).map_err(|source| RestoreError::FilesystemFailure {
            path: destination.to_path_buf(),
            source,
        })?;
        env::set_current_dir(destination).map_err(|source| RestoreError::FilesystemFailure {
            path: destination.to_path_buf(),
            source,
        })?;

        let basename = path
            .rsplit('/')
            .next()
            .ok_or_else(|| RestoreError::InvalidInput(format!("path '{}'", path)))?;
        remove_stale_entry(Path::new(basename))?;

        let strip_components = path.matches('/').count();
        info!(
            "Restoring '{}' from archive {} to '{}'",
            path,
            archive,
            destination.display()
        );
        self.borg.extract(strip_components, archive, path)
    }
}

fn remove_stale_entry(target: &Path) -> Result<(), RestoreError> {
    let metadata = match target.symlink_metadata() {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(RestoreError::FilesystemFailure {
                path: target.to_path_buf(),
                source,
            })
        }
    };
    debug!("Removing stale '{}' before restore", target.display());
    let result = if metadata.is_dir() {
        fs::remove_dir_all(target)
    } else {
        fs::remove_file(target)
    };
    result.map_err(|source| RestoreError::FilesystemFailure {
        path: target.to_path_buf(),
        source,
    })
}

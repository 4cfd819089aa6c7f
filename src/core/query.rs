use std::collections::HashSet;

use super::{ArchiveName, ArchiveVersion};

/// Collapses raw per-archive rows into the distinct versions of a path,
/// ordered oldest to newest. Archives recording the same mtime hold the
/// same version of the path, so only the first one (in store enumeration
/// order) is kept.
pub fn distinct_versions(rows: Vec<(ArchiveName, Option<i64>)>) -> Vec<ArchiveVersion> {
    let mut seen = HashSet::new();
    let mut versions: Vec<ArchiveVersion> = rows
        .into_iter()
        .filter_map(|(archive, mtime)| mtime.map(|mtime| ArchiveVersion { archive, mtime }))
        .filter(|version| seen.insert(version.mtime))
        .collect();
    versions.sort_by_key(|version| version.mtime);
    versions
}

/// Picks the newest version strictly older than `now - seconds`.
pub fn select_version_by_age(
    versions: &[ArchiveVersion],
    seconds: i64,
    now: i64,
) -> Option<&ArchiveVersion> {
    let target = now - seconds;
    versions.iter().rev().find(|version| version.mtime < target)
}

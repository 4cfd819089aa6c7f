use std::collections::HashSet;
use std::time::Instant;

use chrono::{Local, NaiveDateTime, TimeZone};
use color_eyre::eyre::Result;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, trace};

use crate::store::{
    ingest::{DirectTable, MemoryTable, PathTimeTable},
    Store,
};

use super::{ArchiveName, ArchiveSource, IngestStrategy};

lazy_static! {
    // "Mon, 2017-01-01 00:00:00 some/path" -- the first four characters are
    // the weekday abbreviation and comma
    static ref LISTING_LINE_REGEX: Regex =
        Regex::new(r"^.{4} (\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}) (.*)$").unwrap();
}

/// Parses one listing line into `(path, mtime)`.
///
/// The timestamp carries no zone and is interpreted in the process's local
/// zone at the moment of ingestion; re-ingesting the same archive in a
/// different zone yields different stored values. This matches what
/// existing index files contain, so it stays. Lines that do not match the
/// expected shape are skipped by returning `None`.
pub fn parse_listing_line(line: &str) -> Option<(&str, i64)> {
    let captures = LISTING_LINE_REGEX.captures(line)?;
    let naive =
        NaiveDateTime::parse_from_str(captures.get(1)?.as_str(), "%Y-%m-%d %H:%M:%S").ok()?;
    let mtime = Local.from_local_datetime(&naive).earliest()?.timestamp();
    Some((captures.get(2)?.as_str(), mtime))
}

/// Reconciles the store's archive set with the archive source's current
/// one: departed archives are dropped first, new ones are ingested in
/// source order, one transaction per archive. An archive is never partially
/// committed.
pub struct Synchronizer<'a> {
    source: &'a dyn ArchiveSource,
    strategy: IngestStrategy,
}

impl<'a> Synchronizer<'a> {
    pub fn new(source: &'a dyn ArchiveSource, strategy: IngestStrategy) -> Synchronizer<'a> {
        Synchronizer { source, strategy }
    }

    pub fn update(&self, store: &mut Store) -> Result<()> {
        let source_archives = self.source.list_archives()?;
        let known = store.archive_names()?;
        let source_set: HashSet<&ArchiveName> = source_archives.iter().collect();
        let known_set: HashSet<&ArchiveName> = known.iter().collect();

        let mut removed = 0usize;
        for archive in known.iter().filter(|archive| !source_set.contains(archive)) {
            info!("Removing archive {} from the index", archive);
            store.transaction(|writer| Ok(writer.remove_archive(archive)?))?;
            store.compact()?;
            removed += 1;
        }

        let mut added = 0usize;
        for archive in source_archives
            .iter()
            .filter(|archive| !known_set.contains(archive))
        {
            self.ingest_archive(store, archive)?;
            store.compact()?;
            added += 1;
        }

        info!(
            "Index now covers {} archives and {} paths ({} added, {} removed)",
            source_archives.len(),
            store.row_count()?,
            added,
            removed
        );
        Ok(())
    }

    fn ingest_archive(&self, store: &mut Store, archive: &ArchiveName) -> Result<()> {
        let start = Instant::now();
        info!("Adding archive {} to the index", archive);
        store.transaction(|writer| {
            writer.add_archive(archive)?;
            let mut table: Box<dyn PathTimeTable> = match self.strategy {
                IngestStrategy::Sqlite => Box::new(MemoryTable::new(archive.clone())),
                IngestStrategy::DirectSql => Box::new(DirectTable::new(archive.clone())),
            };
            self.source.list_archive(archive, &mut |line| {
                match parse_listing_line(line) {
                    Some((path, mtime)) => table.add_path(writer, path, mtime)?,
                    None => trace!("Skipping unparsable listing line: {}", line),
                }
                Ok(())
            })?;
            table.flush(writer)?;
            Ok(())
        })?;
        debug!("Archive {} ingested in {:?}", archive, start.elapsed());
        Ok(())
    }
}

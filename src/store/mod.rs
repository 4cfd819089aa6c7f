pub mod ingest;

use std::path::Path;

use color_eyre::eyre::Result;
use rusqlite::{params, Connection};
use tracing::{debug, trace};

use crate::core::{ArchiveName, RestoreError};

/// Default SQLite page cache size in KiB.
pub const DEFAULT_CACHE_SIZE_KB: i64 = 102_400;

/// Persistent path-to-per-archive-mtime index.
///
/// The `files` table has one row per path and one nullable `timestamp-*`
/// column per archive; a null cell means the path does not exist in that
/// archive. The `archives` table enumerates exactly the set of timestamp
/// columns, in insertion order. A query by path is a single indexed point
/// read returning every version at once.
pub struct Store {
    conn: Connection,
}

fn timestamp_column(archive: &ArchiveName) -> String {
    format!("timestamp-{}", archive)
}

/// Quotes a SQL identifier. Archive names are untainted before they get
/// here, so the quote doubling never fires in practice.
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn initialize(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS files (
            path TEXT NOT NULL PRIMARY KEY
        ) STRICT;
        CREATE TABLE IF NOT EXISTS archives (
            archive_name TEXT NOT NULL UNIQUE
        ) STRICT;",
    )
}

fn archive_names_on(conn: &Connection) -> Result<Vec<ArchiveName>, RestoreError> {
    let mut stmt = conn.prepare("SELECT archive_name FROM archives ORDER BY rowid")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut names = Vec::new();
    for name in rows {
        names.push(ArchiveName::parse(name?)?);
    }
    Ok(names)
}

impl Store {
    /// Opens the index database at `path`, creating it and its parent
    /// directories (mode 0700 on Unix) as needed.
    pub fn new(path: impl AsRef<Path>, cache_size_kb: i64) -> Result<Store, RestoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            create_private_dirs(parent)?;
        }
        trace!("Opening index database at '{}'", path.display());
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "cache_size", -cache_size_kb)?;
        initialize(&conn)?;
        Ok(Store { conn })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Store, RestoreError> {
        let conn = Connection::open_in_memory()?;
        initialize(&conn)?;
        Ok(Store { conn })
    }

    /// Known archives, in the order they were added.
    pub fn archive_names(&self) -> Result<Vec<ArchiveName>, RestoreError> {
        archive_names_on(&self.conn)
    }

    pub fn row_count(&self) -> Result<i64, RestoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?)
    }

    /// Returns one entry per known archive, in insertion order, with the
    /// mtime recorded for `path` in that archive. A missing row yields a
    /// null mtime for every archive.
    pub fn get_archives_for_path(
        &self,
        path: &str,
    ) -> Result<Vec<(ArchiveName, Option<i64>)>, RestoreError> {
        let archives = archive_names_on(&self.conn)?;
        if archives.is_empty() {
            return Ok(Vec::new());
        }
        let columns = archives
            .iter()
            .map(|archive| quote_identifier(&timestamp_column(archive)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {} FROM files WHERE path = ?1", columns);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![path])?;
        let mut result = Vec::with_capacity(archives.len());
        if let Some(row) = rows.next()? {
            for (index, archive) in archives.into_iter().enumerate() {
                let mtime: Option<i64> = row.get(index)?;
                result.push((archive, mtime));
            }
        } else {
            for archive in archives {
                result.push((archive, None));
            }
        }
        Ok(result)
    }

    /// Runs `f` inside a single write transaction, committing when it
    /// returns Ok and rolling back on any error path.
    pub fn transaction<T>(&mut self, f: impl FnOnce(&StoreWriter<'_>) -> Result<T>) -> Result<T> {
        let tx = self.conn.transaction().map_err(RestoreError::from)?;
        let result = f(&StoreWriter { conn: &tx })?;
        tx.commit().map_err(RestoreError::from)?;
        Ok(result)
    }

    /// Reclaims free pages after large churn. Must not run inside a
    /// transaction.
    pub fn compact(&self) -> Result<(), RestoreError> {
        debug!("Compacting index database");
        self.conn.execute("VACUUM", [])?;
        Ok(())
    }

    #[cfg(test)]
    pub fn dump_rows(&self) -> Result<Vec<(String, Vec<Option<i64>>)>, RestoreError> {
        let archives = archive_names_on(&self.conn)?;
        let columns = archives
            .iter()
            .map(|archive| quote_identifier(&timestamp_column(archive)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = if archives.is_empty() {
            "SELECT path FROM files ORDER BY path".to_string()
        } else {
            format!("SELECT path, {} FROM files ORDER BY path", columns)
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let path: String = row.get(0)?;
            let mut mtimes = Vec::with_capacity(archives.len());
            for index in 0..archives.len() {
                mtimes.push(row.get::<_, Option<i64>>(index + 1)?);
            }
            result.push((path, mtimes));
        }
        Ok(result)
    }
}

/// Write half of the store, only reachable inside [`Store::transaction`].
pub struct StoreWriter<'a> {
    conn: &'a Connection,
}

impl StoreWriter<'_> {
    /// Registers a new archive and adds its timestamp column. Fails if the
    /// archive is already known.
    pub fn add_archive(&self, archive: &ArchiveName) -> Result<(), RestoreError> {
        self.conn.execute(
            "INSERT INTO archives (archive_name) VALUES (?1)",
            params![archive.as_str()],
        )?;
        self.conn.execute(
            &format!(
                "ALTER TABLE files ADD COLUMN {} INTEGER",
                quote_identifier(&timestamp_column(archive))
            ),
            [],
        )?;
        Ok(())
    }

    /// Drops an archive by rebuilding the `files` table without its column;
    /// SQLite cannot drop columns in place cheaply. Rows whose every
    /// remaining timestamp is null are purged. Removing an unknown archive
    /// is a no-op.
    pub fn remove_archive(&self, archive: &ArchiveName) -> Result<(), RestoreError> {
        let known = archive_names_on(self.conn)?;
        if !known.contains(archive) {
            return Ok(());
        }
        let retained_columns = known
            .iter()
            .filter(|name| *name != archive)
            .map(|name| quote_identifier(&timestamp_column(name)))
            .collect::<Vec<_>>();

        let mut create = String::from("CREATE TABLE files_new (path TEXT NOT NULL PRIMARY KEY");
        for column in &retained_columns {
            create.push_str(&format!(", {} INTEGER", column));
        }
        create.push_str(") STRICT");
        self.conn.execute(&create, [])?;

        let mut column_list = String::from("path");
        for column in &retained_columns {
            column_list.push_str(", ");
            column_list.push_str(column);
        }
        self.conn.execute(
            &format!(
                "INSERT INTO files_new ({list}) SELECT {list} FROM files",
                list = column_list
            ),
            [],
        )?;
        self.conn.execute("DROP TABLE files", [])?;
        self.conn
            .execute("ALTER TABLE files_new RENAME TO files", [])?;

        if retained_columns.is_empty() {
            self.conn.execute("DELETE FROM files", [])?;
        } else {
            let all_null = retained_columns
                .iter()
                .map(|column| format!("{} IS NULL", column))
                .collect::<Vec<_>>()
                .join(" AND ");
            self.conn
                .execute(&format!("DELETE FROM files WHERE {}", all_null), [])?;
        }
        self.conn.execute(
            "DELETE FROM archives WHERE archive_name = ?1",
            params![archive.as_str()],
        )?;
        Ok(())
    }

    /// Records `mtime` for `path` in the archive's column, keeping the
    /// maximum of the existing and the new value. An unset cell takes the
    /// new value as-is, so pre-epoch (negative) mtimes survive.
    pub fn upsert_path(
        &self,
        archive: &ArchiveName,
        path: &str,
        mtime: i64,
    ) -> Result<(), RestoreError> {
        let column = quote_identifier(&timestamp_column(archive));
        let sql = format!(
            "INSERT INTO files (path, {column}) VALUES (?1, ?2)
             ON CONFLICT(path) DO UPDATE SET
                 {column} = CASE
                     WHEN {column} IS NULL OR {column} < excluded.{column}
                     THEN excluded.{column}
                     ELSE {column}
                 END",
            column = column
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        stmt.execute(params![path, mtime])?;
        Ok(())
    }
}

fn create_private_dirs(path: &Path) -> Result<(), RestoreError> {
    if path.exists() {
        return Ok(());
    }
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path).map_err(|source| RestoreError::FilesystemFailure {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive(name: &str) -> ArchiveName {
        ArchiveName::parse(name).unwrap()
    }

    #[test]
    fn upsert_keeps_maximum_mtime() {
        let mut store = Store::in_memory().unwrap();
        let a = archive("a");
        store
            .transaction(|writer| {
                writer.add_archive(&a)?;
                writer.upsert_path(&a, "etc/passwd", 100)?;
                writer.upsert_path(&a, "etc/passwd", 50)?;
                writer.upsert_path(&a, "etc/passwd", 150)?;
                Ok(())
            })
            .unwrap();
        let rows = store.get_archives_for_path("etc/passwd").unwrap();
        assert_eq!(rows, vec![(a, Some(150))]);
    }

    #[test]
    fn upsert_records_negative_mtimes_faithfully() {
        // pre-epoch timestamps happen, e.g. with zone-shifted ingests
        let mut store = Store::in_memory().unwrap();
        let a = archive("a");
        let b = archive("b");
        store
            .transaction(|writer| {
                writer.add_archive(&a)?;
                writer.add_archive(&b)?;
                // the row already exists with a null cell for archive b
                writer.upsert_path(&a, "boot", 10)?;
                writer.upsert_path(&b, "boot", -3600)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(
            store.get_archives_for_path("boot").unwrap(),
            vec![(a, Some(10)), (b, Some(-3600))]
        );
    }

    #[test]
    fn missing_paths_report_null_for_every_archive() {
        let mut store = Store::in_memory().unwrap();
        let a = archive("a");
        let b = archive("b");
        store
            .transaction(|writer| {
                writer.add_archive(&a)?;
                writer.add_archive(&b)?;
                writer.upsert_path(&a, "boot", 10)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(
            store.get_archives_for_path("boot").unwrap(),
            vec![(a.clone(), Some(10)), (b.clone(), None)]
        );
        assert_eq!(
            store.get_archives_for_path("lulz").unwrap(),
            vec![(a.clone(), None), (b.clone(), None)]
        );
        assert_eq!(
            store.get_archives_for_path(".").unwrap(),
            vec![(a, None), (b, None)]
        );
    }

    #[test]
    fn archive_enumeration_preserves_insertion_order() {
        let mut store = Store::in_memory().unwrap();
        let names = ["c", "a", "b"];
        store
            .transaction(|writer| {
                for name in names {
                    writer.add_archive(&archive(name))?;
                }
                Ok(())
            })
            .unwrap();
        let listed: Vec<String> = store
            .archive_names()
            .unwrap()
            .into_iter()
            .map(|name| name.to_string())
            .collect();
        assert_eq!(listed, names);
    }

    #[test]
    fn adding_an_archive_twice_fails() {
        let mut store = Store::in_memory().unwrap();
        let a = archive("a");
        store
            .transaction(|writer| Ok(writer.add_archive(&a)?))
            .unwrap();
        assert!(store
            .transaction(|writer| Ok(writer.add_archive(&a)?))
            .is_err());
        // the failed transaction must not leave a duplicate behind
        assert_eq!(store.archive_names().unwrap(), vec![a]);
    }

    #[test]
    fn remove_archive_rebuilds_and_purges_orphan_rows() {
        let mut store = Store::in_memory().unwrap();
        let a = archive("a");
        let b = archive("b");
        store
            .transaction(|writer| {
                writer.add_archive(&a)?;
                writer.add_archive(&b)?;
                writer.upsert_path(&a, "shared", 10)?;
                writer.upsert_path(&b, "shared", 20)?;
                writer.upsert_path(&b, "only-in-b", 30)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.row_count().unwrap(), 2);

        store
            .transaction(|writer| Ok(writer.remove_archive(&b)?))
            .unwrap();
        store.compact().unwrap();

        assert_eq!(store.archive_names().unwrap(), vec![a.clone()]);
        assert_eq!(store.row_count().unwrap(), 1);
        assert_eq!(
            store.get_archives_for_path("shared").unwrap(),
            vec![(a.clone(), Some(10))]
        );
        assert_eq!(
            store.get_archives_for_path("only-in-b").unwrap(),
            vec![(a, None)]
        );
    }

    #[test]
    fn removing_the_last_archive_empties_the_table() {
        let mut store = Store::in_memory().unwrap();
        let a = archive("a");
        store
            .transaction(|writer| {
                writer.add_archive(&a)?;
                writer.upsert_path(&a, "boot", 10)?;
                Ok(())
            })
            .unwrap();
        store
            .transaction(|writer| Ok(writer.remove_archive(&a)?))
            .unwrap();
        assert!(store.archive_names().unwrap().is_empty());
        assert_eq!(store.row_count().unwrap(), 0);
    }

    #[test]
    fn removing_an_unknown_archive_is_a_noop() {
        let mut store = Store::in_memory().unwrap();
        let a = archive("a");
        store
            .transaction(|writer| {
                writer.add_archive(&a)?;
                writer.upsert_path(&a, "boot", 10)?;
                Ok(())
            })
            .unwrap();
        store
            .transaction(|writer| Ok(writer.remove_archive(&archive("ghost"))?))
            .unwrap();
        assert_eq!(store.archive_names().unwrap(), vec![a]);
        assert_eq!(store.row_count().unwrap(), 1);
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let mut store = Store::in_memory().unwrap();
        let a = archive("a");
        let result: Result<()> = store.transaction(|writer| {
            writer.add_archive(&a)?;
            writer.upsert_path(&a, "boot", 10)?;
            Err(color_eyre::eyre::eyre!("stream interrupted"))
        });
        assert!(result.is_err());
        assert!(store.archive_names().unwrap().is_empty());
        assert_eq!(store.row_count().unwrap(), 0);
    }

    #[test]
    fn store_persists_across_reopen() {
        let dir = tempdir::TempDir::new("borg-restore-test").unwrap();
        let db_path = dir.path().join("v2").join("archives.db");
        {
            let mut store = Store::new(&db_path, DEFAULT_CACHE_SIZE_KB).unwrap();
            let a = archive("a");
            store
                .transaction(|writer| {
                    writer.add_archive(&a)?;
                    writer.upsert_path(&a, "boot", 10)?;
                    Ok(())
                })
                .unwrap();
        }
        let store = Store::new(&db_path, DEFAULT_CACHE_SIZE_KB).unwrap();
        assert_eq!(store.row_count().unwrap(), 1);
        assert_eq!(
            store.get_archives_for_path("boot").unwrap(),
            vec![(archive("a"), Some(10))]
        );
    }
}

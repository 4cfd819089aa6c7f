use std::collections::{BTreeMap, HashMap};

use color_eyre::eyre::Result;
use tracing::debug;

use super::StoreWriter;
use crate::core::ArchiveName;

/// Strategy that feeds one archive's `(path, mtime)` listing into the
/// store. Both implementations guarantee that every directory ends up with
/// the newest mtime found anywhere in its subtree.
///
/// The root entry `.` stands for the whole archive and is never written to
/// the store.
pub trait PathTimeTable {
    fn add_path(&mut self, store: &StoreWriter<'_>, path: &str, mtime: i64) -> Result<()>;
    /// Ensures all buffered rows are in the store.
    fn flush(&mut self, store: &StoreWriter<'_>) -> Result<()>;
}

#[derive(Default)]
struct TreeNode {
    children: BTreeMap<String, TreeNode>,
    mtime: i64,
}

/// Aggregates the whole archive as an in-memory tree and writes it out in
/// one pass on flush. Uses memory proportional to the number of paths, but
/// touches the store only once per path and accepts listings in any order.
pub struct MemoryTable {
    archive: ArchiveName,
    root: TreeNode,
}

impl MemoryTable {
    pub fn new(archive: ArchiveName) -> MemoryTable {
        MemoryTable {
            archive,
            root: TreeNode::default(),
        }
    }
}

impl PathTimeTable for MemoryTable {
    fn add_path(&mut self, _store: &StoreWriter<'_>, path: &str, mtime: i64) -> Result<()> {
        self.root.mtime = self.root.mtime.max(mtime);
        if path == "." {
            return Ok(());
        }
        let mut node = &mut self.root;
        for component in path.split('/').filter(|component| !component.is_empty()) {
            node = node.children.entry(component.to_string()).or_default();
            node.mtime = node.mtime.max(mtime);
        }
        Ok(())
    }

    fn flush(&mut self, store: &StoreWriter<'_>) -> Result<()> {
        // iterative DFS, archive trees can nest deeper than the call stack
        let mut stack: Vec<(String, &TreeNode)> = self
            .root
            .children
            .iter()
            .map(|(name, node)| (name.clone(), node))
            .collect();
        let mut rows = 0u64;
        while let Some((path, node)) = stack.pop() {
            store.upsert_path(&self.archive, &path, node.mtime)?;
            rows += 1;
            for (name, child) in &node.children {
                stack.push((format!("{}/{}", path, name), child));
            }
        }
        debug!("Wrote {} paths for archive {}", rows, self.archive);
        Ok(())
    }
}

/// Writes rows straight to the store, remembering the mtimes already
/// written for the current ancestor chain. Uses memory proportional to the
/// tree depth, at the cost of extra (cheap) store calls, and relies on the
/// listing arriving in depth-first order to keep the cache effective.
pub struct DirectTable {
    archive: ArchiveName,
    cache: HashMap<String, i64>,
    current_path: String,
    paths_seen: u64,
    potential_writes: u64,
    writes: u64,
}

impl DirectTable {
    pub fn new(archive: ArchiveName) -> DirectTable {
        DirectTable {
            archive,
            cache: HashMap::new(),
            current_path: String::new(),
            paths_seen: 0,
            potential_writes: 0,
            writes: 0,
        }
    }
}

/// All `/`-separated prefixes of `path`, ending with `path` itself.
fn prefixes(path: &str) -> impl Iterator<Item = &str> {
    path.char_indices()
        .filter(|(_, c)| *c == '/')
        .map(|(index, _)| &path[..index])
        .chain(std::iter::once(path))
}

/// True when `prefix` equals `path` or names an ancestor directory of it.
fn is_path_prefix(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

impl PathTimeTable for DirectTable {
    fn add_path(&mut self, store: &StoreWriter<'_>, path: &str, mtime: i64) -> Result<()> {
        self.paths_seen += 1;
        if path == "." {
            return Ok(());
        }
        // leaving a subtree invalidates the cache entries below it
        if !self.current_path.is_empty() {
            let stale: Vec<String> = prefixes(&self.current_path)
                .filter(|prefix| !is_path_prefix(prefix, path))
                .map(String::from)
                .collect();
            for prefix in stale {
                self.cache.remove(&prefix);
            }
        }
        for ancestor in prefixes(path) {
            self.potential_writes += 1;
            match self.cache.get(ancestor) {
                Some(cached) if *cached >= mtime => {}
                _ => {
                    store.upsert_path(&self.archive, ancestor, mtime)?;
                    self.cache.insert(ancestor.to_string(), mtime);
                    self.writes += 1;
                }
            }
        }
        self.current_path = path.to_string();
        Ok(())
    }

    fn flush(&mut self, _store: &StoreWriter<'_>) -> Result<()> {
        debug!(
            "Direct ingest for archive {}: {} paths seen, {} potential writes, {} writes",
            self.archive, self.paths_seen, self.potential_writes, self.writes
        );
        Ok(())
    }
}

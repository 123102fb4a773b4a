//! Glob search over the current namespace of an archive.
//!
//! A search opens one [`Snapshot`] and resolves the archive (or every member
//! of an archive group) to namespace tables of that snapshot. A blocking
//! producer enumerates the paths of those tables into a bounded work queue;
//! a fixed pool of blocking matchers tests each path against the pattern and, for
//! matches, reads the package set into a bounded result queue. A coordinator
//! closes the result queue once every matcher has exited, which ends the
//! collection loop.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::store::{self, NamespaceTable, Snapshot, Store, StoreError, StoreResult};

/// Matching paths and the packages that ship them.
pub type FindResult = BTreeMap<String, BTreeSet<String>>;

/// Namespace tables resolved from a single snapshot.
#[derive(Clone)]
pub struct NamespaceView {
    tables: Vec<Arc<NamespaceTable>>,
}

struct WorkItem {
    table: usize,
    path: String,
}

struct Match {
    path: String,
    packages: Vec<String>,
}

/// Compile a shell-style pattern matched against whole paths.
///
/// `*` also matches `/`, as with `fnmatch(3)` without `FNM_PATHNAME`.
pub fn compile_pattern(pattern: &str) -> Result<GlobMatcher, globset::Error> {
    Ok(GlobBuilder::new(pattern)
        .literal_separator(false)
        .case_insensitive(false)
        .backslash_escape(true)
        .build()?
        .compile_matcher())
}

/// Answers pattern queries against the store.
pub struct SearchEngine {
    store: Arc<Store>,
    groups: BTreeMap<String, Vec<String>>,
    config: SearchConfig,
}

impl SearchEngine {
    /// Create a search engine over `store`.
    pub fn new(
        store: Arc<Store>,
        groups: BTreeMap<String, Vec<String>>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            groups,
            config,
        }
    }

    /// Archives and archive groups that can currently be queried, sorted.
    ///
    /// A group is listed once at least one of its members is published.
    pub fn known_archives(&self) -> Vec<String> {
        let published = match self.store.snapshot().and_then(|s| s.archives()) {
            Ok(published) => published,
            Err(e) => {
                warn!("Failed to list archives: {}", e);
                return Vec::new();
            }
        };

        let mut known: BTreeSet<String> = published.iter().cloned().collect();
        for (group, members) in &self.groups {
            if members.iter().any(|m| published.contains(m)) {
                known.insert(group.clone());
            }
        }
        known.into_iter().collect()
    }

    fn members<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        match self.groups.get(name) {
            Some(members) => members.iter().map(String::as_str).collect(),
            None => vec![name],
        }
    }

    /// Resolve `archive` to the namespaces current in `snapshot`.
    ///
    /// Returns `None` for names that are neither a published archive nor a
    /// group with a published member. Namespace identifiers are not names.
    pub fn open_view(
        &self,
        snapshot: &Snapshot,
        archive: &str,
    ) -> StoreResult<Option<NamespaceView>> {
        let mut tables = Vec::new();
        for member in self.members(archive) {
            if let Some(table) = snapshot.open_current(member)? {
                tables.push(Arc::new(table));
            }
        }
        if tables.is_empty() {
            return Ok(None);
        }
        Ok(Some(NamespaceView { tables }))
    }

    /// Find every path of `archive` matching `pattern`.
    ///
    /// Never fails: unknown archives, invalid patterns and store errors all
    /// produce an empty result.
    pub async fn find(&self, archive: &str, pattern: &str) -> FindResult {
        let view = {
            let snapshot = match self.store.snapshot() {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Failed to open snapshot: {}", e);
                    return FindResult::new();
                }
            };
            match self.open_view(&snapshot, archive) {
                Ok(Some(view)) => view,
                Ok(None) => {
                    debug!("Query for unknown archive {:?}", archive);
                    return FindResult::new();
                }
                Err(e) => {
                    warn!("Failed to open namespaces of {}: {}", archive, e);
                    return FindResult::new();
                }
            }
        };

        let result = self.search_view(view, pattern).await;
        debug!(
            "{}: {} paths match {:?}",
            archive,
            result.len(),
            pattern
        );
        result
    }

    /// Search an already resolved view.
    pub async fn search_view(&self, view: NamespaceView, pattern: &str) -> FindResult {
        let matcher = match compile_pattern(pattern) {
            Ok(matcher) => Arc::new(matcher),
            Err(e) => {
                debug!("Rejecting pattern {:?}: {}", pattern, e);
                return FindResult::new();
            }
        };

        let (work_tx, work_rx) = async_channel::bounded::<WorkItem>(self.config.work_queue_size);
        let (result_tx, result_rx) = async_channel::bounded::<Match>(self.config.result_queue_size);

        let producer = {
            let tables = view.tables.clone();
            tokio::task::spawn_blocking(move || enumerate(&tables, work_tx))
        };

        let workers: Vec<JoinHandle<StoreResult<()>>> = (0..self.config.workers.max(1))
            .map(|_| {
                let tables = view.tables.clone();
                let matcher = Arc::clone(&matcher);
                let work = work_rx.clone();
                let results = result_tx.clone();
                tokio::task::spawn_blocking(move || match_paths(&tables, &matcher, work, results))
            })
            .collect();
        drop(work_rx);

        let coordinator = tokio::spawn(async move {
            let mut failed = false;
            for worker in workers {
                match worker.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("Matcher failed: {}", e);
                        failed = true;
                    }
                    Err(e) => {
                        warn!("Matcher task failed: {}", e);
                        failed = true;
                    }
                }
            }
            result_tx.close();
            failed
        });

        let mut result = FindResult::new();
        while let Ok(m) = result_rx.recv().await {
            result.entry(m.path).or_default().extend(m.packages);
        }

        let workers_failed = coordinator.await.unwrap_or(true);
        let producer_failed = match producer.await {
            Ok(Ok(count)) => {
                debug!("Enumerated {} paths", count);
                false
            }
            Ok(Err(e)) => {
                warn!("Path enumeration failed: {}", e);
                true
            }
            Err(e) => {
                warn!("Path enumeration task failed: {}", e);
                true
            }
        };

        if workers_failed || producer_failed {
            return FindResult::new();
        }
        result
    }
}

/// Feed every path of `tables` into the work queue, then close it.
fn enumerate(
    tables: &[Arc<NamespaceTable>],
    work: async_channel::Sender<WorkItem>,
) -> StoreResult<u64> {
    use redb::ReadableMultimapTable;

    let mut count = 0;
    for (index, table) in tables.iter().enumerate() {
        for item in table.iter()? {
            let (path, _) = item?;
            let item = WorkItem {
                table: index,
                path: path.value().to_string(),
            };
            if work.send_blocking(item).is_err() {
                // Every matcher is gone.
                return Ok(count);
            }
            count += 1;
        }
    }
    work.close();
    Ok(count)
}

/// Match queued paths until the work queue is drained or nobody is
/// collecting results any more.
fn match_paths(
    tables: &[Arc<NamespaceTable>],
    matcher: &GlobMatcher,
    work: async_channel::Receiver<WorkItem>,
    results: async_channel::Sender<Match>,
) -> Result<(), StoreError> {
    while let Ok(item) = work.recv_blocking() {
        if results.is_closed() {
            break;
        }
        if !matcher.is_match(&item.path) {
            continue;
        }
        let packages = store::packages(&tables[item.table], &item.path)?;
        if results
            .send_blocking(Match {
                path: item.path,
                packages,
            })
            .is_err()
        {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ArchiveRecord;
    use apt_contents::ContentsEntry;
    use maplit::{btreemap, btreeset};
    use tempfile::TempDir;

    fn publish(store: &Store, archive: &str, entries: &[(&str, &[&str])]) -> String {
        let ns = store.create_namespace(archive).unwrap();
        let entries: Vec<ContentsEntry> = entries
            .iter()
            .map(|(path, packages)| {
                ContentsEntry::new(*path, packages.iter().map(|p| p.to_string()).collect())
            })
            .collect();
        store.append(&ns, &entries).unwrap();
        store
            .publish(
                archive,
                &ArchiveRecord {
                    namespace: ns.clone(),
                    published_at: chrono::Utc::now(),
                    entries: entries.len() as u64,
                    pairs: 0,
                },
            )
            .unwrap();
        ns
    }

    fn engine(store: Arc<Store>, workers: usize, queue: usize) -> SearchEngine {
        SearchEngine::new(
            store,
            btreemap! {
                "neon-all".to_string() => vec!["neon".to_string(), "ubuntu".to_string()],
            },
            SearchConfig {
                workers,
                work_queue_size: queue,
                result_queue_size: queue,
                timeout_seconds: 5,
            },
        )
    }

    fn setup() -> (TempDir, Arc<Store>) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&temp_dir.path().join("index.redb")).unwrap());
        publish(
            &store,
            "neon",
            &[
                ("usr/lib/libfoo.so", &["libfoo-dev"]),
                ("usr/lib/libfoo.so.1", &["libfoo1"]),
                ("usr/bin/plasmashell", &["plasma-workspace"]),
            ],
        );
        publish(
            &store,
            "ubuntu",
            &[
                ("usr/bin/ls", &["coreutils"]),
                ("usr/local/bin/ls", &["local-ls"]),
                ("usr/lib/libfoo.so", &["libfoo-dev-ubuntu"]),
            ],
        );
        (temp_dir, store)
    }

    #[test]
    fn test_compile_pattern() {
        let m = compile_pattern("*.so").unwrap();
        assert!(m.is_match("/usr/lib/libfoo.so"));
        assert!(!m.is_match("/usr/lib/libfoo.so.1"));
        assert!(compile_pattern("/usr/lib/[a-").is_err());
        assert!(compile_pattern("/usr/bin/l?").unwrap().is_match("/usr/bin/ls"));
        assert!(!compile_pattern("/usr/bin/LS").unwrap().is_match("/usr/bin/ls"));
    }

    #[tokio::test]
    async fn test_find_is_anchored() {
        let (_dir, store) = setup();
        let engine = engine(store, 4, 8);

        assert_eq!(
            engine.find("neon", "*.so").await,
            btreemap! {
                "/usr/lib/libfoo.so".to_string() => btreeset! {"libfoo-dev".to_string()},
            }
        );
        assert_eq!(
            engine.find("ubuntu", "/usr/bin/*").await,
            btreemap! {
                "/usr/bin/ls".to_string() => btreeset! {"coreutils".to_string()},
            }
        );
    }

    #[tokio::test]
    async fn test_find_group_merges_members() {
        let (_dir, store) = setup();
        let engine = engine(store, 2, 1);

        let result = engine.find("neon-all", "/usr/lib/libfoo.so").await;
        assert_eq!(
            result,
            btreemap! {
                "/usr/lib/libfoo.so".to_string() => btreeset! {
                    "libfoo-dev".to_string(),
                    "libfoo-dev-ubuntu".to_string(),
                },
            }
        );
    }

    #[tokio::test]
    async fn test_find_unknown_or_invalid_is_empty() {
        let (_dir, store) = setup();
        let namespace = store.record("neon").unwrap().unwrap().namespace;
        let engine = engine(store, 2, 2);

        assert!(engine.find("debian", "*").await.is_empty());
        assert!(engine.find(&namespace, "*").await.is_empty());
        assert!(engine.find("neon", "[").await.is_empty());
        assert!(engine.find("neon", "").await.is_empty());
    }

    #[tokio::test]
    async fn test_single_worker_tiny_queues_sees_everything() {
        let (_dir, store) = setup();
        let engine = engine(store, 1, 1);
        assert_eq!(engine.find("neon-all", "*").await.len(), 5);
    }

    #[tokio::test]
    async fn test_known_archives() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&temp_dir.path().join("index.redb")).unwrap());
        let engine = engine(Arc::clone(&store), 1, 1);
        assert!(engine.known_archives().is_empty());

        publish(&store, "ubuntu", &[("usr/bin/ls", &["coreutils"])]);
        assert_eq!(engine.known_archives(), vec!["neon-all", "ubuntu"]);
    }

    #[tokio::test]
    async fn test_view_outlives_publish() {
        let (_dir, store) = setup();
        let engine = engine(Arc::clone(&store), 2, 2);

        let view = {
            let snapshot = store.snapshot().unwrap();
            engine.open_view(&snapshot, "neon").unwrap().unwrap()
        };
        publish(&store, "neon", &[("usr/bin/new", &["new"])]);

        let old = engine.search_view(view, "*").await;
        assert_eq!(old.len(), 3);
        assert!(!old.contains_key("/usr/bin/new"));

        let new = engine.find("neon", "*").await;
        assert_eq!(new.keys().collect::<Vec<_>>(), vec!["/usr/bin/new"]);
    }
}

//! Index builder: turns a stream of Contents entries into a published namespace.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use apt_contents::ContentsEntry;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::IndexResult;
use crate::store::{ArchiveRecord, Store};

/// Outcome of a successful build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    /// Archive that was rebuilt.
    pub archive: String,
    /// Namespace that is now current.
    pub namespace: String,
    /// Namespace that was superseded, if any.
    pub retired: Option<String>,
    /// Entries consumed from the feed.
    pub entries: u64,
    /// Distinct path/package pairs stored.
    pub pairs: u64,
    /// Wall clock duration of the build.
    pub elapsed: Duration,
}

/// Writes entries into fresh namespaces and publishes them.
pub struct IndexBuilder {
    store: Arc<Store>,
    batch_size: usize,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IndexBuilder {
    /// Create a builder writing `batch_size` entries per transaction.
    pub fn new(store: Arc<Store>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn archive_lock(&self, archive: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(archive.to_string()).or_default())
    }

    /// Build a new namespace for `archive` from `entries` and publish it.
    ///
    /// If the stream yields an error the partially written namespace is
    /// discarded and the archive keeps its current namespace.
    pub async fn build<S>(&self, archive: &str, entries: S) -> IndexResult<BuildReport>
    where
        S: Stream<Item = IndexResult<ContentsEntry>> + Send,
    {
        let lock = self.archive_lock(archive);
        let _guard = lock.lock().await;
        let start = Instant::now();

        let namespace = {
            let store = Arc::clone(&self.store);
            let archive = archive.to_string();
            tokio::task::spawn_blocking(move || store.create_namespace(&archive)).await??
        };
        info!("Building namespace {} for {}", namespace, archive);

        match self.populate(&namespace, entries).await {
            Ok(entries) => {
                let store = Arc::clone(&self.store);
                let archive_name = archive.to_string();
                let ns = namespace.clone();
                let (pairs, retired) = tokio::task::spawn_blocking(move || {
                    let pairs = store.count_pairs(&ns)?;
                    let record = ArchiveRecord {
                        namespace: ns,
                        published_at: chrono::Utc::now(),
                        entries,
                        pairs,
                    };
                    let retired = store.publish(&archive_name, &record)?;
                    Ok::<_, crate::store::StoreError>((pairs, retired))
                })
                .await??;

                if let Some(retired) = &retired {
                    debug!("Retired namespace {}", retired);
                }

                Ok(BuildReport {
                    archive: archive.to_string(),
                    namespace,
                    retired,
                    entries,
                    pairs,
                    elapsed: start.elapsed(),
                })
            }
            Err(e) => {
                warn!(
                    "Build of {} failed, discarding namespace {}: {}",
                    archive, namespace, e
                );
                let store = Arc::clone(&self.store);
                tokio::task::spawn_blocking(move || store.discard_namespace(&namespace)).await??;
                Err(e)
            }
        }
    }

    /// Write every entry of the stream to `namespace`, returning the entry count.
    async fn populate<S>(&self, namespace: &str, entries: S) -> IndexResult<u64>
    where
        S: Stream<Item = IndexResult<ContentsEntry>> + Send,
    {
        let mut entries = std::pin::pin!(entries);
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut count = 0u64;

        while let Some(entry) = entries.next().await {
            batch.push(entry?);
            count += 1;
            if batch.len() >= self.batch_size {
                self.flush(namespace, std::mem::take(&mut batch)).await?;
                debug!("{}: {} entries written", namespace, count);
            }
        }

        if !batch.is_empty() {
            self.flush(namespace, batch).await?;
        }
        Ok(count)
    }

    async fn flush(&self, namespace: &str, batch: Vec<ContentsEntry>) -> IndexResult<()> {
        let store = Arc::clone(&self.store);
        let namespace = namespace.to_string();
        tokio::task::spawn_blocking(move || store.append(&namespace, &batch)).await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use crate::store::packages;
    use tempfile::TempDir;

    fn entry(path: &str, packages: &[&str]) -> IndexResult<ContentsEntry> {
        Ok(ContentsEntry::new(
            path,
            packages.iter().map(|p| p.to_string()).collect(),
        ))
    }

    fn setup(batch_size: usize) -> (TempDir, Arc<Store>, IndexBuilder) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&temp_dir.path().join("index.redb")).unwrap());
        let builder = IndexBuilder::new(Arc::clone(&store), batch_size);
        (temp_dir, store, builder)
    }

    #[tokio::test]
    async fn test_build_publishes_namespace() {
        let (_dir, store, builder) = setup(2);
        let report = builder
            .build(
                "neon",
                futures::stream::iter(vec![
                    entry("usr/bin/a", &["a"]),
                    entry("usr/bin/b", &["b"]),
                    entry("usr/bin/c", &["c", "c-extra"]),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(report.entries, 3);
        assert_eq!(report.pairs, 4);
        assert_eq!(report.retired, None);
        assert_eq!(store.record("neon").unwrap().unwrap().namespace, report.namespace);
    }

    #[tokio::test]
    async fn test_build_accumulates_across_batches() {
        let (_dir, store, builder) = setup(1);
        builder
            .build(
                "neon",
                futures::stream::iter(vec![
                    entry("usr/bin/foo", &["foo-a"]),
                    entry("usr/bin/bar", &["bar"]),
                    entry("usr/bin/foo", &["foo-b"]),
                ]),
            )
            .await
            .unwrap();

        let table = store.snapshot().unwrap().open_current("neon").unwrap().unwrap();
        assert_eq!(packages(&table, "/usr/bin/foo").unwrap(), vec!["foo-a", "foo-b"]);
    }

    #[tokio::test]
    async fn test_failed_build_keeps_previous_namespace() {
        let (_dir, store, builder) = setup(1);
        let first = builder
            .build("neon", futures::stream::iter(vec![entry("bin/old", &["old"])]))
            .await
            .unwrap();

        let result = builder
            .build(
                "neon",
                futures::stream::iter(vec![
                    entry("bin/new", &["new"]),
                    Err(IndexError::Fetch("connection reset".to_string())),
                    entry("bin/never", &["never"]),
                ]),
            )
            .await;
        assert!(matches!(result, Err(IndexError::Fetch(_))));

        assert_eq!(store.record("neon").unwrap().unwrap().namespace, first.namespace);
        assert_eq!(store.namespaces().unwrap(), vec![first.namespace]);
    }

    #[tokio::test]
    async fn test_rebuild_retires_previous_namespace() {
        let (_dir, store, builder) = setup(10);
        let first = builder
            .build("neon", futures::stream::iter(vec![entry("bin/a", &["a"])]))
            .await
            .unwrap();
        let second = builder
            .build("neon", futures::stream::iter(vec![entry("bin/a", &["a"])]))
            .await
            .unwrap();

        assert_ne!(first.namespace, second.namespace);
        assert_eq!(second.retired, Some(first.namespace));
        assert_eq!(store.namespaces().unwrap(), vec![second.namespace]);
    }
}

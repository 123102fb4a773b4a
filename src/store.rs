//! Persistent path index backed by redb.
//!
//! The database holds one pointer table, `archives`, mapping an archive name
//! to the JSON encoded [`ArchiveRecord`] of its current namespace. Every
//! namespace is a multimap table from absolute path to package name; the
//! values of a key form the (sorted, distinct) package set of that path.
//!
//! Namespaces are written in batches while unpublished and become visible to
//! queries only when [`Store::publish`] swaps the pointer. The superseded
//! namespace is deleted in the same transaction; readers holding an older
//! [`Snapshot`] keep seeing it until they drop their snapshot.

use std::collections::HashSet;
use std::path::Path;

use apt_contents::ContentsEntry;
use chrono::{DateTime, Utc};
use redb::{
    Database, Durability, MultimapTableDefinition, MultimapTableHandle, ReadOnlyMultimapTable,
    ReadTransaction, ReadableMultimapTable, ReadableTable, TableDefinition,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const ARCHIVES: TableDefinition<&str, &[u8]> = TableDefinition::new("archives");

/// A read-only namespace table opened from a [`Snapshot`].
pub type NamespaceTable = ReadOnlyMultimapTable<&'static str, &'static str>;

fn namespace_table(name: &str) -> MultimapTableDefinition<'_, &'static str, &'static str> {
    MultimapTableDefinition::new(name)
}

/// Errors raised by the persistent store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The database could not be opened.
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// A transaction could not be started.
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// A table could not be opened or deleted.
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Reading or writing table data failed.
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    /// A write transaction could not be committed.
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// A pointer record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Pointer record describing the current namespace of an archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// Namespace holding the archive's current index.
    pub namespace: String,
    /// When the namespace was published.
    pub published_at: DateTime<Utc>,
    /// Contents entries ingested.
    pub entries: u64,
    /// Distinct path/package pairs stored.
    pub pairs: u64,
}

fn encode_record(record: &ArchiveRecord) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode_record(bytes: &[u8]) -> StoreResult<ArchiveRecord> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Generate a fresh namespace identifier for an archive.
pub fn new_namespace_id(archive: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}@{}-{}",
        archive,
        Utc::now().format("%Y%m%dT%H%M%S%.6fZ"),
        &suffix[..8]
    )
}

/// The on-disk index.
pub struct Store {
    db: Database,
}

impl Store {
    /// Open (or create) the index at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(path)?;
        let txn = db.begin_write()?;
        txn.open_table(ARCHIVES)?;
        txn.commit()?;

        info!("Opened index database at {}", path.display());
        Ok(Self { db })
    }

    /// Create an empty, unpublished namespace for `archive`.
    pub fn create_namespace(&self, archive: &str) -> StoreResult<String> {
        let namespace = new_namespace_id(archive);
        let mut txn = self.db.begin_write()?;
        txn.set_durability(Durability::None);
        txn.open_multimap_table(namespace_table(&namespace))?;
        txn.commit()?;
        debug!("Created namespace {}", namespace);
        Ok(namespace)
    }

    /// Append a batch of entries to an unpublished namespace.
    ///
    /// A path that already exists accumulates the new packages.
    pub fn append(&self, namespace: &str, entries: &[ContentsEntry]) -> StoreResult<()> {
        let mut txn = self.db.begin_write()?;
        txn.set_durability(Durability::None);
        {
            let mut table = txn.open_multimap_table(namespace_table(namespace))?;
            for entry in entries {
                for package in &entry.packages {
                    table.insert(entry.path.as_str(), package.as_str())?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Count the path/package pairs stored in a namespace.
    pub fn count_pairs(&self, namespace: &str) -> StoreResult<u64> {
        use redb::ReadableTableMetadata;

        let txn = self.db.begin_read()?;
        let table = txn.open_multimap_table(namespace_table(namespace))?;
        Ok(table.len()?)
    }

    /// Make `record.namespace` the current namespace of `archive`.
    ///
    /// Returns the superseded namespace, which is deleted in the same
    /// transaction.
    pub fn publish(&self, archive: &str, record: &ArchiveRecord) -> StoreResult<Option<String>> {
        let txn = self.db.begin_write()?;
        let previous = {
            let mut table = txn.open_table(ARCHIVES)?;
            let previous = table
                .get(archive)?
                .map(|v| decode_record(v.value()))
                .transpose()?;
            let bytes = encode_record(record)?;
            table.insert(archive, bytes.as_slice())?;
            previous
        };

        let retired = match previous {
            Some(previous) if previous.namespace != record.namespace => {
                txn.delete_multimap_table(namespace_table(&previous.namespace))?;
                Some(previous.namespace)
            }
            _ => None,
        };
        txn.commit()?;

        info!(
            "Published namespace {} for {} ({} entries)",
            record.namespace, archive, record.entries
        );
        Ok(retired)
    }

    /// Delete an unpublished namespace.
    pub fn discard_namespace(&self, namespace: &str) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        txn.delete_multimap_table(namespace_table(namespace))?;
        txn.commit()?;
        debug!("Discarded namespace {}", namespace);
        Ok(())
    }

    /// Names of all namespace tables, published or not.
    pub fn namespaces(&self) -> StoreResult<Vec<String>> {
        let txn = self.db.begin_read()?;
        let names = txn
            .list_multimap_tables()?
            .map(|handle| handle.name().to_string())
            .collect();
        Ok(names)
    }

    /// Delete namespaces that no archive points to.
    ///
    /// Must not run concurrently with an ingestion, whose namespace is
    /// unreferenced until published.
    pub fn remove_orphans(&self) -> StoreResult<Vec<String>> {
        let txn = self.db.begin_write()?;
        let referenced: HashSet<String> = {
            let table = txn.open_table(ARCHIVES)?;
            let mut referenced = HashSet::new();
            for item in table.iter()? {
                let (_, value) = item?;
                referenced.insert(decode_record(value.value())?.namespace);
            }
            referenced
        };

        let orphans: Vec<String> = txn
            .list_multimap_tables()?
            .map(|handle| handle.name().to_string())
            .filter(|name| !referenced.contains(name))
            .collect();

        for orphan in &orphans {
            txn.delete_multimap_table(namespace_table(orphan))?;
            info!("Removed orphaned namespace {}", orphan);
        }
        txn.commit()?;
        Ok(orphans)
    }

    /// Open a consistent read-only view of the whole store.
    pub fn snapshot(&self) -> StoreResult<Snapshot> {
        Ok(Snapshot {
            txn: self.db.begin_read()?,
        })
    }

    /// Current pointer record of `archive`, if it has been published.
    pub fn record(&self, archive: &str) -> StoreResult<Option<ArchiveRecord>> {
        self.snapshot()?.record(archive)
    }
}

/// A read transaction over the store.
///
/// Everything read through one snapshot belongs to the same committed state,
/// regardless of publishes that happen while it is open.
pub struct Snapshot {
    txn: ReadTransaction,
}

impl Snapshot {
    /// Names of all archives with a published namespace, sorted.
    pub fn archives(&self) -> StoreResult<Vec<String>> {
        let table = self.txn.open_table(ARCHIVES)?;
        let mut names = Vec::new();
        for item in table.iter()? {
            let (key, _) = item?;
            names.push(key.value().to_string());
        }
        Ok(names)
    }

    /// Pointer record of `archive`.
    pub fn record(&self, archive: &str) -> StoreResult<Option<ArchiveRecord>> {
        let table = self.txn.open_table(ARCHIVES)?;
        let record = table
            .get(archive)?
            .map(|v| decode_record(v.value()))
            .transpose()?;
        Ok(record)
    }

    /// Open the current namespace of `archive`.
    pub fn open_current(&self, archive: &str) -> StoreResult<Option<NamespaceTable>> {
        match self.record(archive)? {
            Some(record) => Ok(Some(
                self.txn
                    .open_multimap_table(namespace_table(&record.namespace))?,
            )),
            None => Ok(None),
        }
    }
}

/// Read the package set stored for `path`.
pub fn packages(table: &NamespaceTable, path: &str) -> StoreResult<Vec<String>> {
    let mut packages = Vec::new();
    for package in table.get(path)? {
        packages.push(package?.value().to_string());
    }
    Ok(packages)
}

//! Async store contract and its `SQLite` implementation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::record::NotificationRecord;

use super::{AppInfo, Storage, StoreStats};

/// An ordered, queryable log of notification records.
///
/// Implementations must make each insert atomic under concurrent writers
/// and must order reads by `timestamp_received` (newest first), not by
/// insertion order.
#[async_trait]
pub trait NotificationStore: Send + Sync + std::fmt::Debug {
    /// Insert a record, returning the assigned id.
    async fn insert(&self, record: NotificationRecord) -> Result<i64>;

    /// All records, newest first.
    async fn query_all(&self) -> Result<Vec<NotificationRecord>>;

    /// Records whose app name, title, text or expanded text contains `term`
    /// (case-insensitive), newest first.
    async fn query_by_substring(&self, term: &str) -> Result<Vec<NotificationRecord>>;

    /// Distinct packages with their display names.
    async fn query_distinct_apps(&self) -> Result<Vec<AppInfo>>;

    /// Delete records received strictly before `cutoff_ms`.
    async fn delete_older_than(&self, cutoff_ms: i64) -> Result<usize>;

    /// Delete every record.
    async fn delete_all(&self) -> Result<usize>;

    /// Number of stored records.
    async fn count(&self) -> Result<i64>;

    /// Subscribe to change notifications.
    ///
    /// The value is a revision counter bumped after every mutation.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// [`NotificationStore`] backed by [`Storage`].
///
/// The connection sits behind a mutex and every operation runs on the
/// blocking thread pool, so callers on the async runtime never wait on disk
/// I/O directly.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    storage: Arc<Mutex<Storage>>,
    revision: Arc<watch::Sender<u64>>,
}

impl SqliteStore {
    /// Wrap an opened storage engine.
    #[must_use]
    pub fn new(storage: Storage) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            storage: Arc::new(Mutex::new(storage)),
            revision: Arc::new(revision),
        }
    }

    /// Open a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Storage::open(path).map(Self::new)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        Storage::open_in_memory().map(Self::new)
    }

    /// Get a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get(&self, id: i64) -> Result<Option<NotificationRecord>> {
        self.with_storage(move |s| s.get(id)).await
    }

    /// Records from one package, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn query_by_package(&self, package_name: &str) -> Result<Vec<NotificationRecord>> {
        let package_name = package_name.to_string();
        self.with_storage(move |s| s.query_by_package(&package_name))
            .await
    }

    /// Records with a detected OTP, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn query_otp(&self) -> Result<Vec<NotificationRecord>> {
        self.with_storage(Storage::query_otp).await
    }

    /// Summary figures over the stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn stats(&self) -> Result<StoreStats> {
        self.with_storage(Storage::stats).await
    }

    async fn with_storage<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Storage) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || {
            let guard = storage
                .lock()
                .map_err(|_| Error::internal("storage mutex poisoned"))?;
            op(&guard)
        })
        .await?
    }

    fn notify_changed(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}

#[async_trait]
impl NotificationStore for SqliteStore {
    async fn insert(&self, record: NotificationRecord) -> Result<i64> {
        let id = self.with_storage(move |s| s.insert(&record)).await?;
        self.notify_changed();
        Ok(id)
    }

    async fn query_all(&self) -> Result<Vec<NotificationRecord>> {
        self.with_storage(Storage::query_all).await
    }

    async fn query_by_substring(&self, term: &str) -> Result<Vec<NotificationRecord>> {
        let term = term.to_string();
        self.with_storage(move |s| s.query_by_substring(&term))
            .await
    }

    async fn query_distinct_apps(&self) -> Result<Vec<AppInfo>> {
        self.with_storage(Storage::query_distinct_apps).await
    }

    async fn delete_older_than(&self, cutoff_ms: i64) -> Result<usize> {
        let deleted = self
            .with_storage(move |s| s.delete_older_than(cutoff_ms))
            .await?;
        if deleted > 0 {
            self.notify_changed();
        }
        Ok(deleted)
    }

    async fn delete_all(&self) -> Result<usize> {
        let deleted = self.with_storage(Storage::delete_all).await?;
        if deleted > 0 {
            self.notify_changed();
        }
        Ok(deleted)
    }

    async fn count(&self) -> Result<i64> {
        self.with_storage(Storage::count).await
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

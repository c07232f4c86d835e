//! Storage layer for notelogger.
//!
//! [`Storage`] is the synchronous `SQLite` engine. [`SqliteStore`] wraps it
//! behind the async [`NotificationStore`] contract the rest of the crate
//! talks to, adding change notification for reactive queries.

pub mod migrations;
pub mod schema;
mod store;

pub use store::{NotificationStore, SqliteStore};

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::record::NotificationRecord;

use schema::RECORD_COLUMNS;

/// A package seen in stored notifications, with its display name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    /// Package identifier.
    pub package_name: String,
    /// Display name recorded at capture time.
    pub app_name: String,
}

/// `SQLite` storage for notification records.
///
/// Records are append-only: there is no update path, and ids come from
/// `AUTOINCREMENT` so they are never reused after deletion.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let mut conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL lets readers proceed while a capture insert is in flight
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&mut conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&mut conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a record, returning its assigned id.
    ///
    /// Any id already set on `record` is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert(&self, record: &NotificationRecord) -> Result<i64> {
        self.conn.execute(
            r"
            INSERT INTO notifications (
                package_name, app_name, notification_id, channel_id,
                title, text, sub_text, big_text, priority, is_ongoing, is_dismissible,
                timestamp_received, timestamp_removed, raw_extras, is_otp, otp_code, category
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            ",
            params![
                record.package_name,
                record.app_name,
                record.notification_id,
                record.channel_id,
                record.title,
                record.text,
                record.sub_text,
                record.big_text,
                record.priority,
                record.is_ongoing,
                record.is_dismissible,
                record.timestamp_received,
                record.timestamp_removed,
                record.raw_extras,
                record.is_otp,
                record.otp_code,
                record.category,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(id, package = %record.package_name, "Inserted notification");
        Ok(id)
    }

    /// Get a record by its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, id: i64) -> Result<Option<NotificationRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM notifications WHERE id = ?1");
        let record = self
            .conn
            .query_row(&sql, [id], Self::row_to_record)
            .optional()?;
        Ok(record)
    }

    /// All records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn query_all(&self) -> Result<Vec<NotificationRecord>> {
        self.query_records("", [])
    }

    /// Records whose app name, title, text or expanded text contains `term`,
    /// ignoring ASCII case, newest first.
    ///
    /// `%`, `_` and `\` in `term` match literally. Non-ASCII letters must
    /// match case exactly, unlike [`NotificationRecord::content_contains`].
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn query_by_substring(&self, term: &str) -> Result<Vec<NotificationRecord>> {
        let pattern = format!("%{}%", escape_like(term));
        self.query_records(
            r"WHERE app_name LIKE ?1 ESCAPE '\'
                OR title LIKE ?1 ESCAPE '\'
                OR text LIKE ?1 ESCAPE '\'
                OR big_text LIKE ?1 ESCAPE '\'",
            [pattern],
        )
    }

    /// Records from one package, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn query_by_package(&self, package_name: &str) -> Result<Vec<NotificationRecord>> {
        self.query_records("WHERE package_name = ?1", [package_name])
    }

    /// Records with a detected OTP, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn query_otp(&self) -> Result<Vec<NotificationRecord>> {
        self.query_records("WHERE is_otp = 1", [])
    }

    fn query_records<P: rusqlite::Params>(
        &self,
        filter: &str,
        params: P,
    ) -> Result<Vec<NotificationRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM notifications {filter} \
             ORDER BY timestamp_received DESC, id DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params, Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Distinct `(package, app name)` pairs, ordered by app name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn query_distinct_apps(&self) -> Result<Vec<AppInfo>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT DISTINCT package_name, app_name FROM notifications
            ORDER BY app_name COLLATE NOCASE, package_name
            ",
        )?;
        let apps = stmt
            .query_map([], |row| {
                Ok(AppInfo {
                    package_name: row.get(0)?,
                    app_name: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(apps)
    }

    /// Delete every record received strictly before `cutoff_ms`.
    ///
    /// Returns the number of records deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_older_than(&self, cutoff_ms: i64) -> Result<usize> {
        let affected = self.conn.execute(
            "DELETE FROM notifications WHERE timestamp_received < ?1",
            [cutoff_ms],
        )?;

        if affected > 0 {
            info!("Deleted {} notifications older than {}", affected, cutoff_ms);
        }
        Ok(affected)
    }

    /// Delete every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_all(&self) -> Result<usize> {
        let affected = self.conn.execute("DELETE FROM notifications", [])?;
        info!("Deleted all {} notifications", affected);
        Ok(affected)
    }

    /// Count stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM notifications", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let (total, otp_count, distinct_apps, oldest, newest): (
            i64,
            i64,
            i64,
            Option<i64>,
            Option<i64>,
        ) = self.conn.query_row(
            r"
            SELECT COUNT(*),
                   COALESCE(SUM(is_otp), 0),
                   COUNT(DISTINCT package_name),
                   MIN(timestamp_received),
                   MAX(timestamp_received)
            FROM notifications
            ",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StoreStats {
            total,
            otp_count,
            distinct_apps,
            oldest_received: oldest,
            newest_received: newest,
            db_size_bytes,
        })
    }

    /// Convert a database row to a record.
    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<NotificationRecord> {
        Ok(NotificationRecord {
            id: Some(row.get(0)?),
            package_name: row.get(1)?,
            app_name: row.get(2)?,
            notification_id: row.get(3)?,
            channel_id: row.get(4)?,
            title: row.get(5)?,
            text: row.get(6)?,
            sub_text: row.get(7)?,
            big_text: row.get(8)?,
            priority: row.get(9)?,
            is_ongoing: row.get(10)?,
            is_dismissible: row.get(11)?,
            timestamp_received: row.get(12)?,
            timestamp_removed: row.get(13)?,
            raw_extras: row.get(14)?,
            is_otp: row.get(15)?,
            otp_code: row.get(16)?,
            category: row.get(17)?,
        })
    }
}

/// Escape `LIKE` wildcards so `term` matches literally.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Summary figures over the stored notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Total number of records.
    pub total: i64,
    /// Records with a detected OTP.
    pub otp_count: i64,
    /// Number of distinct packages.
    pub distinct_apps: i64,
    /// Oldest capture time (Unix ms).
    pub oldest_received: Option<i64>,
    /// Newest capture time (Unix ms).
    pub newest_received: Option<i64>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::classifier::OtpDetector;
    use crate::record::{NotificationEvent, EXTRA_BIG_TEXT, EXTRA_TEXT, EXTRA_TITLE};

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    /// Build a record the way the capture pipeline would.
    pub(crate) fn make_record(
        package: &str,
        title: &str,
        text: &str,
        received: i64,
    ) -> NotificationRecord {
        let event = NotificationEvent::new(package, 1)
            .with_text_extra(EXTRA_TITLE, title)
            .with_text_extra(EXTRA_TEXT, text);
        let otp = OtpDetector::new().detect(Some(&format!("{title} {text} null")));
        NotificationRecord::from_event(&event, package.to_string(), otp, received)
    }

    #[test]
    fn test_open_in_memory() {
        assert!(Storage::open_in_memory().is_ok());
    }

    #[test]
    fn test_insert_and_get() {
        let storage = create_test_storage();
        let record = make_record("com.bank", "Bank", "Your OTP is 4821", 1_000);

        let id = storage.insert(&record).unwrap();
        let retrieved = storage.get(id).unwrap().unwrap();

        assert_eq!(retrieved.id, Some(id));
        assert_eq!(retrieved.title.as_deref(), Some("Bank"));
        assert!(retrieved.is_otp);
        assert_eq!(retrieved.otp_code.as_deref(), Some("4821"));
        assert_eq!(NotificationRecord { id: None, ..retrieved }, record);
    }

    #[test]
    fn test_get_nonexistent() {
        let storage = create_test_storage();
        assert!(storage.get(99_999).unwrap().is_none());
    }

    #[test]
    fn test_ids_are_not_reused() {
        let storage = create_test_storage();
        let first = storage.insert(&make_record("a", "t", "x", 1)).unwrap();
        storage.delete_all().unwrap();
        let second = storage.insert(&make_record("a", "t", "x", 2)).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_query_all_orders_by_received_not_insertion() {
        let storage = create_test_storage();
        storage.insert(&make_record("a", "middle", "", 2_000)).unwrap();
        storage.insert(&make_record("a", "newest", "", 3_000)).unwrap();
        storage.insert(&make_record("a", "oldest", "", 1_000)).unwrap();

        let titles: Vec<_> = storage
            .query_all()
            .unwrap()
            .into_iter()
            .map(|r| r.title.unwrap())
            .collect();
        assert_eq!(titles, vec!["newest", "middle", "oldest"]);
    }

    #[test]
    fn test_query_by_substring_fields_and_case() {
        let storage = create_test_storage();
        storage.insert(&make_record("com.mail", "Invoice ready", "", 1)).unwrap();
        storage.insert(&make_record("com.chat", "Ann", "see the INVOICE", 2)).unwrap();
        let mut big = make_record("com.news", "Headlines", "", 3);
        big.big_text = Some("full invoice story".to_string());
        storage.insert(&big).unwrap();
        storage.insert(&make_record("com.other", "Nothing", "here", 4)).unwrap();

        let results = storage.query_by_substring("invoice").unwrap();
        let packages: Vec<_> = results.iter().map(|r| r.package_name.as_str()).collect();
        assert_eq!(packages, vec!["com.news", "com.chat", "com.mail"]);
    }

    #[test]
    fn test_query_by_substring_matches_app_name() {
        let storage = create_test_storage();
        let mut record = make_record("com.whatsapp", "Ann", "hi", 1);
        record.app_name = "WhatsApp".to_string();
        storage.insert(&record).unwrap();

        assert_eq!(storage.query_by_substring("whatsapp").unwrap().len(), 1);
    }

    #[test]
    fn test_query_by_substring_ignores_sub_text() {
        let storage = create_test_storage();
        let event = NotificationEvent::new("pkg", 1)
            .with_text_extra(crate::record::EXTRA_SUB_TEXT, "secret");
        let record = NotificationRecord::from_event(
            &event,
            "pkg".into(),
            crate::classifier::OtpMatch::none(),
            1,
        );
        storage.insert(&record).unwrap();

        assert!(storage.query_by_substring("secret").unwrap().is_empty());
    }

    #[test]
    fn test_query_by_substring_wildcards_are_literal() {
        let storage = create_test_storage();
        storage.insert(&make_record("a", "50% off", "", 1)).unwrap();
        storage.insert(&make_record("a", "500 off", "", 2)).unwrap();

        let results = storage.query_by_substring("50%").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title.as_deref(), Some("50% off"));

        assert!(storage.query_by_substring("_").unwrap().is_empty());
    }

    #[test]
    fn test_query_by_package() {
        let storage = create_test_storage();
        storage.insert(&make_record("com.a", "A", "", 1)).unwrap();
        storage.insert(&make_record("com.b", "B", "", 2)).unwrap();

        let results = storage.query_by_package("com.a").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].package_name, "com.a");
    }

    #[test]
    fn test_query_otp() {
        let storage = create_test_storage();
        storage.insert(&make_record("com.bank", "Bank", "OTP 4821", 1)).unwrap();
        storage.insert(&make_record("com.chat", "Ann", "lunch?", 2)).unwrap();

        let results = storage.query_otp().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].package_name, "com.bank");
    }

    #[test]
    fn test_query_distinct_apps() {
        let storage = create_test_storage();
        let mut a = make_record("com.zeta", "x", "", 1);
        a.app_name = "Zeta".to_string();
        let mut b = make_record("com.alpha", "x", "", 2);
        b.app_name = "alpha".to_string();
        storage.insert(&a).unwrap();
        storage.insert(&a).unwrap();
        storage.insert(&b).unwrap();

        let apps = storage.query_distinct_apps().unwrap();
        assert_eq!(
            apps,
            vec![
                AppInfo {
                    package_name: "com.alpha".into(),
                    app_name: "alpha".into()
                },
                AppInfo {
                    package_name: "com.zeta".into(),
                    app_name: "Zeta".into()
                },
            ]
        );
    }

    #[test]
    fn test_delete_older_than_is_strict() {
        let storage = create_test_storage();
        storage.insert(&make_record("a", "older", "", 999)).unwrap();
        storage.insert(&make_record("a", "at cutoff", "", 1_000)).unwrap();
        storage.insert(&make_record("a", "newer", "", 1_001)).unwrap();

        let deleted = storage.delete_older_than(1_000).unwrap();
        assert_eq!(deleted, 1);

        let titles: Vec<_> = storage
            .query_all()
            .unwrap()
            .into_iter()
            .map(|r| r.title.unwrap())
            .collect();
        assert_eq!(titles, vec!["newer", "at cutoff"]);
    }

    #[test]
    fn test_delete_all_and_count() {
        let storage = create_test_storage();
        assert_eq!(storage.count().unwrap(), 0);

        storage.insert(&make_record("a", "1", "", 1)).unwrap();
        storage.insert(&make_record("a", "2", "", 2)).unwrap();
        assert_eq!(storage.count().unwrap(), 2);

        assert_eq!(storage.delete_all().unwrap(), 2);
        assert_eq!(storage.count().unwrap(), 0);
    }

    #[test]
    fn test_stats_empty() {
        let stats = create_test_storage().stats().unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.otp_count, 0);
        assert!(stats.oldest_received.is_none());
        assert!(stats.newest_received.is_none());
    }

    #[test]
    fn test_stats_with_data() {
        let storage = create_test_storage();
        storage.insert(&make_record("com.bank", "Bank", "OTP 4821", 10)).unwrap();
        storage.insert(&make_record("com.chat", "Ann", "hello", 20)).unwrap();
        storage.insert(&make_record("com.chat", "Ann", "again", 30)).unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.otp_count, 1);
        assert_eq!(stats.distinct_apps, 2);
        assert_eq!(stats.oldest_received, Some(10));
        assert_eq!(stats.newest_received, Some(30));
    }

    #[test]
    fn test_big_text_round_trip() {
        let storage = create_test_storage();
        let event = NotificationEvent::new("pkg", 9)
            .with_text_extra(EXTRA_BIG_TEXT, "Long \"quoted\" body, with commas");
        let record =
            NotificationRecord::from_event(&event, "pkg".into(), crate::classifier::OtpMatch::none(), 5);
        let id = storage.insert(&record).unwrap();

        let retrieved = storage.get(id).unwrap().unwrap();
        assert_eq!(
            retrieved.big_text.as_deref(),
            Some("Long \"quoted\" body, with commas")
        );
        assert_eq!(retrieved.raw_extras, record.raw_extras);
    }

    #[test]
    fn test_open_file_based_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("notifications.db");

        let storage = Storage::open(&db_path).unwrap();
        storage.insert(&make_record("a", "t", "", 1)).unwrap();

        assert!(db_path.exists());
        assert_eq!(storage.path(), db_path);
        assert_eq!(storage.count().unwrap(), 1);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("50%_\\"), "50\\%\\_\\\\");
    }

    #[test]
    fn test_search_folds_ascii_case_only() {
        let storage = Storage::open_in_memory().unwrap();
        let record = make_record("com.power", "Énergie bill", "due", 1);
        storage.insert(&record).unwrap();

        assert_eq!(storage.query_by_substring("BILL").unwrap().len(), 1);
        assert_eq!(storage.query_by_substring("Énergie").unwrap().len(), 1);
        assert!(storage.query_by_substring("énergie").unwrap().is_empty());

        // Keyword highlighting folds the same term.
        assert!(record.content_contains("énergie"));
    }
}

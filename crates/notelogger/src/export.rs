//! Export of stored notifications to CSV or JSON files.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::NotificationRecord;
use crate::storage::NotificationStore;

/// Header row of the CSV export.
pub const CSV_HEADER: &str = "ID,App Name,Package Name,Title,Text,Big Text,Sub Text,Channel ID,\
Priority,Category,Is OTP,OTP Code,Is Ongoing,Is Dismissible,Timestamp Received,Timestamp Removed";

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Comma-separated values with a header row.
    Csv,
    /// A pretty-printed JSON array.
    Json,
}

impl ExportFormat {
    /// File extension, without the dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Progress of the most recent export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExportStatus {
    /// No export has run since the last reset.
    #[default]
    Idle,
    /// An export is running.
    Loading,
    /// The export file was written.
    Success {
        /// Path of the written file.
        path: PathBuf,
        /// Number of records written.
        count: usize,
    },
    /// The export failed.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

/// A completed export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exported {
    /// Path of the written file.
    pub path: PathBuf,
    /// Number of records written.
    pub count: usize,
}

/// Writes every stored record to a timestamped file.
#[derive(Debug, Clone)]
pub struct Exporter {
    store: Arc<dyn NotificationStore>,
    directory: PathBuf,
    status: Arc<watch::Sender<ExportStatus>>,
}

impl Exporter {
    /// Create an exporter writing into `directory`.
    #[must_use]
    pub fn new(store: Arc<dyn NotificationStore>, directory: impl Into<PathBuf>) -> Self {
        let (status, _) = watch::channel(ExportStatus::Idle);
        Self {
            store,
            directory: directory.into(),
            status: Arc::new(status),
        }
    }

    /// The directory export files are written to.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ExportStatus> {
        self.status.subscribe()
    }

    /// The current status.
    #[must_use]
    pub fn status(&self) -> ExportStatus {
        self.status.borrow().clone()
    }

    /// Return the status to [`ExportStatus::Idle`].
    pub fn reset(&self) {
        self.status.send_replace(ExportStatus::Idle);
    }

    /// Export every stored record, naming the file after the current
    /// local time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NothingToExport`] if the store is empty, or an error
    /// if the store cannot be read or the file cannot be written. The
    /// status reflects the same outcome.
    pub async fn export(&self, format: ExportFormat) -> Result<Exported> {
        self.export_at(format, Local::now()).await
    }

    /// Export every stored record, naming the file after `at`.
    ///
    /// # Errors
    ///
    /// See [`Exporter::export`].
    pub async fn export_at(&self, format: ExportFormat, at: DateTime<Local>) -> Result<Exported> {
        self.status.send_replace(ExportStatus::Loading);

        let result = self.write_export(format, at).await;
        let status = match &result {
            Ok(done) => {
                info!(path = %done.path.display(), count = done.count, %format, "Export written");
                ExportStatus::Success {
                    path: done.path.clone(),
                    count: done.count,
                }
            }
            Err(e) => {
                warn!(error = %e, %format, "Export failed");
                ExportStatus::Error {
                    message: e.to_string(),
                }
            }
        };
        self.status.send_replace(status);
        result
    }

    async fn write_export(&self, format: ExportFormat, at: DateTime<Local>) -> Result<Exported> {
        let records = self.store.query_all().await?;
        if records.is_empty() {
            return Err(Error::NothingToExport);
        }

        let body = match format {
            ExportFormat::Csv => encode_csv(&records),
            ExportFormat::Json => encode_json(&records)?,
        };

        let path = self.directory.join(export_file_name(format, at));
        let count = records.len();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, body.as_bytes()))
            .await
            .map_err(|e| export_task_failed(&path, &e))??;

        Ok(Exported { path, count })
    }
}

/// File name for an export taken at `at`, e.g. `notifications_20240115_093000.csv`.
#[must_use]
pub fn export_file_name(format: ExportFormat, at: DateTime<Local>) -> String {
    format!(
        "notifications_{}.{}",
        at.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

/// Encode records as CSV, one row per record after the header.
#[must_use]
pub fn encode_csv(records: &[NotificationRecord]) -> String {
    let mut out = String::with_capacity(CSV_HEADER.len() + records.len() * 128);
    out.push_str(CSV_HEADER);
    out.push('\n');

    for r in records {
        // Writing to a String cannot fail.
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            r.id.map(|id| id.to_string()).unwrap_or_default(),
            quote(Some(r.app_name.as_str())),
            quote(Some(r.package_name.as_str())),
            quote(r.title.as_deref()),
            quote(r.text.as_deref()),
            quote(r.big_text.as_deref()),
            quote(r.sub_text.as_deref()),
            quote(r.channel_id.as_deref()),
            r.priority,
            quote(r.category.as_deref()),
            r.is_otp,
            quote(r.otp_code.as_deref()),
            r.is_ongoing,
            r.is_dismissible,
            r.timestamp_received,
            r.timestamp_removed.map(|t| t.to_string()).unwrap_or_default(),
        );
    }
    out
}

/// Encode records as a pretty-printed JSON array.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_json(records: &[NotificationRecord]) -> Result<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

/// The error for an export write task that panicked or was cancelled.
fn export_task_failed(path: &Path, err: &JoinError) -> Error {
    Error::ExportWrite {
        path: path.to_path_buf(),
        source: std::io::Error::other(format!("export task failed: {err}")),
    }
}

/// Double-quote a text field, doubling embedded quotes. Absent is `""`.
fn quote(value: Option<&str>) -> String {
    format!("\"{}\"", value.unwrap_or_default().replace('"', "\"\""))
}

/// Write `contents` to a temporary sibling of `path`, then rename it into
/// place. The temporary file is removed if any step fails.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let written = std::fs::write(&temp_path, contents).and_then(|()| std::fs::rename(&temp_path, path));
    if let Err(source) = written {
        if temp_path.exists() {
            if let Err(e) = std::fs::remove_file(&temp_path) {
                debug!(path = %temp_path.display(), error = %e, "Could not remove temp file");
            }
        }
        return Err(Error::ExportWrite {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::make_record;
    use crate::storage::SqliteStore;
    use chrono::TimeZone;

    /// Minimal RFC 4180 reader for checking exported files.
    fn parse_csv(input: &str) -> Vec<Vec<String>> {
        let mut rows = Vec::new();
        let mut row = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;
        let mut chars = input.chars().peekable();

        while let Some(c) = chars.next() {
            match (c, in_quotes) {
                ('"', true) if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                ('"', true) => in_quotes = false,
                ('"', false) => in_quotes = true,
                (',', false) => row.push(std::mem::take(&mut field)),
                ('\n', false) => {
                    row.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut row));
                }
                (c, _) => field.push(c),
            }
        }
        if !field.is_empty() || !row.is_empty() {
            row.push(field);
            rows.push(row);
        }
        rows
    }

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_export_file_name() {
        assert_eq!(
            export_file_name(ExportFormat::Csv, at()),
            "notifications_20240115_093000.csv"
        );
        assert_eq!(
            export_file_name(ExportFormat::Json, at()),
            "notifications_20240115_093000.json"
        );
    }

    #[test]
    fn test_header_has_sixteen_columns() {
        assert_eq!(CSV_HEADER.split(',').count(), 16);
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote(None), "\"\"");
        assert_eq!(quote(Some("a\"b")), "\"a\"\"b\"");
    }

    #[test]
    fn test_csv_round_trip_with_quotes_and_commas() {
        let mut record = make_record("com.chat", "He said \"hi\", then left", "line one\nline two", 42);
        record.id = Some(7);

        let rows = parse_csv(&encode_csv(&[record]));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 16);
        assert_eq!(rows[1].len(), 16);

        let row = &rows[1];
        assert_eq!(row[0], "7");
        assert_eq!(row[1], "com.chat");
        assert_eq!(row[3], "He said \"hi\", then left");
        assert_eq!(row[4], "line one\nline two");
        assert_eq!(row[5], "");
        assert_eq!(row[10], "false");
        assert_eq!(row[14], "42");
        assert_eq!(row[15], "");
    }

    /// Column values a CSV reader should recover for `r`.
    fn expected_row(r: &NotificationRecord) -> Vec<String> {
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        vec![
            r.id.map(|id| id.to_string()).unwrap_or_default(),
            r.app_name.clone(),
            r.package_name.clone(),
            text(&r.title),
            text(&r.text),
            text(&r.big_text),
            text(&r.sub_text),
            text(&r.channel_id),
            r.priority.to_string(),
            text(&r.category),
            r.is_otp.to_string(),
            text(&r.otp_code),
            r.is_ongoing.to_string(),
            r.is_dismissible.to_string(),
            r.timestamp_received.to_string(),
            r.timestamp_removed.map(|t| t.to_string()).unwrap_or_default(),
        ]
    }

    #[tokio::test]
    async fn test_csv_round_trip_every_column() {
        let store = SqliteStore::open_in_memory().unwrap();

        let mut first = make_record("com.bank", "Bank, \"secure\"", "Your OTP is 4821", 100);
        first.app_name = "My \"Bank\", Inc".to_string();
        first.sub_text = Some("acct, ending 12".to_string());
        first.channel_id = Some("otp,alerts".to_string());
        first.category = Some("msg".to_string());
        first.priority = -2;
        first.is_ongoing = true;
        first.is_dismissible = false;
        first.timestamp_removed = Some(150);

        let mut second = make_record("com.chat", "Ann", "line one\nline \"two\"", 200);
        second.big_text = Some("a,b\n\"c\"\n".to_string());
        second.priority = 2;

        let third = make_record("com.mail", "", "", 300);

        for record in [first, second, third] {
            store.insert(record).await.unwrap();
        }
        let records = store.query_all().await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[2].is_otp);

        let rows = parse_csv(&encode_csv(&records));
        assert_eq!(rows.len(), records.len() + 1);
        assert_eq!(rows[0].join(","), CSV_HEADER);
        for (row, record) in rows[1..].iter().zip(&records) {
            assert_eq!(row, &expected_row(record));
        }

        let oldest = &rows[3];
        assert_eq!(oldest[1], "My \"Bank\", Inc");
        assert_eq!(oldest[3], "Bank, \"secure\"");
        assert_eq!(oldest[8], "-2");
        assert_eq!(oldest[11], "4821");
        assert_eq!(oldest[12], "true");
        assert_eq!(oldest[13], "false");
        assert_eq!(oldest[15], "150");
        assert_eq!(rows[2][5], "a,b\n\"c\"\n");
    }

    #[test]
    fn test_csv_otp_columns() {
        let record = make_record("com.bank", "Bank", "OTP 4821", 1);
        let rows = parse_csv(&encode_csv(&[record]));
        assert_eq!(rows[1][10], "true");
        assert_eq!(rows[1][11], "4821");
    }

    #[test]
    fn test_json_uses_export_field_names() {
        let json = encode_json(&[make_record("com.bank", "Bank", "OTP 4821", 1)]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let first = &value[0];
        assert_eq!(first["packageName"], "com.bank");
        assert_eq!(first["isOTP"], true);
        assert_eq!(first["otpCode"], "4821");
        assert_eq!(first["timestampReceived"], 1);
    }

    #[tokio::test]
    async fn test_export_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let exporter = Exporter::new(Arc::new(store), dir.path());

        let err = exporter.export(ExportFormat::Csv).await.unwrap_err();
        assert!(err.is_nothing_to_export());
        assert_eq!(
            exporter.status(),
            ExportStatus::Error {
                message: "No notifications to export".to_string()
            }
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        exporter.reset();
        assert_eq!(exporter.status(), ExportStatus::Idle);
    }

    #[tokio::test]
    async fn test_export_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(make_record("a", "one", "", 1)).await.unwrap();
        store.insert(make_record("b", "two", "", 2)).await.unwrap();

        let exporter = Exporter::new(Arc::new(store), dir.path().join("exports"));
        let mut status = exporter.subscribe();

        let done = exporter.export_at(ExportFormat::Json, at()).await.unwrap();
        assert_eq!(done.count, 2);
        assert_eq!(
            done.path,
            dir.path().join("exports").join("notifications_20240115_093000.json")
        );
        assert!(status.has_changed().unwrap());
        assert_eq!(
            *status.borrow_and_update(),
            ExportStatus::Success {
                path: done.path.clone(),
                count: 2
            }
        );

        let written: Vec<NotificationRecord> =
            serde_json::from_str(&std::fs::read_to_string(&done.path).unwrap()).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].title.as_deref(), Some("two"));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("exports"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_export_write_failure_sets_error_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(make_record("a", "one", "", 1)).await.unwrap();

        // The export file name is already taken by a non-empty directory.
        let taken = dir.path().join(export_file_name(ExportFormat::Csv, at()));
        std::fs::create_dir(&taken).unwrap();
        std::fs::write(taken.join("keep"), b"x").unwrap();

        let exporter = Exporter::new(Arc::new(store), dir.path());
        let err = exporter.export_at(ExportFormat::Csv, at()).await.unwrap_err();
        assert!(matches!(err, Error::ExportWrite { ref path, .. } if *path == taken));

        match exporter.status() {
            ExportStatus::Error { message } => {
                assert!(message.starts_with("failed to write export file"));
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_export_task_failure_is_an_export_error() {
        let task = tokio::spawn(std::future::pending::<()>());
        task.abort();
        let join_err = task.await.unwrap_err();

        let err = export_task_failed(Path::new("/out/notifications.csv"), &join_err);
        assert!(matches!(err, Error::ExportWrite { .. }));
        let msg = err.to_string();
        assert!(msg.contains("/out/notifications.csv"));
        assert!(msg.contains("export task failed"));
        assert!(!msg.contains("storage task"));
    }

    #[test]
    fn test_write_atomic_failure_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the target file should go makes the rename fail.
        let target = dir.path().join("taken");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), b"x").unwrap();

        let err = write_atomic(&target, b"data").unwrap_err();
        assert!(matches!(err, Error::ExportWrite { .. }));
        assert!(!dir.path().join("taken.tmp").exists());
    }
}

//! `SQLite` schema definitions for notelogger.

/// SQL statement to create the notifications table.
pub const CREATE_NOTIFICATIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    package_name TEXT NOT NULL,
    app_name TEXT NOT NULL,
    notification_id INTEGER NOT NULL,
    channel_id TEXT,
    title TEXT,
    text TEXT,
    sub_text TEXT,
    big_text TEXT,
    priority INTEGER NOT NULL,
    is_ongoing INTEGER NOT NULL,
    is_dismissible INTEGER NOT NULL,
    timestamp_received INTEGER NOT NULL,
    timestamp_removed INTEGER,
    raw_extras TEXT,
    is_otp INTEGER NOT NULL DEFAULT 0,
    otp_code TEXT,
    category TEXT
)
";

/// Index backing the newest-first listing.
pub const CREATE_RECEIVED_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_notifications_received
ON notifications(timestamp_received DESC)
";

/// Index for per-package queries and the distinct app listing.
pub const CREATE_PACKAGE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_notifications_package ON notifications(package_name)
";

/// Partial index over OTP notifications.
pub const CREATE_OTP_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_notifications_otp
ON notifications(timestamp_received DESC) WHERE is_otp = 1
";

/// Statements that make up schema version 1.
pub const V1_STATEMENTS: &[&str] = &[
    CREATE_NOTIFICATIONS_TABLE,
    CREATE_RECEIVED_INDEX,
    CREATE_PACKAGE_INDEX,
    CREATE_OTP_INDEX,
];

/// Column list shared by every record query, in `row_to_record` order.
pub const RECORD_COLUMNS: &str = "id, package_name, app_name, notification_id, channel_id, \
     title, text, sub_text, big_text, priority, is_ongoing, is_dismissible, \
     timestamp_received, timestamp_removed, raw_extras, is_otp, otp_code, category";

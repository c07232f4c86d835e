//! Core notification types for notelogger.
//!
//! [`NotificationEvent`] is what the host delivers; [`NotificationRecord`]
//! is the canonical, immutable row the capture pipeline builds from it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::OtpMatch;

/// Host flag bit set on notifications for ongoing activity.
pub const FLAG_ONGOING_EVENT: u32 = 0x0000_0002;

/// Host flag bit set on notifications the user cannot clear.
pub const FLAG_NO_CLEAR: u32 = 0x0000_0020;

/// Extra key holding the notification title.
pub const EXTRA_TITLE: &str = "android.title";

/// Extra key holding the notification body text.
pub const EXTRA_TEXT: &str = "android.text";

/// Extra key holding the notification sub text.
pub const EXTRA_SUB_TEXT: &str = "android.subText";

/// Extra key holding the expanded ("big") text.
pub const EXTRA_BIG_TEXT: &str = "android.bigText";

/// A value stored in a notification's extras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtraValue {
    /// A text value.
    Text(String),
    /// A boolean value.
    Bool(bool),
    /// An integer value.
    Int(i64),
    /// A floating point value.
    Float(f64),
    /// A list of text values.
    TextList(Vec<String>),
    /// A structured value the host could not render as text (bitmaps,
    /// parcelables, nested bundles).
    Opaque(serde_json::Value),
}

impl ExtraValue {
    /// Render the value as text, or `None` when it has no textual form.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Int(n) => Some(n.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::TextList(items) => Some(format!("[{}]", items.join(", "))),
            Self::Opaque(_) => None,
        }
    }
}

/// Extras attached to a notification, keyed by name.
pub type Extras = BTreeMap<String, ExtraValue>;

/// A notification-posted (or removed) event delivered by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Package identifier of the posting application.
    pub package_name: String,
    /// Host-assigned notification id.
    pub notification_id: i32,
    /// Notification channel, if any.
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Extras bundle.
    #[serde(default)]
    pub extras: Extras,
    /// Host priority in `-2..=2`.
    #[serde(default)]
    pub priority: i32,
    /// Host flag bitmask.
    #[serde(default)]
    pub flags: u32,
    /// Host category, if any.
    #[serde(default)]
    pub category: Option<String>,
}

impl NotificationEvent {
    /// Create an event with no extras, flags or metadata.
    #[must_use]
    pub fn new(package_name: impl Into<String>, notification_id: i32) -> Self {
        Self {
            package_name: package_name.into(),
            notification_id,
            channel_id: None,
            extras: Extras::new(),
            priority: 0,
            flags: 0,
            category: None,
        }
    }

    /// Add an extra.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: ExtraValue) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    /// Add a text extra.
    #[must_use]
    pub fn with_text_extra(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_extra(key, ExtraValue::Text(value.into()))
    }

    /// Set the flag bitmask.
    #[must_use]
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the channel id.
    #[must_use]
    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    /// Set the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Get a text extra. Non-text values count as absent.
    #[must_use]
    pub fn text_extra(&self, key: &str) -> Option<&str> {
        match self.extras.get(key) {
            Some(ExtraValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Whether the ongoing flag is set.
    #[must_use]
    pub fn is_ongoing(&self) -> bool {
        self.flags & FLAG_ONGOING_EVENT != 0
    }

    /// Whether the user can dismiss the notification.
    #[must_use]
    pub fn is_dismissible(&self) -> bool {
        self.flags & FLAG_NO_CLEAR == 0
    }

    /// Flatten every textual extra into a JSON object string.
    ///
    /// Extras without a textual form are skipped.
    #[must_use]
    pub fn flatten_extras(&self) -> Option<String> {
        let flat: BTreeMap<&str, String> = self
            .extras
            .iter()
            .filter_map(|(k, v)| v.to_text().map(|text| (k.as_str(), text)))
            .collect();
        serde_json::to_string(&flat).ok()
    }
}

/// A stored notification.
///
/// Records are immutable once stored. `is_otp` is true exactly when
/// `otp_code` is set; [`NotificationRecord::from_event`] guarantees this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    /// Identifier assigned by the store (`None` before insertion).
    pub id: Option<i64>,
    /// Package identifier of the posting application.
    pub package_name: String,
    /// Display name of the posting application.
    pub app_name: String,
    /// Host-assigned notification id.
    pub notification_id: i32,
    /// Notification channel.
    pub channel_id: Option<String>,
    /// Title.
    pub title: Option<String>,
    /// Body text.
    pub text: Option<String>,
    /// Sub text.
    pub sub_text: Option<String>,
    /// Expanded text.
    pub big_text: Option<String>,
    /// Host priority.
    pub priority: i32,
    /// Ongoing activity flag.
    pub is_ongoing: bool,
    /// Whether the user could dismiss it.
    pub is_dismissible: bool,
    /// Capture time in Unix milliseconds.
    pub timestamp_received: i64,
    /// Removal time in Unix milliseconds (not recorded yet).
    pub timestamp_removed: Option<i64>,
    /// JSON snapshot of the textual extras.
    pub raw_extras: Option<String>,
    /// Whether an OTP was detected.
    #[serde(rename = "isOTP")]
    pub is_otp: bool,
    /// The detected OTP.
    pub otp_code: Option<String>,
    /// Host category.
    pub category: Option<String>,
}

impl NotificationRecord {
    /// Build the canonical record for a captured event.
    #[must_use]
    pub fn from_event(
        event: &NotificationEvent,
        app_name: String,
        otp: OtpMatch,
        timestamp_received: i64,
    ) -> Self {
        let is_otp = otp.is_otp();
        Self {
            id: None,
            package_name: event.package_name.clone(),
            app_name,
            notification_id: event.notification_id,
            channel_id: event.channel_id.clone(),
            title: event.text_extra(EXTRA_TITLE).map(str::to_string),
            text: event.text_extra(EXTRA_TEXT).map(str::to_string),
            sub_text: event.text_extra(EXTRA_SUB_TEXT).map(str::to_string),
            big_text: event.text_extra(EXTRA_BIG_TEXT).map(str::to_string),
            priority: event.priority,
            is_ongoing: event.is_ongoing(),
            is_dismissible: event.is_dismissible(),
            timestamp_received,
            timestamp_removed: None,
            raw_extras: event.flatten_extras(),
            is_otp,
            otp_code: otp.into_code(),
            category: event.category.clone(),
        }
    }

    /// Capture time as a `DateTime`.
    #[must_use]
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_received)
    }

    /// Whether `term` appears, ignoring case, in the title, text or
    /// expanded text.
    ///
    /// Case folding here is full Unicode, while store search folds ASCII
    /// only, so a keyword like `énergie` highlights `Énergie` even though
    /// searching for it does not find that record.
    #[must_use]
    pub fn content_contains(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        [&self.title, &self.text, &self.big_text]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&term))
    }
}

//! `notelogger` - A searchable notification history with one-time-passcode detection
//!
//! Host notification events flow through the [`capture`] pipeline, are
//! classified for OTP content by the [`classifier`], stored by [`storage`],
//! filtered by the user's [`rules`], and surfaced through the reactive
//! [`query`] coordinator and the [`export`] serializer.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod capture;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod preferences;
pub mod query;
pub mod record;
pub mod rules;
pub mod storage;

pub use capture::{CapturePipeline, CaptureOutcome, CaptureStats, HostEvent};
pub use classifier::{OtpDetector, OtpMatch};
pub use config::Config;
pub use error::{Error, Result};
pub use export::{ExportFormat, ExportStatus, Exporter};
pub use logging::init_logging;
pub use preferences::{MemoryPreferences, PreferenceStore, SqlitePreferences};
pub use query::{QueryCoordinator, QueryView};
pub use record::{NotificationEvent, NotificationRecord};
pub use rules::{RuleEngine, RuleSet};
pub use storage::{NotificationStore, SqliteStore, Storage, StoreStats};

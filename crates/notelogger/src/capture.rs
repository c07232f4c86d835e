//! Capture pipeline.
//!
//! Turns host notification events into stored [`NotificationRecord`]s:
//! block check, field extraction, OTP classification, app-name resolution,
//! then an asynchronous insert. Failures after the block check are logged
//! and the event is dropped; nothing is retried.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, trace, warn};

use crate::classifier::OtpDetector;
use crate::error::{Error, Result};
use crate::record::{
    NotificationEvent, NotificationRecord, EXTRA_BIG_TEXT, EXTRA_TEXT, EXTRA_TITLE,
};
use crate::rules::RuleEngine;
use crate::storage::NotificationStore;

/// Source of capture timestamps.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time as Unix milliseconds.
    fn now_millis(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FixedClock {
    now: std::sync::atomic::AtomicI64,
}

#[cfg(test)]
impl FixedClock {
    pub(crate) fn new(now_ms: i64) -> Self {
        Self {
            now: std::sync::atomic::AtomicI64::new(now_ms),
        }
    }

    pub(crate) fn set(&self, now_ms: i64) {
        self.now.store(now_ms, std::sync::atomic::Ordering::SeqCst);
    }

    pub(crate) fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Maps package identifiers to human-readable application names.
pub trait AppNameResolver: Send + Sync + std::fmt::Debug {
    /// Resolve the display name for `package`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AppNameLookup`] if the package is unknown.
    fn resolve(&self, package: &str) -> Result<String>;
}

/// Resolver backed by a fixed table, typically `[capture.app_names]`.
#[derive(Debug, Clone, Default)]
pub struct StaticAppNames {
    names: BTreeMap<String, String>,
}

impl StaticAppNames {
    /// Create a resolver from a package → label table.
    #[must_use]
    pub fn new(names: BTreeMap<String, String>) -> Self {
        Self { names }
    }
}

impl AppNameResolver for StaticAppNames {
    fn resolve(&self, package: &str) -> Result<String> {
        self.names
            .get(package)
            .cloned()
            .ok_or_else(|| Error::app_name_lookup(package))
    }
}

/// Resolver that knows no names, so every record falls back to its package.
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PackageNameResolver;

#[cfg(test)]
impl AppNameResolver for PackageNameResolver {
    fn resolve(&self, package: &str) -> Result<String> {
        Err(Error::app_name_lookup(package))
    }
}

/// An event delivered by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A notification was posted.
    Posted(NotificationEvent),
    /// A notification was removed.
    Removed(NotificationEvent),
}

/// What happened to a posted notification.
#[derive(Debug)]
pub enum CaptureOutcome {
    /// The package is blocked; nothing was stored.
    Blocked,
    /// Processing continues in the background; the handle yields the new id.
    Dispatched(JoinHandle<Result<i64>>),
}

/// Counters for a [`CapturePipeline::run`] session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    /// Posted events received.
    pub received: u64,
    /// Posted events discarded by the block list.
    pub blocked: u64,
    /// Posted events handed to a background task.
    pub dispatched: u64,
    /// Records successfully stored.
    pub stored: u64,
    /// Dispatched events that were dropped on failure.
    pub failed: u64,
    /// Removal events seen.
    pub removed: u64,
}

impl CaptureStats {
    fn record_insert(&mut self, joined: std::result::Result<Result<i64>, JoinError>) {
        match joined {
            Ok(Ok(_)) => self.stored += 1,
            Ok(Err(_)) => self.failed += 1,
            Err(e) => {
                warn!(error = %e, "Capture task did not complete");
                self.failed += 1;
            }
        }
    }
}

/// Text fed to the classifier: title, text and expanded text joined by
/// spaces, with an absent field rendered as `null`.
#[must_use]
pub fn classification_input(event: &NotificationEvent) -> String {
    let field = |key: &str| event.text_extra(key).unwrap_or("null");
    format!(
        "{} {} {}",
        field(EXTRA_TITLE),
        field(EXTRA_TEXT),
        field(EXTRA_BIG_TEXT)
    )
}

/// Entry point for host notification events.
#[derive(Debug, Clone)]
pub struct CapturePipeline {
    store: Arc<dyn NotificationStore>,
    rules: RuleEngine,
    detector: Arc<OtpDetector>,
    resolver: Arc<dyn AppNameResolver>,
    clock: Arc<dyn Clock>,
}

impl CapturePipeline {
    /// Create a pipeline writing to `store` and filtering with `rules`.
    #[must_use]
    pub fn new(
        store: Arc<dyn NotificationStore>,
        rules: RuleEngine,
        resolver: Arc<dyn AppNameResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            rules,
            detector: Arc::new(OtpDetector::new()),
            resolver,
            clock,
        }
    }

    /// Handle a posted notification.
    ///
    /// The block check runs synchronously; everything after it runs in a
    /// spawned task, so this returns without waiting on the store. Must be
    /// called from within a tokio runtime.
    pub fn on_notification_posted(&self, event: NotificationEvent) -> CaptureOutcome {
        if self.rules.is_blocked(&event.package_name) {
            debug!(package = %event.package_name, "Notification from blocked app discarded");
            return CaptureOutcome::Blocked;
        }

        let pipeline = self.clone();
        CaptureOutcome::Dispatched(tokio::spawn(async move {
            let package = event.package_name.clone();
            let record = pipeline.build_record(&event);
            match pipeline.store.insert(record).await {
                Ok(id) => {
                    debug!(id, package = %package, "Notification stored");
                    Ok(id)
                }
                Err(e) => {
                    warn!(package = %package, error = %e, "Dropping notification");
                    Err(e)
                }
            }
        }))
    }

    /// Handle a removed notification. Records are never updated on removal.
    pub fn on_notification_removed(&self, event: &NotificationEvent) {
        trace!(
            package = %event.package_name,
            notification_id = event.notification_id,
            "Notification removed"
        );
    }

    /// Build the canonical record for `event` without storing it.
    #[must_use]
    pub fn build_record(&self, event: &NotificationEvent) -> NotificationRecord {
        let input = classification_input(event);
        let otp = self.detector.detect(Some(&input));

        let app_name = self.resolver.resolve(&event.package_name).unwrap_or_else(|e| {
            trace!(error = %e, "Falling back to package name");
            event.package_name.clone()
        });

        NotificationRecord::from_event(event, app_name, otp, self.clock.now_millis())
    }

    /// Drive the pipeline from a channel of host events until it closes,
    /// then wait for every dispatched insert to finish.
    pub async fn run(&self, mut events: mpsc::Receiver<HostEvent>) -> CaptureStats {
        let mut stats = CaptureStats::default();
        let mut inserts = JoinSet::new();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(HostEvent::Posted(event)) => {
                        stats.received += 1;
                        match self.on_notification_posted(event) {
                            CaptureOutcome::Blocked => stats.blocked += 1,
                            CaptureOutcome::Dispatched(handle) => {
                                stats.dispatched += 1;
                                inserts.spawn(async move {
                                    handle.await.unwrap_or_else(|e| Err(Error::from(e)))
                                });
                            }
                        }
                    }
                    Some(HostEvent::Removed(event)) => {
                        stats.removed += 1;
                        self.on_notification_removed(&event);
                    }
                    None => break,
                },
                Some(joined) = inserts.join_next(), if !inserts.is_empty() => {
                    stats.record_insert(joined);
                }
            }
        }

        while let Some(joined) = inserts.join_next().await {
            stats.record_insert(joined);
        }

        debug!(?stats, "Capture channel closed");
        stats
    }
}

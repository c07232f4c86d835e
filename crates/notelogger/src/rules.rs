//! User filtering rules.
//!
//! The [`RuleEngine`] owns the current [`RuleSet`]. Every mutation is
//! written to the [`PreferenceStore`] before the new snapshot is published
//! to subscribers, so a failed write leaves the published rules untouched.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capture::Clock;
use crate::error::{Error, Result};
use crate::preferences::PreferenceStore;
use crate::record::NotificationRecord;
use crate::storage::NotificationStore;

/// Preference key for the blocked package list.
pub const KEY_BLOCKED_APPS: &str = "blocked_apps";
/// Preference key for the highlight keywords.
pub const KEY_KEYWORDS: &str = "keywords";
/// Preference key for the retention switch.
pub const KEY_RETENTION_ENABLED: &str = "retention_enabled";
/// Preference key for the retention threshold.
pub const KEY_RETENTION_DAYS: &str = "retention_days";
/// Preference key for the auto-export flag.
pub const KEY_AUTO_EXPORT: &str = "auto_export_enabled";

/// Shortest allowed retention threshold.
pub const MIN_RETENTION_DAYS: u32 = 7;
/// Longest allowed retention threshold.
pub const MAX_RETENTION_DAYS: u32 = 90;
/// Retention threshold used when none is stored.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

const MS_PER_DAY: i64 = 86_400_000;

/// Age-based deletion policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionPolicy {
    /// Whether old records are swept.
    pub enabled: bool,
    /// Records older than this many days are deleted.
    pub days: u32,
}

impl RetentionPolicy {
    /// Build a policy, clamping `days` into the allowed range.
    #[must_use]
    pub fn new(enabled: bool, days: u32) -> Self {
        Self {
            enabled,
            days: clamp_days(days),
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            days: DEFAULT_RETENTION_DAYS,
        }
    }
}

/// A snapshot of every user rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleSet {
    /// Packages whose notifications are discarded.
    pub blocked_apps: BTreeSet<String>,
    /// Highlight terms, in the order they were added.
    pub keywords: Vec<String>,
    /// Retention policy.
    pub retention: RetentionPolicy,
    /// Whether automatic export is requested.
    pub auto_export: bool,
}

impl RuleSet {
    /// Whether notifications from `package` are discarded.
    #[must_use]
    pub fn is_blocked(&self, package: &str) -> bool {
        self.blocked_apps.contains(package)
    }

    /// Whether any keyword appears in the record's title, text or expanded
    /// text, ignoring case.
    #[must_use]
    pub fn highlights(&self, record: &NotificationRecord) -> bool {
        self.keywords.iter().any(|k| record.content_contains(k))
    }
}

/// Clamp a retention threshold into `MIN_RETENTION_DAYS..=MAX_RETENTION_DAYS`.
#[must_use]
pub fn clamp_days(days: u32) -> u32 {
    days.clamp(MIN_RETENTION_DAYS, MAX_RETENTION_DAYS)
}

/// The retention boundary for a sweep run at `now_ms`.
///
/// Records received strictly before the returned timestamp are deleted.
#[must_use]
pub fn retention_cutoff(now_ms: i64, days: u32) -> i64 {
    now_ms - i64::from(days) * MS_PER_DAY
}

/// Handle to a background retention sweep.
pub type SweepHandle = JoinHandle<Result<Option<usize>>>;

/// Owner of the live [`RuleSet`].
///
/// Cloning is cheap; all clones share the same state.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    prefs: Arc<dyn PreferenceStore>,
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
    rules: Arc<watch::Sender<RuleSet>>,
    write_lock: Arc<Mutex<()>>,
}

impl RuleEngine {
    /// Load the rules from `prefs`, using defaults for unset keys.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored preference cannot be read or decoded.
    pub fn load(
        prefs: Arc<dyn PreferenceStore>,
        store: Arc<dyn NotificationStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let rules = read_rules(prefs.as_ref())?;
        debug!(
            blocked = rules.blocked_apps.len(),
            keywords = rules.keywords.len(),
            retention_enabled = rules.retention.enabled,
            retention_days = rules.retention.days,
            "Rules loaded"
        );

        let (tx, _) = watch::channel(rules);
        Ok(Self {
            prefs,
            store,
            clock,
            rules: Arc::new(tx),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Subscribe to rule changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RuleSet> {
        self.rules.subscribe()
    }

    /// The current rules.
    #[must_use]
    pub fn snapshot(&self) -> RuleSet {
        self.rules.borrow().clone()
    }

    /// Whether notifications from `package` are currently discarded.
    #[must_use]
    pub fn is_blocked(&self, package: &str) -> bool {
        self.rules.borrow().is_blocked(package)
    }

    /// Block a package. Returns `false` if it was already blocked.
    ///
    /// # Errors
    ///
    /// Returns an error if `package` is blank or the rule cannot be saved.
    pub fn block_app(&self, package: &str) -> Result<bool> {
        let package = non_blank(package, "package name")?;
        self.update(
            |rules| rules.blocked_apps.insert(package.to_string()),
            save_blocked_apps,
        )
    }

    /// Unblock a package. Returns `false` if it was not blocked.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule cannot be saved.
    pub fn unblock_app(&self, package: &str) -> Result<bool> {
        self.update(
            |rules| rules.blocked_apps.remove(package.trim()),
            save_blocked_apps,
        )
    }

    /// Add a highlight keyword. Returns `false` if it was already present.
    ///
    /// # Errors
    ///
    /// Returns an error if `keyword` is blank or the rule cannot be saved.
    pub fn add_keyword(&self, keyword: &str) -> Result<bool> {
        let keyword = non_blank(keyword, "keyword")?;
        self.update(
            |rules| {
                if rules.keywords.iter().any(|k| k == keyword) {
                    false
                } else {
                    rules.keywords.push(keyword.to_string());
                    true
                }
            },
            save_keywords,
        )
    }

    /// Remove a highlight keyword. Returns `false` if it was not present.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule cannot be saved.
    pub fn remove_keyword(&self, keyword: &str) -> Result<bool> {
        let keyword = keyword.trim();
        self.update(
            |rules| {
                let before = rules.keywords.len();
                rules.keywords.retain(|k| k != keyword);
                rules.keywords.len() != before
            },
            save_keywords,
        )
    }

    /// Set the retention policy. `days` is clamped to the allowed range.
    ///
    /// When this turns retention on, a sweep is started in the background
    /// and its handle returned. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy cannot be saved.
    pub fn set_retention(&self, enabled: bool, days: u32) -> Result<Option<SweepHandle>> {
        let was_enabled = self.rules.borrow().retention.enabled;
        let policy = RetentionPolicy::new(enabled, days);
        self.update(|rules| replace(&mut rules.retention, policy), save_retention)?;

        if enabled && !was_enabled {
            info!(days = policy.days, "Retention enabled");
            Ok(Some(self.spawn_sweep()))
        } else {
            Ok(None)
        }
    }

    /// Change only the retention threshold. Returns the clamped value.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy cannot be saved.
    pub fn set_retention_days(&self, days: u32) -> Result<u32> {
        let days = clamp_days(days);
        self.update(
            |rules| replace(&mut rules.retention.days, days),
            save_retention,
        )?;
        Ok(days)
    }

    /// Set the auto-export flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the flag cannot be saved.
    pub fn set_auto_export(&self, enabled: bool) -> Result<bool> {
        self.update(
            |rules| replace(&mut rules.auto_export, enabled),
            |prefs, rules| prefs.set_bool(KEY_AUTO_EXPORT, rules.auto_export),
        )
    }

    /// Delete records older than the retention threshold.
    ///
    /// Returns `None` without touching the store when retention is off.
    ///
    /// # Errors
    ///
    /// Returns an error if the store delete fails.
    pub async fn sweep_retention(&self) -> Result<Option<usize>> {
        let policy = self.rules.borrow().retention;
        if !policy.enabled {
            debug!("Retention disabled, skipping sweep");
            return Ok(None);
        }

        let cutoff = retention_cutoff(self.clock.now_millis(), policy.days);
        let deleted = self.store.delete_older_than(cutoff).await?;
        info!(deleted, cutoff, days = policy.days, "Retention sweep finished");
        Ok(Some(deleted))
    }

    /// Start a sweep in the background if retention is enabled.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn sweep_on_start(&self) -> Option<SweepHandle> {
        let enabled = self.rules.borrow().retention.enabled;
        enabled.then(|| self.spawn_sweep())
    }

    fn spawn_sweep(&self) -> SweepHandle {
        let engine = self.clone();
        tokio::spawn(async move {
            let result = engine.sweep_retention().await;
            if let Err(e) = &result {
                warn!(error = %e, "Retention sweep failed");
            }
            result
        })
    }

    /// Apply `mutate` to a copy of the rules and, if it reports a change,
    /// persist with `persist` and publish the copy.
    fn update<M, P>(&self, mutate: M, persist: P) -> Result<bool>
    where
        M: FnOnce(&mut RuleSet) -> bool,
        P: FnOnce(&dyn PreferenceStore, &RuleSet) -> Result<()>,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::internal("rule lock poisoned"))?;

        let mut next = self.rules.borrow().clone();
        if !mutate(&mut next) {
            return Ok(false);
        }

        persist(self.prefs.as_ref(), &next)?;
        self.rules.send_replace(next);
        Ok(true)
    }
}

/// Assign `value` to `slot`, reporting whether it changed.
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn non_blank<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::invalid_rule(format!("{what} must not be blank")))
    } else {
        Ok(trimmed)
    }
}

fn read_rules(prefs: &dyn PreferenceStore) -> Result<RuleSet> {
    let stored_days = prefs.get_int(KEY_RETENTION_DAYS, i64::from(DEFAULT_RETENTION_DAYS))?;
    let days = u32::try_from(stored_days.clamp(
        i64::from(MIN_RETENTION_DAYS),
        i64::from(MAX_RETENTION_DAYS),
    ))
    .unwrap_or(DEFAULT_RETENTION_DAYS);

    let mut keywords: Vec<String> = Vec::new();
    for keyword in prefs.get_strings(KEY_KEYWORDS)? {
        if !keywords.contains(&keyword) {
            keywords.push(keyword);
        }
    }

    Ok(RuleSet {
        blocked_apps: prefs.get_strings(KEY_BLOCKED_APPS)?.into_iter().collect(),
        keywords,
        retention: RetentionPolicy::new(prefs.get_bool(KEY_RETENTION_ENABLED, false)?, days),
        auto_export: prefs.get_bool(KEY_AUTO_EXPORT, false)?,
    })
}

fn save_blocked_apps(prefs: &dyn PreferenceStore, rules: &RuleSet) -> Result<()> {
    let apps: Vec<String> = rules.blocked_apps.iter().cloned().collect();
    prefs.set_strings(KEY_BLOCKED_APPS, &apps)
}

fn save_keywords(prefs: &dyn PreferenceStore, rules: &RuleSet) -> Result<()> {
    prefs.set_strings(KEY_KEYWORDS, &rules.keywords)
}

fn save_retention(prefs: &dyn PreferenceStore, rules: &RuleSet) -> Result<()> {
    prefs.set_values(&[
        (KEY_RETENTION_ENABLED, Value::Bool(rules.retention.enabled)),
        (KEY_RETENTION_DAYS, Value::from(rules.retention.days)),
    ])
}

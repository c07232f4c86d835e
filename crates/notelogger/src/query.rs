//! Reactive query coordination.
//!
//! A [`QueryCoordinator`] watches three inputs: the search text, the live
//! [`RuleSet`] and the store's change counter. Whenever any of them moves it
//! recomputes the result list. A computation still running when the search
//! or the rules change is dropped, so only results for the latest filter are
//! published. Store writes never cancel a running query; any that land
//! meanwhile are folded into a single recompute once it has published.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::record::NotificationRecord;
use crate::rules::RuleSet;
use crate::storage::{AppInfo, NotificationStore};

/// One published result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryView {
    /// The search text the records were computed for.
    pub search: String,
    /// Matching records, newest first, blocked apps removed.
    pub records: Vec<NotificationRecord>,
}

impl QueryView {
    /// Records carrying a detected OTP.
    pub fn otp_records(&self) -> impl Iterator<Item = &NotificationRecord> {
        self.records.iter().filter(|r| r.is_otp)
    }

    /// Records paired with whether `rules` highlights them.
    pub fn highlighted<'a>(
        &'a self,
        rules: &'a RuleSet,
    ) -> impl Iterator<Item = (&'a NotificationRecord, bool)> {
        self.records.iter().map(move |r| (r, rules.highlights(r)))
    }
}

/// Compute the records for `search` under `rules`.
///
/// A blank search returns everything. Otherwise the term is matched
/// case-insensitively against app name, title, text and expanded text.
/// Records from blocked packages are removed either way.
///
/// # Errors
///
/// Returns an error if the store query fails.
pub async fn run_query(
    store: &dyn NotificationStore,
    search: &str,
    rules: &RuleSet,
) -> Result<Vec<NotificationRecord>> {
    let mut records = if search.is_empty() {
        store.query_all().await?
    } else {
        store.query_by_substring(search).await?
    };
    records.retain(|r| !rules.is_blocked(&r.package_name));
    Ok(records)
}

/// Keeps a [`QueryView`] current as its inputs change.
///
/// The background task stops when the coordinator is dropped or when the
/// rule or store change feed closes.
#[derive(Debug)]
pub struct QueryCoordinator {
    store: Arc<dyn NotificationStore>,
    search: watch::Sender<String>,
    view: watch::Receiver<QueryView>,
    task: JoinHandle<()>,
}

impl QueryCoordinator {
    /// Start coordinating queries over `store` filtered by `rules`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(store: Arc<dyn NotificationStore>, rules: watch::Receiver<RuleSet>) -> Self {
        let (search, search_rx) = watch::channel(String::new());
        let (view_tx, view) = watch::channel(QueryView::default());
        let changes = store.subscribe();

        let task = tokio::spawn(drive(
            Arc::clone(&store),
            search_rx,
            rules,
            changes,
            view_tx,
        ));

        Self {
            store,
            search,
            view,
            task,
        }
    }

    /// Replace the search text.
    pub fn set_search(&self, text: impl Into<String>) {
        let text = text.into();
        self.search.send_if_modified(|current| {
            if *current == text {
                false
            } else {
                *current = text;
                true
            }
        });
    }

    /// The current search text.
    #[must_use]
    pub fn search(&self) -> String {
        self.search.borrow().clone()
    }

    /// Subscribe to published views.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<QueryView> {
        self.view.clone()
    }

    /// The most recently published view.
    #[must_use]
    pub fn current(&self) -> QueryView {
        self.view.borrow().clone()
    }

    /// Distinct packages in the store, for choosing apps to block.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn distinct_apps(&self) -> Result<Vec<AppInfo>> {
        self.store.query_distinct_apps().await
    }
}

impl Drop for QueryCoordinator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive(
    store: Arc<dyn NotificationStore>,
    mut search_rx: watch::Receiver<String>,
    mut rules_rx: watch::Receiver<RuleSet>,
    mut changes_rx: watch::Receiver<u64>,
    view_tx: watch::Sender<QueryView>,
) {
    loop {
        let search = search_rx.borrow_and_update().clone();
        let rules = rules_rx.borrow_and_update().clone();
        let revision = *changes_rx.borrow_and_update();

        let compute = {
            let store = Arc::clone(&store);
            let search = search.clone();
            async move { run_query(store.as_ref(), &search, &rules).await }
        };
        tokio::pin!(compute);

        let outcome = tokio::select! {
            result = &mut compute => Some(result),
            changed = wait_for_filter_change(&mut search_rx, &mut rules_rx) => {
                if changed.is_err() {
                    break;
                }
                trace!("Filter changed mid-query, restarting");
                None
            }
        };

        match outcome {
            None => continue,
            Some(Ok(records)) => {
                debug!(search = %search, revision, count = records.len(), "Query view updated");
                view_tx.send_replace(QueryView { search, records });
            }
            Some(Err(e)) => warn!(search = %search, error = %e, "Query failed"),
        }

        if wait_for_change(&mut search_rx, &mut rules_rx, &mut changes_rx)
            .await
            .is_err()
        {
            break;
        }
    }
    debug!("Query coordinator stopped");
}

async fn wait_for_filter_change(
    search: &mut watch::Receiver<String>,
    rules: &mut watch::Receiver<RuleSet>,
) -> std::result::Result<(), watch::error::RecvError> {
    tokio::select! {
        r = search.changed() => r,
        r = rules.changed() => r,
    }
}

async fn wait_for_change(
    search: &mut watch::Receiver<String>,
    rules: &mut watch::Receiver<RuleSet>,
    changes: &mut watch::Receiver<u64>,
) -> std::result::Result<(), watch::error::RecvError> {
    tokio::select! {
        r = wait_for_filter_change(search, rules) => r,
        r = changes.changed() => r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FixedClock;
    use crate::preferences::MemoryPreferences;
    use crate::rules::RuleEngine;
    use crate::storage::tests::make_record;
    use crate::storage::SqliteStore;
    use async_trait::async_trait;
    use std::time::Duration;

    async fn wait_until<F>(rx: &mut watch::Receiver<QueryView>, mut pred: F) -> QueryView
    where
        F: FnMut(&QueryView) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let view = rx.borrow_and_update();
                    if pred(&view) {
                        return view.clone();
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("view did not reach expected state")
    }

    fn setup() -> (SqliteStore, RuleEngine) {
        let store = SqliteStore::open_in_memory().unwrap();
        let rules = RuleEngine::load(
            Arc::new(MemoryPreferences::new()),
            Arc::new(store.clone()),
            Arc::new(FixedClock::new(0)),
        )
        .unwrap();
        (store, rules)
    }

    fn titles(view: &QueryView) -> Vec<String> {
        view.records.iter().filter_map(|r| r.title.clone()).collect()
    }

    #[tokio::test]
    async fn test_run_query_orders_and_ignores_case() {
        let (store, _) = setup();
        store.insert(make_record("a", "Hello old", "", 100)).await.unwrap();
        store.insert(make_record("a", "unrelated", "", 300)).await.unwrap();
        store.insert(make_record("b", "HELLO new", "", 200)).await.unwrap();

        let records = run_query(&store, "hello", &RuleSet::default()).await.unwrap();
        let got: Vec<_> = records.iter().filter_map(|r| r.title.as_deref()).collect();
        assert_eq!(got, vec!["HELLO new", "Hello old"]);

        let all = run_query(&store, "", &RuleSet::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].timestamp_received, 300);
    }

    #[tokio::test]
    async fn test_blocked_apps_hidden_from_history() {
        let (store, _) = setup();
        store.insert(make_record("com.spam", "ad", "", 1)).await.unwrap();
        store.insert(make_record("com.chat", "hi", "", 2)).await.unwrap();

        let mut rules = RuleSet::default();
        rules.blocked_apps.insert("com.spam".to_string());
        let records = run_query(&store, "", &rules).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].package_name, "com.chat");

        // Still stored, only hidden.
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_coordinator_reacts_to_inputs() {
        let (store, rules) = setup();
        store.insert(make_record("com.chat", "Hello", "", 1)).await.unwrap();

        let coordinator = QueryCoordinator::spawn(Arc::new(store.clone()), rules.subscribe());
        let mut views = coordinator.subscribe();

        let view = wait_until(&mut views, |v| v.records.len() == 1).await;
        assert_eq!(titles(&view), vec!["Hello"]);

        store.insert(make_record("com.spam", "Buy now", "", 2)).await.unwrap();
        let view = wait_until(&mut views, |v| v.records.len() == 2).await;
        assert_eq!(titles(&view), vec!["Buy now", "Hello"]);

        rules.block_app("com.spam").unwrap();
        let view = wait_until(&mut views, |v| v.records.len() == 1).await;
        assert_eq!(titles(&view), vec!["Hello"]);

        coordinator.set_search("zzz");
        let view = wait_until(&mut views, |v| v.search == "zzz").await;
        assert!(view.records.is_empty());
        assert_eq!(coordinator.search(), "zzz");
    }

    /// Delays searches for "slow", and every full listing by `all_delay`.
    #[derive(Debug)]
    struct SlowStore {
        inner: SqliteStore,
        all_delay: Duration,
    }

    impl SlowStore {
        fn new(inner: SqliteStore) -> Self {
            Self {
                inner,
                all_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl NotificationStore for SlowStore {
        async fn insert(&self, record: NotificationRecord) -> Result<i64> {
            self.inner.insert(record).await
        }
        async fn query_all(&self) -> Result<Vec<NotificationRecord>> {
            tokio::time::sleep(self.all_delay).await;
            self.inner.query_all().await
        }
        async fn query_by_substring(&self, term: &str) -> Result<Vec<NotificationRecord>> {
            if term == "slow" {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            self.inner.query_by_substring(term).await
        }
        async fn query_distinct_apps(&self) -> Result<Vec<AppInfo>> {
            self.inner.query_distinct_apps().await
        }
        async fn delete_older_than(&self, cutoff_ms: i64) -> Result<usize> {
            self.inner.delete_older_than(cutoff_ms).await
        }
        async fn delete_all(&self) -> Result<usize> {
            self.inner.delete_all().await
        }
        async fn count(&self) -> Result<i64> {
            self.inner.count().await
        }
        fn subscribe(&self) -> watch::Receiver<u64> {
            self.inner.subscribe()
        }
    }

    #[tokio::test]
    async fn test_stale_query_is_never_published() {
        let (store, rules) = setup();
        store.insert(make_record("a", "slow item", "", 1)).await.unwrap();
        store.insert(make_record("a", "fast item", "", 2)).await.unwrap();

        let coordinator =
            QueryCoordinator::spawn(Arc::new(SlowStore::new(store.clone())), rules.subscribe());
        let mut views = coordinator.subscribe();
        wait_until(&mut views, |v| v.records.len() == 2).await;

        coordinator.set_search("slow");
        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.set_search("fast");

        let view = wait_until(&mut views, |v| v.search == "fast").await;
        assert_eq!(titles(&view), vec!["fast item"]);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(coordinator.current().search, "fast");
        assert!(!views.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_view_published_while_inserts_keep_arriving() {
        let (store, rules) = setup();
        let slow = SlowStore {
            inner: store.clone(),
            all_delay: Duration::from_millis(200),
        };
        let coordinator = QueryCoordinator::spawn(Arc::new(slow), rules.subscribe());
        let mut views = coordinator.subscribe();

        // One insert every 50ms for 2s, each landing mid-query.
        let feeder = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..40_i64 {
                    store
                        .insert(make_record("com.chat", &format!("n{i}"), "", i))
                        .await
                        .unwrap();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            })
        };

        let view = wait_until(&mut views, |v| !v.records.is_empty()).await;
        assert!(!feeder.is_finished(), "no view published during the feed");
        assert!(view.records.len() < 40);

        feeder.await.unwrap();
        let view = wait_until(&mut views, |v| v.records.len() == 40).await;
        assert_eq!(view.records[0].timestamp_received, 39);
    }

    #[tokio::test]
    async fn test_view_helpers() {
        let (store, _) = setup();
        store.insert(make_record("com.bank", "Bank", "OTP 4821", 2)).await.unwrap();
        store.insert(make_record("com.chat", "Ann", "see you", 1)).await.unwrap();

        let view = QueryView {
            search: String::new(),
            records: store.query_all().await.unwrap(),
        };
        assert_eq!(view.otp_records().count(), 1);

        let rules = RuleSet {
            keywords: vec!["ann".to_string()],
            ..RuleSet::default()
        };
        let flags: Vec<bool> = view.highlighted(&rules).map(|(_, hit)| hit).collect();
        assert_eq!(flags, vec![false, true]);

        let coordinator = QueryCoordinator::spawn(Arc::new(store), watch::channel(rules).1);
        assert_eq!(coordinator.distinct_apps().await.unwrap().len(), 2);
    }
}

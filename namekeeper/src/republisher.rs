//!
//! Background task that re-issues publication for every cached entry,
//! extending each record's expiry before it lapses.
//!
//! Republishing is the system's only recurring, unattended operation: a
//! transient fault on one key must never block refreshing the rest, so a
//! cycle records per-entry failures and escalates only when every entry
//! failed.
//!

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};

use crate::cache::{CacheEntry, RecordCache};
use crate::keystore::{Keystore, KeystoreError};
use crate::namesys::{NameSystem, PublishError};

/// Default period between republish cycles.
pub const DEFAULT_REPUBLISH_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

/// Failure of a single entry within a cycle. Does not abort the cycle.
#[derive(thiserror::Error, Debug)]
pub enum RepublishError {
    #[error("failed to fetch the signing key: {0}")]
    Key(#[from] KeystoreError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl RepublishError {
    pub fn is_key(&self) -> bool {
        if let RepublishError::Key(_) = self {
            return true;
        }
        false
    }

    pub fn is_publish(&self) -> bool {
        if let RepublishError::Publish(_) = self {
            return true;
        }
        false
    }
}

/// Per-key outcomes of one republish cycle.
#[derive(Debug, Default)]
pub struct RepublishReport {
    results: HashMap<String, Result<(), RepublishError>>,
}

impl RepublishReport {
    /// Number of entries attempted.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Keys that were republished successfully.
    pub fn success(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|(_, result)| result.is_ok())
            .map(|(key_id, _)| key_id.clone())
            .collect()
    }

    /// Keys whose republish attempt failed.
    pub fn failed(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|(_, result)| result.is_err())
            .map(|(key_id, _)| key_id.clone())
            .collect()
    }

    pub fn result_for(&self, key_id: &str) -> Option<&Result<(), RepublishError>> {
        self.results.get(key_id)
    }

    fn record(&mut self, key_id: &str, result: Result<(), RepublishError>) {
        self.results.insert(key_id.to_string(), result);
    }

    fn all_failed(&self) -> bool {
        !self.is_empty() && self.results.values().all(|result| result.is_err())
    }
}

/// Outcome of a cycle that did not fail as a whole.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The cache was empty, so there was nothing to do. A distinguished,
    /// non-error condition: no keys were fetched, nothing was published.
    NoRecordsToRepublish,
    /// At least one entry was attempted and at least one succeeded.
    Completed(RepublishReport),
}

impl CycleOutcome {
    pub fn is_no_records(&self) -> bool {
        if let CycleOutcome::NoRecordsToRepublish = self {
            return true;
        }
        false
    }

    pub fn report(&self) -> Option<&RepublishReport> {
        match self {
            CycleOutcome::NoRecordsToRepublish => None,
            CycleOutcome::Completed(report) => Some(report),
        }
    }
}

/// A cycle fails as a whole only when every attempted entry failed.
#[derive(thiserror::Error, Debug)]
pub enum CycleError {
    #[error("all {} entries failed to republish", .0.len())]
    AllFailed(RepublishReport),
}

/// Periodically walks the publication cache and republishes every entry
/// with a freshly extended expiry. One long-lived task per service,
/// independent of and concurrent with caller-facing publishes.
pub struct Republisher {
    cache: RecordCache,
    keystore: Keystore,
    namesys: Arc<dyn NameSystem>,
    period: Duration,
    record_lifetime: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
    is_running: AtomicBool,
}

impl std::fmt::Debug for Republisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Republisher")
            .field("period", &self.period)
            .field("record_lifetime", &self.record_lifetime)
            .field("is_running", &self.is_running)
            .finish_non_exhaustive()
    }
}

impl Republisher {
    pub fn new(
        cache: RecordCache,
        keystore: Keystore,
        namesys: Arc<dyn NameSystem>,
        period: Duration,
        record_lifetime: Duration,
    ) -> Self {
        Self {
            cache,
            keystore,
            namesys,
            period,
            record_lifetime,
            handle: Mutex::new(None),
            is_running: AtomicBool::new(false),
        }
    }

    /// Start the periodic cycle. A second start is a no-op.
    pub fn start(&self) {
        let mut lock = self.handle.lock().expect("republisher lock poisoned");
        if lock.is_some() {
            return;
        }
        let cache = self.cache.clone();
        let keystore = self.keystore.clone();
        let namesys = self.namesys.clone();
        let record_lifetime = self.record_lifetime;
        let period = self.period;
        *lock = Some(tokio::spawn(async move {
            Self::run_loop(cache, keystore, namesys, record_lifetime, period).await
        }));
        self.is_running.store(true, Ordering::Relaxed);
    }

    /// Stop the background task, abandoning any in-flight cycle at its
    /// next suspension point. Joined before returning so shutdown is
    /// deterministic.
    pub async fn stop(&self) {
        let handle = {
            let mut lock = self.handle.lock().expect("republisher lock poisoned");
            lock.take()
        };
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        self.is_running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Execute one republish cycle over a snapshot of the cache.
    pub async fn republish_once(&self) -> Result<CycleOutcome, CycleError> {
        Self::run_cycle(
            &self.cache,
            &self.keystore,
            self.namesys.as_ref(),
            self.record_lifetime,
        )
        .await
    }

    async fn run_loop(
        cache: RecordCache,
        keystore: Keystore,
        namesys: Arc<dyn NameSystem>,
        record_lifetime: Duration,
        period: Duration,
    ) {
        let mut interval = interval(period);
        interval.tick().await; // This ticks immediately. Wait for the first full period.
        loop {
            interval.tick().await;
            let start = Instant::now();
            match Self::run_cycle(&cache, &keystore, namesys.as_ref(), record_lifetime).await {
                Ok(CycleOutcome::NoRecordsToRepublish) => {
                    tracing::info!("No records to republish.");
                }
                Ok(CycleOutcome::Completed(report)) => {
                    tracing::info!(
                        "Republished {} records within {:.1}s. {} succeeded, {} failed.",
                        report.len(),
                        start.elapsed().as_secs_f32(),
                        report.success().len(),
                        report.failed().len()
                    );
                }
                Err(CycleError::AllFailed(report)) => {
                    tracing::error!(
                        "Republish cycle failed for all {} records. Trying again next cycle.",
                        report.len()
                    );
                }
            }
        }
    }

    async fn run_cycle(
        cache: &RecordCache,
        keystore: &Keystore,
        namesys: &dyn NameSystem,
        record_lifetime: Duration,
    ) -> Result<CycleOutcome, CycleError> {
        let entries = cache.list();
        if entries.is_empty() {
            return Ok(CycleOutcome::NoRecordsToRepublish);
        }
        tracing::debug!("Start to republish {} records.", entries.len());
        let mut report = RepublishReport::default();
        for entry in entries {
            let start = Instant::now();
            let eol = SystemTime::now() + record_lifetime;
            let result = Self::republish_entry(keystore, namesys, &entry, eol).await;
            let elapsed = start.elapsed().as_millis();
            match &result {
                Ok(()) => {
                    cache.refresh_expiry(&entry.key_id, eol);
                    tracing::info!("Republished {} within {elapsed}ms.", entry.key_id);
                }
                Err(e) => {
                    tracing::warn!("Failed to republish {} within {elapsed}ms. {e}", entry.key_id);
                }
            }
            report.record(&entry.key_id, result);
        }
        if report.all_failed() {
            return Err(CycleError::AllFailed(report));
        }
        Ok(CycleOutcome::Completed(report))
    }

    async fn republish_entry(
        keystore: &Keystore,
        namesys: &dyn NameSystem,
        entry: &CacheEntry,
        eol: SystemTime,
    ) -> Result<(), RepublishError> {
        let keypair = keystore.get(&entry.key_id).await?;
        namesys.publish_with_eol(&keypair, &entry.content, eol).await?;
        Ok(())
    }
}

impl Drop for Republisher {
    fn drop(&mut self) {
        if let Ok(mut lock) = self.handle.lock() {
            if let Some(handle) = lock.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use pkarr::Keypair;
    use tokio::time::Instant;

    use crate::cache::RecordCache;
    use crate::keystore::Keystore;
    use crate::republisher::{CycleError, Republisher, DEFAULT_REPUBLISH_INTERVAL};
    use crate::testing::{FakeKeyBackend, FakeNameSystem};

    struct Fixture {
        cache: RecordCache,
        backend: Arc<FakeKeyBackend>,
        namesys: Arc<FakeNameSystem>,
        republisher: Republisher,
    }

    fn fixture() -> Fixture {
        let cache = RecordCache::new();
        let backend = Arc::new(FakeKeyBackend::new());
        let namesys = Arc::new(FakeNameSystem::new());
        let republisher = Republisher::new(
            cache.clone(),
            Keystore::new(backend.clone()),
            namesys.clone(),
            DEFAULT_REPUBLISH_INTERVAL,
            Duration::from_secs(24 * 60 * 60),
        );
        Fixture {
            cache,
            backend,
            namesys,
            republisher,
        }
    }

    fn manage_key(fixture: &Fixture, key_id: &str, content: &str) {
        let keypair = Keypair::random();
        fixture.backend.insert(key_id, &keypair.secret_key());
        fixture.cache.set(key_id, content);
    }

    #[tokio::test]
    async fn an_empty_cache_yields_no_records_to_republish() {
        let fixture = fixture();

        let outcome = fixture.republisher.republish_once().await.unwrap();
        assert!(outcome.is_no_records());
        // Nothing was fetched or published.
        assert_eq!(fixture.backend.call_count(), 0);
        assert_eq!(fixture.namesys.publish_count(), 0);
    }

    #[tokio::test]
    async fn a_cycle_republishes_every_entry_and_advances_expiries() {
        let fixture = fixture();
        manage_key(&fixture, "key-a", "/content/x");
        manage_key(&fixture, "key-b", "/content/y");
        let before: Vec<_> = fixture.cache.list();

        let outcome = fixture.republisher.republish_once().await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report.success().len(), 2);
        assert_eq!(fixture.namesys.publish_count(), 2);

        for entry in fixture.cache.list() {
            let old = before.iter().find(|e| e.key_id == entry.key_id).unwrap();
            assert!(entry.last_expiry > old.last_expiry);
        }
    }

    #[tokio::test]
    async fn one_failing_entry_does_not_abort_the_cycle() {
        let fixture = fixture();
        manage_key(&fixture, "key-a", "/content/x");
        manage_key(&fixture, "key-b", "/content/y");
        fixture.namesys.fail_for_content("/content/y");

        let outcome = fixture.republisher.republish_once().await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.success(), vec!["key-a".to_string()]);
        assert_eq!(report.failed(), vec!["key-b".to_string()]);
        // Both entries were still attempted.
        assert_eq!(fixture.namesys.publish_count(), 2);
    }

    #[tokio::test]
    async fn a_key_fetch_failure_is_recorded_per_entry() {
        let fixture = fixture();
        manage_key(&fixture, "key-a", "/content/x");
        // key-b is cached but its signing key is gone from the backend.
        fixture.cache.set("key-b", "/content/y");

        let outcome = fixture.republisher.republish_once().await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.success(), vec!["key-a".to_string()]);
        let err = report.result_for("key-b").unwrap().as_ref().unwrap_err();
        assert!(err.is_key());
    }

    #[tokio::test]
    async fn a_cycle_where_every_entry_fails_is_an_aggregate_failure() {
        let fixture = fixture();
        manage_key(&fixture, "key-a", "/content/x");
        manage_key(&fixture, "key-b", "/content/y");
        fixture.namesys.fail_for_content("/content/x");
        fixture.namesys.fail_for_content("/content/y");

        let err = fixture.republisher.republish_once().await.unwrap_err();
        let CycleError::AllFailed(report) = err;
        assert_eq!(report.failed().len(), 2);
    }

    #[tokio::test]
    async fn failed_entries_keep_their_previous_expiry() {
        let fixture = fixture();
        manage_key(&fixture, "key-a", "/content/x");
        manage_key(&fixture, "key-b", "/content/y");
        fixture.republisher.republish_once().await.unwrap();
        let before: Vec<_> = fixture.cache.list();

        fixture.namesys.fail_for_content("/content/y");
        fixture.republisher.republish_once().await.unwrap();

        for entry in fixture.cache.list() {
            let old = before.iter().find(|e| e.key_id == entry.key_id).unwrap();
            if entry.key_id == "key-b" {
                assert_eq!(entry.last_expiry, old.last_expiry);
            } else {
                assert!(entry.last_expiry >= old.last_expiry);
            }
        }
    }

    /// The scheduler stops promptly instead of blocking shutdown.
    #[tokio::test]
    async fn start_and_stop() {
        let fixture = fixture();
        let start = Instant::now();
        fixture.republisher.start();
        assert!(fixture.republisher.is_running());
        fixture.republisher.stop().await;
        assert!(!fixture.republisher.is_running());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn a_second_start_is_a_no_op() {
        let fixture = fixture();
        fixture.republisher.start();
        fixture.republisher.start();
        fixture.republisher.stop().await;
        assert!(!fixture.republisher.is_running());
    }
}

//! Sync scheduling
//!
//! Runs the reconciler on the configured cadence and on demand. At most one
//! pass runs at a time; a trigger that arrives while a pass is in flight is
//! rejected rather than queued.

use chrono::Utc;
use ldapsync_core::config::SchedulerConfig;
use ldapsync_core::types::{ConfigSyncStatus, DirectoryConfig, RunStatus, SyncReport};
use ldapsync_core::{Error, Result};
use ldapsync_metadata::DirectoryRepository;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::reconciler::Reconciler;

/// Scheduler state as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Idle,
    Running,
    /// A pass failed and its outcome is being recorded. Ends in `Idle`;
    /// the failure stays visible in the last report.
    Error,
}

/// Answer to a "sync now" request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    Accepted,
    AlreadyRunning,
}

/// Answer to a blocking "sync now" request
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Finished(SyncReport),
    AlreadyRunning,
}

struct SchedulerState {
    phase: SchedulerPhase,
    last_report: Option<SyncReport>,
    last_run: Option<Instant>,
    consecutive_failures: u32,
}

struct SchedulerInner {
    reconciler: Reconciler,
    store: Arc<dyn DirectoryRepository>,
    settings: SchedulerConfig,
    running: AtomicBool,
    state: RwLock<SchedulerState>,
    shutdown: RwLock<bool>,
    wake: Notify,
}

/// Clears the running flag however the pass ends
struct RunGuard {
    inner: Arc<SchedulerInner>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
}

impl SyncScheduler {
    pub fn new(
        reconciler: Reconciler,
        store: Arc<dyn DirectoryRepository>,
        settings: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                reconciler,
                store,
                settings,
                running: AtomicBool::new(false),
                state: RwLock::new(SchedulerState {
                    phase: SchedulerPhase::Idle,
                    last_report: None,
                    last_run: None,
                    consecutive_failures: 0,
                }),
                shutdown: RwLock::new(false),
                wake: Notify::new(),
            }),
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.inner.state.read().phase
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        self.inner.state.read().last_report.clone()
    }

    /// Start a pass in the background if none is running
    pub async fn trigger(&self) -> Result<TriggerOutcome> {
        let config = self.manual_config().await?;

        let guard = match Self::try_begin(&self.inner) {
            Some(guard) => guard,
            None => {
                info!("Sync requested while a pass is running");
                return Ok(TriggerOutcome::AlreadyRunning);
            }
        };

        let inner = self.inner.clone();
        tokio::spawn(async move {
            Self::execute(&inner, &config, guard).await;
        });

        Ok(TriggerOutcome::Accepted)
    }

    /// Run a pass and wait for it, under the same overlap guard as [`trigger`](Self::trigger)
    pub async fn run_now(&self) -> Result<RunOutcome> {
        let config = self.manual_config().await?;

        match Self::try_begin(&self.inner) {
            Some(guard) => Ok(RunOutcome::Finished(
                Self::execute(&self.inner, &config, guard).await,
            )),
            None => Ok(RunOutcome::AlreadyRunning),
        }
    }

    /// Start the background loop.
    ///
    /// The loop polls every `poll_interval_secs`, re-reading the active
    /// configuration each time, and runs a pass once the sync interval
    /// (stretched by backoff after failures) has elapsed.
    pub fn spawn(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let poll = Duration::from_secs(inner.settings.poll_interval_secs.max(1));

        info!(
            "Starting sync scheduler, polling every {}s",
            poll.as_secs()
        );

        tokio::spawn(async move {
            loop {
                if *inner.shutdown.read() {
                    break;
                }

                Self::tick(&inner).await;

                tokio::select! {
                    _ = tokio::time::sleep(poll) => {}
                    _ = inner.wake.notified() => {}
                }
            }

            info!("Sync scheduler stopped");
        })
    }

    /// Stop the background loop after its current tick
    pub fn stop(&self) {
        *self.inner.shutdown.write() = true;
        self.inner.wake.notify_one();
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn manual_config(&self) -> Result<DirectoryConfig> {
        let config = self
            .inner
            .store
            .get_active_config()
            .await?
            .ok_or(Error::NotConfigured)?;

        if !config.allows_manual_sync() {
            return Err(Error::Validation(
                "Sync is disabled and manual sync override is off".into(),
            ));
        }
        config.validate()?;

        Ok(config)
    }

    async fn tick(inner: &Arc<SchedulerInner>) {
        let config = match inner.store.get_active_config().await {
            Ok(Some(config)) => config,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to load directory configuration: {}", e);
                return;
            }
        };

        if !config.enabled || !config.sync_enabled {
            return;
        }

        if !Self::is_due(inner, &config) {
            return;
        }

        match Self::try_begin(inner) {
            Some(guard) => {
                debug!("Scheduled sync is due for {}", config.name);
                Self::execute(inner, &config, guard).await;
            }
            None => debug!("Scheduled sync skipped, a pass is already running"),
        }
    }

    fn is_due(inner: &SchedulerInner, config: &DirectoryConfig) -> bool {
        let state = inner.state.read();
        let last_run = match state.last_run {
            Some(at) => at,
            None => return true,
        };

        let wait = backoff_delay(
            config.sync_interval_duration(),
            state.consecutive_failures,
            Duration::from_secs(inner.settings.max_backoff_secs),
        );
        last_run.elapsed() >= wait
    }

    fn try_begin(inner: &Arc<SchedulerInner>) -> Option<RunGuard> {
        inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;

        inner.state.write().phase = SchedulerPhase::Running;
        Some(RunGuard {
            inner: inner.clone(),
        })
    }

    async fn execute(
        inner: &Arc<SchedulerInner>,
        config: &DirectoryConfig,
        guard: RunGuard,
    ) -> SyncReport {
        let started_at = Utc::now();
        info!("Starting directory sync for {}", config.name);

        if let Err(e) = inner
            .store
            .update_sync_status(&config.id, ConfigSyncStatus::Running, None)
            .await
        {
            warn!("Failed to record sync start: {}", e);
        }

        let result = inner.reconciler.reconcile(config).await;
        let finished_at = Utc::now();

        let report = match result {
            Ok(stats) => {
                info!("Directory sync completed: {}", stats);
                SyncReport {
                    status: RunStatus::Completed,
                    stats,
                    started_at,
                    finished_at,
                    error: None,
                }
            }
            Err(e) => {
                error!("Directory sync failed: {}", e);
                inner.state.write().phase = SchedulerPhase::Error;
                SyncReport {
                    status: RunStatus::Error,
                    stats: Default::default(),
                    started_at,
                    finished_at,
                    error: Some(e.to_string()),
                }
            }
        };

        let (config_status, label) = match report.status {
            RunStatus::Completed => (ConfigSyncStatus::Completed, "completed"),
            RunStatus::Error => (ConfigSyncStatus::Error, "error"),
        };
        metrics::counter!("ldapsync_sync_runs_total", "status" => label).increment(1);

        if let Err(e) = inner
            .store
            .update_sync_status(&config.id, config_status, Some(finished_at))
            .await
        {
            warn!("Failed to record sync outcome: {}", e);
        }

        {
            let mut state = inner.state.write();
            state.last_run = Some(Instant::now());
            state.phase = SchedulerPhase::Idle;
            state.consecutive_failures = match report.status {
                RunStatus::Completed => 0,
                RunStatus::Error => state.consecutive_failures.saturating_add(1),
            };
            state.last_report = Some(report.clone());
        }

        drop(guard);
        report
    }
}

/// Delay before the next scheduled pass: the interval, doubled per
/// consecutive failure, capped at `max_backoff` but never below the interval
fn backoff_delay(interval: Duration, failures: u32, max_backoff: Duration) -> Duration {
    if failures == 0 {
        return interval;
    }

    interval
        .saturating_mul(2u32.saturating_pow(failures))
        .min(max_backoff)
        .max(interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldapsync_auth::testing::FakeDirectory;
    use ldapsync_auth::DirectoryClient;
    use ldapsync_core::config::DirectoryClientConfig;
    use ldapsync_core::types::{BindCredentials, SecretString};
    use ldapsync_metadata::MetadataStore;

    const BASE: &str = "ou=users,dc=example,dc=com";

    struct Harness {
        fake: FakeDirectory,
        store: Arc<MetadataStore>,
        scheduler: SyncScheduler,
        config: DirectoryConfig,
    }

    async fn harness(settings: SchedulerConfig) -> Harness {
        let fake = FakeDirectory::new();
        fake.add_account("cn=svc,dc=example,dc=com", "svcpass");
        fake.add_entry("uid=alice,ou=users,dc=example,dc=com", &[("uid", "alice")]);

        let mut config = DirectoryConfig::new("corp", "ldap.example.com", BASE);
        config.bind = Some(BindCredentials {
            dn: "cn=svc,dc=example,dc=com".into(),
            password: SecretString::new("svcpass"),
        });

        let store = Arc::new(MetadataStore::in_memory().await.unwrap());
        store.save_config(&config).await.unwrap();

        let client = DirectoryClient::new(Arc::new(fake.clone()), DirectoryClientConfig::default());
        let reconciler = Reconciler::new(client, store.clone());
        let scheduler = SyncScheduler::new(reconciler, store.clone(), settings);

        Harness {
            fake,
            store,
            scheduler,
            config,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_backoff_delay() {
        let interval = Duration::from_secs(30);
        let cap = Duration::from_secs(600);

        assert_eq!(backoff_delay(interval, 0, cap), interval);
        assert_eq!(backoff_delay(interval, 1, cap), Duration::from_secs(60));
        assert_eq!(backoff_delay(interval, 3, cap), Duration::from_secs(240));
        assert_eq!(backoff_delay(interval, 10, cap), cap);
        assert_eq!(backoff_delay(interval, 40, cap), cap);
        assert_eq!(backoff_delay(Duration::from_secs(900), 2, cap), Duration::from_secs(900));
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_rejected() {
        let h = harness(SchedulerConfig::default()).await;
        h.fake.hold_searches();

        assert_eq!(h.scheduler.trigger().await.unwrap(), TriggerOutcome::Accepted);
        let fake = h.fake.clone();
        wait_until(|| fake.searches() == 1).await;
        assert_eq!(h.scheduler.phase(), SchedulerPhase::Running);

        assert_eq!(h.scheduler.trigger().await.unwrap(), TriggerOutcome::AlreadyRunning);
        assert!(matches!(
            h.scheduler.run_now().await.unwrap(),
            RunOutcome::AlreadyRunning
        ));

        h.fake.release_searches();
        let scheduler = h.scheduler.clone();
        wait_until(|| !scheduler.is_running()).await;

        assert_eq!(h.fake.searches(), 1);
        assert_eq!(h.scheduler.phase(), SchedulerPhase::Idle);
        let report = h.scheduler.last_report().unwrap();
        assert_eq!(report.stats.created, 1);
    }

    #[tokio::test]
    async fn test_run_records_outcome_on_config() {
        let h = harness(SchedulerConfig::default()).await;

        let report = match h.scheduler.run_now().await.unwrap() {
            RunOutcome::Finished(report) => report,
            RunOutcome::AlreadyRunning => panic!("no pass should be running"),
        };
        assert_eq!(report.status, RunStatus::Completed);

        let config = h.store.get_active_config().await.unwrap().unwrap();
        assert_eq!(config.sync_status, ConfigSyncStatus::Completed);
        assert_eq!(config.last_sync_time, Some(report.finished_at));
    }

    #[tokio::test]
    async fn test_failed_run_is_recorded_and_returns_to_idle() {
        let h = harness(SchedulerConfig::default()).await;
        h.fake.set_unreachable(true);

        let report = match h.scheduler.run_now().await.unwrap() {
            RunOutcome::Finished(report) => report,
            RunOutcome::AlreadyRunning => panic!("no pass should be running"),
        };
        assert_eq!(report.status, RunStatus::Error);
        assert!(report.error.is_some());
        assert_eq!(h.scheduler.phase(), SchedulerPhase::Idle);

        let last = h.scheduler.last_report().unwrap();
        assert_eq!(last.status, RunStatus::Error);
        assert_eq!(last.error, report.error);

        let config = h.store.get_active_config().await.unwrap().unwrap();
        assert_eq!(config.sync_status, ConfigSyncStatus::Error);

        h.fake.set_unreachable(false);
        assert!(matches!(
            h.scheduler.run_now().await.unwrap(),
            RunOutcome::Finished(_)
        ));
        assert_eq!(h.scheduler.phase(), SchedulerPhase::Idle);
    }

    #[tokio::test]
    async fn test_manual_sync_respects_override() {
        let h = harness(SchedulerConfig::default()).await;
        let mut config = h.config.clone();
        config.sync_enabled = false;
        config.manual_sync_override = true;
        h.store.save_config(&config).await.unwrap();
        assert!(matches!(
            h.scheduler.run_now().await.unwrap(),
            RunOutcome::Finished(_)
        ));

        config.manual_sync_override = false;
        h.store.save_config(&config).await.unwrap();
        let err = h.scheduler.trigger().await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_trigger_without_config() {
        let fake = FakeDirectory::new();
        let store = Arc::new(MetadataStore::in_memory().await.unwrap());
        let client = DirectoryClient::new(Arc::new(fake), DirectoryClientConfig::default());
        let scheduler = SyncScheduler::new(
            Reconciler::new(client, store.clone()),
            store,
            SchedulerConfig::default(),
        );

        assert!(matches!(scheduler.trigger().await, Err(Error::NotConfigured)));
    }

    #[tokio::test]
    async fn test_background_loop_runs_when_due() {
        let h = harness(SchedulerConfig::default()).await;

        let handle = h.scheduler.spawn();
        let scheduler = h.scheduler.clone();
        wait_until(|| scheduler.last_report().is_some()).await;

        h.scheduler.stop();
        handle.await.unwrap();
        assert_eq!(h.fake.searches(), 1);
    }

    #[tokio::test]
    async fn test_background_loop_idle_when_sync_disabled() {
        let h = harness(SchedulerConfig::default()).await;
        let mut config = h.config.clone();
        config.sync_enabled = false;
        h.store.save_config(&config).await.unwrap();

        let handle = h.scheduler.spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.scheduler.stop();
        handle.await.unwrap();

        assert_eq!(h.fake.connects(), 0);
        assert!(h.scheduler.last_report().is_none());
    }
}

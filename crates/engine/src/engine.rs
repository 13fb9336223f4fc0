use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use crate::adapter::{new_adapter, SourceAdapter};
use crate::pipeline::SyncPipeline;
use crate::projector::Projector;
use fieldsync_common::error::SyncerResult;
use fieldsync_db::conf::models::SyncerConf;
use fieldsync_db::conf::repositories::SyncerConfRepository;
use fieldsync_db::contacts::repositories::ContactStore;
use fieldsync_db::lock::repositories::LockRepository;
use fieldsync_db::logs::models::SyncerLog;
use fieldsync_db::logs::repositories::SyncerLogRepository;
use fieldsync_scheduler::{Scheduler, TaskFn};

/// Cluster-lock TTL for sync runs and the cleaner; must outlast a run.
const LOCK_TTL: Duration = Duration::from_secs(60 * 60);
const CLEANER_TASK_KEY: &str = "cleaner";
const CLEANER_MARK: &str = "01:00";
const LOG_RETENTION_DAYS: i64 = 5;

/// The narrow surface the admin API depends on; the engine implements it and
/// knows nothing about the API.
#[async_trait]
pub trait SyncerRegistry: Send + Sync {
    /// Build the live syncer for a conf and schedule it, replacing any
    /// syncer already registered under the same id.
    async fn register_syncer(&self, conf: SyncerConf) -> SyncerResult<()>;

    /// Drop the scheduled task and the live syncer for a conf.
    async fn unregister_syncer(&self, conf: &SyncerConf) -> SyncerResult<()>;
}

/// Owns the set of live syncers and their scheduled tasks, and runs the
/// per-fire protocol: cluster lock, start log, strategy dispatch, error log,
/// release.
pub struct SyncEngine<C, L, K, S> {
    inner: Arc<EngineInner<C, L, K, S>>,
}

impl<C, L, K, S> Clone for SyncEngine<C, L, K, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct EngineInner<C, L, K, S> {
    conf_repo: C,
    log_repo: L,
    lock_repo: K,
    projector: Arc<Projector<S>>,
    scheduler: Scheduler,
    syncers: Mutex<HashMap<String, Arc<dyn SourceAdapter>>>,
    batch_size: i64,
    max_workers: usize,
}

impl<C, L, K, S> SyncEngine<C, L, K, S>
where
    C: SyncerConfRepository + 'static,
    L: SyncerLogRepository + 'static,
    K: LockRepository + 'static,
    S: ContactStore + 'static,
{
    pub fn new(
        conf_repo: C,
        log_repo: L,
        lock_repo: K,
        store: S,
        scheduler: Scheduler,
        batch_size: i64,
        max_workers: usize,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                conf_repo,
                log_repo,
                lock_repo,
                projector: Arc::new(Projector::new(store)),
                scheduler,
                syncers: Mutex::new(HashMap::new()),
                batch_size,
                max_workers,
            }),
        }
    }

    /// Read every stored conf and build its adapter. A conf that fails to
    /// instantiate is logged and skipped; the rest still load.
    pub async fn load_syncers(&self) -> SyncerResult<()> {
        let confs = self.inner.conf_repo.get_all().await?;
        let mut loaded: HashMap<String, Arc<dyn SourceAdapter>> = HashMap::new();

        for conf in confs {
            if !conf.is_active {
                tracing::debug!(conf_id = %conf.id, "skipping inactive syncer");
                continue;
            }
            let conf_id = conf.id.clone();
            match new_adapter(conf).await {
                Ok(adapter) => {
                    loaded.insert(conf_id, adapter);
                }
                Err(err) => {
                    tracing::error!(conf_id = %conf_id, error = %err, "error instantiating syncer");
                }
            }
        }

        *self.inner.syncers.lock().expect("syncers mutex poisoned") = loaded;
        Ok(())
    }

    /// Schedule every loaded syncer at its marks and start the tick loop.
    pub fn start_syncers(&self) {
        let syncers = self
            .inner
            .syncers
            .lock()
            .expect("syncers mutex poisoned")
            .clone();

        for (conf_id, adapter) in syncers {
            let marks = adapter.conf().sync_rules.schedule_times.clone();
            self.add_sync_task(&conf_id, marks);
        }
        self.inner.scheduler.start();
    }

    /// Schedule the daily run-log retention task.
    pub fn start_log_cleaner(&self) {
        let inner = self.inner.clone();
        let run: TaskFn = Arc::new(move || {
            let inner = inner.clone();
            Box::pin(async move {
                EngineInner::run_log_cleaner(inner).await;
            })
        });
        self.inner
            .scheduler
            .add_task(CLEANER_TASK_KEY, [CLEANER_MARK.to_owned()], run);
    }

    /// Stop the scheduler and close every adapter. In-flight runs finish on
    /// their own tasks.
    pub async fn close(&self) {
        self.inner.scheduler.stop();

        let syncers: Vec<(String, Arc<dyn SourceAdapter>)> = self
            .inner
            .syncers
            .lock()
            .expect("syncers mutex poisoned")
            .drain()
            .collect();

        for (conf_id, adapter) in syncers {
            if let Err(err) = adapter.close().await {
                tracing::warn!(conf_id = %conf_id, error = %err, "error closing adapter");
            }
        }
    }

    /// The task body holds only the conf id; the live adapter is resolved
    /// from the registry when the mark fires, so re-registrations never leave
    /// a stale capture behind.
    fn add_sync_task(&self, conf_id: &str, marks: Vec<String>) {
        let inner = self.inner.clone();
        let task_conf_id = conf_id.to_owned();
        let run: TaskFn = Arc::new(move || {
            let inner = inner.clone();
            let conf_id = task_conf_id.clone();
            Box::pin(async move {
                EngineInner::run_syncer(inner, &conf_id).await;
            })
        });
        self.inner.scheduler.add_task(conf_id, marks, run);
    }
}

#[async_trait]
impl<C, L, K, S> SyncerRegistry for SyncEngine<C, L, K, S>
where
    C: SyncerConfRepository + 'static,
    L: SyncerLogRepository + 'static,
    K: LockRepository + 'static,
    S: ContactStore + 'static,
{
    async fn register_syncer(&self, conf: SyncerConf) -> SyncerResult<()> {
        let conf_id = conf.id.clone();
        let marks = conf.sync_rules.schedule_times.clone();
        let adapter = new_adapter(conf).await?;

        let replaced = self
            .inner
            .syncers
            .lock()
            .expect("syncers mutex poisoned")
            .insert(conf_id.clone(), adapter);
        self.add_sync_task(&conf_id, marks);

        if let Some(old) = replaced {
            if let Err(err) = old.close().await {
                tracing::warn!(conf_id = %conf_id, error = %err, "error closing replaced adapter");
            }
        }
        Ok(())
    }

    async fn unregister_syncer(&self, conf: &SyncerConf) -> SyncerResult<()> {
        self.inner.scheduler.remove_task(&conf.id);
        let removed = self
            .inner
            .syncers
            .lock()
            .expect("syncers mutex poisoned")
            .remove(&conf.id);

        if let Some(adapter) = removed {
            if let Err(err) = adapter.close().await {
                tracing::warn!(conf_id = %conf.id, error = %err, "error closing adapter");
            }
        }
        Ok(())
    }
}

impl<C, L, K, S> EngineInner<C, L, K, S>
where
    C: SyncerConfRepository + 'static,
    L: SyncerLogRepository + 'static,
    K: LockRepository + 'static,
    S: ContactStore + 'static,
{
    async fn run_syncer(inner: Arc<Self>, conf_id: &str) {
        let adapter = inner
            .syncers
            .lock()
            .expect("syncers mutex poisoned")
            .get(conf_id)
            .cloned();
        let adapter = match adapter {
            Some(adapter) => adapter,
            None => {
                tracing::warn!(conf_id, "task fired for an unregistered syncer");
                return;
            }
        };
        let conf = adapter.conf().clone();

        let guard = match inner.lock_repo.obtain(conf_id, LOCK_TTL).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                tracing::info!(conf_id, "sync still in progress");
                return;
            }
            Err(err) => {
                tracing::error!(conf_id, error = %err, "could not obtain lock");
                return;
            }
        };

        let started = Instant::now();
        let start_msg = format!(
            "start sync contact fields task for syncer {}({}), of type {}",
            conf.id,
            conf.service.name,
            conf.service.service_type.as_str()
        );
        tracing::info!(conf_id = %conf.id, service = %conf.service.name, "{start_msg}");
        if let Err(err) = inner
            .log_repo
            .create(SyncerLog::info(conf.sync_rules.org_id, &conf.id, start_msg))
            .await
        {
            tracing::error!(error = %err, "failed to create start info log");
        }

        let pipeline = SyncPipeline::new(
            inner.projector.clone(),
            inner.batch_size,
            inner.max_workers,
        );
        let report = pipeline.run(adapter).await;

        if let Some(err) = &report.error {
            tracing::error!(conf_id = %conf.id, error = %err, "failed to sync contact fields");
            if let Err(log_err) = inner
                .log_repo
                .create(SyncerLog::error(
                    conf.sync_rules.org_id,
                    &conf.id,
                    err.to_string(),
                ))
                .await
            {
                tracing::error!(error = %log_err, "failed to create error log");
            }
        }

        if let Err(err) = inner.lock_repo.release(guard).await {
            tracing::warn!(conf_id = %conf.id, error = %err, "error releasing lock");
        }

        tracing::info!(
            conf_id = %conf.id,
            service = %conf.service.name,
            synced = report.applied,
            elapsed = ?started.elapsed(),
            "sync run finished"
        );
    }

    async fn run_log_cleaner(inner: Arc<Self>) {
        let guard = match inner.lock_repo.obtain(CLEANER_TASK_KEY, LOCK_TTL).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                tracing::info!("cleaner task still in progress");
                return;
            }
            Err(err) => {
                tracing::error!(error = %err, "could not obtain cleaner lock");
                return;
            }
        };

        let cutoff = Utc::now() - chrono::Duration::days(LOG_RETENTION_DAYS);
        match inner.log_repo.delete_older_than(cutoff).await {
            Ok(deleted) => {
                tracing::info!(deleted, %cutoff, "deleted logs older than retention limit");
            }
            Err(err) => {
                tracing::error!(error = %err, "error deleting older logs");
            }
        }

        if let Err(err) = inner.lock_repo.release(guard).await {
            tracing::warn!(error = %err, "error releasing cleaner lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{row, sample_conf, MemoryContactStore, MockAdapter};
    use chrono::{DateTime, Utc};
    use fieldsync_common::error::SyncerError;
    use fieldsync_db::conf::models::ServiceType;
    use fieldsync_db::lock::repositories::LockGuard;
    use serde_json::json;
    use uuid::Uuid;

    // ── In-memory repositories ──────────────────────────────────

    #[derive(Clone, Default)]
    struct MemoryConfRepo {
        confs: Arc<Mutex<Vec<SyncerConf>>>,
    }

    #[async_trait]
    impl SyncerConfRepository for MemoryConfRepo {
        async fn create(&self, mut conf: SyncerConf) -> SyncerResult<SyncerConf> {
            if conf.id.is_empty() {
                conf.id = Uuid::new_v4().to_string();
            }
            self.confs.lock().unwrap().push(conf.clone());
            Ok(conf)
        }

        async fn get_by_id(&self, id: &str) -> SyncerResult<Option<SyncerConf>> {
            Ok(self
                .confs
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.id == id)
                .cloned())
        }

        async fn get_by_org_id(&self, org_id: i64) -> SyncerResult<Vec<SyncerConf>> {
            Ok(self
                .confs
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.sync_rules.org_id == org_id)
                .cloned()
                .collect())
        }

        async fn get_all(&self) -> SyncerResult<Vec<SyncerConf>> {
            Ok(self.confs.lock().unwrap().clone())
        }

        async fn update(&self, id: &str, conf: SyncerConf) -> SyncerResult<()> {
            let mut confs = self.confs.lock().unwrap();
            match confs.iter_mut().find(|c| c.id == id) {
                Some(existing) => {
                    *existing = conf;
                    Ok(())
                }
                None => Err(SyncerError::NotFound(id.to_owned())),
            }
        }

        async fn delete(&self, id: &str) -> SyncerResult<()> {
            self.confs.lock().unwrap().retain(|c| c.id != id);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct MemoryLogRepo {
        logs: Arc<Mutex<Vec<SyncerLog>>>,
        cutoffs: Arc<Mutex<Vec<DateTime<Utc>>>>,
    }

    impl MemoryLogRepo {
        fn logs(&self) -> Vec<SyncerLog> {
            self.logs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SyncerLogRepository for MemoryLogRepo {
        async fn create(&self, log: SyncerLog) -> SyncerResult<()> {
            self.logs.lock().unwrap().push(log);
            Ok(())
        }

        async fn get_by_id(&self, id: Uuid) -> SyncerResult<Option<SyncerLog>> {
            Ok(self.logs.lock().unwrap().iter().find(|l| l.id == id).cloned())
        }

        async fn update(&self, _id: Uuid, _log: SyncerLog) -> SyncerResult<()> {
            Ok(())
        }

        async fn delete(&self, id: Uuid) -> SyncerResult<()> {
            self.logs.lock().unwrap().retain(|l| l.id != id);
            Ok(())
        }

        async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> SyncerResult<u64> {
            self.cutoffs.lock().unwrap().push(cutoff);
            let mut logs = self.logs.lock().unwrap();
            let before = logs.len();
            logs.retain(|l| l.created_at >= cutoff);
            Ok((before - logs.len()) as u64)
        }
    }

    #[derive(Clone, Default)]
    struct MemoryLockRepo {
        busy: bool,
        obtained: Arc<Mutex<Vec<String>>>,
        released: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LockRepository for MemoryLockRepo {
        async fn obtain(&self, key: &str, _ttl: Duration) -> SyncerResult<Option<LockGuard>> {
            if self.busy {
                return Ok(None);
            }
            self.obtained.lock().unwrap().push(key.to_owned());
            Ok(Some(LockGuard {
                key: key.to_owned(),
                holder: Uuid::new_v4(),
            }))
        }

        async fn release(&self, guard: LockGuard) -> SyncerResult<()> {
            self.released.lock().unwrap().push(guard.key);
            Ok(())
        }
    }

    type TestEngine = SyncEngine<MemoryConfRepo, MemoryLogRepo, MemoryLockRepo, MemoryContactStore>;

    struct Harness {
        engine: TestEngine,
        conf_repo: MemoryConfRepo,
        log_repo: MemoryLogRepo,
        lock_repo: MemoryLockRepo,
        store: MemoryContactStore,
    }

    fn harness_with(lock_repo: MemoryLockRepo, store: MemoryContactStore) -> Harness {
        let conf_repo = MemoryConfRepo::default();
        let log_repo = MemoryLogRepo::default();
        let engine = SyncEngine::new(
            conf_repo.clone(),
            log_repo.clone(),
            lock_repo.clone(),
            store.clone(),
            Scheduler::new(),
            999,
            4,
        );
        Harness {
            engine,
            conf_repo,
            log_repo,
            lock_repo,
            store,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryLockRepo::default(), MemoryContactStore::new())
    }

    fn insert_mock_syncer(engine: &TestEngine, conf: SyncerConf, rows: Vec<crate::adapter::SourceRow>) {
        let adapter = MockAdapter::new(conf.clone(), rows);
        engine
            .inner
            .syncers
            .lock()
            .unwrap()
            .insert(conf.id.clone(), Arc::new(adapter));
    }

    #[tokio::test]
    async fn load_syncers_builds_adapters_for_active_confs() {
        let h = harness();
        h.conf_repo.create(sample_conf(ServiceType::Sql)).await.unwrap();
        let mut inactive = sample_conf(ServiceType::Sql);
        inactive.id = "conf-inactive".to_owned();
        inactive.is_active = false;
        h.conf_repo.create(inactive).await.unwrap();

        h.engine.load_syncers().await.expect("load");

        let syncers = h.engine.inner.syncers.lock().unwrap();
        assert_eq!(syncers.len(), 1);
        assert!(syncers.contains_key("conf-test"));
    }

    #[tokio::test]
    async fn run_writes_start_log_and_releases_lock() {
        let h = harness_with(
            MemoryLockRepo::default(),
            MemoryContactStore::new().with_contact("U1"),
        );
        let conf = sample_conf(ServiceType::Sql);
        insert_mock_syncer(
            &h.engine,
            conf.clone(),
            vec![row(&[
                ("uuid", json!("U1")),
                ("region", json!("north")),
                ("score", json!(3)),
            ])],
        );

        EngineInner::run_syncer(h.engine.inner.clone(), &conf.id).await;

        let logs = h.log_repo.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].log_type, "info");
        assert!(logs[0].details.starts_with("start sync contact fields task"));
        assert_eq!(logs[0].org_id, 1);

        assert_eq!(*h.lock_repo.obtained.lock().unwrap(), vec![conf.id.clone()]);
        assert_eq!(*h.lock_repo.released.lock().unwrap(), vec![conf.id.clone()]);

        // The run actually projected the row.
        let field = h.store.field_by_key(1, "region").expect("field created");
        assert_eq!(
            h.store.contact_field_value("U1", field.uuid).as_deref(),
            Some("north")
        );
    }

    #[tokio::test]
    async fn busy_lock_skips_the_run_without_logging() {
        let lock_repo = MemoryLockRepo {
            busy: true,
            ..Default::default()
        };
        let h = harness_with(lock_repo, MemoryContactStore::new());
        let conf = sample_conf(ServiceType::Sql);
        insert_mock_syncer(&h.engine, conf.clone(), vec![]);

        EngineInner::run_syncer(h.engine.inner.clone(), &conf.id).await;

        assert!(h.log_repo.logs().is_empty());
        assert!(h.lock_repo.released.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_run_writes_an_error_log_and_still_releases() {
        let h = harness();
        let conf = sample_conf(ServiceType::Sql);
        let mut adapter = MockAdapter::new(conf.clone(), vec![]);
        adapter.fail_total = true;
        h.engine
            .inner
            .syncers
            .lock()
            .unwrap()
            .insert(conf.id.clone(), Arc::new(adapter));

        EngineInner::run_syncer(h.engine.inner.clone(), &conf.id).await;

        let logs = h.log_repo.logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].log_type, "error");
        assert!(logs[1].details.contains("mock count failure"));
        assert_eq!(h.lock_repo.released.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_conf_id_is_ignored() {
        let h = harness();
        EngineInner::run_syncer(h.engine.inner.clone(), "nope").await;
        assert!(h.log_repo.logs().is_empty());
        assert!(h.lock_repo.obtained.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn register_and_unregister_manage_task_and_syncer() {
        let h = harness();
        let conf = sample_conf(ServiceType::Sql);

        h.engine.register_syncer(conf.clone()).await.expect("register");
        assert_eq!(h.engine.inner.scheduler.task_count(), 1);
        assert!(h.engine.inner.syncers.lock().unwrap().contains_key(&conf.id));

        // Re-registering the same id replaces, not duplicates.
        h.engine.register_syncer(conf.clone()).await.expect("re-register");
        assert_eq!(h.engine.inner.scheduler.task_count(), 1);

        h.engine.unregister_syncer(&conf).await.expect("unregister");
        assert_eq!(h.engine.inner.scheduler.task_count(), 0);
        assert!(h.engine.inner.syncers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn register_rejects_invalid_confs() {
        let h = harness();
        let mut conf = sample_conf(ServiceType::Sql);
        conf.sync_rules.schedule_times = vec!["99:99".to_owned()];

        let err = h.engine.register_syncer(conf).await.unwrap_err();
        assert!(matches!(err, SyncerError::Validation(_)));
        assert_eq!(h.engine.inner.scheduler.task_count(), 0);
    }

    #[tokio::test]
    async fn cleaner_deletes_logs_older_than_retention() {
        let h = harness();

        let mut stale = SyncerLog::info(1, "c", "old");
        stale.created_at = Utc::now() - chrono::Duration::days(6);
        let fresh = SyncerLog::info(1, "c", "new");
        h.log_repo.create(stale).await.unwrap();
        h.log_repo.create(fresh).await.unwrap();

        EngineInner::run_log_cleaner(h.engine.inner.clone()).await;

        let logs = h.log_repo.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].details, "new");

        let cutoffs = h.log_repo.cutoffs.lock().unwrap();
        assert_eq!(cutoffs.len(), 1);
        let age = Utc::now() - cutoffs[0];
        assert!((age.num_days() - LOG_RETENTION_DAYS).abs() <= 1);

        assert_eq!(
            *h.lock_repo.obtained.lock().unwrap(),
            vec![CLEANER_TASK_KEY.to_owned()]
        );
    }

    #[tokio::test]
    async fn cleaner_skips_when_lock_is_busy() {
        let lock_repo = MemoryLockRepo {
            busy: true,
            ..Default::default()
        };
        let h = harness_with(lock_repo, MemoryContactStore::new());

        let mut stale = SyncerLog::info(1, "c", "old");
        stale.created_at = Utc::now() - chrono::Duration::days(6);
        h.log_repo.create(stale).await.unwrap();

        EngineInner::run_log_cleaner(h.engine.inner.clone()).await;

        assert_eq!(h.log_repo.logs().len(), 1);
        assert!(h.log_repo.cutoffs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_stops_scheduler_and_drains_syncers() {
        let h = harness();
        let conf = sample_conf(ServiceType::Sql);
        insert_mock_syncer(&h.engine, conf, vec![]);

        h.engine.close().await;
        assert!(h.engine.inner.syncers.lock().unwrap().is_empty());
    }
}

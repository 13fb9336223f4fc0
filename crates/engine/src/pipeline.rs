use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::adapter::SourceAdapter;
use crate::projector::Projector;
use fieldsync_common::error::{SyncerError, SyncerResult};
use fieldsync_db::conf::models::{Strategy, SyncerConf};
use fieldsync_db::contacts::repositories::ContactStore;

const BATCH_QUERY_TIMEOUT: Duration = Duration::from_secs(600);

/// Outcome of one syncer run: rows fetched, rows applied, and the first
/// error if any batch failed. Counts are valid either way.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub applied: usize,
    pub rows: usize,
    pub error: Option<SyncerError>,
}

impl SyncReport {
    fn failed(error: SyncerError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct Progress {
    applied: usize,
    rows: usize,
}

/// Drives one syncer run: computes the work windows for the configured
/// strategy, dispatches semaphore-bounded batch workers, and aggregates
/// their counts.
pub struct SyncPipeline<S> {
    projector: Arc<Projector<S>>,
    batch_size: i64,
    max_workers: usize,
}

impl<S: ContactStore + 'static> SyncPipeline<S> {
    pub fn new(projector: Arc<Projector<S>>, batch_size: i64, max_workers: usize) -> Self {
        Self {
            projector,
            batch_size,
            max_workers: max_workers.max(1),
        }
    }

    pub async fn run(&self, adapter: Arc<dyn SourceAdapter>) -> SyncReport {
        match adapter.conf().sync_rules.strategy {
            Strategy::Pull => self.run_pull(adapter).await,
            Strategy::ContactUrn => self.run_contact_urn(adapter).await,
        }
    }

    /// Source-driven pagination: window `[0, total_rows)` by offset.
    pub async fn run_pull(&self, adapter: Arc<dyn SourceAdapter>) -> SyncReport {
        let conf = adapter.conf().clone();
        let total = match adapter.total_rows().await {
            Ok(total) => total,
            Err(err) => return SyncReport::failed(err),
        };
        if total <= 0 {
            return SyncReport::default();
        }

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let progress = Arc::new(Mutex::new(Progress::default()));
        let started = Instant::now();
        let mut workers = Vec::new();

        let mut offset = 0;
        while offset < total {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
            workers.push(self.spawn_batch_worker(
                adapter.clone(),
                conf.clone(),
                progress.clone(),
                started,
                total as usize,
                offset,
                self.batch_size,
                Vec::new(),
                permit,
            ));

            if self.batch_size <= 0 {
                break;
            }
            offset += self.batch_size;
        }

        join_workers(workers, &progress).await
    }

    /// Destination-driven enumeration: the active URN paths for the conf's
    /// org and scheme are windowed into `IN (…)` queries.
    pub async fn run_contact_urn(&self, adapter: Arc<dyn SourceAdapter>) -> SyncReport {
        let conf = adapter.conf().clone();
        let schema = match conf.sync_rules.schema.clone() {
            Some(schema) => schema,
            None => {
                return SyncReport::failed(SyncerError::Config(
                    "contact_urn strategy requires a schema".to_owned(),
                ))
            }
        };

        let paths = match self
            .projector
            .store()
            .active_urn_paths(conf.sync_rules.org_id, &schema)
            .await
        {
            Ok(paths) => paths,
            Err(err) => return SyncReport::failed(err),
        };
        let total = paths.len();
        if total == 0 {
            return SyncReport::default();
        }

        let step = if self.batch_size <= 0 {
            total
        } else {
            self.batch_size as usize
        };

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let progress = Arc::new(Mutex::new(Progress::default()));
        let started = Instant::now();
        let mut workers = Vec::new();

        let mut offset = 0;
        while offset < total {
            let end = (offset + step).min(total);
            let window = paths[offset..end].to_vec();
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
            workers.push(self.spawn_batch_worker(
                adapter.clone(),
                conf.clone(),
                progress.clone(),
                started,
                total,
                0,
                0,
                window,
                permit,
            ));
            offset = end;
        }

        join_workers(workers, &progress).await
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_batch_worker(
        &self,
        adapter: Arc<dyn SourceAdapter>,
        conf: SyncerConf,
        progress: Arc<Mutex<Progress>>,
        started: Instant,
        total: usize,
        offset: i64,
        limit: i64,
        in_list: Vec<String>,
        permit: OwnedSemaphorePermit,
    ) -> JoinHandle<SyncerResult<()>> {
        let projector = self.projector.clone();

        tokio::spawn(async move {
            let _permit = permit;

            let query = adapter.generate_query(offset, limit, &in_list)?;
            let rows = match tokio::time::timeout(BATCH_QUERY_TIMEOUT, adapter.execute(&query)).await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(SyncerError::Transient("batch query timed out".to_owned()))
                }
            };

            let fetched = rows.len();
            let (applied, apply_err) = projector.apply(&conf, &rows).await;

            let rows_done = {
                let mut progress = progress.lock().expect("progress mutex poisoned");
                progress.applied += applied;
                progress.rows += fetched;
                progress.rows
            };
            log_progress(&conf, rows_done, total, started);

            match apply_err {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }
}

async fn join_workers(
    workers: Vec<JoinHandle<SyncerResult<()>>>,
    progress: &Arc<Mutex<Progress>>,
) -> SyncReport {
    let mut error = None;
    for worker in workers {
        match worker.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(error = %err, "batch worker failed");
                error.get_or_insert(err);
            }
            Err(join_err) => {
                error.get_or_insert(SyncerError::Internal(format!(
                    "batch worker panicked: {join_err}"
                )));
            }
        }
    }

    let progress = progress.lock().expect("progress mutex poisoned");
    SyncReport {
        applied: progress.applied,
        rows: progress.rows,
        error,
    }
}

fn log_progress(conf: &SyncerConf, done: usize, total: usize, started: Instant) {
    if done == 0 || total == 0 {
        return;
    }
    let percent = done as f64 / total as f64 * 100.0;
    let elapsed = started.elapsed();
    let eta = elapsed.mul_f64((total - done) as f64 / done as f64);
    tracing::info!(
        conf_id = %conf.id,
        service = %conf.service.name,
        percent = format_args!("{percent:.2}"),
        elapsed = ?elapsed,
        eta = ?eta,
        "sync progress"
    );
}

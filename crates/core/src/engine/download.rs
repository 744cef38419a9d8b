//! The download engine: job submission, control and the worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::config::EngineConfig;
use super::runner::{EngineShared, JobHandle};
use super::types::{CancelAck, EngineError, PoolStatus};
use crate::converter::Converter;
use crate::events::{EventLog, EventPayload, EventSubscription};
use crate::fetcher::Fetcher;
use crate::job::{Job, JobId, JobRequest, JobStatus};
use crate::metrics;
use crate::placer::FsPlacer;
use crate::postprocess::Postprocessor;

type JobQueue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<JobId>>>;

/// Runs download jobs on a fixed pool of workers.
///
/// Jobs are accepted with [`submit`](Self::submit), wait `Queued` until one
/// of the `max_concurrent_jobs` workers picks them up, and report every
/// state change through their event log.
pub struct DownloadEngine<F: Fetcher + 'static, C: Converter + 'static> {
    shared: Arc<EngineShared<F, C>>,
    queue: Mutex<Option<mpsc::UnboundedSender<JobId>>>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    stop_token: Mutex<CancellationToken>,
    running: AtomicBool,
}

impl<F: Fetcher + 'static, C: Converter + 'static> DownloadEngine<F, C> {
    /// Creates a stopped engine.
    pub fn new(config: EngineConfig, fetcher: Arc<F>, converter: Arc<C>) -> Self {
        let postprocessor = Postprocessor::new(converter, Arc::new(FsPlacer::new()));
        Self {
            shared: Arc::new(EngineShared::new(config, fetcher, postprocessor)),
            queue: Mutex::new(None),
            workers: tokio::sync::Mutex::new(Vec::new()),
            stop_token: Mutex::new(CancellationToken::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn fetcher(&self) -> &Arc<F> {
        &self.shared.fetcher
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Creates the work directory and spawns the workers.
    pub async fn start(&self) -> Result<(), EngineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Download engine already running");
            return Ok(());
        }

        let config = &self.shared.config;
        if let Err(e) = tokio::fs::create_dir_all(&config.work_dir).await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        let worker_count = config.max_concurrent_jobs.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let queue: JobQueue = Arc::new(tokio::sync::Mutex::new(rx));
        let shutdown = CancellationToken::new();

        let handles = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&self.shared),
                    Arc::clone(&queue),
                    shutdown.clone(),
                ))
            })
            .collect();

        *self.workers.lock().await = handles;
        *self.stop_token.lock().unwrap_or_else(PoisonError::into_inner) = shutdown;
        *self.queue.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);

        info!(
            workers = worker_count,
            work_dir = %config.work_dir.display(),
            "Download engine started"
        );
        Ok(())
    }

    /// Cancels every unfinished job and waits for the workers to stop.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Download engine not running");
            return;
        }

        info!("Stopping download engine");

        // Stop accepting jobs
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        for job in self.shared.registry.list() {
            if !job.is_terminal() {
                let _ = self.shared.request_cancel(job.id, "Engine shutting down");
            }
        }

        self.stop_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Worker task failed");
            }
        }

        info!("Download engine stopped");
    }

    /// Validates and enqueues a job. The profile is snapshotted here.
    pub fn submit(&self, request: JobRequest) -> Result<JobId, EngineError> {
        request.profile.validate()?;

        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = queue.as_ref().ok_or(EngineError::NotRunning)?;

        let id = JobId::new();
        let job = Job::new(id, request.source, request.profile);
        let handle = Arc::new(JobHandle::new(id, self.shared.config.event_log_capacity));
        handle.publish(EventPayload::status(JobStatus::Queued, None));

        info!(
            job_id = %id,
            source = %job.source,
            format = %job.profile.format,
            "Job submitted"
        );
        self.shared.registry.insert(job);
        self.shared.insert_handle(id, handle);

        if tx.send(id).is_err() {
            self.shared.registry.remove(&id);
            self.shared.remove_handle(&id);
            return Err(EngineError::NotRunning);
        }

        metrics::JOBS_SUBMITTED.inc();
        Ok(id)
    }

    /// Snapshot of one job.
    pub fn status(&self, id: JobId) -> Option<Job> {
        self.shared.registry.get(&id)
    }

    /// Snapshots of every job, in submission order.
    pub fn list(&self) -> Vec<Job> {
        self.shared.registry.list()
    }

    /// Asks a job to stop.
    pub fn cancel(&self, id: JobId) -> Result<CancelAck, EngineError> {
        self.shared.request_cancel(id, "Cancelled by request")
    }

    /// A reader over the job's events, starting at the first one.
    pub fn subscribe(&self, id: JobId) -> Option<EventSubscription> {
        self.shared.handle(&id).map(|h| h.events.subscribe())
    }

    /// The job's event log, e.g. for polling [`EventLog::latest`].
    pub fn events(&self, id: JobId) -> Option<EventLog> {
        self.shared.handle(&id).map(|h| h.events.clone())
    }

    /// Resolves once the job is terminal.
    pub async fn wait(&self, id: JobId) -> Option<Job> {
        let mut subscription = self.subscribe(id)?;
        while subscription.next().await.is_some() {}
        self.status(id)
    }

    /// Forgets a finished job.
    pub fn evict(&self, id: JobId) -> Result<Job, EngineError> {
        let job = self
            .shared
            .registry
            .get(&id)
            .ok_or(EngineError::JobNotFound(id))?;
        if !job.is_terminal() {
            return Err(EngineError::JobActive(id));
        }
        self.shared.registry.remove(&id);
        self.shared.remove_handle(&id);
        debug!(job_id = %id, "Evicted job");
        Ok(job)
    }

    /// Forgets every finished job, returning their ids.
    pub fn clear_finished(&self) -> Vec<JobId> {
        let removed = self.shared.registry.remove_where(|job| job.is_terminal());
        for id in &removed {
            self.shared.remove_handle(id);
        }
        removed
    }

    pub fn pool_status(&self) -> PoolStatus {
        let queued = self
            .shared
            .registry
            .list()
            .iter()
            .filter(|job| job.status == JobStatus::Queued)
            .count();
        self.shared
            .stats
            .to_status(self.shared.config.max_concurrent_jobs.max(1), queued)
    }
}

/// One worker: takes the next job off the shared queue and runs it.
async fn worker_loop<F: Fetcher + 'static, C: Converter + 'static>(
    worker_id: usize,
    shared: Arc<EngineShared<F, C>>,
    queue: JobQueue,
    shutdown: CancellationToken,
) {
    debug!(worker_id, "Worker started");
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            id = async { queue.lock().await.recv().await } => id,
        };
        let Some(id) = next else {
            break;
        };

        let span = info_span!("job", job_id = %id, worker_id);
        shared.run_job(id).instrument(span).await;
    }
    debug!(worker_id, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::AudioFormat;
    use crate::engine::RetryConfig;
    use crate::fetcher::{Provider, SourceRef};
    use crate::job::OutputProfile;
    use crate::testing::{fixtures, MockConverter, MockFetcher};
    use tempfile::TempDir;

    fn engine(dir: &TempDir, workers: usize) -> DownloadEngine<MockFetcher, MockConverter> {
        let config = EngineConfig::default()
            .with_max_concurrent_jobs(workers)
            .with_work_dir(dir.path().join("work"))
            .with_retry(RetryConfig::immediate(2));
        DownloadEngine::new(
            config,
            Arc::new(MockFetcher::new()),
            Arc::new(MockConverter::new()),
        )
    }

    fn request(dir: &TempDir) -> JobRequest {
        JobRequest::new(
            SourceRef::parse("daft punk veridis quo", Provider::SoundCloud),
            fixtures::profile(&dir.path().join("out"), AudioFormat::Mp3, 192),
        )
    }

    #[tokio::test]
    async fn test_submit_requires_running_engine() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 1);
        assert!(matches!(
            engine.submit(request(&dir)),
            Err(EngineError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_profile() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 1);
        engine.start().await.unwrap();

        let mut req = request(&dir);
        req.profile = OutputProfile {
            bitrate_kbps: 64,
            ..req.profile
        };
        assert!(matches!(
            engine.submit(req),
            Err(EngineError::UnsupportedFormat(_))
        ));
        assert!(engine.list().is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_and_evict() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 2);
        engine.start().await.unwrap();

        let id = engine.submit(request(&dir)).unwrap();
        let job = engine.wait(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(engine.pool_status().processed, 1);
        assert_eq!(engine.cancel(id).unwrap(), CancelAck::AlreadyFinished);

        let evicted = engine.evict(id).unwrap();
        assert_eq!(evicted.id, id);
        assert!(engine.status(id).is_none());
        assert!(matches!(engine.evict(id), Err(EngineError::JobNotFound(_))));
        assert!(matches!(
            engine.cancel(id),
            Err(EngineError::JobNotFound(_))
        ));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_evict_rejects_unfinished_job() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 1);
        engine.start().await.unwrap();
        engine
            .fetcher()
            .set_step_delay(std::time::Duration::from_millis(200))
            .await;

        let id = engine.submit(request(&dir)).unwrap();
        assert!(matches!(engine.evict(id), Err(EngineError::JobActive(_))));
        engine.shutdown().await;

        let job = engine.status(id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(engine.clear_finished(), vec![id]);
        assert!(engine.list().is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_and_restart() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 1);
        engine.start().await.unwrap();
        engine.start().await.unwrap();
        assert!(engine.is_running());
        assert_eq!(engine.pool_status().workers, 1);

        engine.shutdown().await;
        assert!(!engine.is_running());
        assert!(engine.submit(request(&dir)).is_err());

        engine.start().await.unwrap();
        let id = engine.submit(request(&dir)).unwrap();
        assert_eq!(
            engine.wait(id).await.unwrap().status,
            JobStatus::Completed
        );
        engine.shutdown().await;
    }
}

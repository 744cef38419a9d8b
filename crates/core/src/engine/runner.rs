//! Job execution: everything a worker does with one job.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::EngineConfig;
use super::progress::ProgressTracker;
use super::retry::with_retry;
use super::types::{CancelAck, EngineError, PoolStats};
use crate::converter::Converter;
use crate::events::{event_channel, EventLog, EventPayload, EventPublisher};
use crate::fetcher::{FetchError, FetchRequest, FetchedMedia, Fetcher, RawProgress, SourceMetadata};
use crate::job::{ErrorKind, Job, JobError, JobId, JobRegistry, JobStatus, TransitionError};
use crate::metrics;
use crate::postprocess::{
    PostprocessError, PostprocessObserver, PostprocessOutcome, PostprocessPlan, Postprocessor,
};

/// Runtime companions of a registered job.
pub(crate) struct JobHandle {
    pub(crate) token: CancellationToken,
    pub(crate) events: EventLog,
    /// Taken when the terminal event is published.
    publisher: Mutex<Option<EventPublisher>>,
}

impl JobHandle {
    pub(crate) fn new(id: JobId, capacity_hint: usize) -> Self {
        let (publisher, events) = event_channel(id, capacity_hint);
        Self {
            token: CancellationToken::new(),
            events,
            publisher: Mutex::new(Some(publisher)),
        }
    }

    pub(crate) fn publish(&self, payload: EventPayload) -> Option<u64> {
        let publisher = self.publisher.lock().unwrap_or_else(PoisonError::into_inner);
        publisher.as_ref()?.publish(payload)
    }

    /// Publishes the terminal event and closes the log.
    fn finish(&self, payload: EventPayload) {
        let publisher = self
            .publisher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(publisher) = publisher {
            publisher.publish(payload);
            publisher.close();
        }
    }

    /// Closes the log without a terminal event so waiters are released.
    fn abandon(&self) {
        let publisher = self
            .publisher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(publisher) = publisher {
            publisher.close();
        }
    }
}

/// How a job ended when it did not complete.
#[derive(Debug)]
pub(crate) enum RunFailure {
    Cancelled,
    Failed(JobError),
}

impl From<FetchError> for RunFailure {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Cancelled => Self::Cancelled,
            e => Self::Failed(JobError::new(e.kind(), e.to_string())),
        }
    }
}

impl From<PostprocessError> for RunFailure {
    fn from(e: PostprocessError) -> Self {
        match e {
            PostprocessError::Cancelled => Self::Cancelled,
            e => Self::Failed(JobError::new(e.kind(), e.to_string())),
        }
    }
}

/// Moves a job to `status` and announces it. Illegal moves are logged and
/// dropped.
fn advance(registry: &JobRegistry, handle: &JobHandle, id: JobId, status: JobStatus) -> bool {
    match registry.update(&id, |job| job.transition(status)) {
        Some(Ok(())) => {
            handle.publish(EventPayload::status(status, None));
            true
        }
        Some(Err(e)) => {
            warn!(job_id = %id, error = %e, "Rejected job transition");
            false
        }
        None => false,
    }
}

/// Feeds postprocess steps and warnings into the registry and event log.
struct JobObserver<'a> {
    id: JobId,
    registry: &'a JobRegistry,
    handle: &'a JobHandle,
}

impl PostprocessObserver for JobObserver<'_> {
    fn on_step(&self, status: JobStatus) {
        advance(self.registry, self.handle, self.id, status);
    }

    fn on_warning(&self, message: &str) {
        self.registry.update(&self.id, |job| job.warn(message));
        self.handle.publish(EventPayload::Warning {
            message: message.to_string(),
        });
    }
}

/// State shared by the engine front and its workers.
pub(crate) struct EngineShared<F, C: Converter> {
    pub(crate) config: EngineConfig,
    pub(crate) fetcher: Arc<F>,
    pub(crate) postprocessor: Postprocessor<C>,
    pub(crate) registry: JobRegistry,
    handles: RwLock<HashMap<JobId, Arc<JobHandle>>>,
    pub(crate) stats: PoolStats,
}

impl<F: Fetcher, C: Converter> EngineShared<F, C> {
    pub(crate) fn new(config: EngineConfig, fetcher: Arc<F>, postprocessor: Postprocessor<C>) -> Self {
        Self {
            config,
            fetcher,
            postprocessor,
            registry: JobRegistry::new(),
            handles: RwLock::new(HashMap::new()),
            stats: PoolStats::default(),
        }
    }

    pub(crate) fn handle(&self, id: &JobId) -> Option<Arc<JobHandle>> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub(crate) fn insert_handle(&self, id: JobId, handle: Arc<JobHandle>) {
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);
    }

    pub(crate) fn remove_handle(&self, id: &JobId) {
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Signals a job to stop. A job still waiting in the queue is finished
    /// on the spot; a running one is finished by its worker.
    pub(crate) fn request_cancel(&self, id: JobId, reason: &str) -> Result<CancelAck, EngineError> {
        let handle = self.handle(&id).ok_or(EngineError::JobNotFound(id))?;

        let state = self
            .registry
            .update(&id, |job| {
                if job.is_terminal() {
                    None
                } else {
                    let was_queued = job.status == JobStatus::Queued;
                    if was_queued {
                        // Queued -> Cancelled is always legal.
                        let _ = job.transition(JobStatus::Cancelled);
                    }
                    Some(was_queued)
                }
            })
            .ok_or(EngineError::JobNotFound(id))?;

        match state {
            None => Ok(CancelAck::AlreadyFinished),
            Some(was_queued) => {
                handle.token.cancel();
                if was_queued {
                    self.record_outcome("cancelled");
                    handle.finish(EventPayload::Cancelled {
                        message: reason.to_string(),
                    });
                    info!(job_id = %id, "Cancelled queued job");
                } else {
                    info!(job_id = %id, "Cancellation requested");
                }
                Ok(CancelAck::Requested)
            }
        }
    }

    fn record_outcome(&self, outcome: &str) {
        let counter = match outcome {
            "completed" | "degraded" => &self.stats.total_processed,
            "failed" => &self.stats.total_failed,
            _ => &self.stats.total_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::JOBS_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Runs one dequeued job to a terminal state.
    pub(crate) async fn run_job(&self, id: JobId) {
        let Some(handle) = self.handle(&id) else {
            debug!(job_id = %id, "Job was evicted before it started");
            return;
        };

        let started = self.registry.update(&id, |job| {
            if job.status == JobStatus::Queued {
                job.transition(JobStatus::Downloading).ok().map(|_| job.clone())
            } else {
                None
            }
        });
        let Some(Some(job)) = started else {
            debug!(job_id = %id, "Job no longer queued, skipping");
            return;
        };
        handle.publish(EventPayload::status(JobStatus::Downloading, None));

        self.stats.active.fetch_add(1, Ordering::Relaxed);
        metrics::JOBS_ACTIVE.inc();
        info!(
            job_id = %id,
            source = %job.source,
            format = %job.profile.format,
            "Job started"
        );

        let work_dir = self.config.work_dir.join(id.to_string());
        let outcome = self.execute(&job, &handle, &work_dir).await;
        remove_work_dir(id, &work_dir).await;

        self.stats.active.fetch_sub(1, Ordering::Relaxed);
        metrics::JOBS_ACTIVE.dec();
        self.finalize(id, &handle, outcome);
    }

    async fn execute(
        &self,
        job: &Job,
        handle: &JobHandle,
        work_dir: &Path,
    ) -> Result<PostprocessOutcome, RunFailure> {
        let id = job.id;
        let token = &handle.token;

        tokio::fs::create_dir_all(work_dir).await.map_err(|e| {
            RunFailure::Failed(JobError::new(
                ErrorKind::Io,
                format!("Failed to create work directory {}: {}", work_dir.display(), e),
            ))
        })?;

        let fetch_started = Instant::now();
        let fetched = self.resolve_and_fetch(job, handle, work_dir).await;
        let label = match &fetched {
            Ok(_) => "success",
            Err(FetchError::Cancelled) => "cancelled",
            Err(_) => "failed",
        };
        metrics::FETCH_DURATION
            .with_label_values(&[label])
            .observe(fetch_started.elapsed().as_secs_f64());
        let (metadata, media) = fetched?;

        if token.is_cancelled() {
            return Err(RunFailure::Cancelled);
        }
        debug!(
            job_id = %id,
            media = %media.media_path.display(),
            thumbnail = media.thumbnail_path.is_some(),
            "Fetched raw media"
        );

        let plan = PostprocessPlan {
            job_id: id,
            work_dir: work_dir.to_path_buf(),
            media,
            metadata,
            profile: job.profile.clone(),
        };
        let observer = JobObserver {
            id,
            registry: &self.registry,
            handle,
        };
        self.postprocessor
            .run(&plan, token, &observer)
            .await
            .map_err(RunFailure::from)
    }

    async fn resolve_and_fetch(
        &self,
        job: &Job,
        handle: &JobHandle,
        work_dir: &Path,
    ) -> Result<(SourceMetadata, FetchedMedia), FetchError> {
        let id = job.id;
        let token = &handle.token;
        let retry = &self.config.retry;
        let fetcher = &*self.fetcher;

        let metadata = with_retry(retry, token, id, "resolve", || fetcher.resolve(&job.source)).await?;
        info!(
            job_id = %id,
            title = %metadata.title,
            artist = %metadata.display_artist(),
            "Resolved source"
        );
        self.registry
            .update(&id, |job| job.metadata = Some(metadata.clone()));

        let request = FetchRequest {
            metadata: metadata.clone(),
            sink_dir: work_dir.join("fetch"),
            write_thumbnail: job.profile.wants_thumbnail(),
        };
        let tracker = Mutex::new(ProgressTracker::new());
        let on_progress = |raw: RawProgress| -> Result<(), FetchError> {
            if token.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let update = tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .update(&raw);
            if let Some(progress) = update {
                self.registry
                    .update(&id, |job| job.progress = progress.clone());
                handle.publish(EventPayload::Progress(progress));
            }
            Ok(())
        };

        let media = with_retry(retry, token, id, "fetch", || {
            fetcher.fetch(&request, &on_progress)
        })
        .await?;
        Ok((metadata, media))
    }

    /// Records the outcome, publishes the terminal event and closes the log.
    fn finalize(&self, id: JobId, handle: &JobHandle, outcome: Result<PostprocessOutcome, RunFailure>) {
        match outcome {
            Ok(done) => {
                let applied = self.registry.update(&id, |job| {
                    job.complete(done.path.clone())?;
                    job.degraded = done.degraded;
                    Ok::<_, TransitionError>(())
                });
                if let Some(Err(e)) = applied {
                    warn!(job_id = %id, error = %e, "Could not mark job completed");
                    handle.abandon();
                    return;
                }
                self.record_outcome(if done.degraded { "degraded" } else { "completed" });
                info!(
                    job_id = %id,
                    path = %done.path.display(),
                    degraded = done.degraded,
                    "Job completed"
                );
                handle.finish(EventPayload::Done {
                    path: done.path,
                    degraded: done.degraded,
                });
            }
            Err(RunFailure::Cancelled) => {
                let applied = self
                    .registry
                    .update(&id, |job| job.transition(JobStatus::Cancelled));
                if let Some(Err(e)) = applied {
                    warn!(job_id = %id, error = %e, "Could not mark job cancelled");
                    handle.abandon();
                    return;
                }
                self.record_outcome("cancelled");
                info!(job_id = %id, "Job cancelled");
                handle.finish(EventPayload::Cancelled {
                    message: "Cancelled by request".to_string(),
                });
            }
            Err(RunFailure::Failed(err)) => {
                let applied = self.registry.update(&id, |job| job.fail(err.clone()));
                if let Some(Err(e)) = applied {
                    warn!(job_id = %id, error = %e, "Could not mark job failed");
                    handle.abandon();
                    return;
                }
                self.record_outcome("failed");
                error!(job_id = %id, kind = %err.kind, error = %err.message, "Job failed");
                handle.finish(EventPayload::Error(err));
            }
        }
    }
}

async fn remove_work_dir(id: JobId, work_dir: &Path) {
    match tokio::fs::remove_dir_all(work_dir).await {
        Ok(()) => debug!(job_id = %id, "Removed work directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            job_id = %id,
            path = %work_dir.display(),
            error = %e,
            "Failed to remove work directory"
        ),
    }
}

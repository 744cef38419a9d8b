//! In-memory job registry.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::types::{Job, JobId};

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    order: Vec<JobId>,
}

/// Holds every known job, in submission order.
///
/// Uses a blocking lock so it can be updated from synchronous progress
/// callbacks. Critical sections never await.
#[derive(Default)]
pub struct JobRegistry {
    inner: RwLock<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.jobs.insert(job.id, job.clone()).is_none() {
            inner.order.push(job.id);
        }
    }

    /// Snapshot of one job.
    pub fn get(&self, id: &JobId) -> Option<Job> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.jobs.get(id).cloned()
    }

    /// Snapshots of all jobs in submission order.
    pub fn list(&self) -> Vec<Job> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .order
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect()
    }

    /// Runs `f` against the stored job. Returns `None` for unknown ids.
    pub fn update<R>(&self, id: &JobId, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.jobs.get_mut(id).map(f)
    }

    pub fn remove(&self, id: &JobId) -> Option<Job> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let job = inner.jobs.remove(id)?;
        inner.order.retain(|existing| existing != id);
        Some(job)
    }

    /// Removes every job matching `pred` and returns their ids.
    pub fn remove_where(&self, pred: impl Fn(&Job) -> bool) -> Vec<JobId> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let removed: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|job| pred(job))
            .map(|job| job.id)
            .collect();
        for id in &removed {
            inner.jobs.remove(id);
        }
        inner.order.retain(|id| !removed.contains(id));
        removed
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .jobs
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Per-job append-only event log.
//!
//! One [`EventPublisher`] appends; any number of [`EventSubscription`]s read
//! with their own cursor, so late subscribers still see every event from
//! `seq = 0`.

use chrono::Utc;
use futures::Stream;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use super::types::{EventPayload, ProgressEvent};
use crate::job::JobId;

struct State {
    events: Vec<ProgressEvent>,
    closed: bool,
}

struct Shared {
    job_id: JobId,
    state: Mutex<State>,
    notify: Notify,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates the publisher and the readable log for one job.
pub fn event_channel(job_id: JobId, capacity_hint: usize) -> (EventPublisher, EventLog) {
    let shared = Arc::new(Shared {
        job_id,
        state: Mutex::new(State {
            events: Vec::with_capacity(capacity_hint),
            closed: false,
        }),
        notify: Notify::new(),
    });
    (
        EventPublisher {
            shared: Arc::clone(&shared),
        },
        EventLog { shared },
    )
}

/// The single writer of a job's log. Closes the log when dropped.
pub struct EventPublisher {
    shared: Arc<Shared>,
}

impl EventPublisher {
    /// Appends an event and wakes subscribers. Returns its `seq`, or `None`
    /// if the log is already closed.
    pub fn publish(&self, payload: EventPayload) -> Option<u64> {
        let seq = {
            let mut state = self.shared.state();
            if state.closed {
                return None;
            }
            let seq = state.events.len() as u64;
            state.events.push(ProgressEvent {
                job_id: self.shared.job_id,
                seq,
                kind: payload.kind(),
                payload,
                timestamp: Utc::now(),
            });
            seq
        };
        self.shared.notify.notify_waiters();
        Some(seq)
    }

    /// Marks the log complete. Subscribers drain and then end.
    pub fn close(&self) {
        {
            let mut state = self.shared.state();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.shared.notify.notify_waiters();
    }
}

impl Drop for EventPublisher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read side of a job's event log.
#[derive(Clone)]
pub struct EventLog {
    shared: Arc<Shared>,
}

impl EventLog {
    pub fn job_id(&self) -> JobId {
        self.shared.job_id
    }

    /// A reader starting at the first event.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            shared: Arc::clone(&self.shared),
            cursor: 0,
        }
    }

    /// The most recent event, for pollers.
    pub fn latest(&self) -> Option<ProgressEvent> {
        self.shared.state().events.last().cloned()
    }

    /// Every event so far.
    pub fn snapshot(&self) -> Vec<ProgressEvent> {
        self.shared.state().events.clone()
    }

    pub fn len(&self) -> usize {
        self.shared.state().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state().closed
    }
}

/// A cursor over a job's events.
pub struct EventSubscription {
    shared: Arc<Shared>,
    cursor: usize,
}

impl EventSubscription {
    /// Next event in order. `None` once the log is closed and drained.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        let shared = Arc::clone(&self.shared);
        loop {
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a publish in between is not missed.
            notified.as_mut().enable();

            match self.try_next() {
                Ok(event) => return event,
                Err(()) => notified.await,
            }
        }
    }

    /// `Ok(Some)` for a ready event, `Ok(None)` at the end, `Err` if the
    /// caller has to wait.
    fn try_next(&mut self) -> Result<Option<ProgressEvent>, ()> {
        let state = self.shared.state();
        if let Some(event) = state.events.get(self.cursor) {
            self.cursor += 1;
            return Ok(Some(event.clone()));
        }
        if state.closed {
            Ok(None)
        } else {
            Err(())
        }
    }

    /// Events already available, without waiting.
    pub fn drain_ready(&mut self) -> Vec<ProgressEvent> {
        let mut out = Vec::new();
        while let Ok(Some(event)) = self.try_next() {
            out.push(event);
        }
        out
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|event| (event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::job::{JobProgress, JobStatus};
    use futures::StreamExt;
    use std::time::Duration;

    fn status(s: JobStatus) -> EventPayload {
        EventPayload::status(s, None)
    }

    #[tokio::test]
    async fn test_seq_starts_at_zero_and_increases() {
        let (publisher, log) = event_channel(JobId::new(), 8);
        assert_eq!(publisher.publish(status(JobStatus::Queued)), Some(0));
        assert_eq!(publisher.publish(status(JobStatus::Downloading)), Some(1));
        assert_eq!(log.len(), 2);
        assert_eq!(log.latest().unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_replays_history() {
        let (publisher, log) = event_channel(JobId::new(), 8);
        publisher.publish(status(JobStatus::Queued));
        publisher.publish(EventPayload::Progress(JobProgress::default()));
        drop(publisher);

        let events: Vec<_> = log.subscribe().into_stream().collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Status);
        assert_eq!(events[1].kind, EventKind::Progress);
    }

    #[tokio::test]
    async fn test_subscribers_see_live_events_in_order() {
        let (publisher, log) = event_channel(JobId::new(), 8);
        let mut first = log.subscribe();
        let mut second = log.subscribe();

        let producer = tokio::spawn(async move {
            for _ in 0..50 {
                publisher.publish(EventPayload::Progress(JobProgress::default()));
                tokio::task::yield_now().await;
            }
            publisher.close();
        });

        let reader = tokio::spawn(async move {
            let mut seqs = Vec::new();
            while let Some(event) = first.next().await {
                seqs.push(event.seq);
            }
            seqs
        });

        let mut other = Vec::new();
        while let Some(event) = second.next().await {
            other.push(event.seq);
        }
        producer.await.unwrap();
        let seqs = reader.await.unwrap();

        let expected: Vec<u64> = (0..50).collect();
        assert_eq!(seqs, expected);
        assert_eq!(other, expected);
    }

    #[tokio::test]
    async fn test_stream_ends_after_close_on_another_task() {
        let (publisher, log) = event_channel(JobId::new(), 4);
        let reader = tokio::spawn(log.subscribe().into_stream().collect::<Vec<_>>());

        tokio::task::yield_now().await;
        publisher.publish(status(JobStatus::Queued));
        publisher.publish(status(JobStatus::Downloading));
        publisher.close();

        let events = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_publish_after_close_is_rejected() {
        let (publisher, log) = event_channel(JobId::new(), 0);
        publisher.close();
        assert_eq!(publisher.publish(status(JobStatus::Queued)), None);
        assert!(log.is_closed());
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_next_waits_for_publish() {
        let (publisher, log) = event_channel(JobId::new(), 0);
        let mut sub = log.subscribe();
        assert!(sub.drain_ready().is_empty());

        let waiter = tokio::spawn(async move { sub.next().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        publisher.publish(status(JobStatus::Downloading));

        let event = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.seq, 0);
    }
}

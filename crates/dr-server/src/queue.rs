//! In-memory FIFO job queue.
//!
//! Unbounded. [`JobQueue::dequeue`] suspends the calling worker on a
//! [`Notify`] until a job is pushed; there is no polling.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use dr_core::{Callback, DocumentKind, JobId, TargetKey};

/// Everything a worker needs to process one admitted job.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: JobId,
    pub target_key: TargetKey,
    pub document_kind: DocumentKind,
    pub callback: Callback,
    pub payload: Bytes,
}

#[derive(Default)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<QueuedJob>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job and wake one waiting worker. Returns the queue depth
    /// including the new job.
    pub fn enqueue(&self, job: QueuedJob) -> usize {
        let depth = {
            let mut jobs = self.jobs.lock();
            jobs.push_back(job);
            jobs.len()
        };
        self.notify.notify_one();
        depth
    }

    /// Take the oldest job, waiting until one is available.
    ///
    /// Cancel-safe: dropping the future never loses a job.
    pub async fn dequeue(&self) -> QueuedJob {
        loop {
            if let Some(job) = self.try_dequeue() {
                return job;
            }
            self.notify.notified().await;
        }
    }

    pub fn try_dequeue(&self) -> Option<QueuedJob> {
        self.jobs.lock().pop_front()
    }

    pub fn size(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dr_core::EndpointVariant;
    use std::sync::Arc;
    use std::time::Duration;

    fn job(key: &str) -> QueuedJob {
        QueuedJob {
            id: JobId::new(),
            target_key: TargetKey::parse(key).unwrap(),
            document_kind: DocumentKind::Docx,
            callback: Callback::new("http://localhost:9", EndpointVariant::Callback),
            payload: Bytes::from_static(b"doc"),
        }
    }

    #[test]
    fn fifo_order_and_positions() {
        let queue = JobQueue::new();
        assert_eq!(queue.enqueue(job("a")), 1);
        assert_eq!(queue.enqueue(job("b")), 2);
        assert_eq!(queue.size(), 2);

        assert_eq!(queue.try_dequeue().unwrap().target_key.as_str(), "a");
        assert_eq!(queue.try_dequeue().unwrap().target_key.as_str(), "b");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn dequeue_waits_for_enqueue() {
        let queue = Arc::new(JobQueue::new());

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        queue.enqueue(job("late"));
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.target_key.as_str(), "late");
    }

    #[tokio::test]
    async fn every_waiter_gets_a_job() {
        let queue = Arc::new(JobQueue::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.dequeue().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        for key in ["x", "y", "z"] {
            queue.enqueue(job(key));
        }

        let mut keys = Vec::new();
        for waiter in waiters {
            let job = tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
            keys.push(job.target_key.as_str().to_string());
        }
        keys.sort();
        assert_eq!(keys, ["x", "y", "z"]);
    }

    #[tokio::test]
    async fn cancelled_dequeue_loses_nothing() {
        let queue = JobQueue::new();
        let _ = tokio::time::timeout(Duration::from_millis(10), queue.dequeue()).await;

        queue.enqueue(job("kept"));
        assert_eq!(queue.dequeue().await.target_key.as_str(), "kept");
    }
}

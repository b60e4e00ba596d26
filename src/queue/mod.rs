//! Job Queue (C7): bounded priority queue of pipeline jobs with cancellation
//! tokens, ordered by (priority desc, submitted-at asc).
//!
//! Generalized from the teacher's `WorkQueue` trait (count/fetch_batch/claim/
//! complete/fail over DB rows) to an in-memory `BinaryHeap` behind a
//! `tokio::sync::Mutex`, since this core owns no durable storage (§6).

use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::config::EnqueuePolicy;
use crate::error::QueueError;
use crate::model::Job;

struct Inner {
    heap: BinaryHeap<Job>,
    capacity: usize,
    shutting_down: bool,
}

pub struct JobQueue {
    inner: Mutex<Inner>,
    not_empty: Notify,
    not_full: Notify,
    policy: EnqueuePolicy,
    enqueue_timeout: Option<Duration>,
}

impl JobQueue {
    pub fn new(capacity: usize, policy: EnqueuePolicy, enqueue_timeout: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                capacity,
                shutting_down: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            policy,
            enqueue_timeout,
        }
    }

    pub async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if inner.shutting_down {
                    return Err(QueueError::ShuttingDown);
                }
                if inner.heap.len() < inner.capacity {
                    inner.heap.push(job);
                    drop(inner);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }

            match self.policy {
                EnqueuePolicy::Reject => return Err(QueueError::Full),
                EnqueuePolicy::Block => {
                    self.not_full.notified().await;
                }
                EnqueuePolicy::BlockWithTimeout => {
                    let timeout = self.enqueue_timeout.unwrap_or(Duration::from_secs(5));
                    if tokio::time::timeout(timeout, self.not_full.notified())
                        .await
                        .is_err()
                    {
                        return Err(QueueError::Full);
                    }
                }
            }
        }
    }

    /// Blocks until a job is available or the queue is shut down.
    pub async fn dequeue(&self) -> Option<Job> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(job) = inner.heap.pop() {
                    drop(inner);
                    self.not_full.notify_one();
                    return Some(job);
                }
                if inner.shutting_down {
                    return None;
                }
            }
            self.not_empty.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.heap.len()
    }

    /// Stops accepting new submissions and cancels all jobs still queued.
    /// Dequeue calls drain whatever remains, then return `None`.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.shutting_down = true;
        for job in inner.heap.iter() {
            job.cancel.cancel();
        }
        drop(inner);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }
}

//! Deployment queue
//!
//! A bounded FIFO queue between the ingest paths (cloud listeners, local
//! CLI) and the single deployment worker. Producers never block: a full
//! queue turns the request away with [`EnqueueOutcome::Busy`]. Re-submitting
//! a deployment id that is still waiting replaces the waiting entry in
//! place, keeping its queue position. The head entry stays in the queue
//! while the worker processes it and is only removed by [`DeploymentQueue::release`],
//! so a restart mid-deployment never loses the request.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::errors::DeploymentError;
use crate::models::deployment::{Deployment, DeploymentState};

/// Default number of deployments the queue holds
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// What happened to an enqueued deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended at the tail
    Accepted,

    /// Replaced a waiting entry with the same id, keeping its position
    Replaced,

    /// The queue is full. The caller may retry later.
    Busy,

    /// An entry with the same id is being processed right now
    Rejected,
}

/// Bounded FIFO of pending deployments with a single consumer
#[derive(Debug)]
pub struct DeploymentQueue {
    entries: Mutex<VecDeque<Deployment>>,
    notify: Notify,
    capacity: usize,
}

impl Default for DeploymentQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeploymentQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Deployment>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Submit a deployment. Never blocks; the queue takes ownership and
    /// resets the entry to `Queued` whatever state the caller left it in.
    pub fn enqueue(&self, mut deployment: Deployment) -> EnqueueOutcome {
        deployment.state = DeploymentState::Queued;

        let mut entries = self.lock();

        if let Some(existing) = entries.iter_mut().find(|e| e.id == deployment.id) {
            if existing.state == DeploymentState::InProgress {
                return EnqueueOutcome::Rejected;
            }
            *existing = deployment;
            drop(entries);
            self.notify.notify_one();
            return EnqueueOutcome::Replaced;
        }

        if entries.len() >= self.capacity {
            return EnqueueOutcome::Busy;
        }

        entries.push_back(deployment);
        drop(entries);
        self.notify.notify_one();
        EnqueueOutcome::Accepted
    }

    /// Wait for the head of the queue to be ready, mark it in progress and
    /// return an owned copy. The entry itself stays at the head until
    /// [`DeploymentQueue::release`] is called.
    pub async fn dequeue(&self) -> Deployment {
        loop {
            if let Some(deployment) = self.take_ready() {
                return deployment;
            }
            self.notify.notified().await;
        }
    }

    fn take_ready(&self) -> Option<Deployment> {
        let mut entries = self.lock();
        let head = entries.front_mut()?;
        if head.state != DeploymentState::Queued {
            return None;
        }
        head.state = DeploymentState::InProgress;
        Some(head.clone())
    }

    /// Drop the in-progress head once the worker is done with it. Fails if
    /// the head is not in progress, which means the caller never dequeued.
    pub fn release(&self) -> Result<(), DeploymentError> {
        let mut entries = self.lock();
        match entries.front() {
            Some(head) if head.state == DeploymentState::InProgress => {
                entries.pop_front();
                drop(entries);
                self.notify.notify_one();
                Ok(())
            }
            _ => Err(DeploymentError::Invalid(
                "queue head is not an in-progress deployment".to_string(),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;

    fn deployment(id: &str, component: &str) -> Deployment {
        let mut roots = BTreeMap::new();
        roots.insert(component.to_string(), "1.0.0".to_string());
        Deployment::fleet_group(Some(id.to_string()), "sensors", format!("cfg:{}", id), roots)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = DeploymentQueue::new();
        assert_eq!(queue.enqueue(deployment("a", "App")), EnqueueOutcome::Accepted);
        assert_eq!(queue.enqueue(deployment("b", "App")), EnqueueOutcome::Accepted);

        let first = queue.dequeue().await;
        assert_eq!(first.id, "a");
        assert_eq!(first.state, DeploymentState::InProgress);
        queue.release().unwrap();

        let second = queue.dequeue().await;
        assert_eq!(second.id, "b");
    }

    #[tokio::test]
    async fn test_resubmit_replaces_in_place() {
        let queue = DeploymentQueue::new();
        queue.enqueue(deployment("a", "App"));
        queue.enqueue(deployment("b", "App"));

        assert_eq!(
            queue.enqueue(deployment("a", "NewApp")),
            EnqueueOutcome::Replaced
        );
        assert_eq!(queue.len(), 2);

        // the replacement kept the original queue position
        let head = queue.dequeue().await;
        assert_eq!(head.id, "a");
        assert!(head.root_components.contains_key("NewApp"));
    }

    #[tokio::test]
    async fn test_resubmit_of_in_progress_is_rejected() {
        let queue = DeploymentQueue::new();
        queue.enqueue(deployment("a", "App"));
        let _in_progress = queue.dequeue().await;

        assert_eq!(
            queue.enqueue(deployment("a", "NewApp")),
            EnqueueOutcome::Rejected
        );
    }

    #[tokio::test]
    async fn test_full_queue_is_busy() {
        let queue = DeploymentQueue::with_capacity(2);
        assert_eq!(queue.enqueue(deployment("a", "App")), EnqueueOutcome::Accepted);
        assert_eq!(queue.enqueue(deployment("b", "App")), EnqueueOutcome::Accepted);
        assert_eq!(queue.enqueue(deployment("c", "App")), EnqueueOutcome::Busy);

        // a replacement still lands while full
        assert_eq!(
            queue.enqueue(deployment("b", "NewApp")),
            EnqueueOutcome::Replaced
        );
    }

    #[tokio::test]
    async fn test_in_progress_head_holds_its_slot() {
        let queue = DeploymentQueue::with_capacity(1);
        queue.enqueue(deployment("a", "App"));
        let _in_progress = queue.dequeue().await;

        assert_eq!(queue.enqueue(deployment("b", "App")), EnqueueOutcome::Busy);

        queue.release().unwrap();
        assert_eq!(queue.enqueue(deployment("b", "App")), EnqueueOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_release_without_dequeue_fails() {
        let queue = DeploymentQueue::new();
        assert!(queue.release().is_err());

        queue.enqueue(deployment("a", "App"));
        assert!(queue.release().is_err());

        let _in_progress = queue.dequeue().await;
        assert!(queue.release().is_ok());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = Arc::new(DeploymentQueue::new());

        let mut pending = tokio_test::task::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.dequeue().await }
        });
        assert!(pending.poll().is_pending());

        queue.enqueue(deployment("a", "App"));
        let dequeued = pending.await;
        assert_eq!(dequeued.id, "a");
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_release_of_head() {
        let queue = Arc::new(DeploymentQueue::new());
        queue.enqueue(deployment("a", "App"));
        queue.enqueue(deployment("b", "App"));

        let _first = queue.dequeue().await;

        let mut pending = tokio_test::task::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.dequeue().await }
        });
        assert!(pending.poll().is_pending());

        queue.release().unwrap();
        let second = pending.await;
        assert_eq!(second.id, "b");
    }
}

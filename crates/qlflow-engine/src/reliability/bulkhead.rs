//! Bulkhead concurrency pools
//!
//! One bounded pool per target service isolates a slow dependency from
//! the rest of the worker. Admission is acquire-or-queue-or-reject: up to
//! `concurrency` calls run, up to `queue` wait, further callers are
//! rejected with `Overloaded`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use qlflow_core::config::BulkheadParams;
use qlflow_core::{EngineError, MetricsRegistry};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded concurrency pool for one target service
pub struct Bulkhead {
    service: String,
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
    max_queue: usize,
}

impl Bulkhead {
    /// Create a pool admitting `concurrency` calls with `queue` waiters
    pub fn new(service: impl Into<String>, params: BulkheadParams) -> Self {
        Self {
            service: service.into(),
            semaphore: Arc::new(Semaphore::new(params.concurrency.max(1))),
            waiting: AtomicUsize::new(0),
            max_queue: params.queue,
        }
    }

    /// Acquire a slot, queueing if the pool is busy
    ///
    /// # Errors
    ///
    /// `Overloaded` when the queue is already full.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, EngineError> {
        // Fast path: free slot, no queueing
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(permit);
        }

        // Queue if there is room, otherwise reject
        let queued = self.waiting.fetch_add(1, Ordering::SeqCst);
        if queued >= self.max_queue {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(EngineError::overloaded(format!(
                "bulkhead queue full for service {}",
                self.service
            )));
        }

        let permit = self.semaphore.clone().acquire_owned().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);

        permit.map_err(|_| EngineError::internal("bulkhead semaphore closed"))
    }

    /// Current queue depth
    pub fn queue_depth(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Free execution slots
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Per-service bulkhead registry
///
/// Pools are created on first use from configured sizing; there is one
/// pool per (target service, process).
pub struct BulkheadRegistry {
    pools: DashMap<String, Arc<Bulkhead>>,
    sizing: std::collections::BTreeMap<String, BulkheadParams>,
    metrics: Arc<MetricsRegistry>,
}

impl BulkheadRegistry {
    pub fn new(
        sizing: std::collections::BTreeMap<String, BulkheadParams>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            pools: DashMap::new(),
            sizing,
            metrics,
        }
    }

    /// Pool for a target service
    pub fn pool(&self, service: &str) -> Arc<Bulkhead> {
        self.pools
            .entry(service.to_string())
            .or_insert_with(|| {
                let params = self.sizing.get(service).copied().unwrap_or_default();
                Arc::new(Bulkhead::new(service, params))
            })
            .clone()
    }

    /// Acquire a slot on a service's pool, recording rejections
    pub async fn acquire(&self, service: &str) -> Result<OwnedSemaphorePermit, EngineError> {
        let result = self.pool(service).acquire().await;
        if result.is_err() {
            self.metrics.incr("bulkhead_rejections", service);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn params(concurrency: usize, queue: usize) -> BulkheadParams {
        BulkheadParams { concurrency, queue }
    }

    #[tokio::test]
    async fn test_admits_up_to_concurrency() {
        let bulkhead = Bulkhead::new("parser", params(2, 0));

        let _p1 = bulkhead.acquire().await.unwrap();
        let _p2 = bulkhead.acquire().await.unwrap();
        assert_eq!(bulkhead.available(), 0);
    }

    #[tokio::test]
    async fn test_rejects_when_queue_full() {
        let bulkhead = Arc::new(Bulkhead::new("parser", params(1, 0)));

        let held = bulkhead.acquire().await.unwrap();
        let err = bulkhead.acquire().await.unwrap_err();
        assert_eq!(err.kind, qlflow_core::ErrorKind::Overloaded);

        drop(held);
        assert!(bulkhead.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_queued_caller_admitted_on_release() {
        let bulkhead = Arc::new(Bulkhead::new("sandbox", params(1, 1)));

        let held = bulkhead.acquire().await.unwrap();

        let waiter = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move { bulkhead.acquire().await })
        };

        // Give the waiter time to enter the queue
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(bulkhead.queue_depth(), 1);

        drop(held);
        let permit = waiter.await.unwrap();
        assert!(permit.is_ok());
        assert_eq!(bulkhead.queue_depth(), 0);
    }

    #[tokio::test]
    async fn test_registry_uses_configured_sizing() {
        let mut sizing = BTreeMap::new();
        sizing.insert("model-router".to_string(), params(1, 0));

        let registry = BulkheadRegistry::new(sizing, MetricsRegistry::new());

        let pool = registry.pool("model-router");
        let _held = pool.acquire().await.unwrap();
        assert!(pool.acquire().await.is_err());

        // Unknown services get defaults (concurrency 8)
        let default_pool = registry.pool("parser");
        assert_eq!(default_pool.available(), 8);
    }

    #[tokio::test]
    async fn test_registry_counts_rejections() {
        let mut sizing = BTreeMap::new();
        sizing.insert("parser".to_string(), params(1, 0));
        let metrics = MetricsRegistry::new();
        let registry = BulkheadRegistry::new(sizing, metrics.clone());

        let _held = registry.acquire("parser").await.unwrap();
        let _ = registry.acquire("parser").await;

        assert_eq!(metrics.counter("bulkhead_rejections", "parser"), 1);
    }
}

//! Worker pools: claim loop, bounded concurrency, retry/dead-letter
//! bookkeeping, graceful drain.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use {
    async_trait::async_trait,
    rand::Rng,
    tokio::{
        sync::{Notify, Semaphore},
        task::{JoinHandle, JoinSet},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    Result,
    error::Error,
    store::JobStore,
    types::{DeadLetter, Job, now_ms},
};

/// How often an idle pool re-checks for due jobs (delayed jobs, retries).
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A claim older than this is assumed orphaned by a crash and re-delivered.
const STALE_CLAIM_MS: i64 = 5 * 60 * 1000;

/// A job handler. Errors trigger the job's retry policy; exhausted jobs move
/// to the dead-letter set.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> anyhow::Result<()>;
}

/// Cheap handle for submitting jobs, injected into producers (webhook entry,
/// campaign fan-out, pipeline handlers).
#[derive(Clone)]
pub struct JobProducer {
    store: Arc<dyn JobStore>,
    wakers: Arc<RwLock<HashMap<String, Arc<Notify>>>>,
    shutdown: CancellationToken,
}

impl JobProducer {
    /// Submit a job. Rejected once shutdown has begun so the drain converges.
    pub async fn enqueue(&self, job: Job) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        debug!(
            queue = %job.queue,
            job_type = %job.job_type,
            job_id = %job.id,
            "enqueue"
        );
        self.store.push(&job).await?;
        let waker = {
            let wakers = self.wakers.read().unwrap_or_else(|e| e.into_inner());
            wakers.get(&job.queue).cloned()
        };
        if let Some(waker) = waker {
            waker.notify_one();
        }
        Ok(())
    }
}

struct WorkerPool {
    queue: String,
    concurrency: usize,
    store: Arc<dyn JobStore>,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    async fn run(self: Arc<Self>) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<()> = JoinSet::new();
        info!(queue = %self.queue, concurrency = self.concurrency, "worker pool started");

        loop {
            while tasks.try_join_next().is_some() {}
            if self.shutdown.is_cancelled() {
                break;
            }

            // Only claim what we have permits for, so claimed jobs never sit
            // behind a full pool while another process could take them.
            let free = semaphore.available_permits();
            if free > 0 {
                match self.store.claim_due(&self.queue, now_ms(), free as u32).await {
                    Ok(jobs) if !jobs.is_empty() => {
                        for job in jobs {
                            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                                Ok(permit) => permit,
                                Err(_) => return,
                            };
                            let pool = Arc::clone(&self);
                            tasks.spawn(async move {
                                let _permit = permit;
                                pool.run_job(job).await;
                            });
                        }
                        continue;
                    },
                    Ok(_) => {},
                    Err(err) => {
                        warn!(queue = %self.queue, error = %err, "claim failed");
                    },
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.wake.notified() => {},
                _ = tokio::time::sleep(POLL_INTERVAL) => {},
            }
        }

        // Graceful drain: no new claims, in-flight jobs run to completion.
        if !tasks.is_empty() {
            info!(queue = %self.queue, in_flight = tasks.len(), "draining worker pool");
        }
        while tasks.join_next().await.is_some() {}
        info!(queue = %self.queue, "worker pool stopped");
    }

    async fn run_job(&self, job: Job) {
        let handler = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            handlers.get(&job.job_type).cloned()
        };

        let Some(handler) = handler else {
            // Retrying cannot help when the handler itself does not exist.
            error!(queue = %self.queue, job_type = %job.job_type, "unknown job type, dead-lettering");
            self.bury(&job, format!("no handler for job type: {}", job.job_type))
                .await;
            return;
        };

        debug!(
            queue = %self.queue,
            job_type = %job.job_type,
            job_id = %job.id,
            attempt = job.attempt,
            "job started"
        );

        match handler.handle(&job).await {
            Ok(()) => {
                if let Err(err) = self.store.remove(&job.id).await {
                    warn!(job_id = %job.id, error = %err, "failed to ack job");
                }
                debug!(job_id = %job.id, "job completed");
            },
            Err(err) => {
                let attempt = job.attempt + 1;
                if attempt >= job.policy.max_attempts {
                    error!(
                        queue = %self.queue,
                        job_type = %job.job_type,
                        job_id = %job.id,
                        attempt,
                        error = %err,
                        "job exhausted retries"
                    );
                    self.bury(&job, err.to_string()).await;
                } else {
                    let delay = jittered(job.policy.delay_ms(attempt));
                    warn!(
                        queue = %self.queue,
                        job_type = %job.job_type,
                        job_id = %job.id,
                        attempt,
                        delay_ms = delay,
                        error = %err,
                        "job failed, retrying"
                    );
                    if let Err(err) = self
                        .store
                        .release(&job.id, attempt, now_ms() + delay as i64)
                        .await
                    {
                        warn!(job_id = %job.id, error = %err, "failed to release job for retry");
                    }
                }
            },
        }
    }

    async fn bury(&self, job: &Job, error: String) {
        let letter = DeadLetter::from_job(job, error);
        if let Err(err) = self.store.push_dead_letter(&letter).await {
            warn!(job_id = %job.id, error = %err, "failed to record dead letter");
        }
        if let Err(err) = self.store.remove(&job.id).await {
            warn!(job_id = %job.id, error = %err, "failed to remove exhausted job");
        }
    }
}

/// Spread retries out a little so a burst of failures does not retry as a
/// burst. Up to 10% on top of the policy delay.
fn jittered(delay_ms: u64) -> u64 {
    let spread = delay_ms / 10;
    if spread == 0 {
        return delay_ms;
    }
    delay_ms + rand::rng().random_range(0..=spread)
}

/// One worker pool per queue over a shared broker store, with bounded
/// per-pool concurrency.
pub struct QueueRuntime {
    store: Arc<dyn JobStore>,
    pools: Vec<Arc<WorkerPool>>,
    handles: Vec<JoinHandle<()>>,
    wakers: Arc<RwLock<HashMap<String, Arc<Notify>>>>,
    shutdown: CancellationToken,
}

impl QueueRuntime {
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            pools: Vec::new(),
            handles: Vec::new(),
            wakers: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Declare a queue with its worker-pool concurrency bound.
    pub fn add_pool(&mut self, queue: impl Into<String>, concurrency: usize) {
        let queue = queue.into();
        let wake = Arc::new(Notify::new());
        {
            let mut wakers = self.wakers.write().unwrap_or_else(|e| e.into_inner());
            wakers.insert(queue.clone(), Arc::clone(&wake));
        }
        self.pools.push(Arc::new(WorkerPool {
            queue,
            concurrency,
            store: Arc::clone(&self.store),
            handlers: RwLock::new(HashMap::new()),
            wake,
            shutdown: self.shutdown.clone(),
        }));
    }

    /// Register a handler for a job type on an already-declared queue.
    pub fn register(
        &self,
        queue: &str,
        job_type: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> Result<()> {
        let pool = self
            .pools
            .iter()
            .find(|p| p.queue == queue)
            .ok_or_else(|| Error::message(format!("unknown queue: {queue}")))?;
        let mut handlers = pool.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.insert(job_type.into(), handler);
        Ok(())
    }

    #[must_use]
    pub fn producer(&self) -> JobProducer {
        JobProducer {
            store: Arc::clone(&self.store),
            wakers: Arc::clone(&self.wakers),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Re-deliver orphaned claims, then start every pool.
    pub async fn start(&mut self) -> Result<()> {
        let reset = self
            .store
            .reset_stale_claims(now_ms() - STALE_CLAIM_MS)
            .await?;
        if reset > 0 {
            info!(reset, "re-delivering jobs orphaned by a previous run");
        }
        for pool in &self.pools {
            self.handles.push(tokio::spawn(Arc::clone(pool).run()));
        }
        Ok(())
    }

    /// Stop accepting new jobs and wait for in-flight work to finish.
    pub async fn shutdown(&mut self) {
        info!("queue runtime shutting down");
        self.shutdown.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        info!("queue runtime stopped");
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{store_memory::InMemoryStore, types::RetryPolicy};

    struct Counting {
        calls: Arc<AtomicUsize>,
        fail_first: usize,
    }

    #[async_trait]
    impl JobHandler for Counting {
        async fn handle(&self, _job: &Job) -> anyhow::Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("transient failure {n}");
            }
            Ok(())
        }
    }

    async fn runtime_with(
        queue: &str,
        concurrency: usize,
        job_type: &str,
        handler: Arc<dyn JobHandler>,
    ) -> QueueRuntime {
        let mut runtime = QueueRuntime::new(Arc::new(InMemoryStore::new()));
        runtime.add_pool(queue, concurrency);
        runtime.register(queue, job_type, handler).unwrap();
        runtime.start().await.unwrap();
        runtime
    }

    async fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed().as_millis() < deadline_ms as u128 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        check()
    }

    #[tokio::test]
    async fn test_job_runs_once_on_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Counting {
            calls: Arc::clone(&calls),
            fail_first: 0,
        });
        let mut runtime = runtime_with("q", 2, "t", handler).await;

        let producer = runtime.producer();
        let job = Job::new("q", "t", &serde_json::json!({})).unwrap();
        producer.enqueue(job).await.unwrap();

        assert!(wait_until(2000, || calls.load(Ordering::SeqCst) == 1).await);
        runtime.shutdown().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_job_retries_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Counting {
            calls: Arc::clone(&calls),
            fail_first: 2,
        });
        let mut runtime = runtime_with("q", 1, "t", handler).await;

        let producer = runtime.producer();
        let job = Job::new("q", "t", &serde_json::json!({}))
            .unwrap()
            .policy(RetryPolicy::fixed(5, 10));
        producer.enqueue(job).await.unwrap();

        assert!(wait_until(3000, || calls.load(Ordering::SeqCst) == 3).await);
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_job_moves_to_dead_letters() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Counting {
            calls: Arc::clone(&calls),
            fail_first: usize::MAX,
        });
        let store = Arc::new(InMemoryStore::new());
        let mut runtime = QueueRuntime::new(Arc::clone(&store) as Arc<dyn JobStore>);
        runtime.add_pool("q", 1);
        runtime.register("q", "t", handler).unwrap();
        runtime.start().await.unwrap();

        let producer = runtime.producer();
        let job = Job::new("q", "t", &serde_json::json!({}))
            .unwrap()
            .policy(RetryPolicy::fixed(2, 10));
        producer.enqueue(job).await.unwrap();

        let mut buried = false;
        for _ in 0..150 {
            if store.dead_letters(10).await.unwrap().len() == 1 {
                buried = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(buried);
        runtime.shutdown().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let letters = store.dead_letters(10).await.unwrap();
        assert!(letters[0].error.contains("transient failure"));
    }

    #[tokio::test]
    async fn test_unknown_job_type_fails_without_retry() {
        let store = Arc::new(InMemoryStore::new());
        let mut runtime = QueueRuntime::new(Arc::clone(&store) as Arc<dyn JobStore>);
        runtime.add_pool("q", 1);
        runtime.start().await.unwrap();

        let producer = runtime.producer();
        let job = Job::new("q", "nonexistent", &serde_json::json!({})).unwrap();
        let job_id = job.id.clone();
        producer.enqueue(job).await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        runtime.shutdown().await;

        let letters = store.dead_letters(10).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].id, job_id);
        assert!(letters[0].error.contains("no handler"));
    }

    #[tokio::test]
    async fn test_enqueue_rejected_after_shutdown() {
        let handler = Arc::new(Counting {
            calls: Arc::new(AtomicUsize::new(0)),
            fail_first: 0,
        });
        let mut runtime = runtime_with("q", 1, "t", handler).await;
        let producer = runtime.producer();
        runtime.shutdown().await;

        let job = Job::new("q", "t", &serde_json::json!({})).unwrap();
        assert!(matches!(
            producer.enqueue(job).await,
            Err(Error::ShuttingDown)
        ));
    }
}

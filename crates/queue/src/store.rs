//! Persistence trait for queued jobs and dead letters.

use async_trait::async_trait;

use crate::{
    Result,
    types::{DeadLetter, Job},
};

/// Broker backend. Jobs stay stored until acknowledged (at-least-once);
/// claims keep a job invisible to other workers until released or removed.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn push(&self, job: &Job) -> Result<()>;

    /// Claim up to `limit` due, unclaimed jobs from `queue`, highest priority
    /// first, oldest run time first within a priority.
    async fn claim_due(&self, queue: &str, now_ms: i64, limit: u32) -> Result<Vec<Job>>;

    /// Acknowledge successful completion.
    async fn remove(&self, id: &str) -> Result<()>;

    /// Return a claimed job to the queue for a retry at `run_at_ms`.
    async fn release(&self, id: &str, attempt: u32, run_at_ms: i64) -> Result<()>;

    /// Make claims older than the threshold eligible again. Called at
    /// startup so jobs orphaned by a crash get re-delivered.
    async fn reset_stale_claims(&self, older_than_ms: i64) -> Result<u64>;

    async fn push_dead_letter(&self, letter: &DeadLetter) -> Result<()>;

    async fn dead_letters(&self, limit: u32) -> Result<Vec<DeadLetter>>;

    async fn pending_count(&self, queue: &str) -> Result<i64>;
}

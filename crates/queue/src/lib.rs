//! Durable job queue with per-queue bounded worker pools.
//!
//! Jobs are at-least-once: they stay in the broker store until acknowledged,
//! claims orphaned by a crash are re-delivered, and handlers are expected to
//! be idempotent. Retry policy and priority travel with each job.

pub mod error;
pub mod service;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use {
    error::{Error, Result},
    service::{JobHandler, JobProducer, QueueRuntime},
    store::JobStore,
    store_memory::InMemoryStore,
    store_sqlite::{SqliteStore, run_migrations},
    types::{Backoff, DeadLetter, Job, RetryPolicy},
};

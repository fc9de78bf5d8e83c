//! In-memory store for testing.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{
    Result,
    error::Error,
    store::JobStore,
    types::{DeadLetter, Job},
};

/// In-memory broker backed by `HashMap`. No persistence — for tests only.
pub struct InMemoryStore {
    jobs: Mutex<HashMap<String, Entry>>,
    dead: Mutex<VecDeque<DeadLetter>>,
    dead_cap: usize,
}

struct Entry {
    job: Job,
    claimed_at_ms: Option<i64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            dead: Mutex::new(VecDeque::new()),
            dead_cap: 500,
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn push(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.insert(job.id.clone(), Entry {
            job: job.clone(),
            claimed_at_ms: None,
        });
        Ok(())
    }

    async fn claim_due(&self, queue: &str, now_ms: i64, limit: u32) -> Result<Vec<Job>> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut due: Vec<&mut Entry> = jobs
            .values_mut()
            .filter(|e| {
                e.job.queue == queue && e.claimed_at_ms.is_none() && e.job.run_at_ms <= now_ms
            })
            .collect();
        due.sort_by(|a, b| {
            b.job
                .priority
                .cmp(&a.job.priority)
                .then(a.job.run_at_ms.cmp(&b.job.run_at_ms))
        });

        let mut claimed = Vec::new();
        for entry in due.into_iter().take(limit as usize) {
            entry.claimed_at_ms = Some(now_ms);
            claimed.push(entry.job.clone());
        }
        Ok(claimed)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if jobs.remove(id).is_none() {
            return Err(Error::job_not_found(id));
        }
        Ok(())
    }

    async fn release(&self, id: &str, attempt: u32, run_at_ms: i64) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let entry = jobs.get_mut(id).ok_or_else(|| Error::job_not_found(id))?;
        entry.claimed_at_ms = None;
        entry.job.attempt = attempt;
        entry.job.run_at_ms = run_at_ms;
        Ok(())
    }

    async fn reset_stale_claims(&self, older_than_ms: i64) -> Result<u64> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut reset = 0;
        for entry in jobs.values_mut() {
            if entry.claimed_at_ms.is_some_and(|at| at < older_than_ms) {
                entry.claimed_at_ms = None;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn push_dead_letter(&self, letter: &DeadLetter) -> Result<()> {
        let mut dead = self.dead.lock().unwrap_or_else(|e| e.into_inner());
        dead.push_back(letter.clone());
        while dead.len() > self.dead_cap {
            dead.pop_front();
        }
        Ok(())
    }

    async fn dead_letters(&self, limit: u32) -> Result<Vec<DeadLetter>> {
        let dead = self.dead.lock().unwrap_or_else(|e| e.into_inner());
        Ok(dead.iter().rev().take(limit as usize).cloned().collect())
    }

    async fn pending_count(&self, queue: &str) -> Result<i64> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(jobs.values().filter(|e| e.job.queue == queue).count() as i64)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::types::now_ms};

    fn make_job(queue: &str, priority: u8, run_at_ms: i64) -> Job {
        let mut job = Job::new(queue, "test", &serde_json::json!({})).unwrap();
        job.priority = priority;
        job.run_at_ms = run_at_ms;
        job
    }

    #[tokio::test]
    async fn test_claim_orders_by_priority_then_age() {
        let store = InMemoryStore::new();
        store.push(&make_job("q", 1, 100)).await.unwrap();
        store.push(&make_job("q", 9, 200)).await.unwrap();
        store.push(&make_job("q", 9, 150)).await.unwrap();

        let claimed = store.claim_due("q", now_ms(), 10).await.unwrap();
        assert_eq!(claimed.len(), 3);
        assert_eq!(claimed[0].priority, 9);
        assert_eq!(claimed[0].run_at_ms, 150);
        assert_eq!(claimed[2].priority, 1);
    }

    #[tokio::test]
    async fn test_claimed_jobs_are_invisible() {
        let store = InMemoryStore::new();
        store.push(&make_job("q", 0, 0)).await.unwrap();

        let first = store.claim_due("q", now_ms(), 10).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = store.claim_due("q", now_ms(), 10).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_future_jobs_not_claimed() {
        let store = InMemoryStore::new();
        store.push(&make_job("q", 0, now_ms() + 60_000)).await.unwrap();
        assert!(store.claim_due("q", now_ms(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_makes_job_claimable_again() {
        let store = InMemoryStore::new();
        let job = make_job("q", 0, 0);
        store.push(&job).await.unwrap();
        store.claim_due("q", now_ms(), 1).await.unwrap();

        store.release(&job.id, 1, 0).await.unwrap();
        let claimed = store.claim_due("q", now_ms(), 1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempt, 1);
    }

    #[tokio::test]
    async fn test_reset_stale_claims() {
        let store = InMemoryStore::new();
        let job = make_job("q", 0, 0);
        store.push(&job).await.unwrap();
        store.claim_due("q", now_ms(), 1).await.unwrap();

        let reset = store.reset_stale_claims(now_ms() + 1).await.unwrap();
        assert_eq!(reset, 1);
        assert_eq!(store.claim_due("q", now_ms(), 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dead_letter_retention_is_bounded() {
        let store = InMemoryStore::new();
        for i in 0..600 {
            let job = make_job("q", 0, 0);
            let letter = DeadLetter::from_job(&job, format!("err {i}"));
            store.push_dead_letter(&letter).await.unwrap();
        }
        let letters = store.dead_letters(1000).await.unwrap();
        assert_eq!(letters.len(), 500);
        // Newest first.
        assert_eq!(letters[0].error, "err 599");
    }
}

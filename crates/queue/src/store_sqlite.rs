//! SQLite-backed job store using sqlx.

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
};

use crate::{
    Result,
    error::Error,
    store::JobStore,
    types::{DeadLetter, Job, RetryPolicy},
};

/// How many dead letters we keep around (bounded retention, oldest dropped).
const DEAD_LETTER_CAP: i64 = 500;

/// SQLite-backed persistence for queued jobs and dead letters.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with its own connection pool and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// In-memory store for tests. Single pooled connection, since every
    /// `:memory:` connection is its own database.
    pub async fn memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }
}

/// Run database migrations for the queue tables. Called at startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
    let payload: String = row.try_get("payload")?;
    let backoff: String = row.try_get("backoff")?;
    Ok(Job {
        id: row.try_get("id")?,
        queue: row.try_get("queue")?,
        job_type: row.try_get("job_type")?,
        payload: serde_json::from_str(&payload)?,
        priority: row.try_get::<i64, _>("priority")? as u8,
        attempt: row.try_get::<i64, _>("attempt")? as u32,
        run_at_ms: row.try_get("run_at_ms")?,
        policy: RetryPolicy {
            max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
            backoff: serde_json::from_str(&backoff)?,
        },
        created_at_ms: row.try_get("created_at_ms")?,
    })
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn push(&self, job: &Job) -> Result<()> {
        sqlx::query(
            "INSERT INTO queue_jobs
                 (id, queue, job_type, payload, priority, attempt, run_at_ms,
                  max_attempts, backoff, claimed_at_ms, created_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)",
        )
        .bind(&job.id)
        .bind(&job.queue)
        .bind(&job.job_type)
        .bind(serde_json::to_string(&job.payload)?)
        .bind(job.priority as i64)
        .bind(job.attempt as i64)
        .bind(job.run_at_ms)
        .bind(job.policy.max_attempts as i64)
        .bind(serde_json::to_string(&job.policy.backoff)?)
        .bind(job.created_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_due(&self, queue: &str, now_ms: i64, limit: u32) -> Result<Vec<Job>> {
        // Single-writer claim: mark then read back what we marked. SQLite
        // serializes writers, so two pools cannot claim the same rows.
        let rows = sqlx::query(
            "UPDATE queue_jobs SET claimed_at_ms = ?
             WHERE id IN (
                 SELECT id FROM queue_jobs
                 WHERE queue = ? AND claimed_at_ms IS NULL AND run_at_ms <= ?
                 ORDER BY priority DESC, run_at_ms ASC
                 LIMIT ?
             )
             RETURNING *",
        )
        .bind(now_ms)
        .bind(queue)
        .bind(now_ms)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut jobs: Vec<Job> = rows.iter().map(row_to_job).collect::<Result<_>>()?;
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.run_at_ms.cmp(&b.run_at_ms))
        });
        Ok(jobs)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM queue_jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::job_not_found(id));
        }
        Ok(())
    }

    async fn release(&self, id: &str, attempt: u32, run_at_ms: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE queue_jobs SET claimed_at_ms = NULL, attempt = ?, run_at_ms = ? WHERE id = ?",
        )
        .bind(attempt as i64)
        .bind(run_at_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::job_not_found(id));
        }
        Ok(())
    }

    async fn reset_stale_claims(&self, older_than_ms: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE queue_jobs SET claimed_at_ms = NULL WHERE claimed_at_ms < ?",
        )
        .bind(older_than_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn push_dead_letter(&self, letter: &DeadLetter) -> Result<()> {
        sqlx::query(
            "INSERT INTO queue_dead_letters
                 (id, queue, job_type, payload, attempt, error, failed_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&letter.id)
        .bind(&letter.queue)
        .bind(&letter.job_type)
        .bind(serde_json::to_string(&letter.payload)?)
        .bind(letter.attempt as i64)
        .bind(&letter.error)
        .bind(letter.failed_at_ms)
        .execute(&self.pool)
        .await?;

        // Keep retention bounded.
        sqlx::query(
            "DELETE FROM queue_dead_letters WHERE id NOT IN (
                 SELECT id FROM queue_dead_letters ORDER BY failed_at_ms DESC LIMIT ?
             )",
        )
        .bind(DEAD_LETTER_CAP)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dead_letters(&self, limit: u32) -> Result<Vec<DeadLetter>> {
        let rows = sqlx::query(
            "SELECT * FROM queue_dead_letters ORDER BY failed_at_ms DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload")?;
                Ok(DeadLetter {
                    id: row.try_get("id")?,
                    queue: row.try_get("queue")?,
                    job_type: row.try_get("job_type")?,
                    payload: serde_json::from_str(&payload)?,
                    attempt: row.try_get::<i64, _>("attempt")? as u32,
                    error: row.try_get("error")?,
                    failed_at_ms: row.try_get("failed_at_ms")?,
                })
            })
            .collect()
    }

    async fn pending_count(&self, queue: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM queue_jobs WHERE queue = ?")
            .bind(queue)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::types::now_ms};

    async fn test_sqlite_store() -> SqliteStore {
        SqliteStore::memory().await.expect("store")
    }

    fn make_job(queue: &str, priority: u8) -> Job {
        let mut job = Job::new(queue, "test", &serde_json::json!({"k": "v"})).unwrap();
        job.priority = priority;
        job.run_at_ms = 0;
        job
    }

    #[tokio::test]
    async fn test_push_claim_remove_roundtrip() {
        let store = test_sqlite_store().await;
        let job = make_job("messages", 5);
        store.push(&job).await.unwrap();
        assert_eq!(store.pending_count("messages").await.unwrap(), 1);

        let claimed = store.claim_due("messages", now_ms(), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, job.id);
        assert_eq!(claimed[0].payload["k"], "v");

        // Claimed jobs are invisible until released.
        assert!(store.claim_due("messages", now_ms(), 10).await.unwrap().is_empty());

        store.remove(&job.id).await.unwrap();
        assert_eq!(store.pending_count("messages").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let store = test_sqlite_store().await;
        store.push(&make_job("q", 2)).await.unwrap();
        store.push(&make_job("q", 9)).await.unwrap();
        store.push(&make_job("q", 5)).await.unwrap();

        let claimed = store.claim_due("q", now_ms(), 10).await.unwrap();
        let priorities: Vec<u8> = claimed.iter().map(|j| j.priority).collect();
        assert_eq!(priorities, vec![9, 5, 2]);
    }

    #[tokio::test]
    async fn test_release_and_policy_survive_restart_shape() {
        let store = test_sqlite_store().await;
        let job = make_job("q", 0).policy(RetryPolicy::fixed(2, 250));
        store.push(&job).await.unwrap();
        store.claim_due("q", now_ms(), 1).await.unwrap();
        store.release(&job.id, 1, now_ms() - 1).await.unwrap();

        let claimed = store.claim_due("q", now_ms(), 1).await.unwrap();
        assert_eq!(claimed[0].attempt, 1);
        assert_eq!(claimed[0].policy, RetryPolicy::fixed(2, 250));
    }

    #[tokio::test]
    async fn test_dead_letters_newest_first() {
        let store = test_sqlite_store().await;
        for i in 0..3 {
            let job = make_job("q", 0);
            let mut letter = DeadLetter::from_job(&job, format!("boom {i}"));
            letter.failed_at_ms = i;
            store.push_dead_letter(&letter).await.unwrap();
        }
        let letters = store.dead_letters(10).await.unwrap();
        assert_eq!(letters.len(), 3);
        assert_eq!(letters[0].error, "boom 2");
    }
}

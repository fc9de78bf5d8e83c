//! Job, retry policy, and dead-letter types.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Backoff {
    Fixed { delay_ms: u64 },
    Exponential { base_ms: u64 },
}

/// Ceiling on a single backoff delay (5 minutes).
const MAX_DELAY_MS: u64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    #[must_use]
    pub fn exponential(max_attempts: u32, base_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { base_ms },
        }
    }

    #[must_use]
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay_ms },
        }
    }

    /// Delay before the given (1-based) retry attempt.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let raw = match self.backoff {
            Backoff::Fixed { delay_ms } => delay_ms,
            Backoff::Exponential { base_ms } => {
                base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(16))
            },
        };
        raw.min(MAX_DELAY_MS)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, 1000)
    }
}

/// A durable unit of queued work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    /// Higher runs first among due jobs.
    pub priority: u8,
    /// Completed attempts so far.
    pub attempt: u32,
    /// Earliest time this job may run (epoch millis). Delayed jobs and
    /// retries both express themselves through this field.
    pub run_at_ms: i64,
    pub policy: RetryPolicy,
    pub created_at_ms: i64,
}

impl Job {
    /// Build a job with a serialized payload. The payload types live in
    /// `palaver-core::jobs`; this crate only moves opaque JSON.
    pub fn new(
        queue: impl Into<String>,
        job_type: impl Into<String>,
        payload: &impl Serialize,
    ) -> Result<Self> {
        let now = now_ms();
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            queue: queue.into(),
            job_type: job_type.into(),
            payload: serde_json::to_value(payload)?,
            priority: 0,
            attempt: 0,
            run_at_ms: now,
            policy: RetryPolicy::default(),
            created_at_ms: now,
        })
    }

    #[must_use]
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Defer the first run (campaign scheduling).
    #[must_use]
    pub fn delay_ms(mut self, delay_ms: u64) -> Self {
        self.run_at_ms = now_ms() + delay_ms as i64;
        self
    }

    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// An exhausted job kept for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: String,
    pub queue: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub attempt: u32,
    pub error: String,
    pub failed_at_ms: i64,
}

impl DeadLetter {
    #[must_use]
    pub fn from_job(job: &Job, error: impl Into<String>) -> Self {
        Self {
            id: job.id.clone(),
            queue: job.queue.clone(),
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            attempt: job.attempt,
            error: error.into(),
            failed_at_ms: now_ms(),
        }
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_doubles() {
        let policy = RetryPolicy::exponential(5, 1000);
        assert_eq!(policy.delay_ms(1), 1000);
        assert_eq!(policy.delay_ms(2), 2000);
        assert_eq!(policy.delay_ms(3), 4000);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::exponential(30, 60_000);
        assert_eq!(policy.delay_ms(20), 5 * 60 * 1000);
    }

    #[test]
    fn test_fixed_backoff_is_flat() {
        let policy = RetryPolicy::fixed(2, 750);
        assert_eq!(policy.delay_ms(1), 750);
        assert_eq!(policy.delay_ms(2), 750);
    }

    #[test]
    fn test_job_builder_and_payload() {
        #[derive(Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Payload {
            n: u32,
        }
        let job = Job::new("messages", "send-message", &Payload { n: 7 })
            .unwrap()
            .priority(8)
            .policy(RetryPolicy::exponential(3, 2000));
        assert_eq!(job.priority, 8);
        assert_eq!(job.policy.max_attempts, 3);
        assert_eq!(job.payload_as::<Payload>().unwrap(), Payload { n: 7 });
    }

    #[test]
    fn test_policy_roundtrip() {
        let policy = RetryPolicy::fixed(2, 500);
        let json = serde_json::to_string(&policy).unwrap();
        let back: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, back);
    }
}

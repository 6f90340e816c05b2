//! Deferred download tasks run by the periodic worker.
//!
//! Delivery is at-least-once: a failed task goes back on the queue with a
//! backoff delay until its retries are spent, and handlers must tolerate
//! seeing the same task twice.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::RecordKey;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt before a task is given up.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

/// Longest a failed task waits before its next attempt.
const MAX_DELAY_MS: i64 = 7 * 24 * 60 * 60 * 1000;

impl RetryConfig {
    /// delay = base_delay_ms * 2^(attempt - 1), saturating at `u64::MAX`.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        2u64.checked_pow(attempt.saturating_sub(1))
            .map_or(u64::MAX, |factor| self.base_delay_ms.saturating_mul(factor))
    }
}

/// Download of one target, queued by a completion notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub key: RecordKey,
    pub locale: String,
    /// Failed attempts so far.
    pub attempt: u32,
    pub not_before: DateTime<Utc>,
}

impl DownloadTask {
    pub fn new(key: RecordKey, locale: impl Into<String>) -> Self {
        Self {
            key,
            locale: locale.into(),
            attempt: 0,
            not_before: Utc::now(),
        }
    }

    /// The follow-up task after a failure, or `None` once retries are spent.
    pub fn retry(&self, config: &RetryConfig, now: DateTime<Utc>) -> Option<Self> {
        let attempt = self.attempt + 1;
        if attempt > config.max_retries {
            return None;
        }
        let delay_ms = i64::try_from(config.delay_for_attempt(attempt))
            .map_or(MAX_DELAY_MS, |ms| ms.min(MAX_DELAY_MS));
        Some(Self {
            key: self.key.clone(),
            locale: self.locale.clone(),
            attempt,
            not_before: now
                .checked_add_signed(Duration::milliseconds(delay_ms))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        })
    }
}

/// Storage for deferred downloads.
pub trait TaskQueue {
    /// Add a task. Implementations may drop a task for a target that is
    /// already queued.
    fn enqueue(&self, task: DownloadTask);
    /// Remove and return every task due at `now`.
    fn drain(&self, now: DateTime<Utc>) -> Vec<DownloadTask>;
    /// Number of queued tasks, due or not.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Copy of all queued tasks, due or not.
    fn pending(&self) -> Vec<DownloadTask>;
}

#[derive(Default)]
pub struct MemoryQueue {
    tasks: Mutex<VecDeque<DownloadTask>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tasks(tasks: impl IntoIterator<Item = DownloadTask>) -> Self {
        Self {
            tasks: Mutex::new(tasks.into_iter().collect()),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, VecDeque<DownloadTask>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TaskQueue for MemoryQueue {
    /// A task for a target that is already queued replaces nothing and is dropped.
    fn enqueue(&self, task: DownloadTask) {
        let mut tasks = self.tasks();
        if tasks
            .iter()
            .any(|t| t.key == task.key && t.locale == task.locale)
        {
            return;
        }
        tasks.push_back(task);
    }

    fn drain(&self, now: DateTime<Utc>) -> Vec<DownloadTask> {
        let mut tasks = self.tasks();
        let (due, later): (VecDeque<_>, VecDeque<_>) =
            tasks.drain(..).partition(|t| t.not_before <= now);
        *tasks = later;
        due.into_iter().collect()
    }

    fn len(&self) -> usize {
        self.tasks().len()
    }

    fn pending(&self) -> Vec<DownloadTask> {
        self.tasks().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, locale: &str) -> DownloadTask {
        DownloadTask::new(RecordKey::new("node", id), locale)
    }

    #[test]
    fn retry_config_exponential_backoff() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_ms: 1000,
        };
        assert_eq!(config.delay_for_attempt(1), 1000);
        assert_eq!(config.delay_for_attempt(2), 2000);
        assert_eq!(config.delay_for_attempt(3), 4000);
        assert_eq!(config.delay_for_attempt(4), 8000);
    }

    #[test]
    fn retry_schedules_backoff_until_exhausted() {
        let config = RetryConfig {
            max_retries: 2,
            base_delay_ms: 500,
        };
        let now = Utc::now();
        let first = task("1", "es_MX").retry(&config, now).unwrap();
        assert_eq!(first.attempt, 1);
        assert_eq!(first.not_before, now + Duration::milliseconds(500));
        let second = first.retry(&config, now).unwrap();
        assert_eq!(second.attempt, 2);
        assert_eq!(second.not_before, now + Duration::milliseconds(1000));
        assert!(second.retry(&config, now).is_none());
    }

    #[test]
    fn large_attempts_and_delays_saturate() {
        let config = RetryConfig {
            max_retries: u32::MAX,
            base_delay_ms: u64::MAX / 2,
        };
        assert_eq!(config.delay_for_attempt(3), u64::MAX);
        assert_eq!(config.delay_for_attempt(200), u64::MAX);

        let now = Utc::now();
        let mut t = task("1", "es_MX");
        t.attempt = 150;
        let next = t.retry(&config, now).unwrap();
        assert_eq!(next.attempt, 151);
        assert_eq!(next.not_before, now + Duration::days(7));

        let at_the_end = t.retry(&config, DateTime::<Utc>::MAX_UTC).unwrap();
        assert_eq!(at_the_end.not_before, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn drain_returns_only_due_tasks() {
        let queue = MemoryQueue::new();
        let now = Utc::now();
        queue.enqueue(task("1", "es_MX"));
        let mut later = task("2", "es_MX");
        later.not_before = now + Duration::seconds(60);
        queue.enqueue(later);

        let due = queue.drain(now + Duration::seconds(1));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].key.unit_id, "1");
        assert_eq!(queue.len(), 1);

        let due = queue.drain(now + Duration::seconds(61));
        assert_eq!(due.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn duplicate_targets_are_queued_once() {
        let queue = MemoryQueue::new();
        queue.enqueue(task("1", "es_MX"));
        queue.enqueue(task("1", "es_MX"));
        queue.enqueue(task("1", "de_DE"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pending().len(), 2);
    }

    #[test]
    fn task_serialization_roundtrip() {
        let t = task("1", "es_MX");
        let json = serde_json::to_string(&t).unwrap();
        let parsed: DownloadTask = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, t);
    }
}

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::monitor::task::TaskKey;

/// Outcome of recording a processing failure
#[derive(Debug, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Queued for a later retry sweep
    Requeued { attempts: u32 },
    /// Attempt limit reached, task dropped for good
    Permanent,
}

/// A partially-failed task awaiting retry
#[derive(Debug, Clone)]
struct FailureEntry<T> {
    attempts: u32,
    last_seen: DateTime<Utc>,
    task: T,
}

/// Result of draining the failure queue for one sweep
#[derive(Debug)]
pub struct SweepPlan<T> {
    /// Entries still eligible for a retry attempt
    pub retry: Vec<(TaskKey, T)>,
    /// Entries dropped because they were not re-observed within the window
    pub expired: usize,
}

impl<T> Default for SweepPlan<T> {
    fn default() -> Self {
        Self {
            retry: Vec::new(),
            expired: 0,
        }
    }
}

/// Tracks which tasks completed (dedup) and which are pending retry.
///
/// Generic over the queued task payload so the state machine can be tested
/// without a live browser element. A key lives in at most one of the two
/// maps: success is terminal and removes any pending entry; a pending entry
/// is dropped once the attempt limit or the staleness window is exceeded.
pub struct TaskRegistry<T> {
    processed: HashSet<TaskKey>,
    pending: HashMap<TaskKey, FailureEntry<T>>,
    max_attempts: u32,
    staleness: Duration,
}

impl<T: Clone> TaskRegistry<T> {
    pub fn new(max_attempts: u32, staleness_secs: u64) -> Self {
        Self {
            processed: HashSet::new(),
            pending: HashMap::new(),
            max_attempts,
            staleness: Duration::seconds(staleness_secs as i64),
        }
    }

    /// True if this key already completed successfully this run
    pub fn is_processed(&self, key: TaskKey) -> bool {
        self.processed.contains(&key)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Record terminal success. Removes any pending failure entry.
    pub fn mark_success(&mut self, key: TaskKey) {
        self.pending.remove(&key);
        self.processed.insert(key);
    }

    /// Refresh the last-seen timestamp of a pending entry when the task is
    /// re-observed in discovery
    pub fn mark_seen(&mut self, key: TaskKey, now: DateTime<Utc>) {
        if let Some(entry) = self.pending.get_mut(&key) {
            entry.last_seen = now;
        }
    }

    /// Record a failed processing attempt. Ignored for already-completed
    /// keys; increments the attempt count otherwise, dropping the entry once
    /// the configured limit is reached.
    pub fn record_failure(
        &mut self,
        key: TaskKey,
        task: T,
        now: DateTime<Utc>,
    ) -> FailureDisposition {
        if self.processed.contains(&key) {
            debug!("Ignoring failure for already-processed task");
            return FailureDisposition::Requeued { attempts: 0 };
        }

        let attempts = self.pending.get(&key).map(|e| e.attempts).unwrap_or(0) + 1;
        if attempts >= self.max_attempts {
            self.pending.remove(&key);
            warn!(
                "Task exceeded {} attempts, dropping permanently",
                self.max_attempts
            );
            return FailureDisposition::Permanent;
        }

        self.pending.insert(
            key,
            FailureEntry {
                attempts,
                last_seen: now,
                task,
            },
        );
        info!("Task queued for retry (attempt {})", attempts);
        FailureDisposition::Requeued { attempts }
    }

    /// Replace the queued payload for a pending entry (element re-resolved
    /// after going stale)
    pub fn update_task(&mut self, key: TaskKey, task: T) {
        if let Some(entry) = self.pending.get_mut(&key) {
            entry.task = task;
        }
    }

    /// Drain the failure queue for one retry sweep: expired entries are
    /// removed, the rest are returned for reprocessing. Entries stay queued
    /// until a subsequent success or failure settles them.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepPlan<T> {
        let mut plan = SweepPlan::default();
        let mut to_remove = Vec::new();

        for (key, entry) in &self.pending {
            if now - entry.last_seen > self.staleness {
                info!("Queued task not re-observed within the staleness window, dropping");
                to_remove.push(*key);
                plan.expired += 1;
                continue;
            }
            plan.retry.push((*key, entry.task.clone()));
        }

        for key in to_remove {
            self.pending.remove(&key);
        }

        plan
    }
}

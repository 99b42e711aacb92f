use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::to_chrono;
use crate::resilience::retry::RetryConfig;

/// Delivery state of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    /// Needs an external resolution decision
    Conflict,
}

impl SyncStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
        }
    }

    /// Completed and conflicted items never re-enter a batch.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Conflict)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
    Approve,
    Reject,
}

impl SyncOperation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

impl std::fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One local mutation waiting to reach the remote backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Queue id
    pub id: String,
    /// Id of the entity this mutation targets
    pub item_id: String,
    pub item_type: String,
    pub operation: SyncOperation,
    pub payload: Value,
    /// Higher drains first
    pub priority: i32,
    pub queued_at: DateTime<Utc>,
    /// Submission order; breaks ties between equal `queued_at`
    pub sequence: u64,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub error_message: Option<String>,
}

impl SyncQueueItem {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        item_id: String,
        item_type: String,
        operation: SyncOperation,
        payload: Value,
        priority: i32,
        queued_at: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            id,
            item_id,
            item_type,
            operation,
            payload,
            priority,
            queued_at,
            sequence,
            retry_count: 0,
            last_retry_at: None,
            status: SyncStatus::Pending,
            error_message: None,
        }
    }

    /// Out of retries; only a manual reset brings it back.
    #[must_use]
    pub fn is_exhausted(&self, retry: &RetryConfig) -> bool {
        retry.is_exhausted(self.retry_count)
    }

    /// Earliest instant after which the item may be retried.
    #[must_use]
    pub fn cooldown_until(&self, retry: &RetryConfig) -> Option<DateTime<Utc>> {
        self.last_retry_at
            .map(|at| at + to_chrono(retry.delay_for(self.retry_count)))
    }

    /// Whether `next_batch` may hand this item out at `now`.
    #[must_use]
    pub fn is_eligible(&self, now: DateTime<Utc>, retry: &RetryConfig) -> bool {
        if !matches!(self.status, SyncStatus::Pending | SyncStatus::Failed) {
            return false;
        }
        if self.is_exhausted(retry) {
            return false;
        }
        match self.cooldown_until(retry) {
            Some(until) => now > until,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn item(now: DateTime<Utc>) -> SyncQueueItem {
        SyncQueueItem::new(
            "q1".into(),
            "od-1".into(),
            "od_request".into(),
            SyncOperation::Create,
            json!({"id": "od-1"}),
            0,
            now,
            0,
        )
    }

    #[test]
    fn test_new_item_is_eligible() {
        let now = Utc::now();
        assert!(item(now).is_eligible(now, &RetryConfig::sync_queue()));
    }

    #[test]
    fn test_cooldown_after_failure() {
        let now = Utc::now();
        let retry = RetryConfig::sync_queue();
        let mut it = item(now);
        it.status = SyncStatus::Failed;
        it.retry_count = 1;
        it.last_retry_at = Some(now);

        // 30s * 2^1
        assert!(!it.is_eligible(now + Duration::seconds(60), &retry));
        assert!(it.is_eligible(now + Duration::seconds(61), &retry));
    }

    #[test]
    fn test_exhausted_item_never_eligible() {
        let now = Utc::now();
        let retry = RetryConfig::sync_queue();
        let mut it = item(now);
        it.status = SyncStatus::Failed;
        it.retry_count = 3;
        it.last_retry_at = Some(now);

        assert!(it.is_exhausted(&retry));
        assert!(!it.is_eligible(now + Duration::days(30), &retry));
    }

    #[test]
    fn test_terminal_statuses_not_eligible() {
        let now = Utc::now();
        let retry = RetryConfig::sync_queue();
        for status in [SyncStatus::InProgress, SyncStatus::Completed, SyncStatus::Conflict] {
            let mut it = item(now);
            it.status = status;
            assert!(!it.is_eligible(now, &retry), "{status} should not be eligible");
        }
    }

    #[test]
    fn test_status_names() {
        assert_eq!(SyncStatus::InProgress.as_str(), "in_progress");
        assert_eq!(serde_json::to_string(&SyncStatus::InProgress).unwrap(), "\"in_progress\"");
        assert_eq!(SyncOperation::Approve.to_string(), "approve");
    }
}

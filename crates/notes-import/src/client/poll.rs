//! Bounded polling of the status endpoint

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};

use crate::error::Result;
use crate::types::{NoteDraft, StatusResponse, TaskId, TaskStatus};

/// Message reported when the server does not know the task
pub const NOT_FOUND_MESSAGE: &str = "import job not found";

/// Anything that can produce status snapshots of a task
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, id: &TaskId) -> Result<StatusResponse>;
}

/// Limits of one polling session
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Wait between two requests
    pub interval: Duration,
    /// Requests before giving up
    pub max_attempts: u32,
    /// Wall-clock budget of the whole session
    pub deadline: Duration,
    /// Consecutive failed requests tolerated before giving up
    pub transport_retries: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1200),
            max_attempts: 250,
            deadline: Duration::from_secs(5 * 60),
            transport_retries: 0,
        }
    }
}

/// How a polling session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(Vec<NoteDraft>),
    Failed(String),
    TimedOut,
    TransportError(String),
}

/// Poll until the task is terminal or the policy runs out
pub async fn poll_until_terminal<S>(source: &S, id: &TaskId, policy: &PollPolicy) -> PollOutcome
where
    S: StatusSource + ?Sized,
{
    poll_with_progress(source, id, policy, |_| {}).await
}

/// Like [`poll_until_terminal`], calling `on_snapshot` for every non-terminal snapshot
pub async fn poll_with_progress<S, F>(
    source: &S,
    id: &TaskId,
    policy: &PollPolicy,
    mut on_snapshot: F,
) -> PollOutcome
where
    S: StatusSource + ?Sized,
    F: FnMut(&StatusResponse) + Send,
{
    let start = Instant::now();
    let mut failures = 0u32;

    for attempt in 1..=policy.max_attempts {
        let Some(remaining) = policy.deadline.checked_sub(start.elapsed()) else {
            break;
        };

        let failure = match timeout(remaining, source.fetch_status(id)).await {
            Err(_) => break,
            Ok(Err(e)) => Some(e.to_string()),
            Ok(Ok(snapshot)) => match snapshot.status {
                TaskStatus::Completed => {
                    let notes = snapshot.result.map(|r| r.notes).unwrap_or_default();
                    return PollOutcome::Completed(notes);
                }
                TaskStatus::Failed => {
                    let error = snapshot
                        .error
                        .unwrap_or_else(|| "import failed".to_string());
                    return PollOutcome::Failed(error);
                }
                TaskStatus::NotFound => return PollOutcome::Failed(NOT_FOUND_MESSAGE.to_string()),
                TaskStatus::Error => Some(
                    snapshot
                        .message
                        .unwrap_or_else(|| "status lookup failed".to_string()),
                ),
                TaskStatus::Queued | TaskStatus::Active => {
                    failures = 0;
                    on_snapshot(&snapshot);
                    None
                }
            },
        };

        if let Some(failure) = failure {
            failures += 1;
            tracing::warn!("Status poll {} for {} failed: {}", attempt, id, failure);
            if failures > policy.transport_retries {
                return PollOutcome::TransportError(failure);
            }
        }

        if attempt == policy.max_attempts {
            break;
        }
        match policy.deadline.checked_sub(start.elapsed()) {
            Some(remaining) => sleep(policy.interval.min(remaining)).await,
            None => break,
        }
    }

    PollOutcome::TimedOut
}

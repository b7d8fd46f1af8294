// src/client/poll.rs
//! Client-side polling of a fetch workflow: fixed interval, fixed attempt cap,
//! run as a cancellable task.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::ClientError;
use crate::fetcher::FetchResult;
use crate::workflow::{FetchOrchestrator, WorkflowStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    /// 1 s x 30 attempts, roughly 30 s.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 30,
        }
    }
}

/// Where workflow status comes from: the HTTP API or an in-process orchestrator.
#[async_trait::async_trait]
pub trait StatusSource: Send + Sync {
    async fn status(&self, id: Uuid) -> Result<WorkflowStatus, ClientError>;
}

#[async_trait::async_trait]
impl StatusSource for FetchOrchestrator {
    async fn status(&self, id: Uuid) -> Result<WorkflowStatus, ClientError> {
        self.poll(id).ok_or_else(|| ClientError::Rejected {
            status: 404,
            message: format!("unknown workflow '{id}'"),
        })
    }
}

/// Poll until the workflow finishes, the cap is hit, or `cancel` fires.
/// Returns the README content on a successful fetch.
pub async fn poll_until_complete<S: StatusSource + ?Sized>(
    source: &S,
    id: Uuid,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<String, ClientError> {
    let mut ticker = tokio::time::interval(policy.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    for attempt in 1..=policy.max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            _ = ticker.tick() => {}
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            s = source.status(id) => s?,
        };

        match status {
            WorkflowStatus::Running => {
                debug!(workflow = %id, attempt, "workflow still running");
            }
            WorkflowStatus::Completed(FetchResult::Fetched { content, .. }) => return Ok(content),
            WorkflowStatus::Completed(FetchResult::Failed { error }) => {
                return Err(ClientError::Fetch(error))
            }
            WorkflowStatus::Errored(e) => return Err(ClientError::Workflow(e)),
        }
    }

    Err(ClientError::Timeout {
        attempts: policy.max_attempts,
    })
}

/// A running poll loop. Dropping it does not stop the loop; call [`PollTask::cancel`].
pub struct PollTask {
    handle: JoinHandle<Result<String, ClientError>>,
    cancel: CancellationToken,
}

impl PollTask {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn join(self) -> Result<String, ClientError> {
        match self.handle.await {
            Ok(res) => res,
            Err(e) => Err(ClientError::Workflow(format!("poll task failed: {e}"))),
        }
    }
}

pub fn spawn_poll<S>(source: Arc<S>, id: Uuid, policy: PollPolicy) -> PollTask
where
    S: StatusSource + ?Sized + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle =
        tokio::spawn(async move { poll_until_complete(source.as_ref(), id, policy, &token).await });
    PollTask { handle, cancel }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Reports `Running` until `finish_after` calls, then `then`.
    struct Scripted {
        calls: AtomicU32,
        finish_after: u32,
        then: WorkflowStatus,
    }

    #[async_trait::async_trait]
    impl StatusSource for Scripted {
        async fn status(&self, _id: Uuid) -> Result<WorkflowStatus, ClientError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.finish_after {
                Ok(self.then.clone())
            } else {
                Ok(WorkflowStatus::Running)
            }
        }
    }

    fn scripted(finish_after: u32, then: WorkflowStatus) -> Arc<Scripted> {
        Arc::new(Scripted {
            calls: AtomicU32::new(0),
            finish_after,
            then,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn returns_content_once_completed() {
        let src = scripted(
            3,
            WorkflowStatus::Completed(FetchResult::Fetched {
                content: "# Demo".into(),
                source_url: "u".into(),
            }),
        );
        let task = spawn_poll(src.clone(), Uuid::new_v4(), PollPolicy::default());
        assert_eq!(task.join().await.unwrap(), "# Demo");
        assert_eq!(src.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_thirty_attempts() {
        let src = scripted(u32::MAX, WorkflowStatus::Running);
        let started = tokio::time::Instant::now();
        let err = spawn_poll(src.clone(), Uuid::new_v4(), PollPolicy::default())
            .join()
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { attempts: 30 }));
        assert_eq!(src.calls.load(Ordering::SeqCst), 30);
        // first tick is immediate, then 29 one-second waits
        assert_eq!(started.elapsed(), Duration::from_secs(29));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_and_errored_workflow_are_distinct() {
        let failed = scripted(1, WorkflowStatus::Completed(FetchResult::Failed { error: "404".into() }));
        let err = spawn_poll(failed, Uuid::new_v4(), PollPolicy::default())
            .join()
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Fetch(ref e) if e == "404"));

        let errored = scripted(1, WorkflowStatus::Errored("panic".into()));
        let err = spawn_poll(errored, Uuid::new_v4(), PollPolicy::default())
            .join()
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Workflow(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_polling() {
        let src = scripted(u32::MAX, WorkflowStatus::Running);
        let task = spawn_poll(src.clone(), Uuid::new_v4(), PollPolicy::default());
        tokio::time::sleep(Duration::from_millis(2500)).await;
        task.cancel();
        let err = task.join().await.unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
        assert_eq!(src.calls.load(Ordering::SeqCst), 3);
    }
}

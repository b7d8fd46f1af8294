// src/workflow.rs
//! Durable fetch orchestrator: start a README fetch in the background and
//! poll it by handle. The step runs exactly once per handle; polling never
//! re-triggers it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use metrics::gauge;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::fetcher::{FetchResult, ReadmeSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    Running,
    Completed,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowStatus {
    Running,
    /// The fetch step finished; the result may still be a failed fetch.
    Completed(FetchResult),
    /// The step itself blew up (panic, runtime shutdown).
    Errored(String),
}

impl WorkflowStatus {
    pub fn state(&self) -> WorkflowState {
        match self {
            WorkflowStatus::Running => WorkflowState::Running,
            WorkflowStatus::Completed(_) => WorkflowState::Completed,
            WorkflowStatus::Errored(_) => WorkflowState::Errored,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowHandle {
    pub id: Uuid,
    pub status: WorkflowState,
}

#[derive(Debug)]
struct Entry {
    status: WorkflowStatus,
    finished_at: Option<Instant>,
}

/// Registry of fetch workflows, shared by the HTTP handlers.
#[derive(Clone)]
pub struct FetchOrchestrator {
    source: Arc<dyn ReadmeSource>,
    entries: Arc<RwLock<HashMap<Uuid, Entry>>>,
    retention: Duration,
}

impl FetchOrchestrator {
    pub fn new(source: Arc<dyn ReadmeSource>, retention: Duration) -> Self {
        Self {
            source,
            entries: Arc::new(RwLock::new(HashMap::new())),
            retention,
        }
    }

    /// Allocate a handle and spawn the fetch step. Returns immediately.
    pub fn start(&self, repository_url: &str) -> WorkflowHandle {
        self.prune_finished();

        let id = Uuid::new_v4();
        self.entries
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(
                id,
                Entry {
                    status: WorkflowStatus::Running,
                    finished_at: None,
                },
            );

        let source = Arc::clone(&self.source);
        let url = repository_url.to_string();
        let step = tokio::spawn(async move { source.fetch(&url).await });

        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            let status = match step.await {
                Ok(result) => {
                    info!(workflow = %id, succeeded = result.succeeded(), "fetch workflow completed");
                    WorkflowStatus::Completed(result)
                }
                Err(e) => {
                    error!(workflow = %id, error = %e, "fetch workflow errored");
                    WorkflowStatus::Errored(e.to_string())
                }
            };
            let mut map = entries.write().unwrap_or_else(|p| p.into_inner());
            if let Some(entry) = map.get_mut(&id) {
                entry.status = status;
                entry.finished_at = Some(Instant::now());
            }
        });

        info!(workflow = %id, repository_url, "fetch workflow started");
        WorkflowHandle {
            id,
            status: WorkflowState::Running,
        }
    }

    /// Current status, or `None` for unknown (or already pruned) handles.
    pub fn poll(&self, id: Uuid) -> Option<WorkflowStatus> {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&id)
            .map(|e| e.status.clone())
    }

    /// Drop finished workflows older than the retention period.
    pub fn prune_finished(&self) -> usize {
        let now = Instant::now();
        let mut map = self.entries.write().unwrap_or_else(|p| p.into_inner());
        let before = map.len();
        map.retain(|_, e| match e.finished_at {
            Some(t) => now.duration_since(t) < self.retention,
            None => true,
        });
        gauge!("fetch_workflows_tracked").set(map.len() as f64);
        before - map.len()
    }
}

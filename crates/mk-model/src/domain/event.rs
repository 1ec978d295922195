use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// What happened during a lifecycle or cache operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    // lock
    LockAcquired,
    LockReleased,

    // create path
    HostCreating,
    HostCreated,
    CreateFailed,
    CreateTimedOut,
    ConflictDetected,
    AbandonedUnitRemoved,

    // fix path
    HostFixing,
    HostStarted,

    // post-start
    PostStartCompleted,
    PostStartFailed,
    FingerprintFailed,
    AssetsSynced,

    // persistence
    HostSaved,

    // outcome of a whole start; `reason` carries the error kind
    StartFailed,

    // cache
    PreloadReady,
    PreloadFailed,
    CacheTaskSucceeded,
    CacheTaskFailed,
    BaseImagePresent,
    BaseImageFallback,
    BaseImagePulled,
    BaseImageUnavailable,
}

impl EventKind {
    /// Returns `true` for kinds that report a failure of some step.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EventKind::CreateFailed
                | EventKind::StartFailed
                | EventKind::CreateTimedOut
                | EventKind::ConflictDetected
                | EventKind::PostStartFailed
                | EventKind::FingerprintFailed
                | EventKind::PreloadFailed
                | EventKind::CacheTaskFailed
                | EventKind::BaseImageUnavailable
        )
    }
}

/// Lifecycle event delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,
    /// Cache task or image reference the event refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip)]
    pub at: Option<SystemTime>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            machine: None,
            task: None,
            reason: None,
            elapsed_ms: None,
            at: Some(SystemTime::now()),
        }
    }

    pub fn with_machine(mut self, machine: impl Into<String>) -> Self {
        self.machine = Some(machine.into());
        self
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn with_reason(mut self, reason: impl ToString) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = Some(elapsed.as_millis() as u64);
        self
    }
}

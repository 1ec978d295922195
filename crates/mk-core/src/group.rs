//! Join-all group of named background tasks.
//!
//! Unlike an error-cancelling group, every task is awaited: a failure in one task
//! never aborts the others, and [`TaskGroup::wait`] returns only after all resolved.

use std::{collections::HashMap, fmt, future::Future};

use tokio::task::{Id, JoinSet};
use tracing::{debug, trace};

/// Why a task did not succeed.
#[derive(Debug)]
pub enum TaskFailure<E> {
    Error(E),
    Panicked(String),
}

impl<E: fmt::Display> fmt::Display for TaskFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Error(e) => write!(f, "{e}"),
            TaskFailure::Panicked(msg) => write!(f, "task panicked: {msg}"),
        }
    }
}

/// Outcome of every task in a group, in completion order.
#[derive(Debug)]
pub struct GroupReport<E> {
    pub group: &'static str,
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, TaskFailure<E>)>,
}

impl<E> GroupReport<E> {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Task errors, skipping panics.
    pub fn errors(&self) -> impl Iterator<Item = (&str, &E)> {
        self.failed.iter().filter_map(|(name, f)| match f {
            TaskFailure::Error(e) => Some((name.as_str(), e)),
            TaskFailure::Panicked(_) => None,
        })
    }
}

pub struct TaskGroup<E> {
    name: &'static str,
    set: JoinSet<Result<(), E>>,
    names: HashMap<Id, String>,
}

impl<E: Send + 'static> TaskGroup<E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            set: JoinSet::new(),
            names: HashMap::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.set.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Spawns `fut` on the current runtime. Must be called from within a tokio runtime.
    pub fn spawn<F>(&mut self, task: impl Into<String>, fut: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        let task = task.into();
        let handle = self.set.spawn(fut);
        trace!(group = self.name, task = %task, "spawned task");
        self.names.insert(handle.id(), task);
    }

    /// Waits for every task.
    pub async fn wait(mut self) -> GroupReport<E> {
        let mut report = GroupReport {
            group: self.name,
            succeeded: Vec::new(),
            failed: Vec::new(),
        };

        while let Some(joined) = self.set.join_next_with_id().await {
            match joined {
                Ok((id, Ok(()))) => report.succeeded.push(self.take_name(id)),
                Ok((id, Err(e))) => report.failed.push((self.take_name(id), TaskFailure::Error(e))),
                Err(join) => {
                    let name = self.take_name(join.id());
                    report.failed.push((name, TaskFailure::Panicked(join.to_string())));
                }
            }
        }

        debug!(
            group = self.name,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "task group finished"
        );
        report
    }

    fn take_name(&mut self, id: Id) -> String {
        self.names.remove(&id).unwrap_or_else(|| format!("task-{id}"))
    }
}

impl<E> fmt::Debug for TaskGroup<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("name", &self.name)
            .field("tasks", &self.names.values().collect::<Vec<_>>())
            .finish()
    }
}

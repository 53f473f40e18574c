//! Typed task commands and the queues that carry them.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::error::PipelineError;
use crate::types::{Event, EventFlags, GroupId, Notification, RuleId};

/// A side effect to run after the event has been post-processed.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
  RecordAffectedUser {
    group_id: GroupId,
    event: Arc<Event>,
  },
  RecordAffectedCode {
    group_id: GroupId,
    event: Arc<Event>,
  },
  ExecuteRule {
    rule_id: RuleId,
    event: Arc<Event>,
    flags: EventFlags,
  },
  Notify(Notification),
}

impl Task {
  pub fn name(&self) -> &'static str {
    match self {
      Self::RecordAffectedUser { .. } => "record_affected_user",
      Self::RecordAffectedCode { .. } => "record_affected_code",
      Self::ExecuteRule { .. } => "execute_rule",
      Self::Notify(_) => "notify",
    }
  }
}

/// Fire-and-forget task submission.
pub trait TaskQueue {
  fn enqueue(&self, task: Task) -> Result<(), PipelineError>;
}

pub type TaskSender = mpsc::UnboundedSender<Task>;
pub type TaskReceiver = mpsc::UnboundedReceiver<Task>;

pub fn channel() -> (TaskSender, TaskReceiver) {
  mpsc::unbounded_channel()
}

impl TaskQueue for TaskSender {
  fn enqueue(&self, task: Task) -> Result<(), PipelineError> {
    let name = task.name();
    self.send(task).map_err(|_| PipelineError::QueueClosed(name))?;
    tracing::debug!(task = name, "enqueued");
    Ok(())
  }
}

/// Records tasks instead of running them.
#[derive(Debug, Default)]
pub struct MemoryQueue {
  tasks: Mutex<Vec<Task>>,
}

impl MemoryQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Snapshot of every task enqueued so far.
  pub fn tasks(&self) -> Vec<Task> {
    self.lock().clone()
  }

  /// Number of enqueued tasks named `name`.
  pub fn count(&self, name: &str) -> usize {
    self.lock().iter().filter(|t| t.name() == name).count()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Task>> {
    self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl TaskQueue for MemoryQueue {
  fn enqueue(&self, task: Task) -> Result<(), PipelineError> {
    self.lock().push(task);
    Ok(())
  }
}

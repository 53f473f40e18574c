//! Core engine: saves events, post-processes them, and drains the task queue.

use std::sync::Arc;

use crate::config::Config;
use crate::error::PipelineError;
use crate::fingerprint;
use crate::normalize;
use crate::pipeline::PostProcessor;
use crate::queue::{self, Task, TaskReceiver, TaskSender};
use crate::rules::Registry;
use crate::store::{MemoryStore, RuleBook};
use crate::tags;
use crate::types::*;

/// Result of saving one event.
#[derive(Debug, Clone)]
pub struct Ingested {
  pub group_id: GroupId,
  pub event: Arc<Event>,
  pub flags: EventFlags,
}

/// What one drain of the task queue produced.
#[derive(Debug, Default)]
pub struct Drained {
  pub notifications: Vec<Notification>,
  /// Tasks that failed, by task name. Other tasks still ran.
  pub failed: Vec<(&'static str, PipelineError)>,
}

/// The post-processing engine. Holds in-memory state across events.
pub struct Engine {
  config: Config,
  registry: Registry,
  rules: RuleBook,
  store: MemoryStore,
  queue: TaskSender,
  tasks: TaskReceiver,
}

impl Engine {
  /// Build an engine, refusing rules that name an unregistered condition or action.
  pub fn new(config: Config, registry: Registry) -> Result<Self, PipelineError> {
    for rule in &config.rules {
      registry
        .validate(rule)
        .map_err(|e| PipelineError::config(format!("rule {}: {}", rule.id, e)))?;
    }
    let (queue, tasks) = queue::channel();
    let rules = RuleBook::new(config.rules.clone());
    Ok(Self {
      config,
      registry,
      rules,
      store: MemoryStore::new(),
      queue,
      tasks,
    })
  }

  fn processor(&self) -> PostProcessor<'_> {
    PostProcessor::new(&self.config, &self.rules, &self.registry, &self.queue)
  }

  /// Save a single inbound event against its group and enqueue its side effects.
  pub fn ingest(&mut self, raw: &InboundEvent) -> Result<Ingested, PipelineError> {
    let mut event = normalize::normalize(raw)?;
    let fp = fingerprint::compute(&event, self.config.fingerprint_max_frames);
    let (group_id, flags) = self.store.save_event(&mut event, fp, &self.config)?;
    let event = Arc::new(event);

    let group = self.store.group_mut(group_id)?;
    PostProcessor::new(&self.config, &self.rules, &self.registry, &self.queue)
      .post_process_group(group, &event, flags)?;

    tracing::debug!(
      group = %group_id,
      event_id = %event.event_id,
      is_new = flags.is_new,
      is_regression = flags.is_regression,
      is_sample = flags.is_sample,
      "event post-processed"
    );
    Ok(Ingested {
      group_id,
      event,
      flags,
    })
  }

  /// Execute one task. Returns the notification for `Notify` tasks.
  pub fn run_task(&mut self, task: Task) -> Result<Option<Notification>, PipelineError> {
    match task {
      Task::RecordAffectedUser { group_id, event } => {
        tags::record_affected_user(&mut self.store, group_id, &event)?;
        Ok(None)
      }
      Task::RecordAffectedCode { group_id, event } => {
        tags::record_affected_code(&mut self.store, group_id, &event)?;
        Ok(None)
      }
      Task::ExecuteRule {
        rule_id,
        event,
        flags,
      } => {
        self.processor().execute_rule(rule_id, &event, flags)?;
        Ok(None)
      }
      Task::Notify(notification) => {
        tracing::info!(
          project = %notification.project,
          event_id = %notification.event_id,
          message = %notification.message,
          "notification"
        );
        Ok(Some(notification))
      }
    }
  }

  /// Run queued tasks until the queue is empty, including tasks they enqueue.
  pub fn drain(&mut self) -> Drained {
    let mut drained = Drained::default();
    while let Ok(task) = self.tasks.try_recv() {
      let name = task.name();
      match self.run_task(task) {
        Ok(Some(notification)) => drained.notifications.push(notification),
        Ok(None) => {}
        Err(e) => {
          tracing::warn!(task = name, error = %e, "task failed");
          drained.failed.push((name, e));
        }
      }
    }
    drained
  }

  /// Ingest one event and drain every task it caused.
  pub fn process(&mut self, raw: &InboundEvent) -> Result<Drained, PipelineError> {
    self.ingest(raw)?;
    Ok(self.drain())
  }

  pub fn resolve_group(&mut self, id: GroupId) -> Result<(), PipelineError> {
    self.store.resolve(id)
  }

  pub fn group(&self, id: GroupId) -> Option<&Group> {
    self.store.group(id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::rules::{BuiltinAction, BuiltinCondition};
  use crate::tags::{FILENAME_TAG, FUNCTION_TAG, USER_TAG};
  use serde_json::json;

  fn first_seen_rule() -> Rule {
    Rule {
      id: RuleId(1),
      project: ProjectId(1),
      label: "first seen".into(),
      data: RuleData {
        conditions: vec![Descriptor::new(BuiltinCondition::FirstSeenEvent.id())],
        actions: vec![Descriptor::new(BuiltinAction::NotifyEvent.id())],
        ..RuleData::default()
      },
    }
  }

  fn engine() -> Engine {
    Engine::new(
      Config {
        explore_users: true,
        explore_code: true,
        rules: vec![first_seen_rule()],
        ..Config::default()
      },
      Registry::with_builtins(),
    )
    .unwrap()
  }

  fn make_inbound(minute: u32) -> InboundEvent {
    serde_json::from_value(json!({
      "project": 1,
      "message": "cannot read property x",
      "timestamp": format!("2025-01-15T10:{:02}:00Z", minute),
      "sentry.interfaces.User": {"email": "foo@example.com"},
      "sentry.interfaces.Exception": {"values": [{
        "type": "TypeError",
        "stacktrace": {"frames": [{"filename": "foo.py", "function": "bar", "in_app": true}]}
      }]}
    }))
    .unwrap()
  }

  #[test]
  fn first_event_notifies_once() {
    let mut engine = engine();
    let first = engine.process(&make_inbound(0)).unwrap();
    assert_eq!(first.notifications.len(), 1);
    assert!(first.failed.is_empty());
    assert!(first.notifications[0].is_new);

    let second = engine.process(&make_inbound(1)).unwrap();
    assert!(second.notifications.is_empty());
  }

  #[test]
  fn tagging_tasks_write_to_group() {
    let mut engine = engine();
    let ingested = engine.ingest(&make_inbound(0)).unwrap();
    assert!(ingested.flags.is_new);
    assert_eq!(ingested.event.group_id, Some(ingested.group_id));
    engine.drain();

    let group = engine.group(ingested.group_id).unwrap();
    let keys: Vec<&str> = group.tags.iter().map(|t| t.key.as_str()).collect();
    assert_eq!(keys, vec![USER_TAG, FILENAME_TAG, FUNCTION_TAG]);
    assert!(group.tag(USER_TAG, "email:foo@example.com").is_some());
  }

  #[test]
  fn group_state_tracks_latest_event() {
    let mut engine = engine();
    let ingested = engine.ingest(&make_inbound(0)).unwrap();
    assert_eq!(engine.drain().notifications.len(), 1);
    assert_eq!(engine.group(ingested.group_id).unwrap().state, GroupState::New);

    engine.process(&make_inbound(1)).unwrap();
    assert_eq!(engine.group(ingested.group_id).unwrap().state, GroupState::Seen);
  }

  #[test]
  fn invalid_event_returns_error() {
    let mut engine = engine();
    let mut raw = make_inbound(0);
    raw.timestamp = Some("not-a-date".into());
    let err = engine.process(&raw).unwrap_err();
    assert!(err.to_string().contains("timestamp"));
  }

  #[test]
  fn resolved_group_reports_regression() {
    let mut engine = engine();
    let first = engine.ingest(&make_inbound(0)).unwrap();
    engine.drain();
    engine.resolve_group(first.group_id).unwrap();

    let again = engine.ingest(&make_inbound(5)).unwrap();
    assert!(again.flags.is_regression);
    assert!(!again.flags.is_new);
    assert!(engine.resolve_group(GroupId(99)).is_err());
  }

  #[test]
  fn failed_rule_is_reported_and_others_continue() {
    // Registered at build time, gone by the time the rule executes.
    let mut rule = first_seen_rule();
    rule.data.actions.push(Descriptor::new("missing.action"));
    let mut engine = Engine::new(
      Config {
        rules: vec![first_seen_rule()],
        ..Config::default()
      },
      Registry::with_builtins(),
    )
    .unwrap();
    engine.rules = RuleBook::new(vec![rule]);

    let drained = engine.process(&make_inbound(0)).unwrap();
    assert!(drained.notifications.is_empty());
    assert_eq!(drained.failed.len(), 1);
    assert_eq!(drained.failed[0].0, "execute_rule");

    let group = engine.group(GroupId(1)).unwrap();
    assert_eq!(group.tags.len(), 1);
  }

  #[test]
  fn unregistered_rule_ids_are_refused_at_startup() {
    let mut broken = first_seen_rule();
    broken.id = RuleId(7);
    broken.data.conditions = vec![Descriptor::new("typo.condition")];
    let err = Engine::new(
      Config {
        rules: vec![broken, first_seen_rule()],
        ..Config::default()
      },
      Registry::with_builtins(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, PipelineError::Config(_)));
    assert!(err.to_string().contains("rule 7"));
    assert!(err.to_string().contains("typo.condition"));
  }

  #[test]
  fn broken_rule_leaves_event_fully_applied() {
    let mut broken = first_seen_rule();
    broken.data.conditions = vec![Descriptor::new("typo.condition")];
    let mut valid = first_seen_rule();
    valid.id = RuleId(2);
    let mut engine = engine();
    engine.rules = RuleBook::new(vec![broken, valid]);

    let first = engine.process(&make_inbound(0)).unwrap();
    assert_eq!(first.notifications.len(), 1);
    let group = engine.group(GroupId(1)).unwrap();
    assert_eq!(group.times_seen, 1);
    assert_eq!(group.tags.len(), 3);
    assert!(group.tags.iter().all(|t| t.times_seen == 1));

    let second = engine.process(&make_inbound(1)).unwrap();
    assert!(second.notifications.is_empty());
    let group = engine.group(GroupId(1)).unwrap();
    assert!(group.tags.iter().all(|t| t.times_seen == 2));
  }
}

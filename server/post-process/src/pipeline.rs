//! Post-processing of a saved event: fan out tagging tasks and rule execution.

use std::sync::Arc;

use crate::config::Config;
use crate::error::PipelineError;
use crate::queue::{Task, TaskQueue};
use crate::rules::Registry;
use crate::store::RuleSource;
use crate::types::{Event, EventFlags, Group, RuleId};

/// Everything post-processing reads from; holds no state of its own.
pub struct PostProcessor<'a> {
  config: &'a Config,
  rules: &'a dyn RuleSource,
  registry: &'a Registry,
  queue: &'a dyn TaskQueue,
}

impl<'a> PostProcessor<'a> {
  pub fn new(
    config: &'a Config,
    rules: &'a dyn RuleSource,
    registry: &'a Registry,
    queue: &'a dyn TaskQueue,
  ) -> Self {
    Self {
      config,
      rules,
      registry,
      queue,
    }
  }

  /// Enqueue the side effects for `event` on `group`.
  ///
  /// Tagging tasks follow the feature flags. Rules are evaluated only when the
  /// group moves from `Seen` to `New`, so repeated calls with `is_new` fire once.
  /// A rule whose conditions fail to resolve is logged and skipped.
  pub fn post_process_group(
    &self,
    group: &mut Group,
    event: &Arc<Event>,
    flags: EventFlags,
  ) -> Result<(), PipelineError> {
    if self.config.explore_users {
      self.queue.enqueue(Task::RecordAffectedUser {
        group_id: group.id,
        event: Arc::clone(event),
      })?;
    }
    if self.config.explore_code {
      self.queue.enqueue(Task::RecordAffectedCode {
        group_id: group.id,
        event: Arc::clone(event),
      })?;
    }

    let rules = self.rules.get_rules(group.project);

    if !group.transition(flags.is_new) {
      if flags.is_new {
        tracing::debug!(group = %group.id, "group already new; rules not re-evaluated");
      }
      return Ok(());
    }

    for rule in rules {
      match self.registry.rule_matches(rule, event, flags) {
        Ok(true) => {}
        Ok(false) => continue,
        Err(e) => {
          tracing::warn!(group = %group.id, rule = %rule.id, error = %e, "rule skipped");
          continue;
        }
      }
      tracing::debug!(group = %group.id, rule = %rule.id, "rule matched");
      self.queue.enqueue(Task::ExecuteRule {
        rule_id: rule.id,
        event: Arc::clone(event),
        flags,
      })?;
    }
    Ok(())
  }

  /// Run every action of the rule and enqueue what they produce.
  ///
  /// All action ids are resolved before any action runs.
  pub fn execute_rule(
    &self,
    rule_id: RuleId,
    event: &Arc<Event>,
    flags: EventFlags,
  ) -> Result<(), PipelineError> {
    let rule = self
      .rules
      .get_rule(rule_id)
      .ok_or(PipelineError::RuleNotFound(rule_id))?;

    let actions = rule
      .data
      .actions
      .iter()
      .map(|descriptor| {
        self
          .registry
          .action(&descriptor.id)
          .map(|factory| factory(rule.project))
      })
      .collect::<Result<Vec<_>, PipelineError>>()?;

    for action in actions {
      for task in action.after(event, flags) {
        self.queue.enqueue(task)?;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fingerprint;
  use crate::interfaces::Interfaces;
  use crate::queue::MemoryQueue;
  use crate::rules::{BuiltinAction, BuiltinCondition, EventAction};
  use crate::store::RuleBook;
  use crate::types::{Descriptor, GroupId, Level, ProjectId, Rule, RuleData};
  use chrono::Utc;
  use std::sync::Mutex;

  const ACTION_ID: &str = "sentry.rules.actions.notify_event.NotifyEventAction";
  const CONDITION_ID: &str = "sentry.rules.conditions.first_seen_event.FirstSeenEventCondition";

  fn event() -> Arc<Event> {
    Arc::new(Event {
      event_id: "0".repeat(32),
      project: ProjectId(1),
      group_id: Some(GroupId(1)),
      message: "foo".into(),
      culprit: None,
      level: Level::Error,
      platform: None,
      timestamp: Utc::now(),
      interfaces: Interfaces::default(),
    })
  }

  fn group(event: &Event) -> Group {
    Group::new(GroupId(1), fingerprint::compute(event, 5), event)
  }

  fn rule(id: u64, actions: &[&str], conditions: &[&str]) -> Rule {
    Rule {
      id: RuleId(id),
      project: ProjectId(1),
      label: String::new(),
      data: RuleData {
        conditions: conditions.iter().map(|c| Descriptor::new(*c)).collect(),
        actions: actions.iter().map(|a| Descriptor::new(*a)).collect(),
        ..RuleData::default()
      },
    }
  }

  fn flags(is_new: bool) -> EventFlags {
    EventFlags::new(is_new, false, false)
  }

  fn quiet_config() -> Config {
    Config {
      explore_users: false,
      explore_code: false,
      ..Config::default()
    }
  }

  #[test]
  fn affected_code_follows_flag() {
    let registry = Registry::with_builtins();
    let rules = RuleBook::default();
    let e = event();
    let mut g = group(&e);

    let queue = MemoryQueue::new();
    PostProcessor::new(&quiet_config(), &rules, &registry, &queue)
      .post_process_group(&mut g, &e, flags(true))
      .unwrap();
    assert_eq!(queue.count("record_affected_code"), 0);

    let config = Config {
      explore_code: true,
      ..quiet_config()
    };
    PostProcessor::new(&config, &rules, &registry, &queue)
      .post_process_group(&mut g, &e, flags(true))
      .unwrap();
    assert_eq!(
      queue.tasks(),
      vec![Task::RecordAffectedCode {
        group_id: GroupId(1),
        event: Arc::clone(&e),
      }]
    );
  }

  #[test]
  fn affected_user_follows_flag() {
    let registry = Registry::with_builtins();
    let rules = RuleBook::default();
    let e = event();
    let mut g = group(&e);

    let queue = MemoryQueue::new();
    PostProcessor::new(&quiet_config(), &rules, &registry, &queue)
      .post_process_group(&mut g, &e, flags(true))
      .unwrap();
    assert_eq!(queue.count("record_affected_user"), 0);

    let config = Config {
      explore_users: true,
      ..quiet_config()
    };
    PostProcessor::new(&config, &rules, &registry, &queue)
      .post_process_group(&mut g, &e, flags(true))
      .unwrap();
    assert_eq!(
      queue.tasks(),
      vec![Task::RecordAffectedUser {
        group_id: GroupId(1),
        event: Arc::clone(&e),
      }]
    );
  }

  #[test]
  fn rules_fire_once_per_transition_into_new() {
    let config = quiet_config();
    let registry = Registry::with_builtins();
    let rules = RuleBook::new(vec![rule(1, &[ACTION_ID], &[CONDITION_ID])]);
    let queue = MemoryQueue::new();
    let processor = PostProcessor::new(&config, &rules, &registry, &queue);
    let e = event();
    let mut g = group(&e);

    processor.post_process_group(&mut g, &e, flags(false)).unwrap();
    assert_eq!(queue.count("execute_rule"), 0);

    processor.post_process_group(&mut g, &e, flags(true)).unwrap();
    assert_eq!(
      queue.tasks(),
      vec![Task::ExecuteRule {
        rule_id: RuleId(1),
        event: Arc::clone(&e),
        flags: flags(true),
      }]
    );

    // Still new: no state change, no second execution.
    processor.post_process_group(&mut g, &e, flags(true)).unwrap();
    assert_eq!(queue.count("execute_rule"), 1);

    // Cycling back through seen re-arms the rule.
    processor.post_process_group(&mut g, &e, flags(false)).unwrap();
    processor.post_process_group(&mut g, &e, flags(true)).unwrap();
    assert_eq!(queue.count("execute_rule"), 2);
  }

  #[test]
  fn non_matching_rules_are_skipped() {
    let config = quiet_config();
    let registry = Registry::with_builtins();
    let rules = RuleBook::new(vec![
      rule(1, &[ACTION_ID], &[BuiltinCondition::RegressionEvent.id()]),
      rule(2, &[ACTION_ID], &[]),
      rule(3, &[ACTION_ID], &[CONDITION_ID]),
    ]);
    let queue = MemoryQueue::new();
    let e = event();
    let mut g = group(&e);
    PostProcessor::new(&config, &rules, &registry, &queue)
      .post_process_group(&mut g, &e, flags(true))
      .unwrap();

    let fired: Vec<RuleId> = queue
      .tasks()
      .into_iter()
      .filter_map(|t| match t {
        Task::ExecuteRule { rule_id, .. } => Some(rule_id),
        _ => None,
      })
      .collect();
    assert_eq!(fired, vec![RuleId(3)]);
  }

  #[test]
  fn broken_rule_does_not_block_later_rules() {
    let config = quiet_config();
    let registry = Registry::with_builtins();
    let rules = RuleBook::new(vec![
      rule(1, &[ACTION_ID], &["typo.condition"]),
      rule(2, &[ACTION_ID], &[CONDITION_ID]),
    ]);
    let queue = MemoryQueue::new();
    let e = event();
    let mut g = group(&e);
    PostProcessor::new(&config, &rules, &registry, &queue)
      .post_process_group(&mut g, &e, flags(true))
      .unwrap();

    assert_eq!(
      queue.tasks(),
      vec![Task::ExecuteRule {
        rule_id: RuleId(2),
        event: Arc::clone(&e),
        flags: flags(true),
      }]
    );
  }

  type Calls = Arc<Mutex<Vec<(&'static str, ProjectId, Option<(Arc<Event>, EventFlags)>)>>>;

  /// Records construction and `after` calls.
  struct Spy {
    project: ProjectId,
    calls: Calls,
  }

  impl EventAction for Spy {
    fn after(&self, event: &Arc<Event>, flags: EventFlags) -> Vec<Task> {
      self
        .calls
        .lock()
        .unwrap()
        .push(("after", self.project, Some((Arc::clone(event), flags))));
      Vec::new()
    }
  }

  #[test]
  fn execute_rule_resolves_binds_and_calls_after() {
    let calls: Calls = Arc::default();
    let mut registry = Registry::empty();
    let factory_calls = Arc::clone(&calls);
    registry.register_action("a.rule.id", move |project| -> Box<dyn EventAction> {
      factory_calls.lock().unwrap().push(("new", project, None));
      Box::new(Spy {
        project,
        calls: Arc::clone(&factory_calls),
      })
    });

    let rules = RuleBook::new(vec![rule(1, &["a.rule.id"], &[])]);
    let queue = MemoryQueue::new();
    let config = quiet_config();
    let e = event();
    let f = EventFlags::new(true, false, true);
    PostProcessor::new(&config, &rules, &registry, &queue)
      .execute_rule(RuleId(1), &e, f)
      .unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(
      *calls,
      vec![
        ("new", ProjectId(1), None),
        ("after", ProjectId(1), Some((Arc::clone(&e), f))),
      ]
    );
  }

  #[test]
  fn execute_rule_enqueues_action_effects() {
    let config = quiet_config();
    let registry = Registry::with_builtins();
    let rules = RuleBook::new(vec![rule(1, &[BuiltinAction::NotifyEvent.id()], &[])]);
    let queue = MemoryQueue::new();
    PostProcessor::new(&config, &rules, &registry, &queue)
      .execute_rule(RuleId(1), &event(), flags(true))
      .unwrap();
    assert_eq!(queue.count("notify"), 1);
  }

  #[test]
  fn execute_rule_errors() {
    let config = quiet_config();
    let registry = Registry::with_builtins();
    let rules = RuleBook::new(vec![rule(1, &[ACTION_ID, "missing.action"], &[])]);
    let queue = MemoryQueue::new();
    let processor = PostProcessor::new(&config, &rules, &registry, &queue);

    let err = processor.execute_rule(RuleId(9), &event(), flags(true)).unwrap_err();
    assert!(matches!(err, PipelineError::RuleNotFound(RuleId(9))));

    let err = processor.execute_rule(RuleId(1), &event(), flags(true)).unwrap_err();
    assert!(matches!(err, PipelineError::UnknownAction(ref id) if id == "missing.action"));
    // Resolution failed before any action ran.
    assert_eq!(queue.tasks().len(), 0);
  }
}

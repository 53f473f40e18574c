//! Rule conditions and actions, resolved by string id through a registry.
//!
//! Built-ins are known at compile time; the registry maps their ids (and any
//! registered at startup) to factories that bind a handler to a project.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::queue::Task;
use crate::types::{ActionMatch, Event, EventFlags, Notification, ProjectId, Rule};

/// Decides whether a rule applies to an event transition.
pub trait EventCondition: Send + Sync {
  fn passes(&self, event: &Event, flags: EventFlags) -> bool;
}

/// Runs after a rule has matched; returns the tasks it wants executed.
pub trait EventAction: Send + Sync {
  fn after(&self, event: &Arc<Event>, flags: EventFlags) -> Vec<Task>;
}

pub type ConditionFactory = Arc<dyn Fn(ProjectId) -> Box<dyn EventCondition> + Send + Sync>;
pub type ActionFactory = Arc<dyn Fn(ProjectId) -> Box<dyn EventAction> + Send + Sync>;

// ---------------------------------------------------------------------------
// Built-in conditions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinCondition {
  FirstSeenEvent,
  RegressionEvent,
  EveryEvent,
}

impl BuiltinCondition {
  pub const ALL: [Self; 3] = [Self::FirstSeenEvent, Self::RegressionEvent, Self::EveryEvent];

  pub fn id(self) -> &'static str {
    match self {
      Self::FirstSeenEvent => "sentry.rules.conditions.first_seen_event.FirstSeenEventCondition",
      Self::RegressionEvent => "sentry.rules.conditions.regression_event.RegressionEventCondition",
      Self::EveryEvent => "sentry.rules.conditions.every_event.EveryEventCondition",
    }
  }
}

impl EventCondition for BuiltinCondition {
  fn passes(&self, _event: &Event, flags: EventFlags) -> bool {
    match self {
      Self::FirstSeenEvent => flags.is_new,
      Self::RegressionEvent => flags.is_regression,
      Self::EveryEvent => true,
    }
  }
}

// ---------------------------------------------------------------------------
// Built-in actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinAction {
  NotifyEvent,
}

impl BuiltinAction {
  pub const ALL: [Self; 1] = [Self::NotifyEvent];

  pub fn id(self) -> &'static str {
    match self {
      Self::NotifyEvent => "sentry.rules.actions.notify_event.NotifyEventAction",
    }
  }

  pub fn bind(self, project: ProjectId) -> Box<dyn EventAction> {
    match self {
      Self::NotifyEvent => Box::new(NotifyEventAction { project }),
    }
  }
}

/// Emits one notification for the event.
#[derive(Debug)]
pub struct NotifyEventAction {
  project: ProjectId,
}

impl EventAction for NotifyEventAction {
  fn after(&self, event: &Arc<Event>, flags: EventFlags) -> Vec<Task> {
    let mut notification = Notification::for_event(event, flags);
    notification.project = self.project;
    vec![Task::Notify(notification)]
  }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Id -> factory table, built once at startup.
#[derive(Clone, Default)]
pub struct Registry {
  conditions: HashMap<String, ConditionFactory>,
  actions: HashMap<String, ActionFactory>,
}

impl Registry {
  /// A registry with no entries.
  pub fn empty() -> Self {
    Self::default()
  }

  /// A registry holding every built-in condition and action.
  pub fn with_builtins() -> Self {
    let mut registry = Self::empty();
    for condition in BuiltinCondition::ALL {
      registry.register_condition(condition.id(), move |_| -> Box<dyn EventCondition> {
        Box::new(condition)
      });
    }
    for action in BuiltinAction::ALL {
      registry.register_action(action.id(), move |project| action.bind(project));
    }
    registry
  }

  pub fn register_condition<F>(&mut self, id: impl Into<String>, factory: F)
  where
    F: Fn(ProjectId) -> Box<dyn EventCondition> + Send + Sync + 'static,
  {
    self.conditions.insert(id.into(), Arc::new(factory));
  }

  pub fn register_action<F>(&mut self, id: impl Into<String>, factory: F)
  where
    F: Fn(ProjectId) -> Box<dyn EventAction> + Send + Sync + 'static,
  {
    self.actions.insert(id.into(), Arc::new(factory));
  }

  pub fn condition(&self, id: &str) -> Result<&ConditionFactory, PipelineError> {
    self
      .conditions
      .get(id)
      .ok_or_else(|| PipelineError::UnknownCondition(id.to_string()))
  }

  pub fn action(&self, id: &str) -> Result<&ActionFactory, PipelineError> {
    self
      .actions
      .get(id)
      .ok_or_else(|| PipelineError::UnknownAction(id.to_string()))
  }

  /// Check that every condition and action id of `rule` is registered.
  pub fn validate(&self, rule: &Rule) -> Result<(), PipelineError> {
    for descriptor in &rule.data.conditions {
      self.condition(&descriptor.id)?;
    }
    for descriptor in &rule.data.actions {
      self.action(&descriptor.id)?;
    }
    Ok(())
  }

  /// Whether `rule` applies to this transition.
  ///
  /// `any` needs one passing condition, `all` needs every one; a rule with no
  /// conditions never applies.
  pub fn rule_matches(
    &self,
    rule: &Rule,
    event: &Event,
    flags: EventFlags,
  ) -> Result<bool, PipelineError> {
    if rule.data.conditions.is_empty() {
      return Ok(false);
    }
    let mut results = Vec::with_capacity(rule.data.conditions.len());
    for descriptor in &rule.data.conditions {
      let condition = (self.condition(&descriptor.id)?)(rule.project);
      results.push(condition.passes(event, flags));
    }
    Ok(match rule.data.action_match {
      ActionMatch::Any => results.iter().any(|passed| *passed),
      ActionMatch::All => results.iter().all(|passed| *passed),
    })
  }
}

impl fmt::Debug for Registry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut conditions: Vec<&str> = self.conditions.keys().map(String::as_str).collect();
    let mut actions: Vec<&str> = self.actions.keys().map(String::as_str).collect();
    conditions.sort_unstable();
    actions.sort_unstable();
    f.debug_struct("Registry")
      .field("conditions", &conditions)
      .field("actions", &actions)
      .finish()
  }
}

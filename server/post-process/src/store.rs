//! In-memory persistence: groups, their tags, and the rule set.

use std::collections::HashMap;

use crate::config::Config;
use crate::error::PipelineError;
use crate::types::*;

/// Batched tag writes against a group.
pub trait TagStore {
  /// Attach `tags` to `group` in order, as one write.
  fn add_tags(&mut self, group: GroupId, tags: &[Tag]) -> Result<(), PipelineError>;
}

/// Rule lookup for the orchestrator and the rule executor.
pub trait RuleSource {
  /// Rules of `project`, in configured order.
  fn get_rules(&self, project: ProjectId) -> Vec<&Rule>;
  fn get_rule(&self, id: RuleId) -> Option<&Rule>;
}

/// Ordered, project-scoped rule set.
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
  rules: Vec<Rule>,
}

impl RuleBook {
  pub fn new(rules: Vec<Rule>) -> Self {
    let mut book = Self::default();
    for rule in rules {
      book.insert(rule);
    }
    book
  }

  /// Add a rule, replacing any rule with the same id in place.
  pub fn insert(&mut self, rule: Rule) {
    match self.rules.iter_mut().find(|r| r.id == rule.id) {
      Some(existing) => *existing = rule,
      None => self.rules.push(rule),
    }
  }

  pub fn len(&self) -> usize {
    self.rules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }
}

impl RuleSource for RuleBook {
  fn get_rules(&self, project: ProjectId) -> Vec<&Rule> {
    self.rules.iter().filter(|r| r.project == project).collect()
  }

  fn get_rule(&self, id: RuleId) -> Option<&Rule> {
    self.rules.iter().find(|r| r.id == id)
  }
}

/// Groups keyed by id and by (project, fingerprint).
#[derive(Debug, Default)]
pub struct MemoryStore {
  groups: HashMap<GroupId, Group>,
  by_fingerprint: HashMap<(ProjectId, Fingerprint), GroupId>,
  last_group_id: u64,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Save `event` against its group (creating the group on first sight).
  ///
  /// Assigns `event.group_id` and returns the transition flags for post-processing.
  pub fn save_event(
    &mut self,
    event: &mut Event,
    fingerprint: Fingerprint,
    config: &Config,
  ) -> Result<(GroupId, EventFlags), PipelineError> {
    let key = (event.project, fingerprint);
    let id = match self.by_fingerprint.get(&key) {
      Some(id) => *id,
      None => {
        self.last_group_id += 1;
        let id = GroupId(self.last_group_id);
        self.groups.insert(id, Group::new(id, key.1.clone(), event));
        self.by_fingerprint.insert(key, id);
        id
      }
    };

    let group = self.groups.get_mut(&id).ok_or(PipelineError::GroupNotFound(id))?;
    let is_new = group.times_seen == 0;
    let is_regression = group.status == GroupStatus::Resolved;
    if is_regression {
      group.status = GroupStatus::Unresolved;
    }
    group.times_seen += 1;
    group.first_seen = group.first_seen.min(event.timestamp);
    group.last_seen = group.last_seen.max(event.timestamp);
    let is_sample = config.should_sample(group.times_seen);

    event.group_id = Some(id);
    Ok((id, EventFlags::new(is_new, is_regression, is_sample)))
  }

  pub fn resolve(&mut self, id: GroupId) -> Result<(), PipelineError> {
    let group = self.group_mut(id)?;
    group.status = GroupStatus::Resolved;
    Ok(())
  }

  pub fn group(&self, id: GroupId) -> Option<&Group> {
    self.groups.get(&id)
  }

  pub fn group_mut(&mut self, id: GroupId) -> Result<&mut Group, PipelineError> {
    self.groups.get_mut(&id).ok_or(PipelineError::GroupNotFound(id))
  }

  pub fn len(&self) -> usize {
    self.groups.len()
  }

  pub fn is_empty(&self) -> bool {
    self.groups.is_empty()
  }
}

impl TagStore for MemoryStore {
  fn add_tags(&mut self, group: GroupId, tags: &[Tag]) -> Result<(), PipelineError> {
    let group = self.group_mut(group)?;
    for tag in tags {
      match group
        .tags
        .iter_mut()
        .find(|t| t.key == tag.key && t.value == tag.value)
      {
        Some(existing) => {
          existing.times_seen += 1;
          existing.data = tag.data.clone();
        }
        None => group.tags.push(GroupTag {
          key: tag.key.clone(),
          value: tag.value.clone(),
          data: tag.data.clone(),
          times_seen: 1,
        }),
      }
    }
    Ok(())
  }
}

//! Core types for the pipeline (JSON contracts + internal models).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::interfaces::Interfaces;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_type {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct $name(pub u64);

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
      }
    }
  };
}

id_type!(
  /// Project owning groups and rules.
  ProjectId
);
id_type!(GroupId);
id_type!(RuleId);

// ---------------------------------------------------------------------------
// Inbound types (JSON contract — what the caller sends)
// ---------------------------------------------------------------------------

/// One inbound event line from stdin.
///
/// Top-level keys that are not declared here are collected into `extra`;
/// interface payloads are picked out of it during normalization and anything
/// else is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
  #[serde(default)]
  pub event_id: Option<String>,
  pub project: u64,
  pub message: String,
  #[serde(default)]
  pub timestamp: Option<String>,
  #[serde(default)]
  pub level: Option<String>,
  #[serde(default)]
  pub culprit: Option<String>,
  #[serde(default)]
  pub platform: Option<String>,
  #[serde(flatten)]
  pub extra: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Level enum (normalized)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
  Debug,
  Info,
  Warning,
  Error,
  Fatal,
}

impl Level {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "debug" => Some(Self::Debug),
      "info" | "log" => Some(Self::Info),
      "warning" | "warn" => Some(Self::Warning),
      "error" | "err" => Some(Self::Error),
      "fatal" | "critical" | "crit" => Some(Self::Fatal),
      _ => None,
    }
  }
}

// ---------------------------------------------------------------------------
// Internal normalized types
// ---------------------------------------------------------------------------

/// Canonical event after normalization + validation. Immutable once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
  pub event_id: String,
  pub project: ProjectId,
  /// Assigned when the event is saved against its group.
  pub group_id: Option<GroupId>,
  pub message: String,
  pub culprit: Option<String>,
  pub level: Level,
  pub platform: Option<String>,
  pub timestamp: DateTime<Utc>,
  pub interfaces: Interfaces,
}

/// Transition flags computed when an event is saved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventFlags {
  pub is_new: bool,
  pub is_regression: bool,
  pub is_sample: bool,
}

impl EventFlags {
  pub fn new(is_new: bool, is_regression: bool, is_sample: bool) -> Self {
    Self {
      is_new,
      is_regression,
      is_sample,
    }
  }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// A stable hex string identifying a unique group within a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
  Unresolved,
  Resolved,
}

/// Rule lifecycle of a group. Rules are evaluated only on `Seen -> New`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
  #[default]
  Seen,
  New,
}

/// A tag accumulated on a group, deduplicated by `(key, value)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupTag {
  pub key: String,
  pub value: String,
  pub data: Value,
  pub times_seen: u64,
}

/// Aggregated error occurrence keyed by (project, fingerprint).
#[derive(Debug, Clone)]
pub struct Group {
  pub id: GroupId,
  pub project: ProjectId,
  pub fingerprint: Fingerprint,
  pub message: String,
  pub culprit: Option<String>,
  pub level: Level,
  pub first_seen: DateTime<Utc>,
  pub last_seen: DateTime<Utc>,
  pub times_seen: u64,
  pub status: GroupStatus,
  pub state: GroupState,
  pub tags: Vec<GroupTag>,
}

impl Group {
  pub fn new(id: GroupId, fingerprint: Fingerprint, event: &Event) -> Self {
    Self {
      id,
      project: event.project,
      fingerprint,
      message: event.message.clone(),
      culprit: event.culprit.clone(),
      level: event.level,
      first_seen: event.timestamp,
      last_seen: event.timestamp,
      times_seen: 0,
      status: GroupStatus::Unresolved,
      state: GroupState::default(),
      tags: Vec::new(),
    }
  }

  /// Move the rule lifecycle to `New` or `Seen`.
  ///
  /// Returns true only when the group entered `New` from `Seen`.
  pub fn transition(&mut self, is_new: bool) -> bool {
    let next = if is_new { GroupState::New } else { GroupState::Seen };
    let entered_new = self.state == GroupState::Seen && next == GroupState::New;
    self.state = next;
    entered_new
  }

  pub fn tag(&self, key: &str, value: &str) -> Option<&GroupTag> {
    self.tags.iter().find(|t| t.key == key && t.value == value)
  }
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// A tag to attach to a group: key, value and free-form metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
  pub key: String,
  pub value: String,
  pub data: Value,
}

impl Tag {
  pub fn new(key: impl Into<String>, value: impl Into<String>, data: Value) -> Self {
    Self {
      key: key.into(),
      value: value.into(),
      data,
    }
  }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// How the conditions of a rule combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionMatch {
  #[default]
  Any,
  All,
}

/// A condition or action reference, resolved by id against the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
  pub id: String,
}

impl Descriptor {
  pub fn new(id: impl Into<String>) -> Self {
    Self { id: id.into() }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleData {
  #[serde(default)]
  pub action_match: ActionMatch,
  #[serde(default)]
  pub conditions: Vec<Descriptor>,
  #[serde(default)]
  pub actions: Vec<Descriptor>,
}

/// Project-scoped alert rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
  pub id: RuleId,
  pub project: ProjectId,
  #[serde(default)]
  pub label: String,
  #[serde(default)]
  pub data: RuleData,
}

// ---------------------------------------------------------------------------
// Output types (JSON contract — what we emit)
// ---------------------------------------------------------------------------

/// Emitted once per fired notify action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub project: ProjectId,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub group_id: Option<GroupId>,
  pub event_id: String,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub culprit: Option<String>,
  pub level: Level,
  pub is_new: bool,
  pub is_regression: bool,
  pub timestamp: String,
}

impl Notification {
  pub fn for_event(event: &Event, flags: EventFlags) -> Self {
    Self {
      project: event.project,
      group_id: event.group_id,
      event_id: event.event_id.clone(),
      message: event.message.clone(),
      culprit: event.culprit.clone(),
      level: event.level,
      is_new: flags.is_new,
      is_regression: flags.is_regression,
      timestamp: event.timestamp.to_rfc3339(),
    }
  }
}

/// Structured error output for invalid input lines.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      field: None,
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }
}

//! Normalize inbound events into canonical internal Event models.

use chrono::{DateTime, Utc};

use crate::error::PipelineError;
use crate::interfaces::{Interfaces, StackFrame};
use crate::types::*;

/// Parse and normalize an InboundEvent into a canonical Event.
pub fn normalize(raw: &InboundEvent) -> Result<Event, PipelineError> {
  if raw.project == 0 {
    return Err(PipelineError::validation("project", "must be a positive id"));
  }
  if raw.message.trim().is_empty() {
    return Err(PipelineError::validation("message", "must not be empty"));
  }

  // Missing timestamp means "received now".
  let timestamp: DateTime<Utc> = match &raw.timestamp {
    Some(ts) => DateTime::parse_from_rfc3339(ts)
      .map_err(|e| PipelineError::validation("timestamp", &format!("invalid RFC3339: {}", e)))?
      .with_timezone(&Utc),
    None => Utc::now(),
  };

  let level = match &raw.level {
    Some(l) => Level::from_str_loose(l).ok_or_else(|| {
      PipelineError::validation("level", "expected debug|info|warning|error|fatal")
    })?,
    None => Level::Error,
  };

  let project = ProjectId(raw.project);
  let event_id = match &raw.event_id {
    Some(id) => normalize_event_id(id)?,
    None => derive_event_id(project, &timestamp, &raw.message),
  };

  let interfaces = Interfaces::from_fields(&raw.extra)?;
  let culprit = raw
    .culprit
    .clone()
    .filter(|c| !c.is_empty())
    .or_else(|| derive_culprit(&interfaces));

  Ok(Event {
    event_id,
    project,
    group_id: None,
    message: raw.message.clone(),
    culprit,
    level,
    platform: raw.platform.as_ref().map(|p| p.to_ascii_lowercase()),
    timestamp,
    interfaces,
  })
}

/// Accept UUIDs with or without dashes, any case; store 32 lowercase hex chars.
fn normalize_event_id(id: &str) -> Result<String, PipelineError> {
  let hex: String = id
    .chars()
    .filter(|c| *c != '-')
    .map(|c| c.to_ascii_lowercase())
    .collect();
  if hex.len() != 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
    return Err(PipelineError::validation("event_id", "expected 32 hex chars"));
  }
  Ok(hex)
}

/// Stable id for events sent without one.
fn derive_event_id(project: ProjectId, timestamp: &DateTime<Utc>, message: &str) -> String {
  let mut hasher = blake3::Hasher::new();
  hasher.update(project.to_string().as_bytes());
  hasher.update(b"|");
  hasher.update(timestamp.to_rfc3339().as_bytes());
  hasher.update(b"|");
  hasher.update(message.as_bytes());
  let hex = hasher.finalize().to_hex();
  hex[..32].to_string()
}

/// Most recent in-app frame (frames are oldest first), else the most recent frame.
fn derive_culprit(interfaces: &Interfaces) -> Option<String> {
  let frames = interfaces.grouping_frames();
  let frame: &StackFrame = frames
    .iter()
    .rev()
    .find(|f| f.is_in_app())
    .or_else(|| frames.last())?;
  let location = frame.module.as_deref().or(frame.filename.as_deref())?;
  Some(match &frame.function {
    Some(function) => format!("{} in {}", location, function),
    None => location.to_string(),
  })
}

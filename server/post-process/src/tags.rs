//! Affected-user and affected-code tagging.
//!
//! Extraction is a pure function of the event; the `record_*` tasks write the
//! extracted tags to the store in one batch.

use serde_json::json;

use crate::error::PipelineError;
use crate::store::TagStore;
use crate::types::{Event, GroupId, Tag};

pub const USER_TAG: &str = "sentry:user";
pub const FILENAME_TAG: &str = "sentry:filename";
pub const FUNCTION_TAG: &str = "sentry:function";

/// Opaque dedup key for code locations: lowercase md5 hex.
fn location_hash(input: &str) -> String {
  format!("{:x}", md5::compute(input))
}

/// The `sentry:user` tag for the event's user, if it carries one.
pub fn affected_user_tags(event: &Event) -> Vec<Tag> {
  let Some(user) = &event.interfaces.user else {
    return Vec::new();
  };
  let Some((field, value)) = user.ident() else {
    return Vec::new();
  };
  vec![Tag::new(
    USER_TAG,
    format!("{}:{}", field, value),
    json!({
      "id": user.id,
      "email": user.email,
      "username": user.username,
      "data": user.data,
    }),
  )]
}

/// Filename and function tags for every in-app frame, in encounter order.
pub fn affected_code_tags(event: &Event) -> Vec<Tag> {
  let Some(exception) = &event.interfaces.exception else {
    return Vec::new();
  };

  let mut tags = Vec::new();
  for frame in exception.frames().filter(|f| f.is_in_app()) {
    let Some(filename) = frame.filename.as_deref() else {
      continue;
    };
    tags.push(Tag::new(
      FILENAME_TAG,
      location_hash(filename),
      json!({ "filename": filename }),
    ));
    if let Some(function) = frame.function.as_deref() {
      tags.push(Tag::new(
        FUNCTION_TAG,
        location_hash(&format!("{}:{}", filename, function)),
        json!({ "filename": filename, "function": function }),
      ));
    }
  }
  tags
}

pub fn record_affected_user<S: TagStore + ?Sized>(
  store: &mut S,
  group: GroupId,
  event: &Event,
) -> Result<(), PipelineError> {
  let tags = affected_user_tags(event);
  if tags.is_empty() {
    return Ok(());
  }
  tracing::debug!(group = %group, event_id = %event.event_id, "recording affected user");
  store.add_tags(group, &tags)
}

pub fn record_affected_code<S: TagStore + ?Sized>(
  store: &mut S,
  group: GroupId,
  event: &Event,
) -> Result<(), PipelineError> {
  let tags = affected_code_tags(event);
  if tags.is_empty() {
    return Ok(());
  }
  tracing::debug!(group = %group, count = tags.len(), "recording affected code");
  store.add_tags(group, &tags)
}
